//! Failure categories and their mapping to terminal statuses.

use thiserror::Error;

use crate::model::TaskStatus;

/// Why a harvest failed. Raised where the failure happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkFailure {
    #[error("network failure: {0}")]
    Network(String),

    #[error("sku not found: {0}")]
    SkuNotFound(String),

    #[error("detail page error: {0}")]
    DetailPage(String),

    #[error("{0}")]
    Unknown(String),
}

const NETWORK_INDICATORS: &[&str] = &[
    "network",
    "red galáctico",
    "connection",
    "connect",
    "timed out",
    "timeout",
    "unreachable",
    "dns",
];
const NOT_FOUND_INDICATORS: &[&str] = &["not found", "no encontrado", "sku"];
const DETAIL_PAGE_INDICATORS: &[&str] = &["detail page", "detalle", "parse", "parsing"];

impl WorkFailure {
    /// Categorize free-form failure text.
    ///
    /// First match wins: network, then not-found, then detail page.
    pub fn from_description(description: impl Into<String>) -> Self {
        let description = description.into();
        let lowered = description.to_lowercase();
        let matches = |indicators: &[&str]| indicators.iter().any(|i| lowered.contains(i));

        if matches(NETWORK_INDICATORS) {
            WorkFailure::Network(description)
        } else if matches(NOT_FOUND_INDICATORS) {
            WorkFailure::SkuNotFound(description)
        } else if matches(DETAIL_PAGE_INDICATORS) {
            WorkFailure::DetailPage(description)
        } else {
            WorkFailure::Unknown(description)
        }
    }

    /// The raw description, without the category prefix.
    pub fn description(&self) -> &str {
        match self {
            WorkFailure::Network(d)
            | WorkFailure::SkuNotFound(d)
            | WorkFailure::DetailPage(d)
            | WorkFailure::Unknown(d) => d,
        }
    }
}

/// Map a failure to the terminal status it leaves the task in.
pub fn classify(failure: &WorkFailure) -> TaskStatus {
    match failure {
        WorkFailure::Network(_) => TaskStatus::NetworkError,
        WorkFailure::SkuNotFound(_) => TaskStatus::SkuNotFound,
        WorkFailure::DetailPage(_) => TaskStatus::DetailPageError,
        WorkFailure::Unknown(_) => TaskStatus::UnknownError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_category_has_its_own_bucket() {
        assert_eq!(
            classify(&WorkFailure::Network("x".into())),
            TaskStatus::NetworkError
        );
        assert_eq!(
            classify(&WorkFailure::SkuNotFound("x".into())),
            TaskStatus::SkuNotFound
        );
        assert_eq!(
            classify(&WorkFailure::DetailPage("x".into())),
            TaskStatus::DetailPageError
        );
        assert_eq!(
            classify(&WorkFailure::Unknown("x".into())),
            TaskStatus::UnknownError
        );
    }

    #[test]
    fn network_wins_over_sku() {
        let failure = WorkFailure::from_description("network timeout while looking up SKU ABC");
        assert_eq!(classify(&failure), TaskStatus::NetworkError);
    }

    #[test]
    fn not_found_wins_over_detail_page() {
        let failure = WorkFailure::from_description("SKU missing on detail page");
        assert_eq!(classify(&failure), TaskStatus::SkuNotFound);
    }

    #[test]
    fn recognizes_each_indicator_family() {
        assert_eq!(
            WorkFailure::from_description("Fallo de red galáctico"),
            WorkFailure::Network("Fallo de red galáctico".into())
        );
        assert_eq!(
            classify(&WorkFailure::from_description("SKU no encontrado")),
            TaskStatus::SkuNotFound
        );
        assert_eq!(
            classify(&WorkFailure::from_description("Error en página de detalle")),
            TaskStatus::DetailPageError
        );
        assert_eq!(
            classify(&WorkFailure::from_description("disk full")),
            TaskStatus::UnknownError
        );
    }

    #[test]
    fn description_drops_category_prefix() {
        let failure = WorkFailure::SkuNotFound("SKU_NO_ENCONTRADO".into());
        assert_eq!(failure.description(), "SKU_NO_ENCONTRADO");
        assert_eq!(failure.to_string(), "sku not found: SKU_NO_ENCONTRADO");
    }
}
