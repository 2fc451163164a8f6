//! The work step an agent runs for each task.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::classify::WorkFailure;
use crate::model::Task;

/// Vendor URLs containing this fail with a network error.
pub const FAIL_LOAD_MARKER: &str = "fail_load";
/// SKU that the simulated vendor never stocks.
pub const MISSING_SKU: &str = "SKU_NO_ENCONTRADO";
/// SKU whose detail page cannot be parsed.
pub const BROKEN_DETAIL_SKU: &str = "ERROR_PAGINA_DETALLE";

/// Harvests one task. Must not have irreversible side effects: a crash before
/// the status commit re-runs it on redelivery.
#[async_trait]
pub trait Harvester: Send + Sync {
    async fn harvest(&self, task: &Task) -> Result<serde_json::Value, WorkFailure>;
}

/// Stand-in harvester with deterministic failure triggers.
#[derive(Debug, Clone)]
pub struct SimulatedHarvester {
    base_delay: Duration,
}

impl SimulatedHarvester {
    /// Each harvest sleeps `base_delay * (1 + len(sku) % 3)`.
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Default for SimulatedHarvester {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl Harvester for SimulatedHarvester {
    async fn harvest(&self, task: &Task) -> Result<serde_json::Value, WorkFailure> {
        let factor = 1 + (task.resource_sku.len() % 3) as u32;
        tokio::time::sleep(self.base_delay * factor).await;

        if task.vendor_url.contains(FAIL_LOAD_MARKER) {
            return Err(WorkFailure::Network(format!(
                "vendor {} did not respond",
                task.vendor_url
            )));
        }
        match task.resource_sku.as_str() {
            MISSING_SKU => Err(WorkFailure::SkuNotFound(format!(
                "{} is not listed by {}",
                task.resource_sku, task.vendor_url
            ))),
            BROKEN_DETAIL_SKU => Err(WorkFailure::DetailPage(format!(
                "could not parse detail page for {}",
                task.resource_sku
            ))),
            sku => Ok(json!({
                "data": format!("simulated harvest of {sku}"),
                "vendor_url": task.vendor_url,
            })),
        }
    }
}
