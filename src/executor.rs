use crate::model::Fragment;
use crate::traits::{HarvestError, Harvester};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

pub struct HarvesterExecutor {
    semaphore: Arc<Semaphore>,
}

impl HarvesterExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
        }
    }

    /// Runs a blocking harvest on the blocking pool, bounded by the permit count.
    #[instrument(skip(self, harvester))]
    pub async fn execute<H>(
        &self,
        harvester: Arc<H>,
        argument: String,
    ) -> Result<Vec<Fragment>, HarvestError>
    where
        H: Harvester + ?Sized + 'static,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| HarvestError::Task(format!("Semaphore error: {}", e)))?;

        info!("Starting harvest with harvester: {}", harvester.harvester_id());

        let worker = Arc::clone(&harvester);
        let result = tokio::task::spawn_blocking(move || worker.harvest(&argument))
            .await
            .map_err(|e| HarvestError::Task(format!("Task join error: {}", e)))?;

        info!(
            fragments = result.as_ref().map(|f| f.len()).unwrap_or(0),
            "Finished harvest with harvester: {}",
            harvester.harvester_id()
        );
        result
    }
}
