use crate::coordinator::Snapshot;
use crate::entity::SensorEntity;
use crate::home_assistant::HomeAssistantApi;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;

/// Pushes entity states to Home Assistant whenever a new snapshot is published
pub struct HomeAssistantPublisher {
    entities: Vec<SensorEntity>,
    api: HomeAssistantApi,
    snapshots: watch::Receiver<Option<Snapshot>>,
}

impl HomeAssistantPublisher {
    pub fn new(
        entities: Vec<SensorEntity>,
        api: HomeAssistantApi,
        snapshots: watch::Receiver<Option<Snapshot>>,
    ) -> Self {
        info!("Home Assistant publisher config:");
        for entity in &entities {
            info!("  {} ({})", entity.entity_id(), entity.unique_id());
        }
        Self {
            entities,
            api,
            snapshots,
        }
    }

    /// Spawns the publisher in its own task
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!("Starting Home Assistant publisher");

        // Register every entity up front, as unavailable if nothing was read yet
        self.snapshots.borrow_and_update();
        self.publish_all().await;

        while self.snapshots.changed().await.is_ok() {
            self.publish_all().await;
        }

        info!("Snapshot feed closed, Home Assistant publisher exiting");
    }

    /// Publishes every entity once. Returns how many were accepted.
    pub async fn publish_all(&self) -> usize {
        let mut published = 0;
        for entity in &self.entities {
            match self.publish_with_retry(entity).await {
                Ok(()) => published += 1,
                Err(e) => warn!("Home Assistant publish error: {}", e),
            }
        }
        published
    }

    async fn publish_with_retry(&self, entity: &SensorEntity) -> Result<(), String> {
        let entity_id = entity.entity_id();
        let payload = entity.state_payload();

        let mut attempt = 1;
        loop {
            match self.api.publish_state(&entity_id, &payload).await {
                Ok(_) => {
                    debug!("Published {} = {}", entity_id, payload.state);
                    return Ok(());
                }
                Err(e) if attempt < MAX_RETRIES => {
                    debug!(
                        "Publish attempt {} for {} failed: {}. Retrying...",
                        attempt, entity_id, e
                    );
                    sleep(Duration::from_millis(200 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(format!(
                        "All {} attempts for {} failed. Last error: {}",
                        MAX_RETRIES, entity_id, e
                    ));
                }
            }
        }
    }
}
