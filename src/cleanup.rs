use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::ColumnTrait;
use sea_orm::DatabaseConnection;
use sea_orm::EntityTrait;
use sea_orm::QueryFilter;
use sea_orm::QueryOrder;
use sea_orm::QuerySelect;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::entities::chat_message;
use crate::storage::StorageClient;

const MAX_SWEEP_ITERATIONS: usize = 2048;

/// Periodic retention sweep: chat messages past the retention window are
/// deleted in batches, media objects first. A message whose attachment
/// cannot be removed from storage is kept for the next pass so orphaned
/// objects never outlive their ledger row.
pub struct ChatSweeper {
    database: DatabaseConnection,
    storage: Arc<StorageClient>,
    config: ChatConfig,
}

impl ChatSweeper {
    pub fn new(
        database: DatabaseConnection,
        storage: Arc<StorageClient>,
        config: ChatConfig,
    ) -> Self {
        assert!(config.retention_days >= 0, "Retention cannot be negative");
        Self {
            database,
            storage,
            config,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.config.retention_days <= 0 {
            info!("Chat retention disabled, sweeper exits");
            return Ok(());
        }
        info!(
            "Starting chat retention sweeper ({} days)",
            self.config.retention_days
        );

        loop {
            if let Err(err) = self.sweep().await {
                warn!("Chat retention sweep failed: {err}");
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Sweeper shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting sweeper loop");
                            break;
                        }
                    }
                }
                _ = sleep(self.config.cleanup_interval()) => {}
            }
        }

        Ok(())
    }

    async fn sweep(&self) -> Result<()> {
        let cutoff =
            (Utc::now() - ChronoDuration::days(self.config.retention_days)).fixed_offset();
        let batch_size = self.config.cleanup_batch_size;
        let mut total_deleted = 0u64;

        for _ in 0..MAX_SWEEP_ITERATIONS {
            let expired = chat_message::Entity::find()
                .filter(chat_message::Column::CreatedAt.lt(cutoff))
                .order_by_asc(chat_message::Column::Id)
                .limit(batch_size)
                .all(&self.database)
                .await?;
            if expired.is_empty() {
                break;
            }
            let batch_len = expired.len() as u64;

            let mut delete_ids = Vec::with_capacity(expired.len());
            for message in &expired {
                if let Some(key) = message.media_key.as_deref() {
                    if !self.storage.delete_object(key).await {
                        continue;
                    }
                }
                delete_ids.push(message.id);
            }
            if delete_ids.is_empty() {
                break;
            }

            let deleted = chat_message::Entity::delete_many()
                .filter(chat_message::Column::Id.is_in(delete_ids))
                .exec(&self.database)
                .await?;
            total_deleted += deleted.rows_affected;

            if batch_len < batch_size {
                break;
            }
        }

        if total_deleted > 0 {
            info!("Chat retention sweep deleted {total_deleted} messages");
        } else {
            debug!("Chat retention sweep found nothing to delete");
        }
        Ok(())
    }
}
