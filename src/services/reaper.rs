//! Background lease reaper.

use chrono::Utc;
use sqlx::PgPool;
use tokio::task::JoinHandle;

use crate::config::QueueConfig;

/// Periodically reclaim expired leases. Returns `None` when the interval is zero.
pub fn spawn(pool: PgPool, config: QueueConfig) -> Option<JoinHandle<()>> {
    if config.reaper_interval.is_zero() {
        tracing::info!("Lease reaper disabled");
        return None;
    }

    tracing::info!(
        interval_secs = config.reaper_interval.as_secs(),
        lease_timeout_secs = config.lease_timeout.as_secs(),
        "Starting lease reaper"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.reaper_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match super::scan_queue::reclaim_expired(&pool, Utc::now(), &config).await {
                Ok(reclaimed) if !reclaimed.is_empty() => {
                    tracing::info!(count = reclaimed.len(), "Lease reaper sweep reclaimed entries");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Lease reaper sweep failed"),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sqlx::postgres::PgPoolOptions;

    use super::*;

    #[tokio::test]
    async fn zero_interval_disables_reaper() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let config = QueueConfig {
            reaper_interval: Duration::ZERO,
            ..QueueConfig::default()
        };
        assert!(spawn(pool, config).is_none());
    }
}
