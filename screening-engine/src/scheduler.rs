use crate::orchestrator::ScreeningOrchestrator;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

/// Periodic refresh of every enabled source
pub struct RefreshScheduler {
    orchestrator: ScreeningOrchestrator,
    period: Duration,
}

pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops after the cycle in progress, if any
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

impl RefreshScheduler {
    pub fn new(orchestrator: ScreeningOrchestrator, period: Duration) -> Self {
        Self { orchestrator, period }
    }

    /// The first cycle runs immediately
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting source refresh loop with {}s interval", self.period.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.orchestrator.refresh_all().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Source refresh loop stopped");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::LogAlertSink;
    use crate::cache::ResultCache;
    use crate::config::EngineConfig;
    use crate::registry::{SourceRegistry, SourceSettings};
    use crate::sources::StaticListAdapter;
    use crate::types::ListKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_scheduler_refreshes_and_stops() {
        let registry = Arc::new(SourceRegistry::new());
        registry.register(
            Arc::new(StaticListAdapter::new("internal", Vec::new())),
            SourceSettings::new(ListKind::Sanctions, 0, Duration::from_secs(1)),
        );
        let orchestrator = ScreeningOrchestrator::new(
            &EngineConfig::default(),
            registry.clone(),
            Arc::new(ResultCache::in_memory(Duration::from_secs(60))),
            Arc::new(LogAlertSink),
        );

        let handle = RefreshScheduler::new(orchestrator, Duration::from_secs(3600)).start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.status()["internal"].last_refresh.is_some());

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .unwrap();
    }
}
