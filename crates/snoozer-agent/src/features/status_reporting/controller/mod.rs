use std::sync::Arc;
use std::time::Duration;

use snoozer_core::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::features::status_reporting::service::{
    LocalStatus, StatusReportService, StatusReportServiceError,
};

#[derive(Clone)]
pub struct StatusReportController {
    service: Arc<StatusReportService>,
    interval: Duration,
}

impl StatusReportController {
    pub fn new(service: Arc<StatusReportService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn service(&self) -> &Arc<StatusReportService> {
        &self.service
    }

    /// Reports every interval until `shutdown` flips to true.
    pub fn spawn_periodic_reporting(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Periodic reporting stopped");
                            return;
                        }
                        continue;
                    }
                }

                match self.service.report_heartbeat().await {
                    Ok(status) => debug!(state = %status.state, "Reporting cycle complete"),
                    Err(error) => warn!(error = %error, "Reporting cycle failed"),
                }
            }
        })
    }

    pub async fn register(&self) -> Result<String, StatusReportServiceError> {
        self.service.register().await
    }

    pub async fn unregister(&self) -> Result<(), StatusReportServiceError> {
        self.service.unregister().await
    }

    pub async fn report_heartbeat(&self) -> Result<LocalStatus, StatusReportServiceError> {
        self.service.report_heartbeat().await
    }

    pub async fn execute(&self, command: &Command) -> Result<(), StatusReportServiceError> {
        self.service.execute(command).await
    }

    pub async fn status(&self) -> LocalStatus {
        self.service.status().await
    }
}
