//! Main application state and service coordination
//!
//! `AppState` owns the matchmaker, the backup controller, the metrics
//! service and the scheduled tasks. Every task listens on one broadcast
//! shutdown signal; shutdown waits for them and then writes a final snapshot.

use crate::backup::{store_from_settings, BackupController, RestoreOutcome};
use crate::config::AppConfig;
use crate::engine::Matchmaker;
use crate::events::{BroadcastEventPublisher, EventPublisher, LoggingEventPublisher};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::service::health::{HealthCheck, HealthStatus, ServiceProbe};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Backup error: {message}")]
    Backup { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    matchmaker: Matchmaker,
    event_publisher: Arc<BroadcastEventPublisher>,
    backup: Option<Arc<BackupController>>,
    metrics_service: Arc<MetricsService>,
    probe: ServiceProbe,
    background_tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_tx: broadcast::Sender<()>,
    is_running: Arc<RwLock<bool>>,
    last_restore: Option<RestoreOutcome>,
}

impl AppState {
    /// Build every component; nothing runs until `start`
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing draft-room matchmaking service");
        info!(
            "Configuration: service={}, modes={}, backups={}",
            config.service.name,
            config.matchmaking.modes.len(),
            if config.backup.enabled { "on" } else { "off" }
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let event_publisher = Arc::new(BroadcastEventPublisher::default());
        let matchmaker = Matchmaker::with_metrics(
            &config,
            event_publisher.clone(),
            metrics_collector.clone(),
        )
        .map_err(|e| ServiceError::Configuration {
            message: format!("Failed to build matchmaking engine: {}", e),
        })?;

        let backup = if config.backup.enabled {
            let store = store_from_settings(&config.backup);
            Some(Arc::new(
                BackupController::new(store, &config.backup)
                    .with_metrics(metrics_collector.clone()),
            ))
        } else {
            info!("Backups disabled - state will not survive restarts");
            None
        };

        let is_running = Arc::new(RwLock::new(false));
        let probe = ServiceProbe {
            service_name: config.service.name.clone(),
            matchmaker: matchmaker.clone(),
            backup: backup.clone(),
            is_running: is_running.clone(),
            started_at: Instant::now(),
        };

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone()).with_probe(probe.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(metrics_collector, health_server));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            matchmaker,
            event_publisher,
            backup,
            metrics_service,
            probe,
            background_tasks: Vec::new(),
            shutdown_tx,
            is_running,
            last_restore: None,
        })
    }

    /// Restore state, then start the health server and scheduled tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting draft-room matchmaking service");

        // restore runs before anything can issue commands
        if let Some(backup) = &self.backup {
            let outcome = backup.restore(&self.matchmaker).await;
            info!("Startup restore: {}", outcome.label());
            self.last_restore = Some(outcome);
        }

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_event_log();
        self.start_maintenance_task();
        self.start_snapshot_task();
        self.start_health_metrics_task();

        info!(
            "✅ Draft-room service started with {} background tasks",
            self.background_tasks.len()
        );
        Ok(())
    }

    /// Stop tasks, then write the final snapshot
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of draft-room service");

        *self.is_running.write().await = false;

        // no receivers just means no task is running
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }
        self.stop_background_tasks().await;

        let final_stats = self.matchmaker.stats().await;
        info!("Final engine statistics: {:?}", final_stats);

        if let Some(backup) = &self.backup {
            match backup.snapshot(&self.matchmaker).await {
                Ok(info) => info!("✅ Final snapshot {} written", info.version),
                Err(e) => {
                    error!("Final snapshot failed: {}", e);
                    return Err(ServiceError::Backup {
                        message: format!("Final snapshot failed: {}", e),
                    });
                }
            }
        }

        info!("✅ Draft-room service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn matchmaker(&self) -> Matchmaker {
        self.matchmaker.clone()
    }

    /// Event fan-out for the command dispatcher and operator channel
    pub fn events(&self) -> Arc<BroadcastEventPublisher> {
        self.event_publisher.clone()
    }

    pub fn backup(&self) -> Option<Arc<BackupController>> {
        self.backup.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn probe(&self) -> ServiceProbe {
        self.probe.clone()
    }

    pub fn last_restore(&self) -> Option<&RestoreOutcome> {
        self.last_restore.as_ref()
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(("health_server", handle));

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Health and metrics endpoints on port {}", port);
        Ok(())
    }

    /// Mirror every engine event to the log
    fn start_event_log(&mut self) {
        let mut events = self.event_publisher.stream();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let logger = LoggingEventPublisher;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    next = events.next() => match next {
                        Some(Ok(event)) => {
                            if let Err(e) = logger.publish(event).await {
                                warn!("Failed to log event: {}", e);
                            }
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                            warn!("Event log fell behind, {} events not logged", missed);
                        }
                        None => break,
                    },
                }
            }
            debug!("Event log task stopped");
        });
        self.background_tasks.push(("event_log", handle));
    }

    /// Confirmation expiry, ghost sweep and re-drafting on a fixed interval
    fn start_maintenance_task(&mut self) {
        let matchmaker = self.matchmaker.clone();
        let period = self.config.sweep_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("Starting maintenance task ({}s interval)", period.as_secs());
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        let report = matchmaker.run_maintenance().await;
                        if report.expired.is_empty()
                            && report.sweep.is_empty()
                            && report.formed.is_empty()
                        {
                            debug!("Maintenance tick: nothing to do");
                        } else {
                            info!(
                                "Maintenance tick: {} expired, {} ghosted, {} substituted, {} cancelled, {} formed",
                                report.expired.len(),
                                report.sweep.newly_ghosted.len(),
                                report.sweep.substitutions.len(),
                                report.sweep.cancellations.len(),
                                report.formed.len()
                            );
                        }
                    }
                }
            }
            info!("Maintenance task stopped");
        });
        self.background_tasks.push(("maintenance", handle));
    }

    /// Periodic snapshots. The first tick fires immediately so a fresh
    /// snapshot follows every restore.
    fn start_snapshot_task(&mut self) {
        let Some(backup) = self.backup.clone() else {
            return;
        };
        let matchmaker = self.matchmaker.clone();
        let period = self.config.snapshot_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("Starting snapshot task ({}s interval)", period.as_secs());
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        // failures are recorded by the controller and retried next tick
                        if let Err(e) = backup.snapshot(&matchmaker).await {
                            debug!("Scheduled snapshot failed: {}", e);
                        }
                    }
                }
            }
            info!("Snapshot task stopped");
        });
        self.background_tasks.push(("snapshot", handle));
    }

    fn start_health_metrics_task(&mut self) {
        let probe = self.probe.clone();
        let metrics_collector = self.metrics_service.collector();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        metrics_collector.update_uptime(probe.uptime());
                        match HealthCheck::check(&probe).await {
                            Ok(health) => {
                                metrics_collector.update_health_status(health.status.gauge_value());
                                for check in &health.checks {
                                    metrics_collector.update_component_health(
                                        &check.name,
                                        check.status == HealthStatus::Healthy,
                                    );
                                }
                                if let Some(stats) = &health.engine {
                                    metrics_collector.update_from_engine_stats(stats);
                                }
                            }
                            Err(e) => warn!("Health metrics update failed: {}", e),
                        }
                    }
                }
            }
            debug!("Health metrics task stopped");
        });
        self.background_tasks.push(("health_metrics", handle));
    }

    /// Wait for every task within the shutdown timeout, aborting stragglers
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();

        for (name, handle) in self.background_tasks.drain(..) {
            let abort = handle.abort_handle();
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => debug!("Background task {} finished", name),
                Ok(Err(e)) => warn!("Background task {} ended abnormally: {}", name, e),
                Err(_) => {
                    warn!("Background task {} did not stop in time, aborting", name);
                    abort.abort();
                }
            }
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
