//! Metrics collection using Prometheus
//!
//! Metric groups mirror the engine's components: service, queue, session,
//! ghost, backup and performance.

use crate::engine::EngineStats;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    service_metrics: ServiceMetrics,
    queue_metrics: QueueMetrics,
    session_metrics: SessionMetrics,
    ghost_metrics: GhostMetrics,
    backup_metrics: BackupMetrics,
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Commands handled, by command and status
    pub commands_total: IntCounterVec,

    /// Rejected commands, by error kind
    pub command_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,

    /// Registered players by status
    pub players: IntGaugeVec,
}

/// Queue metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Players currently waiting, by mode
    pub players_waiting: IntGaugeVec,

    /// Total queue joins, by mode
    pub joins_total: IntCounterVec,

    /// Total voluntary queue leaves, by mode
    pub leaves_total: IntCounterVec,

    /// Time spent waiting before being drafted into a match
    pub queue_wait_time_seconds: HistogramVec,
}

/// Session metrics
#[derive(Clone)]
pub struct SessionMetrics {
    /// Live sessions by state
    pub live_sessions: IntGaugeVec,

    /// Sessions formed, by mode
    pub sessions_formed_total: IntCounterVec,

    /// Sessions completed, by mode
    pub sessions_completed_total: IntCounterVec,

    /// Sessions cancelled, by reason
    pub sessions_cancelled_total: IntCounterVec,

    /// Rating-sum spread of formed matchups
    pub team_spread: HistogramVec,

    /// Disputed result claims
    pub disputes_total: IntCounter,
}

/// Ghost sweep metrics
#[derive(Clone)]
pub struct GhostMetrics {
    pub ghosts_flagged_total: IntCounter,
    pub substitutions_total: IntCounter,
    pub ghost_cancellations_total: IntCounter,
    pub sweep_duration_seconds: Histogram,
}

/// Snapshot and restore metrics
#[derive(Clone)]
pub struct BackupMetrics {
    /// Snapshot writes by status
    pub snapshots_total: IntCounterVec,

    /// Snapshot write time
    pub snapshot_duration_seconds: Histogram,

    /// Size of the last written snapshot
    pub snapshot_bytes: IntGauge,

    /// Version of the last written snapshot
    pub last_snapshot_version: IntGauge,

    /// Restores by outcome
    pub restores_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Command handling time
    pub command_duration: HistogramVec,

    /// Team formation time
    pub formation_duration: Histogram,

    /// Rating calculation time
    pub rating_calculation_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let session_metrics = SessionMetrics::new(&registry)?;
        let ghost_metrics = GhostMetrics::new(&registry)?;
        let backup_metrics = BackupMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            session_metrics,
            ghost_metrics,
            backup_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn session(&self) -> &SessionMetrics {
        &self.session_metrics
    }

    pub fn ghost(&self) -> &GhostMetrics {
        &self.ghost_metrics
    }

    pub fn backup(&self) -> &BackupMetrics {
        &self.backup_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh gauges from an engine stats sample
    pub fn update_from_engine_stats(&self, stats: &EngineStats) {
        for (mode, waiting) in &stats.waiting_by_mode {
            self.queue_metrics
                .players_waiting
                .with_label_values(&[mode.as_str()])
                .set(*waiting as i64);
        }

        let sessions = &stats.sessions;
        for (state, count) in [
            ("forming", sessions.forming),
            ("confirming", sessions.confirming),
            ("active", sessions.active),
        ] {
            self.session_metrics
                .live_sessions
                .with_label_values(&[state])
                .set(count as i64);
        }

        for (status, count) in [
            ("idle", stats.idle_players),
            ("queued", stats.queued_players),
            ("in_match", stats.in_match_players),
            ("ghost", stats.ghost_players),
        ] {
            self.service_metrics
                .players
                .with_label_values(&[status])
                .set(count as i64);
        }
    }

    /// Record a handled command
    pub fn record_command(&self, command: &str, error_kind: Option<&str>, duration: Duration) {
        let status = if error_kind.is_some() { "rejected" } else { "ok" };
        self.service_metrics
            .commands_total
            .with_label_values(&[command, status])
            .inc();

        if let Some(kind) = error_kind {
            self.service_metrics
                .command_errors_total
                .with_label_values(&[kind])
                .inc();
        }

        self.performance_metrics
            .command_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    pub fn record_join(&self, mode: &str) {
        self.queue_metrics.joins_total.with_label_values(&[mode]).inc();
    }

    pub fn record_leave(&self, mode: &str) {
        self.queue_metrics.leaves_total.with_label_values(&[mode]).inc();
    }

    /// Record a formed matchup and how long its players waited
    pub fn record_match_formed(&self, mode: &str, spread: f64, waits: &[Duration]) {
        self.session_metrics
            .sessions_formed_total
            .with_label_values(&[mode])
            .inc();
        self.session_metrics
            .team_spread
            .with_label_values(&[mode])
            .observe(spread);

        let histogram = self
            .queue_metrics
            .queue_wait_time_seconds
            .with_label_values(&[mode]);
        for wait in waits {
            histogram.observe(wait.as_secs_f64());
        }
    }

    pub fn record_formation(&self, duration: Duration) {
        self.performance_metrics
            .formation_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_session_completed(&self, mode: &str) {
        self.session_metrics
            .sessions_completed_total
            .with_label_values(&[mode])
            .inc();
    }

    pub fn record_session_cancelled(&self, reason: &str) {
        self.session_metrics
            .sessions_cancelled_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_dispute(&self) {
        self.session_metrics.disputes_total.inc();
    }

    /// Record the outcome of one ghost sweep
    pub fn record_sweep(
        &self,
        ghosted: usize,
        substituted: usize,
        cancelled: usize,
        duration: Duration,
    ) {
        self.ghost_metrics.ghosts_flagged_total.inc_by(ghosted as u64);
        self.ghost_metrics
            .substitutions_total
            .inc_by(substituted as u64);
        self.ghost_metrics
            .ghost_cancellations_total
            .inc_by(cancelled as u64);
        self.ghost_metrics
            .sweep_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record a snapshot write attempt
    pub fn record_snapshot(&self, success: bool, version: u64, bytes: usize, duration: Duration) {
        let status = if success { "success" } else { "failed" };
        self.backup_metrics
            .snapshots_total
            .with_label_values(&[status])
            .inc();
        self.backup_metrics
            .snapshot_duration_seconds
            .observe(duration.as_secs_f64());

        if success {
            self.backup_metrics.snapshot_bytes.set(bytes as i64);
            self.backup_metrics
                .last_snapshot_version
                .set(i64::try_from(version).unwrap_or(i64::MAX));
        }
    }

    /// Record a restore attempt: "restored", "empty" or "failed"
    pub fn record_restore(&self, outcome: &str) {
        self.backup_metrics
            .restores_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record rating calculation duration
    pub fn record_rating_calculation(&self, duration: Duration) {
        self.performance_metrics
            .rating_calculation_duration
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(i64::try_from(uptime.as_secs()).unwrap_or(i64::MAX));
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("draft_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new("draft_room_commands_total", "Total commands handled"),
            &["command", "status"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let command_errors_total = IntCounterVec::new(
            Opts::new("draft_room_command_errors_total", "Rejected commands by error kind"),
            &["kind"],
        )?;
        registry.register(Box::new(command_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "draft_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("draft_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let players = IntGaugeVec::new(
            Opts::new("draft_room_players", "Registered players by status"),
            &["status"],
        )?;
        registry.register(Box::new(players.clone()))?;

        Ok(Self {
            uptime_seconds,
            commands_total,
            command_errors_total,
            health_status,
            component_health,
            players,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let players_waiting = IntGaugeVec::new(
            Opts::new("draft_room_players_waiting", "Players currently waiting in queue"),
            &["mode"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let joins_total = IntCounterVec::new(
            Opts::new("draft_room_queue_joins_total", "Total queue joins"),
            &["mode"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let leaves_total = IntCounterVec::new(
            Opts::new("draft_room_queue_leaves_total", "Total queue leaves"),
            &["mode"],
        )?;
        registry.register(Box::new(leaves_total.clone()))?;

        let queue_wait_time_seconds = HistogramVec::new(
            HistogramOpts::new(
                "draft_room_queue_wait_time_seconds",
                "Player queue wait time",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
            &["mode"],
        )?;
        registry.register(Box::new(queue_wait_time_seconds.clone()))?;

        Ok(Self {
            players_waiting,
            joins_total,
            leaves_total,
            queue_wait_time_seconds,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let live_sessions = IntGaugeVec::new(
            Opts::new("draft_room_live_sessions", "Live sessions by state"),
            &["state"],
        )?;
        registry.register(Box::new(live_sessions.clone()))?;

        let sessions_formed_total = IntCounterVec::new(
            Opts::new("draft_room_sessions_formed_total", "Total sessions formed"),
            &["mode"],
        )?;
        registry.register(Box::new(sessions_formed_total.clone()))?;

        let sessions_completed_total = IntCounterVec::new(
            Opts::new("draft_room_sessions_completed_total", "Total sessions completed"),
            &["mode"],
        )?;
        registry.register(Box::new(sessions_completed_total.clone()))?;

        let sessions_cancelled_total = IntCounterVec::new(
            Opts::new("draft_room_sessions_cancelled_total", "Total sessions cancelled"),
            &["reason"],
        )?;
        registry.register(Box::new(sessions_cancelled_total.clone()))?;

        let team_spread = HistogramVec::new(
            HistogramOpts::new(
                "draft_room_team_spread",
                "Rating-sum spread between the strongest and weakest team",
            )
            .buckets(vec![0.0, 10.0, 25.0, 50.0, 100.0, 200.0, 400.0, 800.0]),
            &["mode"],
        )?;
        registry.register(Box::new(team_spread.clone()))?;

        let disputes_total =
            IntCounter::new("draft_room_result_disputes_total", "Disputed result claims")?;
        registry.register(Box::new(disputes_total.clone()))?;

        Ok(Self {
            live_sessions,
            sessions_formed_total,
            sessions_completed_total,
            sessions_cancelled_total,
            team_spread,
            disputes_total,
        })
    }
}

impl GhostMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let ghosts_flagged_total =
            IntCounter::new("draft_room_ghosts_flagged_total", "Players marked ghost")?;
        registry.register(Box::new(ghosts_flagged_total.clone()))?;

        let substitutions_total = IntCounter::new(
            "draft_room_substitutions_total",
            "Ghosts replaced by a waiting player",
        )?;
        registry.register(Box::new(substitutions_total.clone()))?;

        let ghost_cancellations_total = IntCounter::new(
            "draft_room_ghost_cancellations_total",
            "Sessions cancelled for unreplaced ghosts",
        )?;
        registry.register(Box::new(ghost_cancellations_total.clone()))?;

        let sweep_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("draft_room_sweep_duration_seconds", "Ghost sweep duration")
                .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(sweep_duration_seconds.clone()))?;

        Ok(Self {
            ghosts_flagged_total,
            substitutions_total,
            ghost_cancellations_total,
            sweep_duration_seconds,
        })
    }
}

impl BackupMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let snapshots_total = IntCounterVec::new(
            Opts::new("draft_room_snapshots_total", "Snapshot writes"),
            &["status"],
        )?;
        registry.register(Box::new(snapshots_total.clone()))?;

        let snapshot_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("draft_room_snapshot_duration_seconds", "Snapshot write time")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(snapshot_duration_seconds.clone()))?;

        let snapshot_bytes =
            IntGauge::new("draft_room_snapshot_bytes", "Size of the last snapshot")?;
        registry.register(Box::new(snapshot_bytes.clone()))?;

        let last_snapshot_version = IntGauge::new(
            "draft_room_last_snapshot_version",
            "Version of the last snapshot",
        )?;
        registry.register(Box::new(last_snapshot_version.clone()))?;

        let restores_total = IntCounterVec::new(
            Opts::new("draft_room_restores_total", "Startup restores by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(restores_total.clone()))?;

        Ok(Self {
            snapshots_total,
            snapshot_duration_seconds,
            snapshot_bytes,
            last_snapshot_version,
            restores_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let command_duration = HistogramVec::new(
            HistogramOpts::new(
                "draft_room_command_duration_seconds",
                "Command handling time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        let formation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "draft_room_formation_duration_seconds",
                "Team formation time",
            )
            .buckets(vec![0.00001, 0.0001, 0.001, 0.005, 0.01, 0.05]),
        )?;
        registry.register(Box::new(formation_duration.clone()))?;

        let rating_calculation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "draft_room_rating_calculation_duration_seconds",
                "Rating calculation time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(rating_calculation_duration.clone()))?;

        Ok(Self {
            command_duration,
            formation_duration,
            rating_calculation_duration,
        })
    }
}
