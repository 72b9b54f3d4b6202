use std::sync::Arc;

use catalog_admin_core::{AlertDispatcher, SecurityEventSink, SessionResolver};

use crate::config::SecurityConfig;
use crate::lifecycle::TaskSupervisor;
use crate::observability::metrics::SecurityMetrics;
use crate::security::{
    CorsPolicy, CsrfGuard, InputSanitizer, LogAlertDispatcher, RateLimiter, SecurityHeaders,
    SecurityMonitor,
};

/// Shared security components. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct SecurityState {
    pub config: Arc<SecurityConfig>,
    pub limiter: RateLimiter,
    pub csrf: Arc<CsrfGuard>,
    pub sanitizer: Arc<InputSanitizer>,
    pub monitor: Arc<SecurityMonitor>,
    pub sessions: Arc<dyn SessionResolver>,
    pub headers: Arc<SecurityHeaders>,
    pub cors: Arc<CorsPolicy>,
}

impl SecurityState {
    /// Build the components with log-only alerting
    pub fn new(config: SecurityConfig, sessions: Arc<dyn SessionResolver>) -> Self {
        Self::with_alerts(config, sessions, Arc::new(LogAlertDispatcher))
    }

    pub fn with_alerts(
        config: SecurityConfig,
        sessions: Arc<dyn SessionResolver>,
        alerts: Arc<dyn AlertDispatcher>,
    ) -> Self {
        let monitor = Arc::new(SecurityMonitor::with_dispatcher(config.monitor.clone(), alerts));
        let sink: Arc<dyn SecurityEventSink> = monitor.clone();
        let sanitizer = InputSanitizer::new(&config.sanitizer).with_sink(sink);

        Self {
            limiter: RateLimiter::new(),
            csrf: Arc::new(CsrfGuard::new(&config.csrf)),
            sanitizer: Arc::new(sanitizer),
            monitor,
            sessions,
            headers: Arc::new(SecurityHeaders::default()),
            cors: Arc::new(CorsPolicy::new(&config.cors)),
            config: Arc::new(config),
        }
    }

    /// Start the rate-limit bucket sweep and the monitor purge
    pub fn spawn_background_tasks(&self, supervisor: &TaskSupervisor) {
        let limiter = self.limiter.clone();
        supervisor.spawn_periodic(
            "rate-limit-sweep",
            self.config.sweep.rate_limit_interval(),
            move || {
                let removed = limiter.sweep_expired();
                SecurityMetrics::sweep_removed("rate_limiter", removed);
            },
        );

        let monitor = Arc::clone(&self.monitor);
        supervisor.spawn_periodic(
            "security-monitor-purge",
            self.config.sweep.monitor_interval(),
            move || {
                let report = monitor.purge_expired();
                SecurityMetrics::sweep_removed("security_events", report.events_removed);
                SecurityMetrics::sweep_removed("security_actors", report.actors_removed);
                SecurityMetrics::sweep_removed("event_throttle", report.throttle_buckets_removed);
            },
        );
    }
}
