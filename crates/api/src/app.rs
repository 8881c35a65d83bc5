use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use chrono::Duration as ChronoDuration;
use persistence::Store;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::jobs::{
    AnalyticsRollupJob, CircuitSnapshotJob, DeliveryLogRetentionJob, EndpointHealthJob,
    JobScheduler, PoolMetricsJob, RateLimitSweepJob, WebhookRetryJob,
};
use crate::middleware::{
    metrics_handler, metrics_middleware, rate_limit_middleware, trace_id, ApiRateLimiter,
};
use crate::routes::{endpoints, events, health, monitoring};
use crate::services::health_monitor::HealthSettings;
use crate::services::{
    AlertService, AnalyticsAggregator, CircuitBreakerRegistry, DeliveryExecutor,
    DeliveryRateLimiter, EngineSettings, ExecutorSettings, HealthMonitor, JsonEnvelopeTransform,
    RetryScheduler, WebhookEngine, WebhookTransport,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub engine: Arc<WebhookEngine>,
    pub health: Arc<HealthMonitor>,
    pub analytics: Arc<AnalyticsAggregator>,
    pub delivery_limiter: Arc<DeliveryRateLimiter>,
    pub api_limiter: Option<Arc<ApiRateLimiter>>,
}

impl AppState {
    /// Wires the engine and its monitors over one store and transport.
    pub fn new(config: Config, store: Arc<dyn Store>, transport: Arc<dyn WebhookTransport>) -> Self {
        let config = Arc::new(config);

        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker_policy()));
        let delivery_limiter = Arc::new(DeliveryRateLimiter::new());
        let alerts = Arc::new(AlertService::new(
            Arc::clone(&store),
            ChronoDuration::seconds(config.health.alert_cooldown_secs),
        ));

        let executor = Arc::new(DeliveryExecutor::new(
            transport,
            Arc::clone(&breakers),
            Arc::clone(&delivery_limiter),
            Arc::clone(&alerts),
            ExecutorSettings::from_config(&config),
        ));
        let engine = Arc::new(WebhookEngine::new(
            Arc::clone(&store),
            executor,
            Arc::new(JsonEnvelopeTransform),
            breakers,
            Arc::clone(&alerts),
            config.retry_policy(),
            EngineSettings::from_config(&config),
        ));

        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&store),
            alerts,
            config.health_policy(),
            HealthSettings::from_config(&config),
        ));
        let analytics = Arc::new(AnalyticsAggregator::new(
            Arc::clone(&store),
            ChronoDuration::days(config.analytics.backfill_days),
        ));

        let api_limiter = (config.rate_limit.api_requests_per_minute > 0).then(|| {
            Arc::new(ApiRateLimiter::new(
                config.rate_limit.api_requests_per_minute,
            ))
        });

        Self {
            config,
            store,
            engine,
            health,
            analytics,
            delivery_limiter,
            api_limiter,
        }
    }

    pub fn retry_scheduler(&self) -> RetryScheduler {
        RetryScheduler::new(
            Arc::clone(&self.engine),
            self.config.retry.batch_size,
            ChronoDuration::seconds(
                i64::try_from(self.config.retry.lease_secs).unwrap_or(i64::MAX / 1000),
            ),
        )
    }
}

/// Registers every background job. Pool gauges are only recorded when the
/// engine runs on PostgreSQL.
pub fn build_scheduler(state: &AppState, pool: Option<PgPool>) -> JobScheduler {
    let config = &state.config;
    let mut scheduler = JobScheduler::new();

    scheduler.register(WebhookRetryJob::new(
        Arc::new(state.retry_scheduler()),
        config.retry.poll_interval_secs,
    ));
    scheduler.register(EndpointHealthJob::new(
        Arc::clone(&state.health),
        config.health.interval_secs,
    ));
    scheduler.register(AnalyticsRollupJob::new(
        Arc::clone(&state.analytics),
        config.analytics.interval_secs,
    ));
    scheduler.register(DeliveryLogRetentionJob::new(
        Arc::clone(&state.store),
        config.retention.log_retention_days,
        config.retention.interval_secs,
    ));
    scheduler.register(RateLimitSweepJob::new(
        Arc::clone(&state.delivery_limiter),
        state.api_limiter.clone(),
        config.rate_limit.sweep_interval_secs,
    ));
    scheduler.register(CircuitSnapshotJob::new(
        Arc::clone(state.engine.breakers()),
        Arc::clone(&state.store),
        config.circuit_breaker.snapshot_interval_secs,
    ));
    if let Some(pool) = pool {
        scheduler.register(PoolMetricsJob::new(pool));
    }

    scheduler
}

pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let cors = if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let api_routes = Router::new()
        .route("/api/v1/events", post(events::publish_event))
        .route(
            "/api/v1/forms/:form_id/endpoints",
            get(endpoints::list_endpoints).post(endpoints::create_endpoint),
        )
        .route(
            "/api/v1/forms/:form_id/endpoints/:endpoint_id",
            get(endpoints::get_endpoint)
                .put(endpoints::update_endpoint)
                .delete(endpoints::delete_endpoint),
        )
        .route(
            "/api/v1/forms/:form_id/endpoints/:endpoint_id/test",
            post(endpoints::test_endpoint),
        )
        .route(
            "/api/v1/forms/:form_id/endpoints/:endpoint_id/deliveries",
            get(endpoints::list_deliveries),
        )
        .route(
            "/api/v1/forms/:form_id/endpoints/:endpoint_id/circuit",
            get(endpoints::get_circuit).delete(endpoints::reset_circuit),
        )
        .route(
            "/api/v1/forms/:form_id/analytics",
            get(monitoring::get_analytics),
        )
        .route(
            "/api/v1/forms/:form_id/analytics/errors",
            get(monitoring::error_breakdown),
        )
        .route(
            "/api/v1/forms/:form_id/stats/realtime",
            get(monitoring::realtime_stats),
        )
        .route("/api/v1/forms/:form_id/health", get(monitoring::form_health))
        .route("/api/v1/forms/:form_id/alerts", get(monitoring::list_alerts))
        .route(
            "/api/v1/alerts/:alert_id/acknowledge",
            post(monitoring::acknowledge_alert),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    // Probes and scraping are never throttled.
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ReqwestTransport;
    use persistence::InMemoryStore;

    fn state(overrides: &[(&str, &str)]) -> AppState {
        let config = Config::load_for_test(overrides).unwrap();
        let transport = ReqwestTransport::new("test-agent", 1024).unwrap();
        AppState::new(config, Arc::new(InMemoryStore::new()), Arc::new(transport))
    }

    #[tokio::test]
    async fn test_scheduler_registers_engine_jobs() {
        let scheduler = build_scheduler(&state(&[]), None);
        let names = scheduler.job_names();
        for expected in [
            "webhook_retry",
            "endpoint_health",
            "analytics_rollup",
            "delivery_log_retention",
            "rate_limit_sweep",
            "circuit_snapshot",
        ] {
            assert!(names.contains(&expected), "missing job {expected}");
        }
        assert!(!names.contains(&"pool_metrics"));
    }

    #[tokio::test]
    async fn test_api_limiter_disabled_by_zero() {
        let state = state(&[("rate_limit.api_requests_per_minute", "0")]);
        assert!(state.api_limiter.is_none());
    }
}
