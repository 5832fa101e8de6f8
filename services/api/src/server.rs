use crate::cli::ServeArgs;
use crate::infra::{build_registry, AppState};
use crate::routes::with_registry_routes;
use aso_bible::config::AppConfig;
use aso_bible::error::AppError;
use aso_bible::telemetry;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let (service, seeded) = build_registry(&config.engine)?;
    info!(
        entries = seeded.entries,
        overrides = seeded.overrides,
        mode = ?service.mode(),
        "registry seeded"
    );

    let app = with_registry_routes(Arc::new(service))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "aso bible registry ready");

    axum::serve(listener, app).await?;
    Ok(())
}
