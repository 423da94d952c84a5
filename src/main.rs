use crm_paytr_bridge::{
    api::{self, AppState},
    config::Config,
    database::{
        self, payment_method_repository::PgPaymentMethodRepository,
        payment_repository::PgPaymentRepository, repository::TenantStore,
        tenant_repository::PgTenantRepository, PoolConfig,
    },
    payments::{
        notifier::HttpPlatformNotifier, orchestrator::PaymentOrchestrator,
        providers::paytr, registry::ProviderRegistry,
    },
    platform::PlatformClient,
    tenants::TenantService,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.server.log_format);

    tracing::info!("Starting CRM PayTR bridge");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("Gateway: {}", config.gateway.base_url);

    let pool = database::init_pool(
        &config.database.url,
        Some(PoolConfig::with_max_connections(config.database.max_connections)),
    )
    .await?;
    database::run_migrations(&pool).await?;

    let sealer = config.security.sealer()?;
    let oauth = match config.platform.oauth() {
        Some(settings) => Some(Arc::new(PlatformClient::new(settings)?)),
        None => {
            tracing::warn!("Platform OAuth client not configured; token refresh disabled");
            None
        }
    };

    let tenant_store: Arc<dyn TenantStore> = Arc::new(PgTenantRepository::new(pool.clone()));
    let methods = Arc::new(PgPaymentMethodRepository::new(pool.clone()));
    let payments = Arc::new(PgPaymentRepository::new(pool.clone()));

    let registry = ProviderRegistry::with_paytr(
        methods,
        sealer.clone(),
        config.gateway.paytr(),
        paytr::build_client(config.gateway.timeout_secs)?,
    );
    let notifier = HttpPlatformNotifier::new(
        config.platform.base_url.clone(),
        config.platform.timeout_secs,
        oauth.clone(),
        tenant_store.clone(),
    )?;

    let state = AppState {
        orchestrator: Arc::new(PaymentOrchestrator::new(
            tenant_store.clone(),
            payments,
            Arc::new(registry),
            Arc::new(notifier),
        )),
        tenants: Arc::new(TenantService::new(tenant_store, sealer, oauth)),
        db: Some(pool),
        environment: config.server.environment.clone(),
        api_key: config.security.api_key(),
    };

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}
