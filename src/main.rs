use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use identity_service::config::IdentityConfig;
use identity_service::services::{
    AccountService, AuditRecorder, CertificateService, LoginService, MockCertificateAuthority,
    MockCommunicator, MockDirectory, MockIdentityProvider, TokenIssuer, TwoFactorService,
};
use identity_service::store::{IdentityStore, MemoryStore};
use identity_service::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    // The dev binary runs against the in-process store and mock
    // collaborators; production deployments wire real implementations
    // behind the same traits.
    let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
    let communicator = Arc::new(MockCommunicator::new());
    let ca = Arc::new(MockCertificateAuthority::new());
    let idp = Arc::new(MockIdentityProvider::new());
    let directory = Arc::new(MockDirectory::new());

    let (audit, _audit_task) = AuditRecorder::spawn(store.clone());
    let tokens = TokenIssuer::new(
        store.clone(),
        config.jwt.secret.as_bytes(),
        config.jwt.access_token_expiry_minutes,
        config.jwt.refresh_token_expiry_days,
    );
    let two_factor = TwoFactorService::new(store.clone(), communicator.clone());

    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        accounts: AccountService::new(
            store.clone(),
            audit.clone(),
            communicator.clone(),
            tokens.clone(),
            config.base_url.clone(),
        ),
        login: LoginService::new(
            store.clone(),
            tokens.clone(),
            two_factor,
            directory,
            idp,
            config.federated_state_secret.as_bytes().to_vec(),
        ),
        certificates: CertificateService::new(store.clone(), ca, audit.clone()),
        tokens,
        audit: audit.clone(),
    };

    let app = build_router(state);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain anything still queued for the audit chain before exit.
    audit.flush().await;
    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
