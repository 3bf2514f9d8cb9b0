pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{
    bootstrap_workspace, build_engine, build_engine_with, BootstrapResult, SyncEngine,
};
pub use application::gateway::{AuthenticatedGateway, RemoteGateway};
pub use application::orchestrator::{
    SessionHealth, SyncEvent, SyncOrchestrator, SyncOutcome, SyncPhase,
};
pub use application::pending_queue::{FlushReport, PendingOperationQueue};
pub use application::token_lease::TokenLease;
pub use application::triggers::{TriggerHandle, TriggerLoop, TriggerReason};
pub use domain::models::{
    Entity, EntityKind, EntityPatch, EntityPayload, EventPatch, EventPayload, PendingOperation,
    SyncStatus, TaskPatch, TaskPayload, TaskStatus,
};
pub use infrastructure::error::{
    AuthError, CredentialError, GatewayError, InfraError, OAuthError, SyncError,
};

use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dashsync=info")),
        )
        .try_init();
}
