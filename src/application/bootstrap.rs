use crate::application::gateway::AuthenticatedGateway;
use crate::application::orchestrator::SyncOrchestrator;
use crate::application::token_lease::TokenLease;
use crate::infrastructure::config::{ensure_default_configs, load_sync_config, SyncConfig};
use crate::infrastructure::credential_issuer::{OAuthClientConfig, OAuthCredentialIssuer};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::{OAuthHttpClient, ReqwestOAuthClient};
use crate::infrastructure::remote_api::{http_client, ReqwestRemoteApi};
use crate::infrastructure::storage::SqliteStore;
use chrono::Duration;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub database_path: PathBuf,
    pub config: SyncConfig,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("dashsync.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let config = load_sync_config(&config_dir)?;
    // Opening runs the schema migration.
    SqliteStore::open(&database_path)?;

    info!(workspace = %workspace_root.display(), "workspace ready");
    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        database_path,
        config,
    })
}

pub type EngineGateway<C, O> = AuthenticatedGateway<ReqwestRemoteApi, OAuthCredentialIssuer<C, O>>;
pub type Engine<C, O> = SyncOrchestrator<SqliteStore, EngineGateway<C, O>>;

pub struct SyncEngine<C, O>
where
    C: CredentialStore + 'static,
    O: OAuthHttpClient + 'static,
{
    pub orchestrator: Arc<Engine<C, O>>,
    pub store: Arc<SqliteStore>,
    pub lease: Arc<TokenLease<OAuthCredentialIssuer<C, O>>>,
    pub config: SyncConfig,
}

pub fn build_engine(
    bootstrap: &BootstrapResult,
    oauth: OAuthClientConfig,
) -> Result<SyncEngine<KeyringCredentialStore, ReqwestOAuthClient>, InfraError> {
    let credential_store = Arc::new(KeyringCredentialStore::for_client(&oauth.client_id));
    build_engine_with(
        bootstrap,
        oauth,
        credential_store,
        Arc::new(ReqwestOAuthClient::with_client(http_client(
            bootstrap.config.request_timeout_secs,
        )?)),
    )
}

pub fn build_engine_with<C, O>(
    bootstrap: &BootstrapResult,
    oauth: OAuthClientConfig,
    credential_store: Arc<C>,
    oauth_client: Arc<O>,
) -> Result<SyncEngine<C, O>, InfraError>
where
    C: CredentialStore + 'static,
    O: OAuthHttpClient + 'static,
{
    let config = bootstrap.config.clone();
    let store = Arc::new(SqliteStore::open(&bootstrap.database_path)?);

    let issuer = Arc::new(OAuthCredentialIssuer::new(oauth, credential_store, oauth_client));
    let lease = Arc::new(
        TokenLease::new(issuer)
            .with_persistent(config.persistent_session)
            .with_leeway(Duration::seconds(config.token_leeway_secs)),
    );
    let api = Arc::new(ReqwestRemoteApi::new(&config.remote_api_config())?);
    let gateway = Arc::new(
        AuthenticatedGateway::new(api, Arc::clone(&lease)).with_event_window(config.event_window),
    );
    let orchestrator = Arc::new(SyncOrchestrator::open(Arc::clone(&store), gateway)?);

    Ok(SyncEngine {
        orchestrator,
        store,
        lease,
        config,
    })
}
