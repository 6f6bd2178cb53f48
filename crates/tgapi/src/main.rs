#[cfg(feature = "mtproto")]
mod mtproto;

use std::sync::Arc;

use tgapi_core::{
    config::Config, login::LoginManager, media::MediaFetcher, ports::TelegramConnector,
    registry::AccountRegistry, service::AccountService, session_store::SessionStore, Error,
    Result,
};
use tgapi_http::AppState;

#[tokio::main]
async fn main() -> std::result::Result<(), Error> {
    tgapi_core::logging::init("tgapi")?;

    let cfg = Config::load()?;
    tracing::info!(
        session_dir = %cfg.session_dir.display(),
        default_credentials = cfg.default_api_id.is_some() && cfg.default_api_hash.is_some(),
        "configuration loaded"
    );

    let connector = connector(&cfg)?;
    let store = SessionStore::new(cfg.session_dir.clone());
    let registry = Arc::new(AccountRegistry::new());
    let login = LoginManager::new(
        cfg.login_settings(),
        store.clone(),
        Arc::clone(&registry),
        Arc::clone(&connector),
    );
    let media = MediaFetcher::new(cfg.media_max_bytes)?;
    let service = Arc::new(AccountService::new(store, registry, login, connector, media));

    let state = AppState {
        service: Arc::clone(&service),
        api_token: Arc::from(cfg.api_token.as_str()),
    };
    let served = tgapi_http::serve(state, cfg.bind_addr(), cfg.max_body_bytes, shutdown_signal()).await;

    service.shutdown().await;
    served
}

#[cfg(feature = "mtproto")]
fn connector(cfg: &Config) -> Result<Arc<dyn TelegramConnector>> {
    let work_dir = cfg.session_dir.join(".mtproto");
    Ok(Arc::new(mtproto::MtprotoConnector::new(
        work_dir,
        cfg.connection_retries,
    )?))
}

#[cfg(not(feature = "mtproto"))]
fn connector(_cfg: &Config) -> Result<Arc<dyn TelegramConnector>> {
    Err(Error::Config(
        "built without a Telegram backend; rebuild with the `mtproto` feature".to_string(),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested");
}
