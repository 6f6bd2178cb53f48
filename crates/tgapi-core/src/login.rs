//! QR login state machine.
//!
//! One attempt per account name. `start` supersedes whatever attempt is running
//! for that name: the old continuation is cancelled and its state channel is
//! dropped from the map, so anything it still publishes is never observed.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{AccountName, ApiCredentials, LoginSnapshot, LoginStatus, UserProfile},
    errors::Error,
    ports::{TelegramClient, TelegramConnector},
    qr,
    registry::AccountRegistry,
    session_store::{CredentialsRecord, SessionStore},
    utils::login_url,
    Result,
};

#[derive(Clone, Debug)]
pub struct LoginSettings {
    /// Upper bound on how long `start` waits for the first token.
    pub initial_wait: Duration,
    /// Used when a start request omits `apiId`/`apiHash`.
    pub default_api_id: Option<i64>,
    pub default_api_hash: Option<String>,
    /// Print each new QR code to the log.
    pub render_terminal: bool,
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_millis(1500),
            default_api_id: None,
            default_api_hash: None,
            render_terminal: false,
        }
    }
}

impl LoginSettings {
    /// Fill missing request credentials from the defaults, then validate.
    pub fn credentials(&self, api_id: Option<i64>, api_hash: Option<&str>) -> Result<ApiCredentials> {
        let api_id = api_id.or(self.default_api_id);
        let api_hash = api_hash
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_api_hash.clone());

        match (api_id, api_hash) {
            (Some(id), Some(hash)) => ApiCredentials::new(id, hash),
            _ => Err(Error::Validation("apiId and apiHash required".to_string())),
        }
    }

    pub fn default_credentials(&self) -> Option<ApiCredentials> {
        self.credentials(None, None).ok()
    }
}

struct Attempt {
    generation: u64,
    cancel: CancellationToken,
    state: Arc<watch::Sender<LoginSnapshot>>,
}

pub struct LoginManager {
    settings: LoginSettings,
    store: SessionStore,
    registry: Arc<AccountRegistry>,
    connector: Arc<dyn TelegramConnector>,
    attempts: Mutex<HashMap<AccountName, Attempt>>,
    generation: AtomicU64,
}

impl LoginManager {
    pub fn new(
        settings: LoginSettings,
        store: SessionStore,
        registry: Arc<AccountRegistry>,
        connector: Arc<dyn TelegramConnector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            store,
            registry,
            connector,
            attempts: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &LoginSettings {
        &self.settings
    }

    /// Begin (or restart) login for `name`.
    ///
    /// Reuses a persisted session when it still works; otherwise spawns the QR
    /// handshake and returns after at most `initial_wait`.
    pub async fn start(
        self: &Arc<Self>,
        name: &str,
        api_id: Option<i64>,
        api_hash: Option<&str>,
    ) -> Result<(AccountName, LoginSnapshot)> {
        let name = AccountName::parse(name)?;
        let creds = self.settings.credentials(api_id, api_hash)?;

        let (generation, cancel, state) = self.begin_attempt(&name).await;

        if self.store.has_session(&name).await {
            match self.reuse_session(&name, &creds).await {
                Ok(user) => {
                    publish(&state, LoginSnapshot::authorized(Some(user)));
                    self.finish_attempt(&name, generation).await;
                    return Ok((name, state.borrow().clone()));
                }
                Err(e) => {
                    tracing::info!(account = %name, "stored session rejected, starting QR login: {e}");
                    if let Some(old) = self.registry.remove(&name).await {
                        let _ = old.disconnect().await;
                    }
                    if let Err(e) = self.store.remove(&name).await {
                        publish(&state, LoginSnapshot::error(e.to_string()));
                        self.finish_attempt(&name, generation).await;
                        return Err(e);
                    }
                }
            }
        }

        let client = match self.connector.client(&creds, None) {
            Ok(c) => c,
            Err(e) => {
                publish(&state, LoginSnapshot::error(e.to_string()));
                return Ok((name, state.borrow().clone()));
            }
        };

        let mut rx = state.subscribe();
        let manager = Arc::clone(self);
        let task_name = name.clone();
        let task_state = Arc::clone(&state);
        tokio::spawn(async move {
            manager
                .run_qr(task_name, creds, client, generation, cancel, task_state)
                .await;
        });

        let _ = tokio::time::timeout(
            self.settings.initial_wait,
            rx.wait_for(|s| s.status != LoginStatus::Preparing),
        )
        .await;

        let snapshot = rx.borrow().clone();
        Ok((name, snapshot))
    }

    /// Current view of `name`'s login.
    pub async fn status(&self, name: &str) -> Result<(AccountName, LoginSnapshot)> {
        let name = AccountName::parse(name)?;

        let stored = self.store.load(&name).await?;
        if let (Some(record), Some(_)) = (&stored.credentials, &stored.session) {
            if record
                .credentials(self.settings.default_credentials().as_ref())
                .is_some()
            {
                return Ok((name, LoginSnapshot::authorized(record.user.clone())));
            }
        }

        let snapshot = self
            .attempts
            .lock()
            .await
            .get(&name)
            .map(|a| a.state.borrow().clone())
            .unwrap_or_else(LoginSnapshot::unknown);
        Ok((name, snapshot))
    }

    /// Login URL of the running attempt, if it is waiting for a scan.
    pub async fn pending_login_url(&self, name: &str) -> Result<Option<String>> {
        let (_, snapshot) = self.status(name).await?;
        Ok(match snapshot.status {
            LoginStatus::QrReady => snapshot.login_url,
            _ => None,
        })
    }

    /// Cancel every running attempt. Used on shutdown.
    pub async fn cancel_all(&self) {
        let attempts = self.attempts.lock().await;
        for attempt in attempts.values() {
            attempt.cancel.cancel();
        }
    }

    async fn begin_attempt(
        &self,
        name: &AccountName,
    ) -> (u64, CancellationToken, Arc<watch::Sender<LoginSnapshot>>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let (tx, _rx) = watch::channel(LoginSnapshot::preparing());
        let state = Arc::new(tx);

        let previous = self.attempts.lock().await.insert(
            name.clone(),
            Attempt {
                generation,
                cancel: cancel.clone(),
                state: Arc::clone(&state),
            },
        );
        if let Some(prev) = previous {
            tracing::debug!(account = %name, superseded = prev.generation, "login attempt superseded");
            prev.cancel.cancel();
        }

        (generation, cancel, state)
    }

    async fn is_current(&self, name: &AccountName, generation: u64) -> bool {
        self.attempts
            .lock()
            .await
            .get(name)
            .is_some_and(|a| a.generation == generation)
    }

    /// The attempt no longer has a continuation; drop its cancel token's work.
    async fn finish_attempt(&self, name: &AccountName, generation: u64) {
        if let Some(a) = self.attempts.lock().await.get(name) {
            if a.generation == generation {
                a.cancel.cancel();
            }
        }
    }

    async fn reuse_session(&self, name: &AccountName, creds: &ApiCredentials) -> Result<UserProfile> {
        let stored = self.store.load(name).await?;
        let session = stored
            .session
            .ok_or_else(|| Error::SessionInvalid("session file is empty".to_string()))?;

        let client = self.connector.client(creds, Some(session))?;
        let confirmed = async {
            client.connect().await?;
            client.get_me().await
        }
        .await;

        match confirmed {
            Ok(user) => {
                tracing::info!(account = %name, user_id = %user.id, "reused stored session");
                if let Some(old) = self.registry.put(name.clone(), Arc::clone(&client)).await {
                    if !Arc::ptr_eq(&old, &client) {
                        let _ = old.disconnect().await;
                    }
                }
                Ok(user)
            }
            Err(e) => {
                let _ = client.disconnect().await;
                Err(e)
            }
        }
    }

    async fn run_qr(
        self: Arc<Self>,
        name: AccountName,
        creds: ApiCredentials,
        client: Arc<dyn TelegramClient>,
        generation: u64,
        cancel: CancellationToken,
        state: Arc<watch::Sender<LoginSnapshot>>,
    ) {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            res = self.drive_qr(&name, &creds, Arc::clone(&client), generation, &state) => Some(res),
        };

        match outcome {
            None => {
                tracing::debug!(account = %name, generation, "login attempt cancelled");
                let _ = client.disconnect().await;
            }
            Some(Ok(user)) => {
                tracing::info!(account = %name, user_id = ?user.as_ref().map(|u| &u.id), "login authorized");
                publish(&state, LoginSnapshot::authorized(user));
            }
            Some(Err(e)) => {
                tracing::warn!(account = %name, "login failed: {e}");
                if let Err(de) = client.disconnect().await {
                    tracing::debug!(account = %name, "disconnect after failed login: {de}");
                }
                publish(&state, LoginSnapshot::error(e.to_string()));
            }
        }
    }

    async fn drive_qr(
        &self,
        name: &AccountName,
        creds: &ApiCredentials,
        client: Arc<dyn TelegramClient>,
        generation: u64,
        state: &Arc<watch::Sender<LoginSnapshot>>,
    ) -> Result<Option<UserProfile>> {
        client.connect().await?;

        let mut last_url: Option<String> = None;
        let render_terminal = self.settings.render_terminal;
        let mut on_token = |token: Vec<u8>| {
            let url = login_url(&token);
            if last_url.as_deref() == Some(url.as_str()) {
                return;
            }
            tracing::info!(account = %name, "login URL: {url}");
            if render_terminal {
                match qr::render_terminal(&url) {
                    Ok(art) => tracing::info!("scan to log in as {name}:\n{art}"),
                    Err(e) => tracing::debug!("terminal QR render failed: {e}"),
                }
            }
            publish(state, LoginSnapshot::qr_ready(url.clone()));
            last_url = Some(url);
        };
        client.sign_in_with_qr(&mut on_token).await?;

        let session = client.export_session().await?;
        let user = match client.get_me().await {
            Ok(u) => Some(u),
            Err(e) => {
                tracing::warn!(account = %name, "authorized but profile lookup failed: {e}");
                None
            }
        };

        if !self.is_current(name, generation).await {
            return Err(Error::AuthFault("login attempt superseded".to_string()));
        }

        self.store
            .save(name, &CredentialsRecord::new(creds, user.clone()), &session)
            .await?;
        if let Some(old) = self.registry.put(name.clone(), client).await {
            let _ = old.disconnect().await;
        }

        Ok(user)
    }
}

/// Apply a transition if the diagram allows it and it changes something.
fn publish(state: &watch::Sender<LoginSnapshot>, next: LoginSnapshot) -> bool {
    state.send_if_modified(|current| {
        if current.status.can_advance_to(next.status) && *current != next {
            *current = next;
            true
        } else {
            false
        }
    })
}
