//! Account-level operations shared by every HTTP handler.

use std::{future::Future, sync::Arc};

use serde::Serialize;

use crate::{
    domain::{
        AccountName, DialogSummary, ForwardRequest, HistoryPage, LoginSnapshot, MediaDownload,
        PeerRef, SentMessage, UserProfile,
    },
    errors::Error,
    login::LoginManager,
    media::MediaFetcher,
    ports::{TelegramClient, TelegramConnector},
    registry::AccountRegistry,
    session_store::SessionStore,
    stories::{self, StoryItem, StoryListing},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub id: Option<i64>,
    pub name: String,
    pub username: Option<String>,
    pub is_group: bool,
}

/// Owns the session store, the client registry and the login manager.
pub struct AccountService {
    store: SessionStore,
    registry: Arc<AccountRegistry>,
    login: Arc<LoginManager>,
    connector: Arc<dyn TelegramConnector>,
    media: MediaFetcher,
}

impl AccountService {
    pub fn new(
        store: SessionStore,
        registry: Arc<AccountRegistry>,
        login: Arc<LoginManager>,
        connector: Arc<dyn TelegramConnector>,
        media: MediaFetcher,
    ) -> Self {
        Self {
            store,
            registry,
            login,
            connector,
            media,
        }
    }

    // ============== Login ==============

    pub async fn start_login(
        &self,
        name: &str,
        api_id: Option<i64>,
        api_hash: Option<&str>,
    ) -> Result<(AccountName, LoginSnapshot)> {
        self.login.start(name, api_id, api_hash).await
    }

    pub async fn login_status(&self, name: &str) -> Result<(AccountName, LoginSnapshot)> {
        self.login.status(name).await
    }

    pub async fn pending_login_url(&self, name: &str) -> Result<Option<String>> {
        self.login.pending_login_url(name).await
    }

    // ============== Clients ==============

    /// Cached handle, or one rebuilt from the persisted session.
    pub async fn resolve_client(&self, name: &str) -> Result<Arc<dyn TelegramClient>> {
        let name = AccountName::parse(name)?;

        if let Some(client) = self.registry.get(&name).await {
            if client.is_connected().await {
                return Ok(client);
            }
            match client.connect().await {
                Ok(()) => return Ok(client),
                Err(e) if e.is_session_invalid() => {
                    self.invalidate(&name).await;
                    return Err(Error::not_authorized(name.as_str()));
                }
                Err(e) => {
                    tracing::debug!(account = %name, "reconnect of cached client failed: {e}");
                    if let Some(stale) = self.registry.remove(&name).await {
                        let _ = stale.disconnect().await;
                    }
                }
            }
        }

        let stored = self.store.load(&name).await?;
        let defaults = self.login.settings().default_credentials();
        let (Some(record), Some(session)) = (stored.credentials, stored.session) else {
            return Err(Error::not_authorized(name.as_str()));
        };
        let creds = record
            .credentials(defaults.as_ref())
            .ok_or_else(|| Error::not_authorized(name.as_str()))?;

        let client = self.connector.client(&creds, Some(session))?;
        match client.connect().await {
            Ok(()) => {}
            Err(e) if e.is_session_invalid() => {
                self.invalidate(&name).await;
                return Err(Error::not_authorized(name.as_str()));
            }
            Err(e) => return Err(e),
        }

        tracing::debug!(account = %name, "client restored from stored session");
        if let Some(old) = self.registry.put(name, Arc::clone(&client)).await {
            if !Arc::ptr_eq(&old, &client) {
                let _ = old.disconnect().await;
            }
        }
        Ok(client)
    }

    /// Run `op` against the account's client. A rejected session drops the
    /// cached handle and the stored blob, and surfaces as NotAuthorized.
    pub async fn with_client<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn TelegramClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = self.resolve_client(name).await?;
        match op(client).await {
            Err(e) if e.is_session_invalid() => {
                let name = AccountName::parse(name)?;
                tracing::warn!(account = %name, "session rejected by server: {e}");
                self.invalidate(&name).await;
                Err(Error::not_authorized(name.as_str()))
            }
            other => other,
        }
    }

    async fn invalidate(&self, name: &AccountName) {
        if let Some(client) = self.registry.remove(name).await {
            let _ = client.disconnect().await;
        }
        if let Err(e) = self.store.remove(name).await {
            tracing::warn!(account = %name, "failed to remove stale session: {e}");
        }
    }

    // ============== Operations ==============

    pub async fn me(&self, name: &str) -> Result<UserProfile> {
        self.with_client(name, |c| async move { c.get_me().await })
            .await
    }

    pub async fn dialogs(&self, name: &str, limit: usize) -> Result<Vec<DialogSummary>> {
        self.with_client(name, |c| async move { c.dialogs(limit).await })
            .await
    }

    /// Channels and supergroups among the first `limit` dialogs.
    pub async fn channels(&self, name: &str, limit: usize) -> Result<Vec<ChannelSummary>> {
        let dialogs = self.dialogs(name, limit).await?;
        Ok(dialogs
            .into_iter()
            .filter(|d| d.is_channel)
            .map(|d| ChannelSummary {
                id: d.id,
                name: d.name,
                username: d.username,
                is_group: d.is_group,
            })
            .collect())
    }

    pub async fn messages(
        &self,
        name: &str,
        peer: &PeerRef,
        limit: usize,
        offset_id: i32,
    ) -> Result<HistoryPage> {
        self.with_client(name, |c| async move { c.history(peer, limit, offset_id).await })
            .await
    }

    pub async fn send_text(
        &self,
        name: &str,
        peer: &PeerRef,
        text: &str,
        reply_to: Option<i32>,
    ) -> Result<SentMessage> {
        if text.trim().is_empty() {
            return Err(Error::Validation("message required".to_string()));
        }
        self.with_client(name, |c| async move { c.send_message(peer, text, reply_to).await })
            .await
    }

    /// Fetch `url` and send it as a file. The URL is checked before any
    /// client is resolved.
    pub async fn send_media_url(
        &self,
        name: &str,
        peer: &PeerRef,
        url: &str,
        caption: Option<&str>,
    ) -> Result<SentMessage> {
        crate::media::parse_media_url(url)?;
        self.resolve_client(name).await?;
        let upload = self.media.fetch(url).await?;
        let caption = caption.map(str::trim).filter(|c| !c.is_empty());
        self.with_client(name, |c| async move { c.send_media(peer, upload, caption).await })
            .await
    }

    pub async fn forward(&self, name: &str, req: &ForwardRequest) -> Result<Vec<i32>> {
        if req.message_id <= 0 {
            return Err(Error::Validation("message_id required".to_string()));
        }
        self.with_client(name, |c| async move { c.forward(req).await })
            .await
    }

    pub async fn download(&self, name: &str, peer: &PeerRef, message_id: i32) -> Result<Vec<u8>> {
        if message_id <= 0 {
            return Err(Error::Validation("messageId required".to_string()));
        }
        let outcome = self
            .with_client(name, |c| async move { c.download_media(peer, message_id).await })
            .await?;
        match outcome {
            MediaDownload::Bytes(b) => Ok(b),
            MediaDownload::MessageNotFound => Err(Error::NotFound("message not found".to_string())),
            MediaDownload::NoMedia => Err(Error::NotFound("no media".to_string())),
        }
    }

    // ============== Stories ==============

    pub async fn stories(&self, name: &str, expand: bool) -> Result<StoryListing> {
        self.with_client(name, |c| async move {
            let mut all = c.all_stories().await?;
            if expand {
                stories::expand_skipped(c.as_ref(), &mut all).await;
            }
            Ok(stories::normalize(&all, expand))
        })
        .await
    }

    /// Stories of one peer. A library failure (privacy, unknown peer) yields an empty list.
    pub async fn stories_of(
        &self,
        name: &str,
        peer: &PeerRef,
        min_id: i32,
        max_id: i32,
        limit: usize,
    ) -> Result<Vec<StoryItem>> {
        let result = self
            .with_client(name, |c| async move { c.peer_stories(peer).await })
            .await;
        match result {
            Ok(items) => Ok(stories::filter_by_id(items, min_id, max_id, limit)),
            Err(e @ (Error::NotAuthorized(_) | Error::Validation(_))) => Err(e),
            Err(e) => {
                tracing::debug!(peer = %peer, "peer stories unavailable: {e}");
                Ok(Vec::new())
            }
        }
    }

    pub async fn read_stories(&self, name: &str, peer: &PeerRef, max_id: i32) -> Result<Vec<i32>> {
        if max_id <= 0 {
            return Err(Error::Validation("maxId required".to_string()));
        }
        self.with_client(name, |c| async move { c.read_stories(peer, max_id).await })
            .await
    }

    /// Disconnect every cached client and stop pending logins.
    pub async fn shutdown(&self) {
        self.login.cancel_all().await;
        for name in self.registry.names().await {
            if let Some(client) = self.registry.remove(&name).await {
                if let Err(e) = client.disconnect().await {
                    tracing::debug!(account = %name, "disconnect on shutdown failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ApiCredentials, SessionBlob},
        login::LoginSettings,
        session_store::CredentialsRecord,
        test_support::{FakeBehavior, FakeConnector},
    };

    fn service(dir: &std::path::Path, behavior: FakeBehavior) -> (AccountService, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::new(behavior));
        let registry = Arc::new(AccountRegistry::new());
        let store = SessionStore::new(dir);
        let login = LoginManager::new(
            LoginSettings::default(),
            store.clone(),
            Arc::clone(&registry),
            connector.clone(),
        );
        let svc = AccountService::new(
            store,
            registry,
            login,
            connector.clone(),
            MediaFetcher::new(1024).unwrap(),
        );
        (svc, connector)
    }

    async fn seed_session(dir: &std::path::Path, name: &str) {
        SessionStore::new(dir)
            .save(
                &AccountName::parse(name).unwrap(),
                &CredentialsRecord::new(&ApiCredentials::new(12345, "abcabc").unwrap(), None),
                &SessionBlob(b"stored".to_vec()),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_account_is_not_authorized() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, connector) = service(dir.path(), FakeBehavior::default());

        let err = svc.me("nobody").await.unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));
        assert!(err.to_string().contains("/auth/qr/start"));
        assert_eq!(connector.created(), 0);
    }

    #[tokio::test]
    async fn stored_session_is_loaded_once_then_cached() {
        let dir = tempfile::tempdir().unwrap();
        seed_session(dir.path(), "acct1").await;
        let (svc, connector) = service(dir.path(), FakeBehavior::default());

        assert_eq!(svc.me("acct1").await.unwrap().id, "42");
        let dialogs = svc.dialogs("acct1", 50).await.unwrap();
        assert_eq!(dialogs.len(), 3);
        assert_eq!(connector.created(), 1);
    }

    #[tokio::test]
    async fn channels_keep_only_channel_dialogs() {
        let dir = tempfile::tempdir().unwrap();
        seed_session(dir.path(), "acct1").await;
        let (svc, _) = service(dir.path(), FakeBehavior::default());

        let channels = svc.channels("acct1", 50).await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].id, Some(100));
    }

    #[tokio::test]
    async fn failed_reconnect_evicts_and_disconnects_cached_handle() {
        let dir = tempfile::tempdir().unwrap();
        seed_session(dir.path(), "acct1").await;
        let behavior = FakeBehavior {
            connect_error: Some("connection reset".to_string()),
            ..FakeBehavior::default()
        };
        let (svc, connector) = service(dir.path(), behavior);
        let name = AccountName::parse("acct1").unwrap();
        let creds = ApiCredentials::new(12345, "abcabc").unwrap();
        let broken = connector.client(&creds, None).unwrap();
        svc.registry.put(name.clone(), Arc::clone(&broken)).await;

        assert_eq!(svc.me("acct1").await.unwrap().id, "42");
        assert_eq!(connector.disconnects(), 1);
        assert_eq!(connector.created(), 2);

        let cached = svc.registry.get(&name).await.unwrap();
        assert!(!Arc::ptr_eq(&cached, &broken));
        assert!(cached.is_connected().await);
    }

    #[tokio::test]
    async fn rejected_session_is_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        seed_session(dir.path(), "acct1").await;
        let behavior = FakeBehavior {
            reject_sessions: true,
            ..FakeBehavior::default()
        };
        let (svc, connector) = service(dir.path(), behavior);

        let err = svc.dialogs("acct1", 10).await.unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));
        assert!(!dir.path().join("acct1.session").exists());
        assert_eq!(connector.disconnects(), 1);

        // Nothing cached, nothing on disk: a second call fails without a new client.
        assert!(matches!(
            svc.dialogs("acct1", 10).await,
            Err(Error::NotAuthorized(_))
        ));
        assert_eq!(connector.created(), 1);
    }

    #[tokio::test]
    async fn send_text_requires_message() {
        let dir = tempfile::tempdir().unwrap();
        seed_session(dir.path(), "acct1").await;
        let (svc, connector) = service(dir.path(), FakeBehavior::default());

        assert!(matches!(
            svc.send_text("acct1", &PeerRef::SelfUser, "  ", None).await,
            Err(Error::Validation(_))
        ));
        let sent = svc
            .send_text("acct1", &PeerRef::SelfUser, "hi", None)
            .await
            .unwrap();
        assert_eq!(sent.id, Some(7));
        assert_eq!(connector.sent(), vec![("me".to_string(), "hi".to_string())]);
    }

    #[tokio::test]
    async fn media_url_scheme_checked_before_client() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, connector) = service(dir.path(), FakeBehavior::default());
        let err = svc
            .send_media_url("acct1", &PeerRef::SelfUser, "file:///etc/passwd", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(connector.created(), 0);
    }

    #[tokio::test]
    async fn stories_of_swallows_library_errors() {
        let dir = tempfile::tempdir().unwrap();
        seed_session(dir.path(), "acct1").await;
        let (svc, _) = service(dir.path(), FakeBehavior::default());

        let items = svc
            .stories_of("acct1", &PeerRef::Username("x".into()), 0, 0, 0)
            .await
            .unwrap();
        assert!(items.is_empty());
        assert!(matches!(
            svc.stories_of("ghost", &PeerRef::SelfUser, 0, 0, 0).await,
            Err(Error::NotAuthorized(_))
        ));
    }

    #[tokio::test]
    async fn stories_listing_is_empty_for_fake() {
        let dir = tempfile::tempdir().unwrap();
        seed_session(dir.path(), "acct1").await;
        let (svc, _) = service(dir.path(), FakeBehavior::default());
        let listing = svc.stories("acct1", true).await.unwrap();
        assert_eq!(listing.total, 0);
        assert!(listing.expanded);
    }
}
