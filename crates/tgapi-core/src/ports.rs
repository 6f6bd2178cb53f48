use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{
        ApiCredentials, DialogSummary, ForwardRequest, HistoryPage, MediaDownload, MediaUpload,
        PeerId, PeerRef, SentMessage, SessionBlob, UserProfile,
    },
    stories::{AllStories, StoryItem},
    Result,
};

/// Live connection to Telegram for one account (hexagonal port).
///
/// Implemented by the MTProto adapter; everything protocol-related (framing,
/// encryption, flood waits, DC migration) stays behind this trait. Adapters must
/// report a rejected stored session as [`crate::Error::SessionInvalid`] so the
/// core can invalidate the handle and fall back to QR login.
#[async_trait]
pub trait TelegramClient: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Cheap local check; does not round-trip to the server.
    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<()>;

    async fn get_me(&self) -> Result<UserProfile>;

    /// Drive the QR login handshake until the account is authorized.
    ///
    /// `on_token` is called with every login token the server issues (tokens
    /// are refreshed periodically, and may repeat). Returns `Ok(())` once the
    /// token was accepted on another device; any error is a login fault.
    async fn sign_in_with_qr(&self, on_token: &mut (dyn FnMut(Vec<u8>) + Send)) -> Result<()>;

    /// Serialize the current transport session for persistence.
    async fn export_session(&self) -> Result<SessionBlob>;

    async fn dialogs(&self, limit: usize) -> Result<Vec<DialogSummary>>;

    async fn history(&self, peer: &PeerRef, limit: usize, offset_id: i32) -> Result<HistoryPage>;

    async fn send_message(
        &self,
        peer: &PeerRef,
        text: &str,
        reply_to: Option<i32>,
    ) -> Result<SentMessage>;

    async fn send_media(
        &self,
        peer: &PeerRef,
        media: MediaUpload,
        caption: Option<&str>,
    ) -> Result<SentMessage>;

    /// Returns the ids of the newly created messages.
    async fn forward(&self, req: &ForwardRequest) -> Result<Vec<i32>>;

    async fn download_media(&self, peer: &PeerRef, message_id: i32) -> Result<MediaDownload>;

    async fn all_stories(&self) -> Result<AllStories>;

    async fn stories_by_id(&self, peer: PeerId, ids: &[i32]) -> Result<Vec<StoryItem>>;

    async fn peer_stories(&self, peer: &PeerRef) -> Result<Vec<StoryItem>>;

    /// Mark stories up to `max_id` as read; returns the ids the server acknowledged.
    async fn read_stories(&self, peer: &PeerRef, max_id: i32) -> Result<Vec<i32>>;
}

/// Factory for [`TelegramClient`] handles.
///
/// `session` is `None` for a fresh (unauthorized) client used by QR login.
pub trait TelegramConnector: Send + Sync {
    fn client(
        &self,
        creds: &ApiCredentials,
        session: Option<SessionBlob>,
    ) -> Result<Arc<dyn TelegramClient>>;
}
