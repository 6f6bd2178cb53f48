//! Telegram backend over the `layer-client` MTProto implementation.
//!
//! `layer-client` persists sessions through a file backend, so every handle owns a
//! scratch file under the work directory. A stored blob is written there before
//! connecting, and `export_session` reads it back after `save_session`.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use layer_client::{
    update::IncomingMessage, BinaryFileBackend, Client, Config as ClientConfig, Dialog,
    InputMessage, InvocationError,
};
use layer_tl_types as tl;
use rand::Rng;
use tokio::sync::Mutex;

use tgapi_core::{
    domain::{
        ApiCredentials, DialogSummary, ForwardRequest, HistoryPage, MediaDownload, MediaUpload,
        MessageSummary, PeerId, PeerRef, SentMessage, SessionBlob, UserProfile,
    },
    ports::{TelegramClient, TelegramConnector},
    security::generate_token,
    stories::{AllStories, PeerStories, Story, StoryChat, StoryItem, StoryUser},
    Error, Result,
};

const QR_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);
/// Channels live below this offset in the signed ("marked") id space.
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;
/// Dialogs fetched to learn access hashes for peers addressed by numeric id.
const PEER_WARMUP_DIALOGS: i32 = 100;

pub struct MtprotoConnector {
    work_dir: PathBuf,
    retries: u32,
}

impl MtprotoConnector {
    pub fn new(work_dir: PathBuf, retries: u32) -> Result<Self> {
        std::fs::create_dir_all(&work_dir)?;
        Ok(Self {
            work_dir,
            retries: retries.max(1),
        })
    }
}

impl TelegramConnector for MtprotoConnector {
    fn client(
        &self,
        creds: &ApiCredentials,
        session: Option<SessionBlob>,
    ) -> Result<Arc<dyn TelegramClient>> {
        let scratch = self.work_dir.join(format!("{}.session", generate_token()));
        Ok(Arc::new(MtprotoClient {
            creds: creds.clone(),
            session,
            scratch,
            retries: self.retries,
            inner: Mutex::new(None),
        }))
    }
}

struct MtprotoClient {
    creds: ApiCredentials,
    session: Option<SessionBlob>,
    scratch: PathBuf,
    retries: u32,
    inner: Mutex<Option<Client>>,
}

impl Drop for MtprotoClient {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.scratch);
    }
}

impl MtprotoClient {
    async fn handle(&self) -> Result<Client> {
        self.inner
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::External("telegram client is not connected".to_string()))
    }

    async fn open(&self) -> Result<Client> {
        match &self.session {
            Some(blob) => tokio::fs::write(&self.scratch, blob.as_bytes()).await?,
            None => remove_scratch(&self.scratch).await?,
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let config = ClientConfig {
                api_id: self.creds.api_id,
                api_hash: self.creds.api_hash.clone(),
                session_backend: Arc::new(BinaryFileBackend::new(self.scratch.clone())),
                ..Default::default()
            };
            match Client::connect(config).await {
                Ok((client, _shutdown)) => return Ok(client),
                Err(e) if attempt < self.retries && !is_session_rejection(&e) => {
                    tracing::debug!(attempt, "telegram connect failed, retrying: {e}");
                    tokio::time::sleep(CONNECT_BACKOFF * attempt).await;
                }
                Err(e) => return Err(map_error(e)),
            }
        }
    }

    async fn input_peer(
        &self,
        client: &Client,
        peer: &PeerRef,
    ) -> Result<(tl::enums::Peer, tl::enums::InputPeer)> {
        let resolved = match peer {
            PeerRef::SelfUser => return Ok((self_peer(), tl::enums::InputPeer::PeerSelf)),
            PeerRef::Username(username) => client
                .resolve_peer(&format!("@{username}"))
                .await
                .map_err(map_error)?,
            PeerRef::Id(id) => peer_from_marked_id(*id),
        };
        input_for(client, resolved).await
    }
}

async fn input_for(
    client: &Client,
    peer: tl::enums::Peer,
) -> Result<(tl::enums::Peer, tl::enums::InputPeer)> {
    if let Ok(input) = client.resolve_to_input_peer(&peer).await {
        return Ok((peer, input));
    }
    // Access hashes are only learned from server responses.
    client
        .get_dialogs(PEER_WARMUP_DIALOGS)
        .await
        .map_err(map_error)?;
    let input = client
        .resolve_to_input_peer(&peer)
        .await
        .map_err(|e| Error::Validation(format!("unknown peer: {e}")))?;
    Ok((peer, input))
}

async fn remove_scratch(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl TelegramClient for MtprotoClient {
    async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            return Ok(());
        }
        let client = self.open().await?;
        if self.session.is_some() && !client.is_authorized().await.map_err(map_error)? {
            return Err(Error::SessionInvalid(
                "stored session is no longer authorized".to_string(),
            ));
        }
        *inner = Some(client);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    async fn disconnect(&self) -> Result<()> {
        // Dropping the last clone closes the connection.
        self.inner.lock().await.take();
        remove_scratch(&self.scratch).await
    }

    async fn get_me(&self) -> Result<UserProfile> {
        let me = self.handle().await?.get_me().await.map_err(map_error)?;
        Ok(UserProfile {
            id: me.id.to_string(),
            username: me.username,
            first_name: me.first_name,
        })
    }

    async fn sign_in_with_qr(&self, on_token: &mut (dyn FnMut(Vec<u8>) + Send)) -> Result<()> {
        let client = self.handle().await?;
        let mut last_token: Option<Vec<u8>> = None;

        loop {
            let request = tl::functions::auth::ExportLoginToken {
                api_id: self.creds.api_id,
                api_hash: self.creds.api_hash.clone(),
                except_ids: Vec::new(),
            };
            let outcome = match client.invoke(&request).await {
                Ok(tl::enums::auth::LoginToken::MigrateTo(migrate)) => {
                    tracing::debug!(dc = migrate.dc_id, "login token migrated");
                    let import = tl::functions::auth::ImportLoginToken {
                        token: migrate.token,
                    };
                    client.invoke_on_dc(migrate.dc_id, &import).await
                }
                other => other,
            };

            match outcome {
                Ok(tl::enums::auth::LoginToken::Success(_)) => return Ok(()),
                Ok(tl::enums::auth::LoginToken::LoginToken(t)) => {
                    if last_token.as_deref() != Some(t.token.as_slice()) {
                        on_token(t.token.clone());
                        last_token = Some(t.token);
                    }
                }
                Ok(tl::enums::auth::LoginToken::MigrateTo(_)) => {
                    return Err(Error::AuthFault(
                        "login token migrated more than once".to_string(),
                    ));
                }
                Err(e) if e.is("SESSION_PASSWORD_NEEDED") => {
                    return Err(Error::AuthFault(
                        "two-step verification is enabled for this account; password login is not supported"
                            .to_string(),
                    ));
                }
                Err(e) => return Err(Error::AuthFault(format!("qr login failed: {e}"))),
            }

            tokio::time::sleep(QR_POLL_INTERVAL).await;
        }
    }

    async fn export_session(&self) -> Result<SessionBlob> {
        self.handle()
            .await?
            .save_session()
            .await
            .map_err(map_error)?;
        let bytes = tokio::fs::read(&self.scratch).await?;
        if bytes.is_empty() {
            return Err(Error::External("telegram session file is empty".to_string()));
        }
        Ok(SessionBlob(bytes))
    }

    async fn dialogs(&self, limit: usize) -> Result<Vec<DialogSummary>> {
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let dialogs = self
            .handle()
            .await?
            .get_dialogs(limit)
            .await
            .map_err(map_error)?;
        Ok(dialogs.iter().map(dialog_summary).collect())
    }

    async fn history(&self, peer: &PeerRef, limit: usize, offset_id: i32) -> Result<HistoryPage> {
        let client = self.handle().await?;
        let (_, input) = self.input_peer(&client, peer).await?;
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let messages = client
            .get_messages(input, limit, offset_id)
            .await
            .map_err(map_error)?;
        Ok(HistoryPage::new(
            messages.iter().filter_map(message_summary).collect(),
        ))
    }

    async fn send_message(
        &self,
        peer: &PeerRef,
        text: &str,
        reply_to: Option<i32>,
    ) -> Result<SentMessage> {
        let client = self.handle().await?;
        let (target, _) = self.input_peer(&client, peer).await?;
        let message = InputMessage::text(text).reply_to(reply_to);
        client
            .send_message_to_peer_ex(target, &message)
            .await
            .map_err(map_error)?;
        Ok(SentMessage {
            id: None,
            peer: peer.to_string(),
        })
    }

    async fn send_media(
        &self,
        peer: &PeerRef,
        media: MediaUpload,
        caption: Option<&str>,
    ) -> Result<SentMessage> {
        let client = self.handle().await?;
        let (target, _) = self.input_peer(&client, peer).await?;
        let mime = media
            .mime_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        let uploaded = client
            .upload_file(&media.data, &media.file_name, mime)
            .await
            .map_err(map_error)?;
        let input_media = if sends_as_photo(mime) {
            uploaded.as_photo_media()
        } else {
            uploaded.as_document_media()
        };
        client
            .send_file(target, input_media, caption.unwrap_or_default())
            .await
            .map_err(map_error)?;
        Ok(SentMessage {
            id: None,
            peer: peer.to_string(),
        })
    }

    async fn forward(&self, req: &ForwardRequest) -> Result<Vec<i32>> {
        let client = self.handle().await?;
        let (_, from_peer) = self.input_peer(&client, &req.from).await?;
        let (_, to_peer) = self.input_peer(&client, &req.to).await?;

        let request = tl::functions::messages::ForwardMessages {
            silent: false,
            background: false,
            with_my_score: false,
            drop_author: req.as_copy,
            drop_media_captions: false,
            noforwards: false,
            from_peer,
            id: vec![req.message_id],
            random_id: vec![rand::thread_rng().gen::<i64>()],
            to_peer,
            top_msg_id: None,
            reply_to: None,
            schedule_date: None,
            schedule_repeat_period: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            video_timestamp: None,
            allow_paid_stars: None,
            allow_paid_floodskip: false,
            suggested_post: None,
        };
        let updates = client.invoke(&request).await.map_err(map_error)?;
        Ok(new_message_ids(&updates))
    }

    async fn download_media(&self, peer: &PeerRef, message_id: i32) -> Result<MediaDownload> {
        let client = self.handle().await?;
        let (target, _) = self.input_peer(&client, peer).await?;
        let messages = client
            .get_messages_by_id(target, &[message_id])
            .await
            .map_err(map_error)?;

        let Some(message) = messages
            .into_iter()
            .find(|m| m.id() == message_id && !matches!(m.raw, tl::enums::Message::Empty(_)))
        else {
            return Ok(MediaDownload::MessageNotFound);
        };
        let Some(location) = message.download_location() else {
            return Ok(MediaDownload::NoMedia);
        };
        let bytes = client.download_media(location).await.map_err(map_error)?;
        Ok(MediaDownload::Bytes(bytes))
    }

    async fn all_stories(&self) -> Result<AllStories> {
        let client = self.handle().await?;
        let request = tl::functions::stories::GetAllStories {
            next: false,
            hidden: false,
            state: None,
        };
        let all = match client.invoke(&request).await.map_err(map_error)? {
            tl::enums::stories::AllStories::AllStories(all) => all,
            tl::enums::stories::AllStories::NotModified(_) => return Ok(AllStories::default()),
        };

        // Later by-id lookups need the access hashes carried here.
        client.cache_users_slice_pub(&all.users).await;
        client.cache_chats_slice_pub(&all.chats).await;

        Ok(AllStories {
            peer_stories: all
                .peer_stories
                .iter()
                .map(|p| match p {
                    tl::enums::PeerStories::PeerStories(p) => PeerStories {
                        peer: peer_id(&p.peer),
                        stories: p.stories.iter().map(story_item).collect(),
                    },
                })
                .collect(),
            chats: all.chats.iter().map(story_chat).collect(),
            users: all.users.iter().map(story_user).collect(),
        })
    }

    async fn stories_by_id(&self, peer: PeerId, ids: &[i32]) -> Result<Vec<StoryItem>> {
        let client = self.handle().await?;
        let (_, input) = input_for(&client, peer_to_tl(peer)).await?;
        let request = tl::functions::stories::GetStoriesById {
            peer: input,
            id: ids.to_vec(),
        };
        let tl::enums::stories::Stories::Stories(found) =
            client.invoke(&request).await.map_err(map_error)?;
        Ok(found.stories.iter().map(story_item).collect())
    }

    async fn peer_stories(&self, peer: &PeerRef) -> Result<Vec<StoryItem>> {
        let client = self.handle().await?;
        let (_, input) = self.input_peer(&client, peer).await?;
        let request = tl::functions::stories::GetPeerStories { peer: input };
        let tl::enums::stories::PeerStories::PeerStories(found) =
            client.invoke(&request).await.map_err(map_error)?;
        let tl::enums::PeerStories::PeerStories(stories) = found.stories;
        Ok(stories.stories.iter().map(story_item).collect())
    }

    async fn read_stories(&self, peer: &PeerRef, max_id: i32) -> Result<Vec<i32>> {
        let client = self.handle().await?;
        let (_, input) = self.input_peer(&client, peer).await?;
        let request = tl::functions::stories::ReadStories {
            peer: input,
            max_id,
        };
        client.invoke(&request).await.map_err(map_error)
    }
}

// ============== Error mapping ==============

fn is_session_rejection(e: &InvocationError) -> bool {
    if e.is("SESSION_PASSWORD_NEEDED") {
        return false;
    }
    e.is("AUTH_KEY_UNREGISTERED")
        || e.is("AUTH_KEY_INVALID")
        || e.is("AUTH_KEY_DUPLICATED")
        || e.is("SESSION_REVOKED")
        || e.is("SESSION_EXPIRED")
        || e.is("USER_DEACTIVATED*")
        || matches!(e, InvocationError::Rpc(r) if r.code == 401)
}

fn map_error(e: InvocationError) -> Error {
    if is_session_rejection(&e) {
        return Error::SessionInvalid(e.to_string());
    }
    if e.is("PEER_ID_INVALID") || e.is("USERNAME_INVALID") || e.is("USERNAME_NOT_OCCUPIED") {
        return Error::Validation(format!("invalid peer: {e}"));
    }
    Error::External(format!("telegram: {e}"))
}

// ============== Conversions ==============

fn self_peer() -> tl::enums::Peer {
    tl::enums::Peer::User(tl::types::PeerUser { user_id: 0 })
}

fn peer_from_marked_id(id: i64) -> tl::enums::Peer {
    if id >= 0 {
        tl::enums::Peer::User(tl::types::PeerUser { user_id: id })
    } else if id <= -CHANNEL_ID_OFFSET {
        tl::enums::Peer::Channel(tl::types::PeerChannel {
            channel_id: -id - CHANNEL_ID_OFFSET,
        })
    } else {
        tl::enums::Peer::Chat(tl::types::PeerChat { chat_id: -id })
    }
}

fn marked_id(peer: &tl::enums::Peer) -> i64 {
    match peer {
        tl::enums::Peer::User(u) => u.user_id,
        tl::enums::Peer::Chat(c) => -c.chat_id,
        tl::enums::Peer::Channel(c) => -(CHANNEL_ID_OFFSET + c.channel_id),
    }
}

fn peer_id(peer: &tl::enums::Peer) -> PeerId {
    match peer {
        tl::enums::Peer::User(u) => PeerId::User(u.user_id),
        tl::enums::Peer::Chat(c) => PeerId::Chat(c.chat_id),
        tl::enums::Peer::Channel(c) => PeerId::Channel(c.channel_id),
    }
}

fn peer_to_tl(peer: PeerId) -> tl::enums::Peer {
    match peer {
        PeerId::User(user_id) => tl::enums::Peer::User(tl::types::PeerUser { user_id }),
        PeerId::Chat(chat_id) => tl::enums::Peer::Chat(tl::types::PeerChat { chat_id }),
        PeerId::Channel(channel_id) => {
            tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id })
        }
    }
}

fn sends_as_photo(mime: &str) -> bool {
    matches!(mime, "image/jpeg" | "image/png" | "image/webp")
}

/// `MessageMedia` class name, e.g. `MessageMediaPhoto`.
fn media_class(media: &tl::enums::MessageMedia) -> String {
    media_class_from_debug(&format!("{media:?}"))
}

fn media_class_from_debug(debug: &str) -> String {
    let variant = debug
        .split(|c: char| !c.is_ascii_alphanumeric())
        .next()
        .unwrap_or_default();
    format!("MessageMedia{variant}")
}

fn dialog_summary(dialog: &Dialog) -> DialogSummary {
    let (is_channel, is_group, channel_username) = match &dialog.chat {
        Some(tl::enums::Chat::Channel(c)) => (true, c.megagroup, c.username.clone()),
        Some(tl::enums::Chat::ChannelForbidden(c)) => (true, c.megagroup, None),
        Some(tl::enums::Chat::Chat(_)) | Some(tl::enums::Chat::Forbidden(_)) => {
            (false, true, None)
        }
        _ => (false, false, None),
    };
    let user_username = match &dialog.entity {
        Some(tl::enums::User::User(u)) => u.username.clone(),
        _ => None,
    };

    DialogSummary {
        id: dialog.peer().map(marked_id),
        name: dialog.title(),
        is_channel,
        is_group,
        is_user: matches!(dialog.peer(), Some(tl::enums::Peer::User(_))),
        username: user_username.or(channel_username),
    }
}

fn message_summary(message: &IncomingMessage) -> Option<MessageSummary> {
    match &message.raw {
        tl::enums::Message::Message(m) => Some(MessageSummary {
            id: m.id,
            date: i64::from(m.date),
            peer: Some(peer_id(&m.peer_id)),
            from: m.from_id.as_ref().map(peer_id),
            text: message.text().map(str::to_string),
            out: m.out,
            reply_to_id: match &m.reply_to {
                Some(tl::enums::MessageReplyHeader::MessageReplyHeader(h)) => h.reply_to_msg_id,
                _ => None,
            },
            media_class: m.media.as_ref().map(media_class),
        }),
        tl::enums::Message::Service(m) => Some(MessageSummary {
            id: m.id,
            date: i64::from(m.date),
            peer: Some(peer_id(&m.peer_id)),
            from: m.from_id.as_ref().map(peer_id),
            text: None,
            out: m.out,
            reply_to_id: None,
            media_class: None,
        }),
        tl::enums::Message::Empty(_) => None,
    }
}

fn new_message_ids(updates: &tl::enums::Updates) -> Vec<i32> {
    let list = match updates {
        tl::enums::Updates::Updates(u) => &u.updates,
        tl::enums::Updates::Combined(u) => &u.updates,
        _ => return Vec::new(),
    };
    list.iter()
        .filter_map(|u| match u {
            tl::enums::Update::MessageId(m) => Some(m.id),
            _ => None,
        })
        .collect()
}

fn story_item(item: &tl::enums::StoryItem) -> StoryItem {
    match item {
        tl::enums::StoryItem::StoryItem(s) => StoryItem::Full(Story {
            id: s.id,
            date: i64::from(s.date),
            expire_date: i64::from(s.expire_date),
            caption: s.caption.clone().filter(|c| !c.is_empty()),
            media_class: Some(media_class(&s.media)),
            pinned: s.pinned,
        }),
        tl::enums::StoryItem::Skipped(s) => StoryItem::Skipped {
            id: s.id,
            date: i64::from(s.date),
            expire_date: i64::from(s.expire_date),
        },
        tl::enums::StoryItem::Deleted(s) => StoryItem::Deleted { id: s.id },
    }
}

fn story_chat(chat: &tl::enums::Chat) -> StoryChat {
    let (id, title, username, class_name) = match chat {
        tl::enums::Chat::Channel(c) => (c.id, Some(c.title.clone()), c.username.clone(), "Channel"),
        tl::enums::Chat::ChannelForbidden(c) => {
            (c.id, Some(c.title.clone()), None, "ChannelForbidden")
        }
        tl::enums::Chat::Chat(c) => (c.id, Some(c.title.clone()), None, "Chat"),
        tl::enums::Chat::Forbidden(c) => (c.id, Some(c.title.clone()), None, "ChatForbidden"),
        tl::enums::Chat::Empty(c) => (c.id, None, None, "ChatEmpty"),
    };
    StoryChat {
        id,
        title,
        username,
        class_name: Some(class_name.to_string()),
    }
}

fn story_user(user: &tl::enums::User) -> StoryUser {
    match user {
        tl::enums::User::User(u) => StoryUser {
            id: u.id,
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            username: u.username.clone(),
        },
        tl::enums::User::Empty(u) => StoryUser {
            id: u.id,
            first_name: None,
            last_name: None,
            username: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use layer_client::RpcError;

    use super::*;

    fn rpc(code: i32, message: &str) -> InvocationError {
        InvocationError::Rpc(RpcError::from_telegram(code, message))
    }

    #[test]
    fn marked_ids_round_trip_through_peers() {
        for id in [42_i64, -12345, -1_001_234_567_890] {
            assert_eq!(marked_id(&peer_from_marked_id(id)), id);
        }
        assert_eq!(
            peer_id(&peer_from_marked_id(-1_001_234_567_890)),
            PeerId::Channel(1_234_567_890)
        );
        assert_eq!(peer_id(&peer_from_marked_id(-77)), PeerId::Chat(77));
    }

    #[test]
    fn revoked_sessions_map_to_session_invalid() {
        assert!(map_error(rpc(401, "AUTH_KEY_UNREGISTERED")).is_session_invalid());
        assert!(map_error(rpc(401, "SESSION_REVOKED")).is_session_invalid());
        assert!(map_error(rpc(401, "USER_DEACTIVATED_BAN")).is_session_invalid());
        assert!(!map_error(rpc(401, "SESSION_PASSWORD_NEEDED")).is_session_invalid());
        assert!(!map_error(rpc(420, "FLOOD_WAIT_30")).is_session_invalid());
    }

    #[test]
    fn bad_peers_are_validation_errors() {
        assert!(matches!(
            map_error(rpc(400, "USERNAME_NOT_OCCUPIED")),
            Error::Validation(_)
        ));
        assert!(matches!(
            map_error(InvocationError::Dropped),
            Error::External(_)
        ));
    }

    #[test]
    fn media_class_from_variant_name() {
        assert_eq!(
            media_class_from_debug("Photo(MessageMediaPhoto { spoiler: false })"),
            "MessageMediaPhoto"
        );
        assert_eq!(media_class_from_debug("Empty"), "MessageMediaEmpty");
    }

    #[test]
    fn only_common_images_go_out_as_photos() {
        assert!(sends_as_photo("image/jpeg"));
        assert!(!sends_as_photo("image/gif"));
        assert!(!sends_as_photo("video/mp4"));
    }

    #[tokio::test]
    async fn connector_hands_out_distinct_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MtprotoConnector::new(dir.path().join(".mtproto"), 0).unwrap();
        assert_eq!(connector.retries, 1);
        let creds = ApiCredentials::new(1, "hash").unwrap();
        let a = connector.client(&creds, None).unwrap();
        let b = connector.client(&creds, None).unwrap();
        assert!(!a.is_connected().await);
        assert!(!b.is_connected().await);
        drop((a, b));
    }
}
