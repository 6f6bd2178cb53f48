use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    domain::{
        ApiCredentials, DialogSummary, ForwardRequest, HistoryPage, MediaDownload, MediaUpload,
        PeerId, PeerRef, SentMessage, SessionBlob, UserProfile,
    },
    errors::Error,
    ports::{TelegramClient, TelegramConnector},
    stories::{AllStories, StoryItem},
    Result,
};

#[derive(Clone, Debug)]
pub enum Outcome {
    /// Block after the tokens until `FakeConnector::release`, then authorize.
    AuthorizeOnRelease,
    Fail(String),
    Hang,
}

#[derive(Clone, Debug)]
pub struct FakeBehavior {
    pub tokens: Vec<Vec<u8>>,
    pub outcome: Outcome,
    /// Clients built from a stored session fail `get_me` with `SessionInvalid`.
    pub reject_sessions: bool,
    /// Clients built without a session fail `connect` with a transport error.
    pub connect_error: Option<String>,
    /// On session rejection, swap this file for a directory so removing it fails.
    pub wedge_on_reject: Option<PathBuf>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            tokens: vec![b"token".to_vec()],
            outcome: Outcome::AuthorizeOnRelease,
            reject_sessions: false,
            connect_error: None,
            wedge_on_reject: None,
        }
    }
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    disconnects: AtomicUsize,
    tokens: AtomicUsize,
    sends: Mutex<Vec<(String, String)>>,
}

pub struct FakeConnector {
    behavior: FakeBehavior,
    counters: Arc<Counters>,
    release: watch::Sender<bool>,
}

impl FakeConnector {
    pub fn new(behavior: FakeBehavior) -> Self {
        let (release, _) = watch::channel(false);
        Self {
            behavior,
            counters: Arc::new(Counters::default()),
            release,
        }
    }

    pub fn release(&self) {
        self.release.send_replace(true);
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.counters.disconnects.load(Ordering::SeqCst)
    }

    pub fn tokens_delivered(&self) -> usize {
        self.counters.tokens.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.counters.sends.lock().unwrap().clone()
    }
}

impl TelegramConnector for FakeConnector {
    fn client(
        &self,
        _creds: &ApiCredentials,
        session: Option<SessionBlob>,
    ) -> Result<Arc<dyn TelegramClient>> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            behavior: self.behavior.clone(),
            counters: Arc::clone(&self.counters),
            release: self.release.subscribe(),
            from_session: session.is_some(),
            connected: AtomicBool::new(false),
        }))
    }
}

pub struct FakeClient {
    behavior: FakeBehavior,
    counters: Arc<Counters>,
    release: watch::Receiver<bool>,
    from_session: bool,
    connected: AtomicBool,
}

fn unused<T>() -> Result<T> {
    Err(Error::External("not supported by fake".to_string()))
}

#[async_trait]
impl TelegramClient for FakeClient {
    async fn connect(&self) -> Result<()> {
        if let (false, Some(msg)) = (self.from_session, &self.behavior.connect_error) {
            return Err(Error::External(msg.clone()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_me(&self) -> Result<UserProfile> {
        if self.from_session && self.behavior.reject_sessions {
            if let Some(path) = &self.behavior.wedge_on_reject {
                let _ = std::fs::remove_file(path);
                std::fs::create_dir_all(path).unwrap();
            }
            return Err(Error::SessionInvalid("AUTH_KEY_UNREGISTERED".to_string()));
        }
        Ok(UserProfile {
            id: "42".to_string(),
            username: Some("alice".to_string()),
            first_name: Some("Alice".to_string()),
        })
    }

    async fn sign_in_with_qr(&self, on_token: &mut (dyn FnMut(Vec<u8>) + Send)) -> Result<()> {
        for t in &self.behavior.tokens {
            self.counters.tokens.fetch_add(1, Ordering::SeqCst);
            on_token(t.clone());
        }
        match &self.behavior.outcome {
            Outcome::AuthorizeOnRelease => {
                let mut rx = self.release.clone();
                let _ = rx.wait_for(|released| *released).await;
                Ok(())
            }
            Outcome::Fail(msg) => Err(Error::AuthFault(msg.clone())),
            Outcome::Hang => std::future::pending().await,
        }
    }

    async fn export_session(&self) -> Result<SessionBlob> {
        Ok(SessionBlob(b"fake-session".to_vec()))
    }

    async fn dialogs(&self, limit: usize) -> Result<Vec<DialogSummary>> {
        if self.from_session && self.behavior.reject_sessions {
            return Err(Error::SessionInvalid("AUTH_KEY_UNREGISTERED".to_string()));
        }
        Ok((0..limit.min(3))
            .map(|i| DialogSummary {
                id: Some(100 + i as i64),
                name: format!("chat {i}"),
                is_channel: i == 0,
                is_group: false,
                is_user: i != 0,
                username: None,
            })
            .collect())
    }

    async fn history(&self, _peer: &PeerRef, _limit: usize, _offset_id: i32) -> Result<HistoryPage> {
        unused()
    }

    async fn send_message(
        &self,
        peer: &PeerRef,
        text: &str,
        _reply_to: Option<i32>,
    ) -> Result<SentMessage> {
        self.counters
            .sends
            .lock()
            .unwrap()
            .push((peer.to_string(), text.to_string()));
        Ok(SentMessage {
            id: Some(7),
            peer: peer.to_string(),
        })
    }

    async fn send_media(
        &self,
        _peer: &PeerRef,
        _media: MediaUpload,
        _caption: Option<&str>,
    ) -> Result<SentMessage> {
        unused()
    }

    async fn forward(&self, _req: &ForwardRequest) -> Result<Vec<i32>> {
        unused()
    }

    async fn download_media(&self, _peer: &PeerRef, _message_id: i32) -> Result<MediaDownload> {
        unused()
    }

    async fn all_stories(&self) -> Result<AllStories> {
        Ok(AllStories::default())
    }

    async fn stories_by_id(&self, _peer: PeerId, _ids: &[i32]) -> Result<Vec<StoryItem>> {
        unused()
    }

    async fn peer_stories(&self, _peer: &PeerRef) -> Result<Vec<StoryItem>> {
        unused()
    }

    async fn read_stories(&self, _peer: &PeerRef, _max_id: i32) -> Result<Vec<i32>> {
        unused()
    }
}
