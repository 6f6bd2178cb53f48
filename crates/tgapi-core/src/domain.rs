use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Caller-chosen account name, also used as the on-disk key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountName(String);

impl AccountName {
    pub const MAX_LEN: usize = 64;

    /// Validate a raw name. Names become file names, so anything that could
    /// escape the session directory is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(Error::Validation("name required".to_string()));
        }
        if name.len() > Self::MAX_LEN {
            return Err(Error::Validation(format!(
                "name must be at most {} characters",
                Self::MAX_LEN
            )));
        }
        if name.starts_with('.') || !name_pattern().is_match(name) {
            return Err(Error::Validation(
                "name may only contain letters, digits, '_', '-' and '.' and must not start with '.'"
                    .to_string(),
            ));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn name_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid name regex"))
}

/// Integration credentials for the wrapped protocol library.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub api_id: i32,
    pub api_hash: String,
}

impl ApiCredentials {
    pub fn new(api_id: i64, api_hash: impl Into<String>) -> Result<Self> {
        let api_hash = api_hash.into().trim().to_string();
        if api_id <= 0 || api_hash.is_empty() {
            return Err(Error::Validation("apiId and apiHash required".to_string()));
        }
        let api_id = i32::try_from(api_id)
            .map_err(|_| Error::Validation("apiId out of range".to_string()))?;
        Ok(Self { api_id, api_hash })
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .finish()
    }
}

/// Opaque serialized transport session produced by the wrapped library.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SessionBlob(pub Vec<u8>);

impl SessionBlob {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionBlob({} bytes)", self.0.len())
    }
}

/// Minimal profile of an authorized user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

/// Lifecycle status of a QR login attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    Unknown,
    Preparing,
    QrReady,
    Authorized,
    Error,
}

impl LoginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginStatus::Unknown => "unknown",
            LoginStatus::Preparing => "preparing",
            LoginStatus::QrReady => "qr_ready",
            LoginStatus::Authorized => "authorized",
            LoginStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoginStatus::Authorized | LoginStatus::Error)
    }

    /// Transitions a running attempt may make. `start` is not covered here:
    /// it creates a fresh attempt instead of mutating the old one.
    pub fn can_advance_to(self, next: LoginStatus) -> bool {
        use LoginStatus::*;
        matches!(
            (self, next),
            (Preparing, QrReady)
                | (Preparing, Authorized)
                | (Preparing, Error)
                | (QrReady, QrReady)
                | (QrReady, Authorized)
                | (QrReady, Error)
        )
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a login attempt, as returned to pollers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSnapshot {
    pub status: LoginStatus,
    pub login_url: Option<String>,
    pub user: Option<UserProfile>,
    pub error: Option<String>,
}

impl LoginSnapshot {
    pub fn unknown() -> Self {
        Self::bare(LoginStatus::Unknown)
    }

    pub fn preparing() -> Self {
        Self::bare(LoginStatus::Preparing)
    }

    pub fn qr_ready(login_url: String) -> Self {
        Self {
            login_url: Some(login_url),
            ..Self::bare(LoginStatus::QrReady)
        }
    }

    pub fn authorized(user: Option<UserProfile>) -> Self {
        Self {
            user,
            ..Self::bare(LoginStatus::Authorized)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::bare(LoginStatus::Error)
        }
    }

    fn bare(status: LoginStatus) -> Self {
        Self {
            status,
            login_url: None,
            user: None,
            error: None,
        }
    }
}

/// How a caller addresses a chat: `me`, `@username`, a numeric id, or a bare username.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerRef {
    SelfUser,
    Username(String),
    Id(i64),
}

impl PeerRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(Error::Validation("peer/channel required".to_string()));
        }
        if s == "me" || s == "self" {
            return Ok(PeerRef::SelfUser);
        }
        if let Some(username) = s.strip_prefix('@') {
            if username.is_empty() {
                return Err(Error::Validation(format!("invalid peer: {s}")));
            }
            return Ok(PeerRef::Username(username.to_string()));
        }
        if numeric_pattern().is_match(s) {
            return s
                .parse::<i64>()
                .map(PeerRef::Id)
                .map_err(|_| Error::Validation(format!("invalid peer id: {s}")));
        }
        Ok(PeerRef::Username(s.to_string()))
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRef::SelfUser => f.write_str("me"),
            PeerRef::Username(u) => write!(f, "@{u}"),
            PeerRef::Id(id) => write!(f, "{id}"),
        }
    }
}

fn numeric_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+$").expect("valid numeric regex"))
}

/// Owner of a peer-scoped object (story, message) as seen by the wrapped library.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum PeerId {
    User(i64),
    Chat(i64),
    Channel(i64),
}

impl PeerId {
    pub fn raw_id(self) -> i64 {
        match self {
            PeerId::User(id) | PeerId::Chat(id) | PeerId::Channel(id) => id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogSummary {
    pub id: Option<i64>,
    pub name: String,
    pub is_channel: bool,
    pub is_group: bool,
    pub is_user: bool,
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: i32,
    pub date: i64,
    pub peer: Option<PeerId>,
    pub from: Option<PeerId>,
    pub text: Option<String>,
    pub out: bool,
    pub reply_to_id: Option<i32>,
    pub media_class: Option<String>,
}

/// One page of history, newest first.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<MessageSummary>,
    pub next_offset_id: i32,
}

impl HistoryPage {
    pub fn new(messages: Vec<MessageSummary>) -> Self {
        let next_offset_id = messages.last().map(|m| m.id).unwrap_or(0);
        Self {
            messages,
            next_offset_id,
        }
    }
}

/// Outcome of a media download lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaDownload {
    Bytes(Vec<u8>),
    MessageNotFound,
    NoMedia,
}

/// A remote file handed to the wrapped library for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl fmt::Debug for MediaUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaUpload")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Reference to a message the wrapped library just created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub id: Option<i32>,
    pub peer: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardRequest {
    pub from: PeerRef,
    pub to: PeerRef,
    pub message_id: i32,
    /// Forward without author attribution.
    pub as_copy: bool,
}
