use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    domain::{AccountName, ApiCredentials, SessionBlob, UserProfile},
    errors::Error,
    utils::now_millis,
    Result,
};

/// JSON record stored next to the session blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRecord {
    pub api_id: i64,
    pub api_hash: String,
    /// Unix millis of the last successful save.
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl CredentialsRecord {
    pub fn new(creds: &ApiCredentials, user: Option<UserProfile>) -> Self {
        Self {
            api_id: creds.api_id as i64,
            api_hash: creds.api_hash.clone(),
            updated_at: now_millis(),
            user,
        }
    }

    /// Credentials usable for reconnecting, with `defaults` filling in missing fields.
    pub fn credentials(&self, defaults: Option<&ApiCredentials>) -> Option<ApiCredentials> {
        let api_id = if self.api_id > 0 {
            self.api_id
        } else {
            defaults?.api_id as i64
        };
        let api_hash = if self.api_hash.trim().is_empty() {
            defaults?.api_hash.clone()
        } else {
            self.api_hash.clone()
        };
        ApiCredentials::new(api_id, api_hash).ok()
    }
}

/// What is on disk for one account. Either half may be missing.
#[derive(Clone, Debug, Default)]
pub struct StoredAccount {
    pub credentials: Option<CredentialsRecord>,
    pub session: Option<SessionBlob>,
}

/// File-backed store: `<root>/<name>.json` + `<root>/<name>.session`.
#[derive(Clone, Debug)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn credentials_path(&self, name: &AccountName) -> PathBuf {
        self.root.join(format!("{}.json", name.as_str()))
    }

    fn session_path(&self, name: &AccountName) -> PathBuf {
        self.root.join(format!("{}.session", name.as_str()))
    }

    pub async fn load(&self, name: &AccountName) -> Result<StoredAccount> {
        let credentials = match read_optional(&self.credentials_path(name)).await? {
            Some(bytes) => match serde_json::from_slice::<CredentialsRecord>(&bytes) {
                Ok(rec) => Some(rec),
                Err(e) => {
                    tracing::warn!(account = %name, "unreadable credentials record: {e}");
                    None
                }
            },
            None => None,
        };
        let session = read_optional(&self.session_path(name))
            .await?
            .map(SessionBlob)
            .filter(|b| !b.is_empty());

        Ok(StoredAccount {
            credentials,
            session,
        })
    }

    /// Cheap check used before attempting session reuse.
    pub async fn has_session(&self, name: &AccountName) -> bool {
        fs::metadata(self.session_path(name))
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    pub async fn save(
        &self,
        name: &AccountName,
        record: &CredentialsRecord,
        session: &SessionBlob,
    ) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        let json = serde_json::to_vec_pretty(record)?;
        write_replace(&self.credentials_path(name), &json).await?;
        write_replace(&self.session_path(name), session.as_bytes()).await?;
        tracing::debug!(account = %name, "session saved");
        Ok(())
    }

    /// Delete the session blob. The credentials record is kept so a later login can reuse it.
    pub async fn remove(&self, name: &AccountName) -> Result<()> {
        match fs::remove_file(self.session_path(name)).await {
            Ok(()) => {
                tracing::info!(account = %name, "stale session removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write to a temporary sibling, then rename over the target.
async fn write_replace(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidPath {
            path: path.to_path_buf(),
            reason: "missing file name".to_string(),
        })?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
