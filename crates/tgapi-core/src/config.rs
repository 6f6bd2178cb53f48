use std::{
    env, fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, login::LoginSettings, security, Result};

/// Typed configuration, read from the environment (and `.env`).
#[derive(Clone)]
pub struct Config {
    // HTTP
    pub host: IpAddr,
    pub port: u16,
    pub max_body_bytes: usize,

    // Access control
    pub api_token: String,
    pub env_file: PathBuf,

    // Sessions
    pub session_dir: PathBuf,
    pub default_api_id: Option<i64>,
    pub default_api_hash: Option<String>,

    // Login
    pub qr_initial_wait: Duration,
    pub qr_terminal: bool,
    pub connection_retries: u32,

    // Media
    pub media_max_bytes: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("session_dir", &self.session_dir)
            .field("default_api_id", &self.default_api_id)
            .field("qr_initial_wait", &self.qr_initial_wait)
            .field("qr_terminal", &self.qr_terminal)
            .field("connection_retries", &self.connection_retries)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("media_max_bytes", &self.media_max_bytes)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_file = env_path("ENV_FILE").unwrap_or_else(|| PathBuf::from(".env"));
        // Existing process env wins over the file.
        if let Err(e) = dotenvy::from_path(&env_file) {
            if !e.not_found() {
                return Err(Error::Config(format!(
                    "failed to read {}: {e}",
                    env_file.display()
                )));
            }
        }

        let host = env_str("API_HOST")
            .and_then(non_empty)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let host: IpAddr = host
            .parse()
            .map_err(|_| Error::Config(format!("API_HOST is not an IP address: {host}")))?;

        let port = match env_str("API_PORT").or_else(|| env_str("PORT")).and_then(non_empty) {
            Some(p) => p
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid port: {p}")))?,
            None => 3000,
        };

        let session_dir = env_path("SESSION_DIR").unwrap_or_else(|| PathBuf::from("./sessions"));

        // Default credentials are optional; requests may carry their own.
        let default_api_id = env_i64("API_ID").filter(|id| *id > 0);
        let default_api_hash = env_str("API_HASH").and_then(non_empty);

        let api_token = match env_str("API_TOKEN").and_then(non_empty) {
            Some(t) => t,
            None => {
                let token = security::generate_token();
                match write_env_value(&env_file, "API_TOKEN", &token) {
                    Ok(()) => tracing::warn!(
                        "API_TOKEN was not set; generated a new one and saved it to {}",
                        env_file.display()
                    ),
                    Err(e) => tracing::warn!(
                        "API_TOKEN was not set; generated one for this run but could not save it: {e}"
                    ),
                }
                token
            }
        };

        let qr_initial_wait =
            Duration::from_millis(env_u64("QR_INITIAL_WAIT_MS").unwrap_or(1500).min(30_000));
        let qr_terminal = env_bool("QR_TERMINAL").unwrap_or(true);
        let connection_retries = env_u32("CONNECTION_RETRIES").unwrap_or(5);

        let max_body_bytes = env_usize("MAX_BODY_BYTES").unwrap_or(4 * 1024 * 1024);
        let media_max_bytes = env_usize("MEDIA_MAX_BYTES").unwrap_or(50 * 1024 * 1024);

        Ok(Self {
            host,
            port,
            max_body_bytes,
            api_token,
            env_file,
            session_dir,
            default_api_id,
            default_api_hash,
            qr_initial_wait,
            qr_terminal,
            connection_retries,
            media_max_bytes,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn login_settings(&self) -> LoginSettings {
        LoginSettings {
            initial_wait: self.qr_initial_wait,
            default_api_id: self.default_api_id,
            default_api_hash: self.default_api_hash.clone(),
            render_terminal: self.qr_terminal,
        }
    }
}

/// Set `key=value` in an env file, replacing an existing line for `key` or appending one.
pub fn write_env_value(path: &Path, key: &str, value: &str) -> Result<()> {
    let existing = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let prefix = format!("{key}=");
    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            if line.trim_start().starts_with(&prefix) {
                replaced = true;
                format!("{key}={value}")
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(format!("{key}={value}"));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    fs::write(path, out)?;
    Ok(())
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_str(key).and_then(non_empty).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_u32_is_ignored() {
        env::set_var("TGAPI_TEST_RETRIES_HUGE", "5000000000");
        env::set_var("TGAPI_TEST_RETRIES_OK", " 7 ");
        assert_eq!(env_u32("TGAPI_TEST_RETRIES_HUGE"), None);
        assert_eq!(env_u32("TGAPI_TEST_RETRIES_OK"), Some(7));
    }

    #[test]
    fn env_value_is_appended_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "API_ID=1\n# comment\n").unwrap();

        write_env_value(&path, "API_TOKEN", "abc").unwrap();
        let txt = fs::read_to_string(&path).unwrap();
        assert_eq!(txt, "API_ID=1\n# comment\nAPI_TOKEN=abc\n");
    }

    #[test]
    fn env_value_replaces_existing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "API_TOKEN=\nAPI_HASH=h\n").unwrap();

        write_env_value(&path, "API_TOKEN", "new").unwrap();
        let txt = fs::read_to_string(&path).unwrap();
        assert_eq!(txt, "API_TOKEN=new\nAPI_HASH=h\n");
    }

    #[test]
    fn env_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.env");
        write_env_value(&path, "API_TOKEN", "t").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "API_TOKEN=t\n");
    }

    #[test]
    fn non_empty_trims() {
        assert_eq!(non_empty("  x ".to_string()), Some("x".to_string()));
        assert_eq!(non_empty("   ".to_string()), None);
    }
}
