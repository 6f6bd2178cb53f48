use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;

// ============== Login URLs ==============

/// `tg://login?token=<base64url>` for a raw login token.
pub fn login_url(token: &[u8]) -> String {
    format!("tg://login?token={}", URL_SAFE_NO_PAD.encode(token))
}

// ============== Request helpers ==============

/// Clamp a caller-supplied page size into `1..=max`, using `default` when absent or zero.
pub fn clamp_limit(raw: Option<i64>, default: usize, max: usize) -> usize {
    match raw {
        Some(n) if n > 0 => (n as u64).min(max as u64) as usize,
        _ => default.min(max),
    }
}

// ============== Timestamp Helpers ==============

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
