//! Remote media fetch for `/send/media`.
//!
//! Only `http`/`https` URLs are accepted, and bodies are capped so a caller
//! cannot make the service buffer arbitrarily large files.

use std::time::Duration;

use reqwest::Url;

use crate::{domain::MediaUpload, errors::Error, Result};

#[derive(Clone, Debug)]
pub struct MediaFetcher {
    http: reqwest::Client,
    max_bytes: usize,
}

impl MediaFetcher {
    pub fn new(max_bytes: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self { http, max_bytes })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn fetch(&self, raw_url: &str) -> Result<MediaUpload> {
        let url = parse_media_url(raw_url)?;

        let mut resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::External(format!("media fetch error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "media fetch failed: {}",
                resp.status()
            )));
        }

        if let Some(len) = resp.content_length() {
            if len > self.max_bytes as u64 {
                return Err(self.too_large());
            }
        }

        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty());

        let mut data = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| Error::External(format!("media read error: {e}")))?
        {
            if data.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large());
            }
            data.extend_from_slice(&chunk);
        }

        tracing::debug!(url = %url, bytes = data.len(), "media fetched");

        Ok(MediaUpload {
            file_name: file_name_from_url(&url),
            mime_type,
            data,
        })
    }

    fn too_large(&self) -> Error {
        Error::Validation(format!("media exceeds {} bytes", self.max_bytes))
    }
}

pub fn parse_media_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Validation("url required".to_string()));
    }
    let url = Url::parse(raw).map_err(|e| Error::Validation(format!("invalid url: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Validation(format!(
            "unsupported url scheme: {other} (only http/https)"
        ))),
    }
}

fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segs| segs.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "file".to_string())
}
