//! Default [`Downloader`] backed by `reqwest`.
//!
//! Proxy selection is an explicit constructor argument threaded into the
//! client builder; nothing here touches process-wide proxy environment
//! variables.

use async_trait::async_trait;

use crate::transport::{BotError, Downloader};

/// HTTP downloader for the CDN URLs the bot hands out.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    /// Build a downloader, optionally routed through an HTTP(S) proxy
    /// (`http://host:port`).
    pub fn new(proxy: Option<&str>) -> Result<Self, BotError> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| BotError::Download(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| BotError::Download(format!("client build failed: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str) -> Result<Vec<u8>, BotError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BotError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Download(format!(
                "unexpected status {status} for {url}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BotError::Download(e.to_string()))?;
        tracing::debug!(url, bytes = bytes.len(), "Downloaded artifact");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_without_proxy() {
        assert!(HttpDownloader::new(None).is_ok());
    }

    #[test]
    fn builds_with_proxy() {
        assert!(HttpDownloader::new(Some("http://127.0.0.1:8080")).is_ok());
    }

    #[test]
    fn rejects_malformed_proxy() {
        assert!(HttpDownloader::new(Some("::not a proxy::")).is_err());
    }
}
