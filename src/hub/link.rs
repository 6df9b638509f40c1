//! Hub transport

use crate::error::{Error, Result};
use crate::tap::Frame;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Hub reporting operations. Implementations may fail; callers log and move on.
#[async_trait]
pub trait HubLink: Send + Sync {
    async fn report_session_start(&self, session_id: &str) -> Result<()>;

    async fn report_session_end(&self, session_id: &str) -> Result<()>;

    async fn report_frame(&self, frame: &Frame) -> Result<()>;
}

/// Hub reached over HTTP
pub struct HttpHubLink {
    base_url: reqwest::Url,
    client: reqwest::Client,
}

impl HttpHubLink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid hub url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("Hub url '{}' cannot carry a path", base_url)));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build hub client: {}", e)))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Base url extended with percent-encoded path segments
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Config(format!("Hub url '{}' cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post(&self, url: reqwest::Url, body: serde_json::Value) -> Result<()> {
        let response = self.client.post(url.clone()).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "Hub returned {} for {}",
                response.status(),
                url.path()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl HubLink for HttpHubLink {
    async fn report_session_start(&self, session_id: &str) -> Result<()> {
        let url = self.endpoint(&["api", "sessions"])?;
        self.post(url, json!({"sessionId": session_id, "type": "start"}))
            .await
    }

    async fn report_session_end(&self, session_id: &str) -> Result<()> {
        let url = self.endpoint(&["api", "sessions", session_id, "end"])?;
        self.post(url, json!({})).await
    }

    async fn report_frame(&self, frame: &Frame) -> Result<()> {
        let url = self.endpoint(&["api", "sessions", &frame.session_id, "frames"])?;
        self.post(url, json!({"type": frame.frame_type, "payload": frame.payload}))
            .await
    }
}
