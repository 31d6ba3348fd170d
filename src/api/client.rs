use anyhow::{Context, Result};
use base64::Engine;
use std::time::Duration;
use tracing::info;

use super::types::{
    FinalizeRequest, FinalizeResponse, HomeworkStatus, LiveMetrics, ReportResponse,
    StartRequest, StartResponse, StreamChunkRequest,
};

/// Client-side view of the homework backend.
///
/// A trait so recording sessions can run against a mock in tests; the
/// real implementation is [`HomeworkClient`].
#[async_trait::async_trait]
pub trait HomeworkApi: Send + Sync {
    /// Query the authoritative session step and id.
    async fn status(&self) -> Result<HomeworkStatus>;

    /// Create or resume a session, optionally pinning an exercise.
    async fn start(&self, recommended_exercise_id: Option<&str>) -> Result<StartResponse>;

    /// Submit one audio chunk for incremental metrics. Any failure here is
    /// recoverable for the caller; the next chunk is an independent attempt.
    async fn stream_chunk(
        &self,
        session_id: &str,
        sequence_index: u64,
        audio_wav: &[u8],
        duration_seconds: f64,
    ) -> Result<LiveMetrics>;

    /// Submit the complete assembled recording for scoring.
    async fn finalize(&self, audio_wav: &[u8], duration_seconds: f64)
        -> Result<FinalizeResponse>;

    /// Fetch the scored report for the completed session.
    async fn report(&self) -> Result<ReportResponse>;
}

/// HTTP client for the homework backend API.
pub struct HomeworkClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HomeworkClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!("Homework API client targeting {}", base_url);

        Ok(Self {
            http,
            base_url,
            auth_token,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_auth(self.http.get(format!("{}{}", self.base_url, path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_auth(self.http.post(format!("{}{}", self.base_url, path)))
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Map a non-success response to an error carrying the body text.
async fn into_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("backend returned {}: {}", status, body);
    }
    resp.json::<T>().await.context("failed to parse backend response")
}

fn encode_audio(audio_wav: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(audio_wav)
}

#[async_trait::async_trait]
impl HomeworkApi for HomeworkClient {
    async fn status(&self) -> Result<HomeworkStatus> {
        let resp = self
            .get("/status")
            .send()
            .await
            .context("status request failed")?;
        into_json(resp).await
    }

    async fn start(&self, recommended_exercise_id: Option<&str>) -> Result<StartResponse> {
        let body = StartRequest {
            recommended_exercise_id: recommended_exercise_id.map(str::to_string),
        };
        let resp = self
            .post("/start")
            .json(&body)
            .send()
            .await
            .context("start request failed")?;
        into_json(resp).await
    }

    async fn stream_chunk(
        &self,
        session_id: &str,
        sequence_index: u64,
        audio_wav: &[u8],
        duration_seconds: f64,
    ) -> Result<LiveMetrics> {
        let body = StreamChunkRequest {
            session_id: session_id.to_string(),
            sequence_index,
            audio_base64: encode_audio(audio_wav),
            duration_seconds,
        };
        let resp = self
            .post("/recordings/stream-chunk")
            .json(&body)
            .send()
            .await
            .context("stream-chunk request failed")?;
        into_json(resp).await
    }

    async fn finalize(
        &self,
        audio_wav: &[u8],
        duration_seconds: f64,
    ) -> Result<FinalizeResponse> {
        let body = FinalizeRequest {
            audio_base64: encode_audio(audio_wav),
            duration_seconds,
        };
        let resp = self
            .post("/recordings/finalize")
            .json(&body)
            .send()
            .await
            .context("finalize request failed")?;
        into_json(resp).await
    }

    async fn report(&self) -> Result<ReportResponse> {
        let resp = self
            .get("/report")
            .send()
            .await
            .context("report request failed")?;
        into_json(resp).await
    }
}
