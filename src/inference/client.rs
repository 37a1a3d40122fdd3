use anyhow::Context;
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, instrument};

use super::parse::{parse_analysis, parse_estimate};
use super::{FoodAnalysis, InferenceClient, NameEstimate};
use crate::stats::narrative::{NarrativeRequest, NarrativeService};

/// JSON-over-HTTP client for the remote inference endpoint. Retries on
/// transport failures belong to the network layer below this client.
#[derive(Clone)]
pub struct HttpInferenceClient {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct AnalyzeBody<'a> {
    image_base64: &'a str,
    mime: &'a str,
}

#[derive(Serialize)]
struct EstimateBody<'a> {
    name: &'a str,
}

impl HttpInferenceClient {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("build inference http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn post_text<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> anyhow::Result<String> {
        let url = format!("{}/{}", self.endpoint, path);
        let text = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?
            .error_for_status()
            .with_context(|| format!("POST {} status", url))?
            .text()
            .await
            .context("read inference body")?;
        debug!(%url, len = text.len(), "inference response");
        Ok(text)
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    #[instrument(skip(self, image), fields(bytes = image.len()))]
    async fn analyze_image(&self, image: Bytes) -> anyhow::Result<FoodAnalysis> {
        let encoded = Base64::encode_string(&image);
        let text = self
            .post_text(
                "analyze",
                &AnalyzeBody {
                    image_base64: &encoded,
                    mime: sniff_mime(&image),
                },
            )
            .await?;
        Ok(parse_analysis(&text))
    }

    #[instrument(skip(self))]
    async fn estimate_from_name(&self, name: &str) -> anyhow::Result<NameEstimate> {
        let text = self.post_text("estimate", &EstimateBody { name }).await?;
        Ok(parse_estimate(&text, name))
    }
}

/// The summary writer sits behind the same endpoint.
#[async_trait]
impl NarrativeService for HttpInferenceClient {
    #[instrument(skip(self, request), fields(records = request.records.len()))]
    async fn summarize(&self, request: &NarrativeRequest) -> anyhow::Result<String> {
        let text = self.post_text("narrative", request).await?;
        let summary = text.trim();
        anyhow::ensure!(!summary.is_empty(), "narrative service returned an empty summary");
        Ok(summary.to_string())
    }
}

pub(crate) fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [_, _, _, _, b'f', b't', b'y', b'p', b'h', b'e', b'i', b'c', ..] => "image/heic",
        _ => "application/octet-stream",
    }
}
