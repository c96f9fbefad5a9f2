//! Passage ranking through cross-encoder models.
//!
//! A cross-encoder scores a `(reference, passage)` pair jointly; callers use
//! it to rerank retrieval hits. Scores are returned zipped positionally with
//! their passages and never sorted here — ordering is the caller's decision.

use serde_json::json;
use std::time::Duration;

use crate::config::ModelsConfig;
use crate::error::{Error, Result};
use crate::models::ModelProvider;

/// Caps mirroring the embedding layer: oversized payloads are truncated, and
/// passage lists beyond the limit are rejected.
pub const MAX_REFERENCE_CHARS: usize = 10_000;
pub const MAX_PASSAGE_CHARS: usize = 10_000;
pub const MAX_PASSAGES: usize = 1_000;

/// A cross-encoder model selected for reranking.
#[derive(Debug, Clone)]
pub struct CrossEncoderModel {
    pub provider: ModelProvider,
    pub name: String,
}

/// One scored passage, in the same position as its input.
#[derive(Debug, Clone)]
pub struct RankedPassage {
    pub score: f64,
    pub passage: String,
}

pub struct CrossEncoderClient {
    http: reqwest::Client,
    config: ModelsConfig,
}

impl CrossEncoderClient {
    pub fn new(config: ModelsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Score each passage against the reference text.
    ///
    /// Output order matches input order 1:1. Bedrock-style backends expose no
    /// cross-encoder models, so only sagemaker-style endpoints are routable;
    /// any other provider is a configuration error.
    pub async fn rank(
        &self,
        model: &CrossEncoderModel,
        reference: &str,
        passages: &[String],
    ) -> Result<Vec<RankedPassage>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        if passages.len() > MAX_PASSAGES {
            return Err(Error::config(format!(
                "too many passages: {} (max {MAX_PASSAGES})",
                passages.len()
            )));
        }

        let reference = truncate_chars(reference, MAX_REFERENCE_CHARS);
        let capped: Vec<String> = passages
            .iter()
            .map(|p| truncate_chars(p, MAX_PASSAGE_CHARS))
            .collect();

        let scores = match model.provider {
            ModelProvider::Sagemaker => self.rank_sagemaker(model, &reference, &capped).await?,
            ModelProvider::Bedrock | ModelProvider::OpenAi => {
                return Err(Error::config(format!(
                    "provider {} has no cross-encoder support",
                    model.provider.as_str()
                )));
            }
        };

        if scores.len() != passages.len() {
            return Err(Error::backend(format!(
                "cross encoder returned {} scores for {} passages",
                scores.len(),
                passages.len()
            )));
        }

        Ok(scores
            .into_iter()
            .zip(passages.iter())
            .map(|(score, passage)| RankedPassage {
                score,
                passage: passage.clone(),
            })
            .collect())
    }

    async fn rank_sagemaker(
        &self,
        model: &CrossEncoderModel,
        reference: &str,
        passages: &[String],
    ) -> Result<Vec<f64>> {
        let url = format!(
            "{}/endpoints/{}/invocations",
            self.config.sagemaker_endpoint.trim_end_matches('/'),
            model.name
        );

        let response = self
            .http
            .post(&url)
            .json(&json!({ "reference": reference, "passages": passages }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!(
                "cross encoder invocation failed ({status}): {body}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        let scores = payload
            .get("scores")
            .and_then(|s| s.as_array())
            .ok_or_else(|| Error::backend("cross encoder response missing scores"))?;

        scores
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| Error::backend("cross encoder score is not a number"))
            })
            .collect()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn model() -> CrossEncoderModel {
        CrossEncoderModel {
            provider: ModelProvider::Sagemaker,
            name: "ms-marco-MiniLM-L6-v2".to_string(),
        }
    }

    #[tokio::test]
    async fn scores_match_passage_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/endpoints/ms-marco-MiniLM-L6-v2/invocations");
                then.status(200)
                    .json_body(serde_json::json!({ "scores": [0.91, 0.12] }));
            })
            .await;

        let config = ModelsConfig {
            sagemaker_endpoint: server.base_url(),
            ..Default::default()
        };
        let client = CrossEncoderClient::new(config).unwrap();
        let passages = vec![
            "A cat is an animal.".to_string(),
            "A car is a vehicle.".to_string(),
        ];
        let ranked = client.rank(&model(), "cat", &passages).await.unwrap();

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].passage, passages[0]);
        assert_eq!(ranked[1].passage, passages[1]);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[tokio::test]
    async fn non_sagemaker_providers_are_config_errors() {
        // Only sagemaker-style endpoints host cross-encoder models; the
        // embedding dispatch intentionally routes more providers than this.
        let client = CrossEncoderClient::new(ModelsConfig::default()).unwrap();
        for (provider, name) in [
            (ModelProvider::Bedrock, "titan-reranker"),
            (ModelProvider::OpenAi, "gpt-reranker"),
        ] {
            let model = CrossEncoderModel {
                provider,
                name: name.to_string(),
            };
            let err = client
                .rank(&model, "q", &["p".to_string()])
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert!(err.to_string().contains(provider.as_str()));
        }
    }

    #[tokio::test]
    async fn too_many_passages_rejected() {
        let client = CrossEncoderClient::new(ModelsConfig::default()).unwrap();
        let passages: Vec<String> = (0..MAX_PASSAGES + 1).map(|i| format!("p{i}")).collect();
        let err = client.rank(&model(), "q", &passages).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn score_count_mismatch_is_backend_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/endpoints/ms-marco-MiniLM-L6-v2/invocations");
                then.status(200)
                    .json_body(serde_json::json!({ "scores": [0.5] }));
            })
            .await;

        let config = ModelsConfig {
            sagemaker_endpoint: server.base_url(),
            ..Default::default()
        };
        let client = CrossEncoderClient::new(config).unwrap();
        let passages = vec!["a".to_string(), "b".to_string()];
        let err = client.rank(&model(), "q", &passages).await.unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
    }
}
