//! Embedding generation across pluggable model backends.
//!
//! Dispatch by [`ModelProvider`] is a pure routing decision: each provider
//! family has its own call path, and an unrecognized provider never gets past
//! enum parsing. Inputs are truncated to a hard character cap, grouped into
//! fixed-size batches that never split a single text, and reassembled
//! positionally so the output order always matches the input order.
//!
//! Provider-specific behavior:
//! - **bedrock** — one invocation per text; returned vectors are
//!   L2-normalized here because the backend does not normalize.
//! - **sagemaker** — batch invocations; transient 5xx responses are retried
//!   up to [`SAGEMAKER_MAX_ATTEMPTS`] times with randomized backoff.
//! - **openai** — batch calls against the `/v1/embeddings` API.

use rand::Rng;
use serde_json::json;
use std::time::Duration;

use crate::catalog::ModelCatalog;
use crate::config::ModelsConfig;
use crate::error::{Error, Result};
use crate::models::ModelProvider;
use crate::splitter;

/// Hard safety cap on a single input text, in characters.
pub const MAX_INPUT_CHARS: usize = 10_000;

/// Default number of texts per backend request.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Approximate chars-per-token ratio used to detect oversized inputs.
const CHARS_PER_TOKEN: usize = 4;

const SAGEMAKER_MAX_ATTEMPTS: u32 = 5;
const BACKOFF_MIN_MS: u64 = 300;
const BACKOFF_MAX_MS: u64 = 1500;

/// An embedding model selected by a workspace.
#[derive(Debug, Clone)]
pub struct EmbeddingModel {
    pub provider: ModelProvider,
    pub name: String,
    pub dimensions: usize,
}

/// What the embedding will be used for. Some backends produce asymmetric
/// passage/query vectors and need to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    StorePassage,
    SearchQuery,
}

impl EmbeddingTask {
    fn as_str(&self) -> &'static str {
        match self {
            EmbeddingTask::StorePassage => "passage",
            EmbeddingTask::SearchQuery => "query",
        }
    }
}

/// Client for the embedding backends named in `[models]` config.
pub struct EmbeddingsClient {
    http: reqwest::Client,
    config: ModelsConfig,
    catalog: ModelCatalog,
    batch_size: usize,
}

impl EmbeddingsClient {
    pub fn new(config: ModelsConfig, catalog: ModelCatalog) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config,
            catalog,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Override the request batch size. Mostly useful in tests.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Generate one embedding per input text, in input order.
    ///
    /// Texts longer than the model's token limit are sub-chunked and the
    /// resulting vectors averaged, so the caller always gets exactly one
    /// vector per input.
    pub async fn generate(
        &self,
        model: &EmbeddingModel,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let char_limit = self.catalog.token_limit(model.provider, &model.name) * CHARS_PER_TOKEN;

        // Expand each input into one or more segments, remembering how many
        // segments belong to each input so averages can be reassembled.
        let mut segments: Vec<String> = Vec::with_capacity(texts.len());
        let mut segment_counts: Vec<usize> = Vec::with_capacity(texts.len());
        for text in texts {
            let capped = truncate_chars(text, MAX_INPUT_CHARS);
            if capped.chars().count() > char_limit {
                let subs = splitter::split(&capped, char_limit, 0);
                segment_counts.push(subs.len());
                segments.extend(subs);
            } else {
                segment_counts.push(1);
                segments.push(capped);
            }
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(segments.len());
        for batch in segments.chunks(self.batch_size) {
            let batch_vectors = match model.provider {
                ModelProvider::Bedrock => self.embed_bedrock(model, batch).await?,
                ModelProvider::Sagemaker => self.embed_sagemaker(model, batch, task).await?,
                ModelProvider::OpenAi => self.embed_openai(model, batch).await?,
            };
            if batch_vectors.len() != batch.len() {
                return Err(Error::backend(format!(
                    "embedding backend returned {} vectors for {} inputs",
                    batch_vectors.len(),
                    batch.len()
                )));
            }
            vectors.extend(batch_vectors);
        }

        // Collapse sub-chunked inputs back into one averaged vector each.
        let mut out = Vec::with_capacity(texts.len());
        let mut cursor = 0usize;
        for count in segment_counts {
            if count == 1 {
                out.push(vectors[cursor].clone());
            } else {
                out.push(average_vectors(&vectors[cursor..cursor + count]));
            }
            cursor += count;
        }
        Ok(out)
    }

    /// Bedrock-style managed LLM API: one text per invocation, vectors
    /// L2-normalized before returning.
    async fn embed_bedrock(&self, model: &EmbeddingModel, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/model/{}/invoke",
            self.config.bedrock_endpoint.trim_end_matches('/'),
            model.name
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let response = self
                .http
                .post(&url)
                .json(&json!({ "inputText": text }))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::backend(format!(
                    "bedrock invoke failed ({status}): {body}"
                )));
            }

            let payload: serde_json::Value = response.json().await?;
            let vector = parse_float_array(payload.get("embedding"))
                .ok_or_else(|| Error::backend("bedrock response missing embedding"))?;
            vectors.push(l2_normalize(vector));
        }
        Ok(vectors)
    }

    /// Sagemaker-style custom endpoint: batch invocation with retry on
    /// transient 5xx responses.
    async fn embed_sagemaker(
        &self,
        model: &EmbeddingModel,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/endpoints/{}/invocations",
            self.config.sagemaker_endpoint.trim_end_matches('/'),
            model.name
        );
        let body = json!({ "inputs": texts, "task": task.as_str() });

        let mut last_err: Option<Error> = None;
        for attempt in 0..SAGEMAKER_MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(jittered_backoff()).await;
            }

            let response = match self.http.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    // Connection-level faults are treated as transient.
                    tracing::warn!(attempt, error = %e, "sagemaker invocation failed");
                    last_err = Some(Error::transient(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let payload: serde_json::Value = response.json().await?;
                return parse_vector_matrix(&payload)
                    .ok_or_else(|| Error::backend("sagemaker response missing vectors"));
            }

            let text = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                tracing::warn!(attempt, %status, "transient sagemaker error, will retry");
                last_err = Some(Error::transient(format!(
                    "sagemaker invocation failed ({status}): {text}"
                )));
                continue;
            }

            // Non-transient: abort immediately.
            return Err(Error::backend(format!(
                "sagemaker invocation failed ({status}): {text}"
            )));
        }

        Err(last_err.unwrap_or_else(|| Error::backend("sagemaker retries exhausted")))
    }

    /// OpenAI-style API: batch call against `/v1/embeddings`.
    async fn embed_openai(&self, model: &EmbeddingModel, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/v1/embeddings",
            self.config.openai_base_url.trim_end_matches('/')
        );
        let api_key = std::env::var(&self.config.openai_api_key_env).map_err(|_| {
            Error::config(format!("{} not set", self.config.openai_api_key_env))
        })?;

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&json!({ "model": model.name, "input": texts }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!(
                "embeddings API error ({status}): {body}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        let data = payload
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::backend("embeddings response missing data array"))?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let vector = parse_float_array(item.get("embedding"))
                .ok_or_else(|| Error::backend("embeddings response missing embedding"))?;
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

fn jittered_backoff() -> Duration {
    let ms = rand::thread_rng().gen_range(BACKOFF_MIN_MS..BACKOFF_MAX_MS);
    Duration::from_millis(ms)
}

fn parse_float_array(value: Option<&serde_json::Value>) -> Option<Vec<f32>> {
    let array = value?.as_array()?;
    let mut out = Vec::with_capacity(array.len());
    for v in array {
        out.push(v.as_f64()? as f32);
    }
    Some(out)
}

fn parse_vector_matrix(payload: &serde_json::Value) -> Option<Vec<Vec<f32>>> {
    let rows = payload.get("vectors")?.as_array()?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(parse_float_array(Some(row))?);
    }
    Some(out)
}

/// Divide by the Euclidean norm. Zero vectors are returned unchanged.
pub fn l2_normalize(vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return vector;
    }
    vector.into_iter().map(|v| v / norm).collect()
}

/// Element-wise mean of equal-length vectors.
fn average_vectors(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut sum = vec![0.0f32; first.len()];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    sum.into_iter().map(|x| x / n).collect()
}
