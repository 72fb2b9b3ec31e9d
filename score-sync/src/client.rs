use crate::backend::{BackendError, ScoreBackend};
use crate::config::BackendConfig;
use crate::types::{EvaluationId, FieldKey, Score};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};

const SAVE_SCORE_PATH: &str = "web/dataset/call_kw/vem.evaluation/save_score";
const CSRF_HEADER: &str = "X-CSRFToken";

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Deserialize)]
struct RpcErrorData {
    #[serde(default)]
    message: Option<String>,
}

impl RpcError {
    fn into_message(self) -> String {
        self.data
            .and_then(|d| d.message)
            .or(self.message)
            .unwrap_or_else(|| "Server error occurred".to_string())
    }
}

#[derive(Deserialize)]
struct CallResult {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// JSON-RPC client for the evaluation service.
pub struct JsonRpcClient {
    client: reqwest::Client,
    base_url: String,
    csrf_token: Option<String>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(JsonRpcClient {
            client,
            base_url: config.url.as_str().trim_end_matches('/').to_string(),
            csrf_token: config.csrf_token.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|e| BackendError::Transport(format!("invalid URL: {e}")))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        url: Url,
        body: Value,
    ) -> Result<RpcResponse<T>, BackendError> {
        let mut request = self.client.post(url).json(&body);
        if let Some(token) = &self.csrf_token {
            request = request.header(CSRF_HEADER, token);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        response
            .json::<RpcResponse<T>>()
            .await
            .map_err(map_reqwest_error)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else if err.is_decode() {
        BackendError::Decode(err.to_string())
    } else {
        BackendError::Transport(err.to_string())
    }
}

#[async_trait]
impl ScoreBackend for JsonRpcClient {
    async fn save_score(
        &self,
        evaluation_id: EvaluationId,
        key: FieldKey,
        score: Score,
    ) -> Result<(), BackendError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {
                "model": "vem.evaluation",
                "method": "save_score",
                "args": [evaluation_id, key.question_id, key.vendor_id, score],
                "kwargs": {},
            },
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let response: RpcResponse<CallResult> =
            self.call(self.endpoint(SAVE_SCORE_PATH)?, body).await?;

        if let Some(error) = response.error {
            return Err(BackendError::Server(error.into_message()));
        }

        match response.result {
            Some(CallResult {
                error: Some(message),
                ..
            }) => Err(BackendError::Rejected(message)),
            _ => Ok(()),
        }
    }

    async fn submit_evaluation(&self, evaluation_id: EvaluationId) -> Result<(), BackendError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {},
        });

        let url = self.endpoint(&format!("vem/eval/{evaluation_id}/submit"))?;
        let response: RpcResponse<CallResult> = self.call(url, body).await?;

        if let Some(error) = response.error {
            return Err(BackendError::Server(error.into_message()));
        }

        match response.result {
            Some(CallResult { success: true, .. }) => Ok(()),
            Some(CallResult {
                error: Some(message),
                ..
            }) => Err(BackendError::Rejected(message)),
            _ => Err(BackendError::Rejected("Unknown error".to_string())),
        }
    }
}
