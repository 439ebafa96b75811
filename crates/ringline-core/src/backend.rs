use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::CallError;

/// Tells the backend whether the local user accepted an incoming call,
/// so its call-state tracking agrees with the client's.
#[async_trait]
pub trait AcceptanceNotifier: Send + Sync {
    async fn notify_answer(&self, call_id: Uuid, accepted: bool) -> Result<(), CallError>;
}

#[derive(Serialize)]
struct AnswerBody {
    accepted: bool,
}

/// REST client for the call backend.
pub struct BackendClient {
    http: reqwest::Client,
    api_base: String,
    auth_token: String,
}

impl BackendClient {
    pub fn new(api_base: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            auth_token: auth_token.into(),
        }
    }

    fn answer_url(&self, call_id: Uuid) -> String {
        format!("{}/answer-call/{}", self.api_base.trim_end_matches('/'), call_id)
    }
}

#[async_trait]
impl AcceptanceNotifier for BackendClient {
    async fn notify_answer(&self, call_id: Uuid, accepted: bool) -> Result<(), CallError> {
        let url = self.answer_url(call_id);
        tracing::info!("notifying backend: {url} accepted={accepted}");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(&AnswerBody { accepted })
            .send()
            .await
            .map_err(|e| CallError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CallError::Http(format!(
                "answer-call returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
