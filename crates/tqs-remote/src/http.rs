//! reqwest-backed [`RemoteResultSource`].
//!
//! `GET  {base_url}{state_path}?accountId=..` -> `{ "quizState": .. | null }`
//! `POST {base_url}{state_path}?accountId=..` <- push payload
//!
//! The bearer token is passed per call and never logged.

use std::time::Duration;

use anyhow::{Context, Result};
use tqs_schemas::{to_push_payload, to_stored_quiz_result, QuizResult, QuizStateResponse};
use tracing::{debug, warn};

use crate::{PushAck, PushError, RemoteResultSource};

#[derive(Debug, Clone)]
pub struct HttpClientSettings {
    pub base_url: String,
    pub state_path: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpQuizStateClient {
    http: reqwest::Client,
    url: String,
}

impl HttpQuizStateClient {
    pub fn new(settings: HttpClientSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("build quiz-state http client failed")?;
        let url = format!(
            "{}{}",
            settings.base_url.trim_end_matches('/'),
            settings.state_path
        );
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(
        &self,
        method: reqwest::Method,
        account_id: &str,
        auth_token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let req = self
            .http
            .request(method, &self.url)
            .query(&[("accountId", account_id)]);
        match auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn classify_transport(e: &reqwest::Error) -> PushError {
    if e.is_timeout() {
        PushError::Timeout
    } else {
        PushError::Transport(e.to_string())
    }
}

#[async_trait::async_trait]
impl RemoteResultSource for HttpQuizStateClient {
    fn source_name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, account_id: &str, auth_token: Option<&str>) -> Option<QuizResult> {
        let resp = match self
            .request(reqwest::Method::GET, account_id, auth_token)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(account_id, error = %e, "quiz-state fetch failed");
                return None;
            }
        };

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            debug!(account_id, "quiz-state fetch unauthenticated; relying on local");
            return None;
        }
        if !status.is_success() {
            warn!(account_id, status = status.as_u16(), "quiz-state fetch non-success");
            return None;
        }

        let body: QuizStateResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!(account_id, error = %e, "quiz-state response decode failed");
                return None;
            }
        };

        let state = body.quiz_state?;
        let normalized = to_stored_quiz_result(&state);
        if normalized.is_none() {
            debug!(account_id, "remote quiz state has no travel type code");
        }
        normalized
    }

    async fn push(
        &self,
        account_id: &str,
        result: &QuizResult,
        auth_token: Option<&str>,
    ) -> Result<PushAck, PushError> {
        let payload = to_push_payload(result).ok_or_else(|| {
            PushError::InvalidPayload("result has no travel type code".to_string())
        })?;

        let resp = self
            .request(reqwest::Method::POST, account_id, auth_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(PushAck {
                status: status.as_u16(),
            });
        }

        let message = resp.text().await.unwrap_or_default();
        Err(PushError::from_status(status.as_u16(), message))
    }
}
