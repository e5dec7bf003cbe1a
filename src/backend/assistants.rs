//! HTTP client for an OpenAI-Assistants-style API.
//!
//! A session is a thread; one completion is: post the user message, start a
//! run, poll it to a terminal state, read the newest message.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

use super::ConversationBackend;
use crate::types::{BackendConfig, Error, Result, SessionId};

#[derive(Debug, Deserialize)]
struct Assistant {
    id: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Thread {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
}

impl Run {
    /// Still making progress on its own.
    fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "queued" | "in_progress" | "cancelling")
    }

    /// Holding the thread: new messages are rejected until it ends.
    fn blocks_thread(&self) -> bool {
        self.is_active() || self.status == "requires_action"
    }
}

#[derive(Debug, Deserialize)]
struct RunList {
    data: Vec<Run>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: Option<MessageText>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    value: String,
}

#[derive(Debug, Clone)]
pub struct AssistantsClient {
    client: Client,
    base_url: String,
    assistant_id: String,
    poll_interval: Duration,
}

impl AssistantsClient {
    pub fn new(config: &BackendConfig, poll_interval: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| Error::validation(format!("invalid api key: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            HeaderName::from_static("openai-beta"),
            HeaderValue::from_static("assistants=v2"),
        );
        if let Some(org) = &config.org_id {
            headers.insert(
                HeaderName::from_static("openai-organization"),
                HeaderValue::from_str(org)
                    .map_err(|e| Error::validation(format!("invalid org id: {}", e)))?,
            );
        }
        if let Some(project) = &config.project_id {
            headers.insert(
                HeaderName::from_static("openai-project"),
                HeaderValue::from_str(project)
                    .map_err(|e| Error::validation(format!("invalid project id: {}", e)))?,
            );
        }

        let client = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            assistant_id: config.assistant_id.clone(),
            poll_interval,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Poll `run` until it leaves the active states and return its last view.
    async fn settle(&self, thread: &str, mut run: Run) -> Result<Run> {
        while run.is_active() {
            tokio::time::sleep(self.poll_interval).await;
            let response = self
                .client
                .get(self.url(&format!("/threads/{}/runs/{}", thread, run.id)))
                .send()
                .await?;
            run = check(response).await?.json().await?;
            debug!(run = %run.id, status = %run.status, "Polled run");
        }
        Ok(run)
    }

    async fn cancel_run(&self, thread: &str, run_id: &str) -> Result<Run> {
        let response = self
            .client
            .post(self.url(&format!("/threads/{}/runs/{}/cancel", thread, run_id)))
            .send()
            .await?;
        let run: Run = check(response).await?.json().await?;
        self.settle(thread, run).await
    }

    async fn run_to_completion(&self, thread: &str, run: Run) -> Result<()> {
        let run = self.settle(thread, run).await?;
        if run.status == "completed" {
            return Ok(());
        }
        if run.blocks_thread() {
            // Tool calls are never answered here; release the thread.
            if let Err(e) = self.cancel_run(thread, &run.id).await {
                tracing::warn!(run = %run.id, error = %e, "Failed to cancel stuck run");
            }
        }
        let detail = run
            .last_error
            .map(|e| e.message)
            .unwrap_or_else(|| "no details".to_string());
        Err(Error::backend(format!("run ended as {}: {}", run.status, detail)))
    }
}

/// Turn a non-success HTTP status into a backend error carrying the body.
async fn check(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(Error::backend(format!("status {}: {}", status, body)))
}

fn session_id(raw: String) -> Result<SessionId> {
    SessionId::from_string(raw).map_err(|e| Error::backend(e.to_string()))
}

#[async_trait]
impl ConversationBackend for AssistantsClient {
    #[instrument(skip(self))]
    async fn assistant_name(&self) -> Result<String> {
        let response = self
            .client
            .get(self.url(&format!("/assistants/{}", self.assistant_id)))
            .send()
            .await?;
        let assistant: Assistant = check(response).await?.json().await?;
        Ok(assistant.name.unwrap_or(assistant.id))
    }

    #[instrument(skip(self))]
    async fn open_session(&self) -> Result<SessionId> {
        let response = self
            .client
            .post(self.url("/threads"))
            .json(&json!({}))
            .send()
            .await?;
        let thread: Thread = check(response).await?.json().await?;
        session_id(thread.id)
    }

    #[instrument(skip_all, fields(session = %session))]
    async fn resume_session(&self, session: &SessionId) -> Result<()> {
        let response = self
            .client
            .get(self.url(&format!("/threads/{}", session)))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(session = %session))]
    async fn close_session(&self, session: &SessionId) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/threads/{}", session)))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(session = %session))]
    async fn complete(&self, session: &SessionId, message: &str) -> Result<String> {
        let thread = session.as_str();

        let response = self
            .client
            .post(self.url(&format!("/threads/{}/messages", thread)))
            .json(&json!({ "role": "user", "content": message }))
            .send()
            .await?;
        check(response).await?;

        let response = self
            .client
            .post(self.url(&format!("/threads/{}/runs", thread)))
            .json(&json!({ "assistant_id": self.assistant_id }))
            .send()
            .await?;
        let run: Run = check(response).await?.json().await?;
        self.run_to_completion(thread, run).await?;

        let response = self
            .client
            .get(self.url(&format!("/threads/{}/messages?limit=1&order=desc", thread)))
            .send()
            .await?;
        let messages: MessageList = check(response).await?.json().await?;

        messages
            .data
            .into_iter()
            .next()
            .and_then(|m| m.content.into_iter().find_map(|c| c.text))
            .map(|t| t.value)
            .ok_or_else(|| Error::backend("thread has no text message"))
    }

    #[instrument(skip_all, fields(session = %session))]
    async fn cancel_pending(&self, session: &SessionId) -> Result<()> {
        let thread = session.as_str();

        let response = self
            .client
            .get(self.url(&format!("/threads/{}/runs?limit=1&order=desc", thread)))
            .send()
            .await?;
        let runs: RunList = check(response).await?.json().await?;
        let Some(run) = runs.data.into_iter().next() else {
            return Ok(());
        };
        if !run.blocks_thread() {
            return Ok(());
        }

        let run = self.cancel_run(thread, &run.id).await?;
        debug!(run = %run.id, status = %run.status, "Abandoned run settled");
        Ok(())
    }
}
