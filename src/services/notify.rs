//! Push notification abstraction.
//!
//! `PushSender` is the core trait — swap in `HttpPushSender` in production,
//! `LogPushSender` in dev/staging (logs to tracing), `FakePushSender` in tests.
//!
//! The trait is object-safe so callers can hold `Arc<dyn PushSender>`.
//! Sends are fire-and-forget from the caller's point of view: lifecycle
//! code logs a failed send and moves on.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::info;

// =============================================================================
// Core trait
// =============================================================================

/// A push message addressed to one device token.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: Option<Value>,
}

impl PushMessage {
    pub fn new(to: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            title: title.into(),
            body: body.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Abstraction over a push transport.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, msg: PushMessage) -> Result<()>;
}

// =============================================================================
// LogPushSender — writes to tracing (dev / staging)
// =============================================================================

pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn send(&self, msg: PushMessage) -> Result<()> {
        info!(
            to = %msg.to,
            title = %msg.title,
            "[LogPushSender] Would push: {}",
            msg.body,
        );
        Ok(())
    }
}

// =============================================================================
// FakePushSender — captures sent messages in a Vec (tests)
// =============================================================================

/// Collects sent messages in memory for assertion in tests.
#[derive(Default)]
pub struct FakePushSender {
    pub sent: Mutex<Vec<PushMessage>>,
    /// When set, every send fails; lets tests prove sends are best-effort.
    pub fail: Mutex<bool>,
}

impl FakePushSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sender = Self::default();
        *sender.fail.lock() = true;
        sender
    }

    pub fn sent_messages(&self) -> Vec<PushMessage> {
        self.sent.lock().clone()
    }

    pub fn last_message(&self) -> Option<PushMessage> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl PushSender for FakePushSender {
    async fn send(&self, msg: PushMessage) -> Result<()> {
        if *self.fail.lock() {
            return Err(anyhow::anyhow!("push transport down"));
        }
        self.sent.lock().push(msg);
        Ok(())
    }
}

// =============================================================================
// HttpPushSender — Expo-compatible push gateway
// =============================================================================

pub struct HttpPushSender {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpPushSender {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(&self, msg: PushMessage) -> Result<()> {
        let body = json!({
            "to": msg.to,
            "title": msg.title,
            "body": msg.body,
            "data": msg.data.unwrap_or_else(|| json!({})),
            "sound": "default",
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("push gateway error {}: {}", status, text));
        }

        info!(to = %msg.to, title = %msg.title, "Push sent");
        Ok(())
    }
}

/// Pick the push transport for this process: the HTTP gateway when one is
/// configured, otherwise log-only.
pub fn create_push_sender(push_api_url: Option<&str>) -> Arc<dyn PushSender> {
    match push_api_url {
        Some(url) if !url.is_empty() => {
            info!(endpoint = %url, "Using HTTP push gateway");
            Arc::new(HttpPushSender::new(url))
        }
        _ => {
            info!("No push gateway configured, pushes will be logged only");
            Arc::new(LogPushSender)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
