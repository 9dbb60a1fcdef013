use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ArchivistError;
use crate::router::DISCORD_MESSAGE_LIMIT;

pub const SUPERVISOR_STOP_NOTICE: &str = "Archive bot is stopping (service stop requested).";

const WEBHOOK_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts a one-shot text notification to an external endpoint.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), ArchivistError>;
}

/// Discord webhook notifier. Each call uses a fresh HTTP client.
pub struct WebhookNotifier {
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        WebhookNotifier { url: url.into() }
    }
}

fn describe_reqwest_error(prefix: &str, err: &reqwest::Error) -> String {
    let class = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_status() {
        "status"
    } else {
        "request"
    };
    let mut chain = Vec::new();
    let mut source = err.source();
    while let Some(s) = source {
        chain.push(s.to_string());
        source = s.source();
    }
    if chain.is_empty() {
        format!("{prefix}: {err} [class={class}]")
    } else {
        format!("{prefix}: {err} [class={class}, source_chain={}]", chain.join(" -> "))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) -> Result<(), ArchivistError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_REQUEST_TIMEOUT)
            .build()?;
        let content: String = text.chars().take(DISCORD_MESSAGE_LIMIT).collect();
        let resp = client
            .post(&self.url)
            .json(&json!({ "content": content }))
            .send()
            .await
            .map_err(|e| {
                ArchivistError::Notify(describe_reqwest_error("Failed to post webhook", &e))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ArchivistError::Notify(format!(
                "Webhook rejected notification: HTTP {status} {}",
                body.chars().take(300).collect::<String>()
            )));
        }
        Ok(())
    }
}

/// Detached notification tasks owned by one worker run.
///
/// Sending never blocks the caller; failures are only logged. The worker calls
/// [`PendingNotifications::drain`] on exit so queued posts are not dropped with
/// its runtime.
pub struct PendingNotifications {
    notifier: Arc<dyn Notifier>,
    tasks: Vec<JoinHandle<()>>,
}

impl PendingNotifications {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        PendingNotifications {
            notifier,
            tasks: Vec::new(),
        }
    }

    pub fn spawn(&mut self, kind: &'static str, text: impl Into<String>) {
        self.tasks.retain(|task| !task.is_finished());
        let notifier = self.notifier.clone();
        let text = text.into();
        self.tasks.push(tokio::spawn(async move {
            match notifier.notify(&text).await {
                Ok(()) => info!("Sent {kind} notification"),
                Err(e) => warn!("Failed to send {kind} notification: {e}"),
            }
        }));
    }

    pub async fn drain(&mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        if !tasks.is_empty() {
            debug!("Waiting for {} notification task(s)", tasks.len());
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Notification task failed: {e}");
            }
        }
    }
}
