//! Alerting channel for reconciliation runs.
//!
//! Alerts are fire-and-forget. [`Alerter`] logs delivery failures and drops
//! them: a broken webhook must never fail a migration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A destination for operator alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Sends `message` to `channel`.
    async fn send(&self, message: &str, channel: &str) -> Result<()>;
}

/// Alert channel that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertChannel;

#[async_trait]
impl AlertChannel for LogAlertChannel {
    async fn send(&self, message: &str, channel: &str) -> Result<()> {
        tracing::info!(channel = channel, alert = message, "alert");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    channel: &'a str,
}

/// Chat webhook alert channel.
///
/// Posts `{"text": ..., "channel": ...}` as JSON.
#[derive(Clone)]
pub struct WebhookAlertChannel {
    url: String,
    client: reqwest::Client,
}

impl fmt::Debug for WebhookAlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Webhook URLs embed their credentials.
        f.debug_struct("WebhookAlertChannel")
            .field("url", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl WebhookAlertChannel {
    /// Creates a channel posting to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookAlertChannel {
    async fn send(&self, message: &str, channel: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload {
                text: message,
                channel,
            })
            .send()
            .await
            .map_err(|e| Error::Notification {
                message: format!("webhook request failed: {e}"),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Notification {
            message: format!("webhook returned {status}: {body}"),
        })
    }
}

/// Sends alerts to a default channel and swallows delivery failures.
#[derive(Clone)]
pub struct Alerter {
    channel: Arc<dyn AlertChannel>,
    default_channel: String,
}

impl fmt::Debug for Alerter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alerter")
            .field("default_channel", &self.default_channel)
            .finish_non_exhaustive()
    }
}

impl Alerter {
    /// Creates an alerter over `channel`.
    #[must_use]
    pub fn new(channel: Arc<dyn AlertChannel>, default_channel: impl Into<String>) -> Self {
        Self {
            channel,
            default_channel: default_channel.into(),
        }
    }

    /// Creates an alerter that only logs.
    #[must_use]
    pub fn log_only() -> Self {
        Self::new(Arc::new(LogAlertChannel), "translations")
    }

    /// Sends `message` to the default channel. Never fails.
    pub async fn notify(&self, message: &str) {
        if let Err(e) = self.channel.send(message, &self.default_channel).await {
            tracing::warn!(
                channel = %self.default_channel,
                error = %e,
                "alert delivery failed; continuing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use std::sync::Mutex;

    async fn spawn_webhook(
        status: StatusCode,
        received: Arc<Mutex<Vec<serde_json::Value>>>,
    ) -> String {
        let app = Router::new().route(
            "/hook",
            post(move |axum::Json(body): axum::Json<serde_json::Value>| {
                let received = Arc::clone(&received);
                async move {
                    received.lock().unwrap().push(body);
                    status
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        format!("http://{addr}/hook")
    }

    #[tokio::test]
    async fn webhook_posts_text_and_channel() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_webhook(StatusCode::OK, Arc::clone(&received)).await;

        WebhookAlertChannel::new(url)
            .send("sync finished", "translations")
            .await
            .unwrap();

        let bodies = received.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["text"], "sync finished");
        assert_eq!(bodies[0]["channel"], "translations");
    }

    #[tokio::test]
    async fn webhook_error_status_is_notification_error() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_webhook(StatusCode::INTERNAL_SERVER_ERROR, received).await;

        let err = WebhookAlertChannel::new(url)
            .send("hello", "translations")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Notification { .. }));
    }

    #[tokio::test]
    async fn alerter_swallows_failures() {
        struct Broken;

        #[async_trait]
        impl AlertChannel for Broken {
            async fn send(&self, _: &str, _: &str) -> Result<()> {
                Err(Error::Notification {
                    message: "down".into(),
                })
            }
        }

        Alerter::new(Arc::new(Broken), "translations")
            .notify("still fine")
            .await;
    }
}
