//! Notification sinks and message formatting.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::NotificationError;
use crate::traits::Notifier;
use crate::types::ScrapedLink;

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

impl Message {
    pub fn new_links(url: &str, links: &[ScrapedLink]) -> Self {
        let lines: Vec<String> = links
            .iter()
            .map(|link| format!("{} - {}", link.url, link.description))
            .collect();

        Self {
            subject: format!("New links detected on {}", url),
            body: format!("The following new links were found:\n\n{}", lines.join("\n")),
        }
    }

    pub fn hash_changed(url: &str, hash: &str) -> Self {
        Self {
            subject: format!("Update from site {}", url),
            body: format!("{} site was updated (new hash: {})", url, hash),
        }
    }

    pub async fn send(&self, notifier: &dyn Notifier) -> Result<(), NotificationError> {
        notifier.notify(&self.subject, &self.body).await
    }
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotificationError> {
        info!(subject = %subject, body = %body, "Notification");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
    /// Subject and body in one field, for chat webhooks that read `text`
    text: String,
}

const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// POSTs notifications as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, DEFAULT_WEBHOOK_TIMEOUT)
    }

    /// Webhook whose requests are abandoned after `timeout`.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build webhook client, using defaults");
                reqwest::Client::new()
            });
        Self::with_client(url, client)
    }

    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotificationError> {
        let payload = WebhookPayload {
            subject,
            body,
            text: format!("{}\n\n{}", subject, body),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_links_message() {
        let msg = Message::new_links(
            "https://example.com",
            &[ScrapedLink::new("/a", "A"), ScrapedLink::new("/b", "B")],
        );
        assert_eq!(msg.subject, "New links detected on https://example.com");
        assert_eq!(msg.body, "The following new links were found:\n\n/a - A\n/b - B");
    }

    #[test]
    fn test_hash_changed_message() {
        let msg = Message::hash_changed("https://example.com", "abc");
        assert_eq!(msg.subject, "Update from site https://example.com");
        assert_eq!(msg.body, "https://example.com site was updated (new hash: abc)");
    }

    #[tokio::test]
    async fn test_webhook_transport_failure() {
        // Nothing listens on port 9 of localhost
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook");
        let err = notifier.notify("s", "b").await.unwrap_err();
        assert!(matches!(err, NotificationError::Transport(_)));
    }

    #[tokio::test]
    async fn test_webhook_gives_up_on_silent_host() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold connections without ever answering
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let notifier =
            WebhookNotifier::with_timeout(format!("http://{}/hook", addr), Duration::from_millis(300));
        let result =
            tokio::time::timeout(Duration::from_secs(5), notifier.notify("s", "b")).await;

        let err = result.expect("webhook request should time out on its own").unwrap_err();
        assert!(matches!(err, NotificationError::Transport(_)));
        server.abort();
    }
}
