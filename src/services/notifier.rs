// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound messaging to the chat platform.
//!
//! Rendering and transport belong to the chat bridge; the engine only
//! decides what to say and to whom.

use crate::error::AppError;
use crate::models::ActivityRecord;
use async_trait::async_trait;
use serde::Serialize;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a message to a group chat.
    async fn announce(&self, group_id: &str, message: &str) -> Result<(), AppError>;

    /// Send a private message to a user.
    async fn notify_user(&self, user_id: &str, message: &str) -> Result<(), AppError>;

    /// Ask a user whether a parked activity should count.
    async fn prompt_confirmation(&self, user_id: &str, record: &ActivityRecord) -> Result<(), AppError>;

    /// Remove a user from a group chat.
    async fn remove_member(&self, user_id: &str, group_id: &str) -> Result<(), AppError>;
}

/// Notifier that only logs. Used when no chat bridge is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn announce(&self, group_id: &str, message: &str) -> Result<(), AppError> {
        tracing::info!(group_id, message, "Group announcement");
        Ok(())
    }

    async fn notify_user(&self, user_id: &str, message: &str) -> Result<(), AppError> {
        tracing::info!(user_id, message, "Private message");
        Ok(())
    }

    async fn prompt_confirmation(&self, user_id: &str, record: &ActivityRecord) -> Result<(), AppError> {
        tracing::info!(
            user_id,
            provider = %record.provider,
            external_id = %record.external_id,
            "Confirmation prompt"
        );
        Ok(())
    }

    async fn remove_member(&self, user_id: &str, group_id: &str) -> Result<(), AppError> {
        tracing::info!(user_id, group_id, "Member removal requested");
        Ok(())
    }
}

/// Notifier that forwards every call as JSON to the chat bridge service.
#[derive(Clone)]
pub struct ChatBridgeNotifier {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeMessage<'a> {
    Announce {
        group_id: &'a str,
        text: &'a str,
    },
    Direct {
        user_id: &'a str,
        text: &'a str,
    },
    Confirm {
        user_id: &'a str,
        record: &'a ActivityRecord,
    },
    Remove {
        user_id: &'a str,
        group_id: &'a str,
    },
}

impl ChatBridgeNotifier {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, message: &BridgeMessage<'_>) -> Result<(), AppError> {
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .json(message)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Chat bridge unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Chat bridge returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for ChatBridgeNotifier {
    async fn announce(&self, group_id: &str, message: &str) -> Result<(), AppError> {
        self.post(&BridgeMessage::Announce {
            group_id,
            text: message,
        })
        .await
    }

    async fn notify_user(&self, user_id: &str, message: &str) -> Result<(), AppError> {
        self.post(&BridgeMessage::Direct {
            user_id,
            text: message,
        })
        .await
    }

    async fn prompt_confirmation(&self, user_id: &str, record: &ActivityRecord) -> Result<(), AppError> {
        self.post(&BridgeMessage::Confirm { user_id, record }).await
    }

    async fn remove_member(&self, user_id: &str, group_id: &str) -> Result<(), AppError> {
        self.post(&BridgeMessage::Remove { user_id, group_id }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_message_shape() {
        let json = serde_json::to_value(BridgeMessage::Remove {
            user_id: "u1",
            group_id: "g1",
        })
        .unwrap();
        assert_eq!(json["type"], "remove");
        assert_eq!(json["group_id"], "g1");
    }
}
