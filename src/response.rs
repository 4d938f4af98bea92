use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::sizing::{Recommendation, SystemInfo};

/// Ответ эндпоинта на любое действие
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_yaml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Recommendation>,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Консольный вывод действия: каждая строка уходит и в лог, и в ответ
#[derive(Debug, Default)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.lines.push(message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.lines.push(format!("WARNING: {}", message));
    }

    #[cfg(test)]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn finish(self, message: impl Into<String>) -> ActionResponse {
        ActionResponse {
            output: self.lines,
            ..ActionResponse::ok(message)
        }
    }

    pub fn fail(self, message: impl Into<String>) -> ActionResponse {
        ActionResponse {
            output: self.lines,
            ..ActionResponse::failure(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_only_present_fields() {
        let mut out = Transcript::new();
        out.line("Installing Redis...");
        out.warning("Redis did not answer");
        let response = out.finish("done");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["output"][1], "WARNING: Redis did not answer");
        assert!(json.get("sshPublicKey").is_none());
        assert!(json.get("system").is_none());

        let bare = serde_json::to_value(ActionResponse {
            success: false,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(bare, serde_json::json!({"success": false}));
    }

    #[test]
    fn failure_keeps_collected_output() {
        let mut out = Transcript::new();
        out.line("Installing Nginx...");
        let response = out.fail("nginx -t failed");
        assert!(!response.success);
        assert_eq!(response.output, vec!["Installing Nginx..."]);
        assert_eq!(response.message.as_deref(), Some("nginx -t failed"));
    }
}
