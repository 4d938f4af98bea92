use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use uuid::Uuid;

/// Сколько символов stderr сохранять в журнале
const MAX_DETAILS_LEN: usize = 2000;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditLog {
    pub id: String,
    pub timestamp: DateTime<Local>,
    pub action: String,
    pub user: String,
    pub command: Option<String>,
    pub status: String,
    pub exit_code: Option<i32>,
    pub details: Option<String>,
}

impl AuditLog {
    pub fn new(
        action: &str,
        user: &str,
        command: Option<&str>,
        status: &str,
        exit_code: Option<i32>,
        details: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Local::now(),
            action: action.to_string(),
            user: user.to_string(),
            command: command.map(|s| s.to_string()),
            status: status.to_string(),
            exit_code,
            details: details.map(|s| s.chars().take(MAX_DETAILS_LEN).collect()),
        }
    }
}

/// Дописывает запись аудита одной JSON-строкой в журнал
pub async fn log_audit_event(audit_log: &AuditLog, log_file: &Path) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create audit directory {:?}", parent))?;
    }

    let mut line =
        serde_json::to_string(audit_log).with_context(|| "Failed to serialize audit entry")?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .await
        .with_context(|| format!("Failed to open audit log {:?}", log_file))?;

    file.write_all(line.as_bytes())
        .await
        .with_context(|| "Failed to write audit entry")?;

    debug!("Записан аудит: {} - {}", audit_log.action, audit_log.status);

    Ok(())
}
