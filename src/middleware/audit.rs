//! Audit trail of guarded API operations.
//!
//! Every guarded request ends in exactly one [`AuditEntry`], handed to each configured
//! [`AuditSink`]. Sinks are write-only; nothing in the service reads the trail back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::{net::IpAddr, sync::Arc};
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::db;
use crate::metrics::Metrics;

use super::validation::sanitize_for_logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Login,
    Logout,
    Export,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Read => "read",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Export => "export",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<Value>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub ip_address: IpAddr,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn write(&self, entry: &AuditEntry) -> anyhow::Result<()>;
}

/// Emits each entry as a structured `tracing` event with target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn write(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let actor = entry.actor_id.map(|id| id.to_string());
        let user_agent = entry.user_agent.as_deref().map(sanitize_for_logging);
        match entry.status {
            AuditStatus::Success => tracing::info!(
                target: "audit",
                action = entry.action.as_str(),
                resource_type = %entry.resource_type,
                resource_id = entry.resource_id.as_deref(),
                actor = actor.as_deref(),
                ip = %entry.ip_address,
                user_agent = user_agent.as_deref(),
                "success"
            ),
            AuditStatus::Failure => tracing::warn!(
                target: "audit",
                action = entry.action.as_str(),
                resource_type = %entry.resource_type,
                resource_id = entry.resource_id.as_deref(),
                actor = actor.as_deref(),
                ip = %entry.ip_address,
                user_agent = user_agent.as_deref(),
                error = entry.error_message.as_deref(),
                "failure"
            ),
        }
        Ok(())
    }
}

/// Appends entries to the `audit_logs` table.
#[derive(Clone)]
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn write(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let details = entry.details.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            r#"INSERT INTO audit_logs
               (actor_id, action, resource_type, resource_id, details, status, error_message, ip_address, user_agent, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.actor_id.map(|id| id.to_string()))
        .bind(entry.action.as_str())
        .bind(&entry.resource_type)
        .bind(entry.resource_id.as_deref())
        .bind(details)
        .bind(entry.status.as_str())
        .bind(entry.error_message.as_deref())
        .bind(entry.ip_address.to_string())
        .bind(entry.user_agent.as_deref())
        .bind(db::timestamp(entry.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Fans an entry out to every sink. A failing sink is logged and counted, never surfaced.
#[derive(Clone)]
pub struct AuditLogger {
    sinks: Arc<Vec<Arc<dyn AuditSink>>>,
    metrics: Metrics,
}

impl AuditLogger {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>, metrics: Metrics) -> Self {
        Self { sinks: Arc::new(sinks), metrics }
    }

    /// The tracing sink, plus the `audit_logs` table when `audit.persist` is on.
    pub fn from_config(cfg: &AuditConfig, pool: SqlitePool, metrics: Metrics) -> Self {
        let mut sinks: Vec<Arc<dyn AuditSink>> = vec![Arc::new(TracingAuditSink)];
        if cfg.persist {
            sinks.push(Arc::new(SqliteAuditSink::new(pool)));
        }
        Self::new(sinks, metrics)
    }

    pub async fn record(&self, entry: AuditEntry) {
        for sink in self.sinks.iter() {
            if let Err(e) = sink.write(&entry).await {
                tracing::warn!(sink = sink.name(), action = entry.action.as_str(), "Failed to write audit entry: {:#}", e);
                self.metrics.inc_audit_write_failures();
            }
        }
    }
}
