//! In-app notifications. Each row belongs to exactly one recipient.

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub read_at: Option<String>,
    pub created_at: String,
}

/// What a new notification points at, if anything.
#[derive(Debug, Clone, Copy)]
pub struct Subject<'a> {
    pub resource_type: &'a str,
    pub resource_id: &'a str,
}

/// Inserts a notification on `conn`, so it can join the caller's transaction.
pub async fn insert(
    conn: &mut SqliteConnection,
    user_id: &str,
    title: &str,
    message: &str,
    kind: &str,
    subject: Option<Subject<'_>>,
) -> AppResult<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO notifications (id, user_id, title, message, kind, resource_type, resource_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(title)
    .bind(message)
    .bind(kind)
    .bind(subject.map(|s| s.resource_type))
    .bind(subject.map(|s| s.resource_id))
    .bind(db::now())
    .execute(conn)
    .await?;
    Ok(id)
}

pub async fn list(pool: &SqlitePool, user_id: &str, unread_only: bool, limit: i64) -> AppResult<Vec<Notification>> {
    let sql = if unread_only {
        "SELECT * FROM notifications WHERE user_id = ? AND read_at IS NULL ORDER BY created_at DESC LIMIT ?"
    } else {
        "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC LIMIT ?"
    };
    let rows = sqlx::query_as::<_, Notification>(sql).bind(user_id).bind(limit).fetch_all(pool).await?;
    Ok(rows)
}

pub async fn unread_count(pool: &SqlitePool, user_id: &str) -> AppResult<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read_at IS NULL")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Notifications of other users are reported as missing.
pub async fn mark_read(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE notifications SET read_at = COALESCE(read_at, ?) WHERE id = ? AND user_id = ?",
    )
    .bind(db::now())
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Notification not found".to_string()));
    }
    Ok(())
}

pub async fn mark_all_read(pool: &SqlitePool, user_id: &str) -> AppResult<u64> {
    let result = sqlx::query("UPDATE notifications SET read_at = ? WHERE user_id = ? AND read_at IS NULL")
        .bind(db::now())
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Notification not found".to_string()));
    }
    Ok(())
}
