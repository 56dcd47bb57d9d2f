//! Owner-scoped CRUD over the entity tables.
//!
//! Column lists come from the entity [`Schema`](crate::schema::Schema): only declared fields
//! are written or read, and every identifier is a static name from the schema, never client
//! input. Values are always bound.

use serde::Deserialize;
use serde_json::{json, Map, Number, Value};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::accounts::parse_owner;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::Caller;
use crate::notifications::{self, Subject};
use crate::schema::{ColumnType, EntityKind, Field, FieldKind};

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<String>,
}

impl ListQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Binds `value` with the SQL type of `field`. JSON `null` binds as SQL NULL.
pub fn push_bind_field(qb: &mut QueryBuilder<'_, Sqlite>, field: &Field, value: &Value) {
    match field.kind.column_type() {
        Some(ColumnType::Real) => qb.push_bind(value.as_f64()),
        Some(ColumnType::Integer) => qb.push_bind(value.as_i64()),
        Some(ColumnType::Bool) => qb.push_bind(value.as_bool()),
        Some(ColumnType::Text) | None => qb.push_bind(value.as_str().map(str::to_string)),
    };
}

fn entity_name(kind: EntityKind) -> String {
    let name = kind.resource_type().replace('_', " ");
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => name,
    }
}

fn select_clause(kind: EntityKind) -> String {
    let mut cols = vec!["t.id".to_string(), "t.owner_id".to_string()];
    cols.extend(kind.schema().columns().map(|f| format!("t.\"{}\"", f.name)));
    cols.push("t.created_at".into());
    cols.push("t.updated_at".into());
    if kind == EntityKind::Task {
        cols.push("(SELECT group_concat(a.user_id) FROM task_assignees a WHERE a.task_id = t.id) AS assignee_ids".into());
    }
    format!("SELECT {} FROM {} t", cols.join(", "), kind.table())
}

fn row_to_json(kind: EntityKind, row: &SqliteRow) -> AppResult<Value> {
    let mut out = Map::new();
    out.insert("id".into(), Value::String(row.try_get("id")?));
    out.insert("owner_id".into(), Value::String(row.try_get("owner_id")?));
    for field in kind.schema().columns() {
        let value = match field.kind.column_type() {
            Some(ColumnType::Real) => {
                row.try_get::<Option<f64>, _>(field.name)?.and_then(Number::from_f64).map(Value::Number)
            }
            Some(ColumnType::Integer) => row.try_get::<Option<i64>, _>(field.name)?.map(Value::from),
            Some(ColumnType::Bool) => row.try_get::<Option<bool>, _>(field.name)?.map(Value::Bool),
            Some(ColumnType::Text) | None => row.try_get::<Option<String>, _>(field.name)?.map(Value::String),
        };
        out.insert(field.name.to_string(), value.unwrap_or(Value::Null));
    }
    out.insert("created_at".into(), Value::String(row.try_get("created_at")?));
    out.insert("updated_at".into(), Value::String(row.try_get("updated_at")?));
    if kind == EntityKind::Task {
        let ids: Option<String> = row.try_get("assignee_ids")?;
        let mut ids: Vec<&str> = ids.as_deref().map(|s| s.split(',').collect()).unwrap_or_default();
        ids.sort_unstable();
        out.insert("assignee_ids".into(), json!(ids));
    }
    Ok(Value::Object(out))
}

fn push_scope(qb: &mut QueryBuilder<'_, Sqlite>, caller: &Caller, status: Option<&str>) {
    qb.push(" WHERE 1 = 1");
    if !caller.is_admin() {
        qb.push(" AND t.owner_id = ").push_bind(caller.id.to_string());
    }
    if let Some(status) = status {
        qb.push(" AND t.status = ").push_bind(status.to_string());
    }
}

/// Lists the rows visible to `caller`: everything for admins, own rows otherwise.
pub async fn list(pool: &SqlitePool, kind: EntityKind, caller: &Caller, query: &ListQuery) -> AppResult<Value> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(status) => match kind.schema().field("status").map(|f| f.kind) {
            Some(FieldKind::Enum(allowed)) if allowed.contains(&status) => Some(status),
            Some(FieldKind::Enum(allowed)) => {
                return Err(AppError::ValidationError {
                    field: "status".into(),
                    message: format!("status must be one of: {}", allowed.join(", ")),
                })
            }
            _ => return Err(AppError::BadRequest(format!("{} cannot be filtered by status", kind.slug()))),
        },
    };
    let (limit, offset) = (query.limit(), query.offset());

    let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT COUNT(*) FROM {} t", kind.table()));
    push_scope(&mut count_qb, caller, status);
    let total: i64 = count_qb.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(select_clause(kind));
    push_scope(&mut qb, caller, status);
    qb.push(" ORDER BY t.created_at DESC, t.id LIMIT ").push_bind(limit);
    qb.push(" OFFSET ").push_bind(offset);
    let rows = qb.build().fetch_all(pool).await?;

    let items = rows.iter().map(|row| row_to_json(kind, row)).collect::<AppResult<Vec<_>>>()?;
    Ok(json!({ "items": items, "total": total, "limit": limit, "offset": offset }))
}

async fn fetch(pool: &SqlitePool, kind: EntityKind, id: Uuid) -> AppResult<Value> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(select_clause(kind));
    qb.push(" WHERE t.id = ").push_bind(id.to_string());
    let row = qb
        .build()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} not found", entity_name(kind))))?;
    row_to_json(kind, &row)
}

/// Missing rows are 404; rows owned by someone else are 403.
pub async fn get(pool: &SqlitePool, kind: EntityKind, caller: &Caller, id: Uuid) -> AppResult<Value> {
    let record = fetch(pool, kind, id).await?;
    let owner = record.get("owner_id").and_then(Value::as_str).unwrap_or_default();
    caller.require_owner(parse_owner(owner)?)?;
    Ok(record)
}

async fn owner_in_tx(conn: &mut SqliteConnection, kind: EntityKind, id: Uuid) -> AppResult<Uuid> {
    let sql = format!("SELECT owner_id FROM {} WHERE id = ?", kind.table());
    let owner: Option<String> = sqlx::query_scalar(&sql).bind(id.to_string()).fetch_optional(conn).await?;
    let owner = owner.ok_or_else(|| AppError::NotFound(format!("{} not found", entity_name(kind))))?;
    parse_owner(&owner)
}

fn assignee_ids(payload: &Map<String, Value>) -> Option<BTreeSet<String>> {
    payload.get("assignee_ids").map(|v| {
        v.as_array()
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_lowercase).collect())
            .unwrap_or_default()
    })
}

/// Links `added` users to a task and notifies each of them, on the caller's transaction.
async fn assign(conn: &mut SqliteConnection, task_id: &str, title: &str, added: &BTreeSet<String>) -> AppResult<()> {
    let now = db::now();
    for user_id in added {
        sqlx::query("INSERT INTO task_assignees (task_id, user_id, assigned_at) VALUES (?, ?, ?)")
            .bind(task_id)
            .bind(user_id)
            .bind(&now)
            .execute(&mut *conn)
            .await?;
        notifications::insert(
            &mut *conn,
            user_id,
            "New task assignment",
            &format!("You have been assigned to \"{}\"", title),
            "task_assigned",
            Some(Subject { resource_type: "task", resource_id: task_id }),
        )
        .await?;
    }
    Ok(())
}

/// Inserts a row owned by `caller`. Omitted and null optional fields fall back to the
/// column default. Tasks get their assignees and notifications in the same transaction.
pub async fn create(pool: &SqlitePool, kind: EntityKind, caller: &Caller, payload: &Map<String, Value>) -> AppResult<Value> {
    let id = Uuid::new_v4();
    let now = db::now();
    let fields: Vec<_> = kind
        .schema()
        .columns()
        .filter_map(|f| payload.get(f.name).filter(|v| !v.is_null()).map(|v| (f, v)))
        .collect();

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("INSERT INTO {} (id, owner_id, created_at, updated_at", kind.table()));
    for (field, _) in &fields {
        qb.push(format!(", \"{}\"", field.name));
    }
    qb.push(") VALUES (").push_bind(id.to_string());
    qb.push(", ").push_bind(caller.id.to_string());
    qb.push(", ").push_bind(now.clone());
    qb.push(", ").push_bind(now);
    for (field, value) in &fields {
        qb.push(", ");
        push_bind_field(&mut qb, field, value);
    }
    qb.push(")");

    let mut tx = pool.begin().await?;
    qb.build().execute(&mut *tx).await?;
    if kind == EntityKind::Task {
        if let Some(added) = assignee_ids(payload) {
            let title = payload.get("title").and_then(Value::as_str).unwrap_or_default();
            assign(&mut tx, &id.to_string(), title, &added).await?;
        }
    }
    tx.commit().await?;

    tracing::debug!(entity = kind.slug(), %id, "Created record");
    fetch(pool, kind, id).await
}

/// Applies the fields present in `payload`. For tasks, `assignee_ids` replaces the
/// assignee set and only newly added users are notified.
pub async fn update(
    pool: &SqlitePool,
    kind: EntityKind,
    caller: &Caller,
    id: Uuid,
    payload: &Map<String, Value>,
) -> AppResult<Value> {
    let fields: Vec<_> = kind.schema().columns().filter_map(|f| payload.get(f.name).map(|v| (f, v))).collect();
    let assignees = if kind == EntityKind::Task { assignee_ids(payload) } else { None };
    if fields.is_empty() && assignees.is_none() {
        return Err(AppError::BadRequest("No fields to update".to_string()));
    }

    let mut tx = pool.begin().await?;
    let owner = owner_in_tx(&mut tx, kind, id).await?;
    caller.require_owner(owner)?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("UPDATE {} SET ", kind.table()));
    for (field, value) in &fields {
        qb.push(format!("\"{}\" = ", field.name));
        push_bind_field(&mut qb, field, value);
        qb.push(", ");
    }
    qb.push("updated_at = ").push_bind(db::now());
    qb.push(" WHERE id = ").push_bind(id.to_string());
    qb.build().execute(&mut *tx).await?;

    if let Some(wanted) = assignees {
        let task_id = id.to_string();
        let current: Vec<String> = sqlx::query_scalar("SELECT user_id FROM task_assignees WHERE task_id = ?")
            .bind(&task_id)
            .fetch_all(&mut *tx)
            .await?;
        let current: BTreeSet<String> = current.into_iter().collect();

        for removed in current.difference(&wanted) {
            sqlx::query("DELETE FROM task_assignees WHERE task_id = ? AND user_id = ?")
                .bind(&task_id)
                .bind(removed)
                .execute(&mut *tx)
                .await?;
        }
        let added: BTreeSet<String> = wanted.difference(&current).cloned().collect();
        if !added.is_empty() {
            let title: String =
                sqlx::query_scalar("SELECT title FROM tasks WHERE id = ?").bind(&task_id).fetch_one(&mut *tx).await?;
            assign(&mut tx, &task_id, &title, &added).await?;
        }
    }
    tx.commit().await?;

    fetch(pool, kind, id).await
}

pub async fn delete(pool: &SqlitePool, kind: EntityKind, caller: &Caller, id: Uuid) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    let owner = owner_in_tx(&mut tx, kind, id).await?;
    caller.require_owner(owner)?;
    let sql = format!("DELETE FROM {} WHERE id = ?", kind.table());
    sqlx::query(&sql).bind(id.to_string()).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}
