//! Reports: dashboard summary and the financial CSV export.

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::error::{AppError, AppResult};
use crate::middleware::audit::AuditAction;
use crate::middleware::auth::Caller;
use crate::middleware::guard::{Guard, RawQuery};
use crate::middleware::ip::ClientMeta;
use crate::middleware::validation::is_valid_date;
use crate::schema::EntityKind;
use crate::state::AppState;

const EXPORT_ROW_LIMIT: i64 = 50_000;

fn push_owner_scope(qb: &mut QueryBuilder<'_, Sqlite>, caller: &Caller) {
    qb.push(" WHERE 1 = 1");
    if !caller.is_admin() {
        qb.push(" AND owner_id = ").push_bind(caller.id.to_string());
    }
}

/// `GET /api/reports/summary`: row counts per entity and the income/expense balance.
pub async fn summary(State(state): State<AppState>, client: ClientMeta, headers: HeaderMap) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Read, "report");
    let result: AppResult<Json<Value>> = async {
        let caller = guard.admit(&headers).await?;

        let mut counts = Map::new();
        for kind in EntityKind::ALL {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", kind.table()));
            push_owner_scope(&mut qb, &caller);
            let n: i64 = qb.build_query_scalar::<i64>().fetch_one(&state.db).await?;
            counts.insert(kind.resource_type().to_string(), json!(n));
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT COALESCE(SUM(CASE WHEN type = 'income' THEN amount END), 0.0) AS income, \
             COALESCE(SUM(CASE WHEN type = 'expense' THEN amount END), 0.0) AS expense \
             FROM financial_records",
        );
        push_owner_scope(&mut qb, &caller);
        let row = qb.build().fetch_one(&state.db).await?;
        let income: f64 = row.try_get("income")?;
        let expense: f64 = row.try_get("expense")?;

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT status, COUNT(*) AS n FROM tasks");
        push_owner_scope(&mut qb, &caller);
        qb.push(" GROUP BY status");
        let mut tasks_by_status = Map::new();
        for row in qb.build().fetch_all(&state.db).await? {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            tasks_by_status.insert(status, json!(n));
        }

        Ok(Json(json!({
            "counts": counts,
            "tasks_by_status": tasks_by_status,
            "finance": { "income": income, "expense": expense, "net": income - expense },
        })))
    }
    .await;
    guard.finish(result).await
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    /// Inclusive `YYYY-MM-DD` bounds on the record date.
    pub from: Option<String>,
    pub to: Option<String>,
}

fn date_bound(name: &str, value: Option<&str>) -> AppResult<Option<String>> {
    match value.filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) if is_valid_date(v) => Ok(Some(v.to_string())),
        Some(_) => Err(AppError::ValidationError {
            field: name.to_string(),
            message: format!("{} must be a valid date (YYYY-MM-DD)", name),
        }),
    }
}

fn escape_csv(s: &str) -> String {
    // Leading formula characters would be evaluated by spreadsheet applications
    let guarded = match s.chars().next() {
        Some('=') | Some('+') | Some('-') | Some('@') => format!("'{}", s),
        _ => s.to_string(),
    };
    guarded
        .chars()
        .flat_map(|c| match c {
            '"' => vec!['"', '"'],
            '\n' | '\r' => vec![' '],
            c if c.is_control() => vec![' '],
            c => vec![c],
        })
        .collect()
}

/// `GET /api/reports/financial.csv`
pub async fn financial_csv(
    State(state): State<AppState>,
    client: ClientMeta,
    headers: HeaderMap,
    query: RawQuery<ExportQuery>,
) -> Response {
    let mut guard = Guard::new(&state, client, AuditAction::Export, "financial_record");
    let result: AppResult<Response> = async {
        let caller = guard.admit(&headers).await?;
        let query = guard.params(query)?;
        let from = date_bound("from", query.from.as_deref())?;
        let to = date_bound("to", query.to.as_deref())?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, date, type, category, description, amount, client_id, project_id FROM financial_records",
        );
        push_owner_scope(&mut qb, &caller);
        if let Some(from) = &from {
            qb.push(" AND date >= ").push_bind(from.clone());
        }
        if let Some(to) = &to {
            qb.push(" AND date <= ").push_bind(to.clone());
        }
        qb.push(" ORDER BY date DESC, id LIMIT ").push_bind(EXPORT_ROW_LIMIT);
        let rows = qb.build().fetch_all(&state.db).await?;

        let mut out = String::from("id,date,type,category,description,amount,client_id,project_id\n");
        for row in &rows {
            let text = |name: &str| -> AppResult<String> {
                Ok(row.try_get::<Option<String>, _>(name)?.unwrap_or_default())
            };
            let amount: f64 = row.try_get("amount")?;
            out.push_str(&format!(
                "\"{}\",\"{}\",\"{}\",\"{}\",\"{}\",{:.2},\"{}\",\"{}\"\n",
                escape_csv(&text("id")?),
                escape_csv(&text("date")?),
                escape_csv(&text("type")?),
                escape_csv(&text("category")?),
                escape_csv(&text("description")?),
                amount,
                escape_csv(&text("client_id")?),
                escape_csv(&text("project_id")?),
            ));
        }
        guard.set_details(json!({ "rows": rows.len(), "from": from, "to": to }));

        Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"financial-records.csv\""),
            ],
            out,
        )
            .into_response())
    }
    .await;
    guard.finish(result).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("say \"hi\""), "say \"\"hi\"\"");
        assert_eq!(escape_csv("two\nlines"), "two lines");
        assert_eq!(escape_csv("=SUM(A1:A9)"), "'=SUM(A1:A9)");
        assert_eq!(escape_csv("-5"), "'-5");
    }

    #[test]
    fn test_date_bounds() {
        assert_eq!(date_bound("from", None).unwrap(), None);
        assert_eq!(date_bound("from", Some("")).unwrap(), None);
        assert_eq!(date_bound("from", Some("2026-01-31")).unwrap().as_deref(), Some("2026-01-31"));
        assert!(matches!(date_bound("to", Some("31.01.2026")), Err(AppError::ValidationError { .. })));
    }
}
