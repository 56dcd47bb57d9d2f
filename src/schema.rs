//! Per-entity field schemas.
//!
//! Each [`Schema`] lists the fields a client may send for an entity together with their
//! constraints. The same list decides which columns `records` writes and reads, so a field
//! has to be declared here before it can be persisted.

use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::validation::{is_valid_date, is_valid_email, is_valid_url, is_valid_uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Email,
    Uuid,
    /// `YYYY-MM-DD`
    Date,
    /// Absolute http(s) URL
    Url,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// Length bounds count characters.
    Text { min: usize, max: usize, format: Option<Format> },
    Enum(&'static [&'static str]),
    Number { min: f64, max: f64 },
    Integer { min: i64, max: i64 },
    Boolean,
    /// A list of ids kept in a link table, not a column of the entity itself.
    UuidList { max: usize },
}

/// SQL storage class of a column-backed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Real,
    Integer,
    Bool,
}

impl FieldKind {
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            FieldKind::Text { .. } | FieldKind::Enum(_) => Some(ColumnType::Text),
            FieldKind::Number { .. } => Some(ColumnType::Real),
            FieldKind::Integer { .. } => Some(ColumnType::Integer),
            FieldKind::Boolean => Some(ColumnType::Bool),
            FieldKind::UuidList { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field {
    pub name: &'static str,
    /// Must be present (and non-null) on create.
    pub required: bool,
    /// May be set to `null`. False for required fields and for columns with a database default.
    pub nullable: bool,
    pub kind: FieldKind,
    /// Taken exactly as sent: skipped by the sanitizer and the denylist (passwords).
    pub verbatim: bool,
}

const fn req(name: &'static str, kind: FieldKind) -> Field {
    Field { name, required: true, nullable: false, kind, verbatim: false }
}

const fn opt(name: &'static str, kind: FieldKind) -> Field {
    Field { name, required: false, nullable: true, kind, verbatim: false }
}

/// Optional, but backed by a NOT NULL column with a default.
const fn opt_default(name: &'static str, kind: FieldKind) -> Field {
    Field { name, required: false, nullable: false, kind, verbatim: false }
}

const fn password(min: usize) -> Field {
    Field { name: "password", required: true, nullable: false, kind: text(min, 128), verbatim: true }
}

const fn text(min: usize, max: usize) -> FieldKind {
    FieldKind::Text { min, max, format: None }
}

const fn formatted(format: Format, max: usize) -> FieldKind {
    FieldKind::Text { min: 0, max, format: Some(format) }
}

const EMAIL: FieldKind = formatted(Format::Email, 254);
const UUID: FieldKind = formatted(Format::Uuid, 36);
const DATE: FieldKind = formatted(Format::Date, 10);
const MONEY: FieldKind = FieldKind::Number { min: 0.0, max: 1_000_000_000.0 };

pub const TASK_STATUSES: &[&str] = &["todo", "in_progress", "review", "done"];
pub const TASK_PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];
pub const LEAD_STATUSES: &[&str] = &["new", "contacted", "qualified", "proposal", "won", "lost"];
pub const CLIENT_STATUSES: &[&str] = &["active", "inactive", "prospect"];
pub const PROJECT_STATUSES: &[&str] = &["planning", "active", "on_hold", "completed", "cancelled"];
pub const FINANCIAL_TYPES: &[&str] = &["income", "expense"];
pub const ROLES: &[&str] = &["admin", "user"];
pub const THEMES: &[&str] = &["light", "dark", "system"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Required fields must be present.
    Create,
    /// Only the fields present are checked.
    Update,
}

#[derive(Debug)]
pub struct Schema {
    pub entity: &'static str,
    pub fields: &'static [Field],
}

pub static TASK: Schema = Schema {
    entity: "task",
    fields: &[
        req("title", text(1, 200)),
        opt("description", text(0, 5000)),
        opt_default("status", FieldKind::Enum(TASK_STATUSES)),
        opt_default("priority", FieldKind::Enum(TASK_PRIORITIES)),
        opt("due_date", DATE),
        opt("project_id", UUID),
        opt("assignee_ids", FieldKind::UuidList { max: 20 }),
    ],
};

pub static LEAD: Schema = Schema {
    entity: "lead",
    fields: &[
        req("name", text(1, 200)),
        opt("email", EMAIL),
        opt("phone", text(0, 50)),
        opt("company", text(0, 200)),
        opt_default("status", FieldKind::Enum(LEAD_STATUSES)),
        opt("source", text(0, 100)),
        opt("value", MONEY),
        opt("notes", text(0, 5000)),
    ],
};

pub static CLIENT: Schema = Schema {
    entity: "client",
    fields: &[
        req("name", text(1, 200)),
        opt("email", EMAIL),
        opt("phone", text(0, 50)),
        opt("company", text(0, 200)),
        opt("address", text(0, 500)),
        opt_default("status", FieldKind::Enum(CLIENT_STATUSES)),
        opt("notes", text(0, 5000)),
    ],
};

pub static PROJECT: Schema = Schema {
    entity: "project",
    fields: &[
        req("name", text(1, 200)),
        opt("description", text(0, 5000)),
        opt("client_id", UUID),
        opt_default("status", FieldKind::Enum(PROJECT_STATUSES)),
        opt("start_date", DATE),
        opt("end_date", DATE),
        opt("budget", MONEY),
    ],
};

pub static FINANCIAL_RECORD: Schema = Schema {
    entity: "financial_record",
    fields: &[
        req("type", FieldKind::Enum(FINANCIAL_TYPES)),
        req("amount", FieldKind::Number { min: 0.01, max: 1_000_000_000.0 }),
        req("category", text(1, 100)),
        opt("description", text(0, 1000)),
        req("date", FieldKind::Text { min: 10, max: 10, format: Some(Format::Date) }),
        opt("client_id", UUID),
        opt("project_id", UUID),
    ],
};

pub static WEBHOOK: Schema = Schema {
    entity: "webhook",
    fields: &[
        req("name", text(1, 100)),
        req("url", FieldKind::Text { min: 1, max: 2048, format: Some(Format::Url) }),
        req("events", text(1, 500)),
        opt_default("active", FieldKind::Boolean),
        opt("secret", text(0, 200)),
    ],
};

pub static USER: Schema = Schema {
    entity: "user",
    fields: &[
        req("email", FieldKind::Text { min: 3, max: 254, format: Some(Format::Email) }),
        req("full_name", text(1, 100)),
        opt_default("role", FieldKind::Enum(ROLES)),
        password(8),
    ],
};

pub static PREFERENCES: Schema = Schema {
    entity: "user_preferences",
    fields: &[
        opt_default("theme", FieldKind::Enum(THEMES)),
        opt_default("language", text(2, 10)),
        opt_default("timezone", text(1, 64)),
        opt_default("email_notifications", FieldKind::Boolean),
        opt_default("push_notifications", FieldKind::Boolean),
    ],
};

pub static API_KEY: Schema = Schema {
    entity: "api_key",
    fields: &[req("name", text(1, 100)), opt("expires_in_days", FieldKind::Integer { min: 1, max: 365 })],
};

pub static LOGIN: Schema = Schema {
    entity: "session",
    fields: &[
        req("email", FieldKind::Text { min: 3, max: 254, format: Some(Format::Email) }),
        password(1),
    ],
};

fn violation(field: &Field, message: String) -> AppError {
    AppError::ValidationError { field: field.name.to_string(), message }
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields the guard passes through untouched.
    pub fn verbatim(&self) -> impl Iterator<Item = &'static Field> {
        self.fields.iter().filter(|f| f.verbatim)
    }

    /// Fields stored as columns of the entity table, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &'static Field> {
        self.fields.iter().filter(|f| f.kind.column_type().is_some())
    }

    /// Checks `payload` against every declared field and returns the first violation.
    ///
    /// Unknown keys are ignored here; persistence only ever reads declared fields.
    pub fn validate(&self, payload: &Map<String, Value>, mode: Mode) -> AppResult<()> {
        for field in self.fields {
            match payload.get(field.name) {
                None => {
                    if mode == Mode::Create && field.required {
                        return Err(violation(field, format!("{} is required", field.name)));
                    }
                }
                Some(Value::Null) => {
                    if field.required && mode == Mode::Create {
                        return Err(violation(field, format!("{} is required", field.name)));
                    }
                    if !field.nullable {
                        return Err(violation(field, format!("{} must not be null", field.name)));
                    }
                }
                Some(value) => field.check(value)?,
            }
        }
        Ok(())
    }
}

impl Field {
    fn check(&self, value: &Value) -> AppResult<()> {
        let name = self.name;
        match self.kind {
            FieldKind::Text { min, max, format } => {
                let s = value.as_str().ok_or_else(|| violation(self, format!("{} must be a string", name)))?;
                let len = s.chars().count();
                if len < min {
                    let message = if min == 1 {
                        format!("{} must not be empty", name)
                    } else {
                        format!("{} must be at least {} characters", name, min)
                    };
                    return Err(violation(self, message));
                }
                if len > max {
                    return Err(violation(self, format!("{} must be at most {} characters", name, max)));
                }
                // An empty optional value means "not set"; formats apply to real values only.
                if s.is_empty() && !self.required {
                    return Ok(());
                }
                if let Some(format) = format {
                    let (ok, what) = match format {
                        Format::Email => (is_valid_email(s), "a valid email address"),
                        Format::Uuid => (is_valid_uuid(s), "a valid UUID"),
                        Format::Date => (is_valid_date(s), "a valid date (YYYY-MM-DD)"),
                        Format::Url => (is_valid_url(s), "a valid http(s) URL"),
                    };
                    if !ok {
                        return Err(violation(self, format!("{} must be {}", name, what)));
                    }
                }
            }
            FieldKind::Enum(allowed) => {
                let ok = value.as_str().map(|s| allowed.contains(&s)).unwrap_or(false);
                if !ok {
                    return Err(violation(self, format!("{} must be one of: {}", name, allowed.join(", "))));
                }
            }
            FieldKind::Number { min, max } => {
                let n = value
                    .as_f64()
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| violation(self, format!("{} must be a number", name)))?;
                if n < min {
                    return Err(violation(self, format!("{} must be at least {}", name, min)));
                }
                if n > max {
                    return Err(violation(self, format!("{} must be at most {}", name, max)));
                }
            }
            FieldKind::Integer { min, max } => {
                let n = value.as_i64().ok_or_else(|| violation(self, format!("{} must be an integer", name)))?;
                if n < min || n > max {
                    return Err(violation(self, format!("{} must be between {} and {}", name, min, max)));
                }
            }
            FieldKind::Boolean => {
                if !value.is_boolean() {
                    return Err(violation(self, format!("{} must be true or false", name)));
                }
            }
            FieldKind::UuidList { max } => {
                let items =
                    value.as_array().ok_or_else(|| violation(self, format!("{} must be a list of UUIDs", name)))?;
                if items.len() > max {
                    return Err(violation(self, format!("{} must contain at most {} entries", name, max)));
                }
                if !items.iter().all(|v| v.as_str().map(is_valid_uuid).unwrap_or(false)) {
                    return Err(violation(self, format!("{} must contain only valid UUIDs", name)));
                }
            }
        }
        Ok(())
    }
}

/// The business entities served by the generic `/api/{entity}` routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Task,
    Lead,
    Client,
    Project,
    FinancialRecord,
    Webhook,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Task,
        EntityKind::Lead,
        EntityKind::Client,
        EntityKind::Project,
        EntityKind::FinancialRecord,
        EntityKind::Webhook,
    ];

    /// Resolves the URL segment (`tasks`, `financial-records`, ...).
    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.slug() == slug)
    }

    pub fn slug(&self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::Lead => "leads",
            EntityKind::Client => "clients",
            EntityKind::Project => "projects",
            EntityKind::FinancialRecord => "financial-records",
            EntityKind::Webhook => "webhooks",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::Lead => "leads",
            EntityKind::Client => "clients",
            EntityKind::Project => "projects",
            EntityKind::FinancialRecord => "financial_records",
            EntityKind::Webhook => "webhooks",
        }
    }

    pub fn schema(&self) -> &'static Schema {
        match self {
            EntityKind::Task => &TASK,
            EntityKind::Lead => &LEAD,
            EntityKind::Client => &CLIENT,
            EntityKind::Project => &PROJECT,
            EntityKind::FinancialRecord => &FINANCIAL_RECORD,
            EntityKind::Webhook => &WEBHOOK,
        }
    }

    /// Name used in audit entries.
    pub fn resource_type(&self) -> &'static str {
        self.schema().entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    fn field_of(err: AppError) -> (String, String) {
        match err {
            AppError::ValidationError { field, message } => (field, message),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_conforming_task_passes_unchanged() {
        let payload = obj(json!({
            "title": "Prepare invoice",
            "status": "in_progress",
            "priority": "high",
            "due_date": "2026-11-01",
            "project_id": "550e8400-e29b-41d4-a716-446655440000",
            "assignee_ids": ["6fa459ea-ee8a-3ca4-894e-db77e160355e"]
        }));
        let before = payload.clone();
        assert!(TASK.validate(&payload, Mode::Create).is_ok());
        assert_eq!(payload, before);
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let err = TASK.validate(&obj(json!({ "status": "todo" })), Mode::Create).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(field_of(err), ("title".to_string(), "title is required".to_string()));
    }

    #[test]
    fn test_update_mode_skips_required_fields() {
        assert!(TASK.validate(&obj(json!({ "status": "done" })), Mode::Update).is_ok());
    }

    #[test]
    fn test_out_of_enum_value_is_rejected() {
        let err = TASK.validate(&obj(json!({ "title": "x", "status": "archived" })), Mode::Create).unwrap_err();
        let (field, message) = field_of(err);
        assert_eq!(field, "status");
        assert_eq!(message, "status must be one of: todo, in_progress, review, done");
    }

    #[test]
    fn test_null_handling() {
        // nullable optional column
        assert!(TASK.validate(&obj(json!({ "title": "x", "description": null })), Mode::Create).is_ok());
        // column with a database default
        let err = TASK.validate(&obj(json!({ "status": null })), Mode::Update).unwrap_err();
        assert_eq!(field_of(err).1, "status must not be null");
        let err = TASK.validate(&obj(json!({ "title": null })), Mode::Create).unwrap_err();
        assert_eq!(field_of(err).1, "title is required");
    }

    #[test]
    fn test_formats() {
        let err = LEAD.validate(&obj(json!({ "name": "Acme", "email": "nope" })), Mode::Create).unwrap_err();
        assert_eq!(field_of(err).1, "email must be a valid email address");

        assert!(LEAD.validate(&obj(json!({ "name": "Acme", "email": "" })), Mode::Create).is_ok());

        let err = PROJECT.validate(&obj(json!({ "name": "Site", "client_id": "42" })), Mode::Create).unwrap_err();
        assert_eq!(field_of(err).1, "client_id must be a valid UUID");

        let err = WEBHOOK
            .validate(&obj(json!({ "name": "n", "url": "ftp://x", "events": "task.created" })), Mode::Create)
            .unwrap_err();
        assert_eq!(field_of(err).1, "url must be a valid http(s) URL");
    }

    #[test]
    fn test_financial_record_constraints() {
        let valid = obj(json!({ "type": "income", "amount": 1250.5, "category": "Consulting", "date": "2026-10-01" }));
        assert!(FINANCIAL_RECORD.validate(&valid, Mode::Create).is_ok());

        let zero = obj(json!({ "type": "expense", "amount": 0, "category": "Rent", "date": "2026-10-01" }));
        assert_eq!(field_of(FINANCIAL_RECORD.validate(&zero, Mode::Create).unwrap_err()).1, "amount must be at least 0.01");

        let text_amount = obj(json!({ "type": "expense", "amount": "12", "category": "Rent", "date": "2026-10-01" }));
        assert_eq!(
            field_of(FINANCIAL_RECORD.validate(&text_amount, Mode::Create).unwrap_err()).1,
            "amount must be a number"
        );
    }

    #[test]
    fn test_length_limits_count_characters() {
        let title = "ü".repeat(200);
        assert!(TASK.validate(&obj(json!({ "title": title })), Mode::Create).is_ok());
        let err = TASK.validate(&obj(json!({ "title": "ü".repeat(201) })), Mode::Create).unwrap_err();
        assert_eq!(field_of(err).1, "title must be at most 200 characters");
        let err = TASK.validate(&obj(json!({ "title": "" })), Mode::Create).unwrap_err();
        assert_eq!(field_of(err).1, "title must not be empty");
    }

    #[test]
    fn test_only_passwords_are_verbatim() {
        assert_eq!(USER.verbatim().map(|f| f.name).collect::<Vec<_>>(), vec!["password"]);
        assert_eq!(LOGIN.verbatim().count(), 1);
        for kind in EntityKind::ALL {
            assert_eq!(kind.schema().verbatim().count(), 0);
        }
    }

    #[test]
    fn test_user_password_length() {
        let err = USER
            .validate(&obj(json!({ "email": "a@b.co", "full_name": "A", "password": "short" })), Mode::Create)
            .unwrap_err();
        assert_eq!(field_of(err).1, "password must be at least 8 characters");
    }

    #[test]
    fn test_assignee_list() {
        let err = TASK.validate(&obj(json!({ "title": "x", "assignee_ids": ["nope"] })), Mode::Create).unwrap_err();
        assert_eq!(field_of(err).1, "assignee_ids must contain only valid UUIDs");
        assert!(TASK.columns().all(|f| f.name != "assignee_ids"));
    }

    #[test]
    fn test_entity_slugs_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_slug(kind.slug()), Some(kind));
        }
        assert_eq!(EntityKind::from_slug("users"), None);
        assert_eq!(EntityKind::FinancialRecord.table(), "financial_records");
    }
}
