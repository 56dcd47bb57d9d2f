use axum::http::{header, StatusCode};
use serde_json::json;

use super::TestApp;
use crate::middleware::auth::Role;

#[tokio::test]
async fn test_task_lifecycle() {
    let t = TestApp::new().await;
    let (profile, cookie) = t.user("owner@vexis.example", Role::User).await;

    let (status, _, created) = t
        .call(
            "POST",
            "/api/tasks",
            Some(&cookie),
            Some(json!({ "title": "Draft proposal", "priority": "high", "due_date": "2026-11-30" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["owner_id"], profile.id.as_str());
    assert_eq!(created["status"], "todo");
    assert_eq!(created["priority"], "high");
    assert_eq!(created["description"], serde_json::Value::Null);
    assert_eq!(created["assignee_ids"], json!([]));
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _, fetched) = t.call("GET", &format!("/api/tasks/{}", id), Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], "Draft proposal");

    let (status, _, updated) = t
        .call("PATCH", &format!("/api/tasks/{}", id), Some(&cookie), Some(json!({ "status": "done" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "done");
    assert_eq!(updated["title"], "Draft proposal");

    let (status, _, page) = t.call("GET", "/api/tasks", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["limit"], 100);
    assert_eq!(page["items"][0]["id"], id.as_str());

    let (status, _, _) = t.call("DELETE", &format!("/api/tasks/{}", id), Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, body) = t.call("GET", &format!("/api/tasks/{}", id), Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Task not found");
}

#[tokio::test]
async fn test_other_users_rows_are_forbidden_and_hidden() {
    let t = TestApp::new().await;
    let (_, alice) = t.user("alice@vexis.example", Role::User).await;
    let (_, bob) = t.user("bob@vexis.example", Role::User).await;
    let (_, admin) = t.user("admin@vexis.example", Role::Admin).await;

    let (_, _, lead) = t.call("POST", "/api/leads", Some(&alice), Some(json!({ "name": "Initech" }))).await;
    let uri = format!("/api/leads/{}", lead["id"].as_str().unwrap());

    let (status, _, body) = t.call("GET", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "You do not have access to this resource");

    let (status, _, _) = t.call("PATCH", &uri, Some(&bob), Some(json!({ "status": "won" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = t.call("DELETE", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, _, bobs) = t.call("GET", "/api/leads", Some(&bob), None).await;
    assert_eq!(bobs["total"], 0);

    let (_, _, all) = t.call("GET", "/api/leads", Some(&admin), None).await;
    assert_eq!(all["total"], 1);
    let (status, _, _) = t.call("PATCH", &uri, Some(&admin), Some(json!({ "status": "won" }))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_validation_errors_name_the_field() {
    let t = TestApp::new().await;
    let (_, cookie) = t.user("strict@vexis.example", Role::User).await;

    let (status, _, body) = t
        .call(
            "POST",
            "/api/financial-records",
            Some(&cookie),
            Some(json!({ "type": "refund", "amount": 10, "category": "Misc", "date": "2026-10-01" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "type");
    assert_eq!(body["error"], "type must be one of: income, expense");

    let (status, _, body) = t
        .call(
            "POST",
            "/api/webhooks",
            Some(&cookie),
            Some(json!({ "name": "hook", "url": "not a url", "events": "task.created" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "url");
    assert_eq!(t.count("webhooks").await, 0);
}

#[tokio::test]
async fn test_empty_update_is_rejected() {
    let t = TestApp::new().await;
    let (_, cookie) = t.user("idle@vexis.example", Role::User).await;
    let (_, _, client) = t.call("POST", "/api/clients", Some(&cookie), Some(json!({ "name": "Umbrella" }))).await;

    let uri = format!("/api/clients/{}", client["id"].as_str().unwrap());
    let (status, _, body) = t.call("PATCH", &uri, Some(&cookie), Some(json!({ "unknown": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No fields to update");
}

#[tokio::test]
async fn test_typed_columns_round_trip() {
    let t = TestApp::new().await;
    let (_, cookie) = t.user("typed@vexis.example", Role::User).await;

    let (status, _, hook) = t
        .call(
            "POST",
            "/api/webhooks",
            Some(&cookie),
            Some(json!({ "name": "CI", "url": "https://ci.example.com/hook", "events": "task.created", "active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(hook["active"], false);

    let (_, _, record) = t
        .call(
            "POST",
            "/api/financial-records",
            Some(&cookie),
            Some(json!({ "type": "income", "amount": 99.5, "category": "Sales", "date": "2026-10-01" })),
        )
        .await;
    assert_eq!(record["amount"], 99.5);
}

#[tokio::test]
async fn test_status_filter_and_pagination() {
    let t = TestApp::new().await;
    let (_, cookie) = t.user("pager@vexis.example", Role::User).await;
    for (title, status) in [("a", "todo"), ("b", "done"), ("c", "done")] {
        t.call("POST", "/api/tasks", Some(&cookie), Some(json!({ "title": title, "status": status }))).await;
    }

    let (_, _, done) = t.call("GET", "/api/tasks?status=done", Some(&cookie), None).await;
    assert_eq!(done["total"], 2);
    assert!(done["items"].as_array().unwrap().iter().all(|i| i["status"] == "done"));

    let (_, _, page) = t.call("GET", "/api/tasks?limit=1&offset=1", Some(&cookie), None).await;
    assert_eq!(page["total"], 3);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["offset"], 1);

    let (status, _, body) = t.call("GET", "/api/tasks?status=archived", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "status");

    let (status, _, _) = t.call("GET", "/api/webhooks?status=active", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_entity_and_malformed_id() {
    let t = TestApp::new().await;
    let (_, cookie) = t.user("lost@vexis.example", Role::User).await;

    let (status, _, body) = t.call("GET", "/api/invoices", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Unknown resource: invoices");

    let (status, _, body) = t.call("GET", "/api/tasks/123", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid UUID format: 123");

    // Authentication still comes first for unknown entities
    let (status, _, _) = t.call("GET", "/api/invoices", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_assignees_are_linked_and_notified() {
    let t = TestApp::new().await;
    let (_, owner) = t.user("lead@vexis.example", Role::User).await;
    let (dev, dev_cookie) = t.user("dev@vexis.example", Role::User).await;
    let (qa, _) = t.user("qa@vexis.example", Role::User).await;

    let (status, _, task) = t
        .call("POST", "/api/tasks", Some(&owner), Some(json!({ "title": "Ship release", "assignee_ids": [dev.id] })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["assignee_ids"], json!([dev.id]));

    let (_, _, inbox) = t.call("GET", "/api/notifications", Some(&dev_cookie), None).await;
    assert_eq!(inbox["unread"], 1);
    assert_eq!(inbox["items"][0]["title"], "New task assignment");
    assert_eq!(inbox["items"][0]["resource_id"], task["id"]);

    // Replacing the set notifies only the newly added user
    let uri = format!("/api/tasks/{}", task["id"].as_str().unwrap());
    let (status, _, updated) =
        t.call("PATCH", &uri, Some(&owner), Some(json!({ "assignee_ids": [dev.id, qa.id] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["assignee_ids"].as_array().unwrap().len(), 2);
    assert_eq!(t.count("notifications").await, 2);

    let (_, _, updated) = t.call("PATCH", &uri, Some(&owner), Some(json!({ "assignee_ids": [qa.id] }))).await;
    assert_eq!(updated["assignee_ids"], json!([qa.id]));
    assert_eq!(t.count("notifications").await, 2);
}

#[tokio::test]
async fn test_unknown_assignee_rolls_back_the_task() {
    let t = TestApp::new().await;
    let (_, cookie) = t.user("solo@vexis.example", Role::User).await;

    let (status, _, body) = t
        .call(
            "POST",
            "/api/tasks",
            Some(&cookie),
            Some(json!({ "title": "Orphan", "assignee_ids": ["6fa459ea-ee8a-3ca4-894e-db77e160355e"] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Referenced record does not exist");
    assert_eq!(t.count("tasks").await, 0);
    assert_eq!(t.count("notifications").await, 0);
}

#[tokio::test]
async fn test_summary_report_is_owner_scoped() {
    let t = TestApp::new().await;
    let (_, alice) = t.user("alice@vexis.example", Role::User).await;
    let (_, bob) = t.user("bob@vexis.example", Role::User).await;

    for (kind, amount) in [("income", 1000.0), ("expense", 250.0)] {
        t.call(
            "POST",
            "/api/financial-records",
            Some(&alice),
            Some(json!({ "type": kind, "amount": amount, "category": "Ops", "date": "2026-10-01" })),
        )
        .await;
    }
    t.call("POST", "/api/tasks", Some(&alice), Some(json!({ "title": "t", "status": "review" }))).await;
    t.call("POST", "/api/tasks", Some(&bob), Some(json!({ "title": "bob's" }))).await;

    let (status, _, summary) = t.call("GET", "/api/reports/summary", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["counts"]["task"], 1);
    assert_eq!(summary["counts"]["financial_record"], 2);
    assert_eq!(summary["tasks_by_status"]["review"], 1);
    assert_eq!(summary["finance"]["income"], 1000.0);
    assert_eq!(summary["finance"]["expense"], 250.0);
    assert_eq!(summary["finance"]["net"], 750.0);
}

#[tokio::test]
async fn test_financial_csv_export() {
    let t = TestApp::new().await;
    let (_, cookie) = t.user("books@vexis.example", Role::User).await;

    for (date, desc) in [("2026-09-15", "=cmd()"), ("2026-10-02", "Retainer, October")] {
        t.call(
            "POST",
            "/api/financial-records",
            Some(&cookie),
            Some(json!({ "type": "income", "amount": 10, "category": "Fees", "date": date, "description": desc })),
        )
        .await;
    }

    let (status, headers, body) = t.call("GET", "/api/reports/financial.csv?from=2026-10-01", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
    assert!(headers[header::CONTENT_DISPOSITION].to_str().unwrap().contains("financial-records.csv"));
    let csv = body.as_str().unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "id,date,type,category,description,amount,client_id,project_id");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains("\"Retainer, October\",10.00"));

    let (_, _, all) = t.call("GET", "/api/reports/financial.csv", Some(&cookie), None).await;
    assert!(all.as_str().unwrap().contains("\"'=cmd()\""));

    let (status, _, body) = t.call("GET", "/api/reports/financial.csv?to=yesterday", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "to");
}
