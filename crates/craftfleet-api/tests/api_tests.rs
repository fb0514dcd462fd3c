use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use craftfleet_config::{FleetConfig, RconSettings};
use craftfleet_manager::{FleetRegistry, ServerStatus, StubConnector, StubSupervisor};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

struct TestApi {
    app: Router,
    fleet: Arc<FleetRegistry>,
    supervisor: Arc<StubSupervisor>,
}

fn test_api() -> TestApi {
    let config = FleetConfig {
        startup_timeout: Duration::from_secs(2),
        stop_timeout: Duration::from_secs(2),
        rcon: RconSettings {
            retry_interval: Duration::from_millis(10),
            ..RconSettings::default()
        },
        ..FleetConfig::default()
    };

    let supervisor = Arc::new(StubSupervisor::new());
    let connector = Arc::new(StubConnector::any_password());
    let fleet = Arc::new(FleetRegistry::new(&config, supervisor.clone(), connector));
    TestApi {
        app: craftfleet_api::create_app(fleet.clone()),
        fleet,
        supervisor,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&bytes).unwrap_or(json!({}))
    };
    (status, json)
}

async fn create_server(api: &TestApi, name: &str) -> Uuid {
    let (status, body) = send(
        &api.app,
        "POST",
        "/servers",
        Some(json!({ "name": name })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().parse().unwrap()
}

async fn wait_settled(api: &TestApi, id: Uuid) -> ServerStatus {
    api.fleet
        .get(id)
        .unwrap()
        .wait_for_status(|s| !s.is_transitional())
        .await
        .unwrap()
}

#[tokio::test]
async fn health_answers_ok() {
    let api = test_api();
    let (status, body) = send(&api.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_then_fetch_detail() {
    let api = test_api();
    let id = create_server(&api, "survival").await;

    let (status, body) = send(&api.app, "GET", &format!("/servers/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "survival");
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["edition"], "java");
    assert_eq!(body["motd"], "Welcome to survival!");
    assert_eq!(body["players"]["max"], 20);
    // The console password must never appear on the wire.
    assert!(body.get("rconPassword").is_none());
    assert!(body.get("rcon_password").is_none());
}

#[tokio::test]
async fn create_honors_overrides() {
    let api = test_api();
    let (status, body) = send(
        &api.app,
        "POST",
        "/servers",
        Some(json!({
            "name": "bedrock-lobby",
            "edition": "bedrock",
            "maxPlayers": 64,
            "gameMode": "creative",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap();

    let (_, detail) = send(&api.app, "GET", &format!("/servers/{id}"), None).await;
    assert_eq!(detail["edition"], "bedrock");
    assert_eq!(detail["maxPlayers"], 64);
    assert_eq!(detail["gameMode"], "creative");
}

#[tokio::test]
async fn invalid_create_is_a_400() {
    let api = test_api();
    let (status, body) = send(
        &api.app,
        "POST",
        "/servers",
        Some(json!({ "name": "x", "maxPlayers": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn unknown_server_is_a_404() {
    let api = test_api();
    let id = Uuid::new_v4();
    for (method, uri) in [
        ("GET", format!("/servers/{id}")),
        ("POST", format!("/servers/{id}/start")),
        ("DELETE", format!("/servers/{id}")),
    ] {
        let (status, _) = send(&api.app, method, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
    }
}

#[tokio::test]
async fn listing_is_ordered() {
    let api = test_api();
    create_server(&api, "first").await;
    create_server(&api, "second").await;

    let (status, body) = send(&api.app, "GET", "/servers", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["first", "second"]);
}

#[tokio::test]
async fn lifecycle_via_http() {
    let api = test_api();
    let id = create_server(&api, "cycler").await;

    let (status, _) = send(&api.app, "POST", &format!("/servers/{id}/start"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(wait_settled(&api, id).await, ServerStatus::Running);

    let (status, body) = send(
        &api.app,
        "POST",
        &format!("/servers/{id}/command"),
        Some(json!({ "text": "say hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "ack: say hi");

    let (status, _) = send(&api.app, "POST", &format!("/servers/{id}/stop"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(wait_settled(&api, id).await, ServerStatus::Stopped);
}

#[tokio::test]
async fn command_on_stopped_server_is_a_409() {
    let api = test_api();
    let id = create_server(&api, "idle").await;
    let (status, body) = send(
        &api.app,
        "POST",
        &format!("/servers/{id}/command"),
        Some(json!({ "text": "list" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn delete_rules_follow_lifecycle() {
    let api = test_api();
    let id = create_server(&api, "target").await;

    send(&api.app, "POST", &format!("/servers/{id}/start"), None).await;
    assert_eq!(wait_settled(&api, id).await, ServerStatus::Running);

    let (status, _) = send(&api.app, "DELETE", &format!("/servers/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(&api.app, "POST", &format!("/servers/{id}/stop"), None).await;
    assert_eq!(wait_settled(&api, id).await, ServerStatus::Stopped);

    let (status, _) = send(&api.app, "DELETE", &format!("/servers/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&api.app, "GET", &format!("/servers/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_reflects_in_detail() {
    let api = test_api();
    let id = create_server(&api, "before").await;

    let (status, body) = send(
        &api.app,
        "PUT",
        &format!("/servers/{id}"),
        Some(json!({ "name": "after", "motd": "mined over matter" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "after");
    assert_eq!(body["motd"], "mined over matter");
}

#[tokio::test]
async fn console_supports_cursor_polling() {
    let api = test_api();
    let id = create_server(&api, "talker").await;
    send(&api.app, "POST", &format!("/servers/{id}/start"), None).await;
    assert_eq!(wait_settled(&api, id).await, ServerStatus::Running);

    let (status, body) = send(&api.app, "GET", &format!("/servers/{id}/console"), None).await;
    assert_eq!(status, StatusCode::OK);
    let lines = body.as_array().unwrap();
    assert!(!lines.is_empty());
    assert!(lines.iter().any(|l| l["text"] == "Server is ready"));
    let last = lines.last().unwrap()["seq"].as_u64().unwrap();

    let (_, tail) = send(
        &api.app,
        "GET",
        &format!("/servers/{id}/console?since={last}"),
        None,
    )
    .await;
    assert!(tail.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn crashed_server_shows_in_status() {
    let api = test_api();
    let id = create_server(&api, "victim").await;
    send(&api.app, "POST", &format!("/servers/{id}/start"), None).await;
    assert_eq!(wait_settled(&api, id).await, ServerStatus::Running);

    api.supervisor.crash(id);
    api.fleet
        .get(id)
        .unwrap()
        .wait_for_status(|s| s == ServerStatus::Crashed)
        .await
        .unwrap();

    let (_, detail) = send(&api.app, "GET", &format!("/servers/{id}"), None).await;
    assert_eq!(detail["status"], "crashed");
}
