use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use batchhost_api::{create_routes, AppState};
use batchhost_coordinator::{CoordinatorServices, WorkerCoordinator};
use batchhost_core::config::{CoordinatorConfig, RegistryConfig};
use batchhost_core::models::ExecutionGroup;
use batchhost_infrastructure::{
    CachingSecurityServiceFactory, InMemoryConfigPropertyStore, InMemoryGroupQueue,
    InMemoryJobStore, InMemoryStatisticsSink, InMemoryUserGroupStore,
};
use batchhost_module::{
    BuiltinPlugins, MemoryCodeUnit, ModuleRegistry, ModuleServices, PluginRequest, PluginResponse,
};

const WAIT_MANIFEST: &str = r#"
[[plugins]]
class = "WaitPlugin"

[[plugins.parameters]]
name = "waitTime"
type = "integer"
index = 1
request_parameter = true
required = true

[[plugins.results]]
name = "waitTime"
type = "integer"
index = 1
"#;

struct TestApp {
    router: Router,
    registry: Arc<ModuleRegistry>,
    queue: Arc<InMemoryGroupQueue>,
    jobs: Arc<InMemoryJobStore>,
    config_store: Arc<InMemoryConfigPropertyStore>,
}

async fn test_app() -> TestApp {
    let mut plugins = BuiltinPlugins::new();
    plugins.register("WaitPlugin", |request: &PluginRequest| {
        Ok(PluginResponse {
            results: request.parameters.clone(),
            result_list: Vec::new(),
        })
    });
    let config_store = Arc::new(InMemoryConfigPropertyStore::new());
    let user_groups = Arc::new(InMemoryUserGroupStore::new());
    let registry = ModuleRegistry::new(
        RegistryConfig {
            use_control_task: false,
            ..RegistryConfig::default()
        },
        ModuleServices {
            config_store: Some(config_store.clone()),
            user_group_store: Some(user_groups.clone()),
            builtin_plugins: plugins,
        },
    );
    let geo = registry.new_module(
        "geo",
        Arc::new(MemoryCodeUnit::new("geo@1").with_file("plugin.toml", WAIT_MANIFEST)),
    );
    assert!(registry.add_module(geo.clone()).await);
    geo.enable().await.unwrap();

    let queue = Arc::new(InMemoryGroupQueue::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let coordinator = WorkerCoordinator::new(
        registry.clone(),
        CoordinatorServices {
            job_store: jobs.clone(),
            group_source: queue.clone(),
            statistics: Arc::new(InMemoryStatisticsSink::new()),
            security_factory: Arc::new(CachingSecurityServiceFactory::new(user_groups)),
        },
        CoordinatorConfig::default(),
    )
    .await;

    TestApp {
        router: create_routes(AppState::new(coordinator)),
        registry,
        queue,
        jobs,
        config_store,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Body, content_type: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", content_type)
        .body(body)
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    post(uri, Body::from(body.to_string()), "application/json")
}

#[tokio::test]
async fn test_health_check() {
    let app = test_app().await;
    let (status, body) = send(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["startedModules"], 1);
}

#[tokio::test]
async fn test_worker_protocol_round_trip() {
    let app = test_app().await;

    let (status, body) = send(&app.router, post_json("/workers/W1/1/groups/next", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    app.jobs.create_job("J1", 5).await;
    app.jobs
        .set_group_input("J1", 1, json!({"requests": [{"waitTime": 1}]}))
        .await
        .unwrap();
    app.queue
        .add_group(Arc::new(
            ExecutionGroup::new("J1", 1, "Wait", "geo", "alice")
                .with_request_ids("1-5".parse().unwrap()),
        ))
        .await;

    let (_, body) = send(
        &app.router,
        post_json("/workers/W1/1/groups/next?moduleName=maps", json!({})),
    )
    .await;
    assert_eq!(body, json!({}));

    let (_, assignment) = send(
        &app.router,
        post_json("/workers/W1/1/groups/next?moduleName=geo", json!({})),
    )
    .await;
    assert_eq!(assignment["groupId"], "J1-1-1");
    assert_eq!(assignment["batchJobId"], "J1");
    assert_eq!(assignment["businessApplicationName"], "Wait");

    let (_, specification) = send(&app.router, get("/workers/W1/jobs/J1/groups/J1-1-1")).await;
    assert_eq!(specification["requests"]["requests"][0]["waitTime"], 1);
    assert_eq!(specification["moduleName"], "geo");

    let (_, other_job) = send(&app.router, get("/workers/W1/jobs/J2/groups/J1-1-1")).await;
    assert_eq!(other_job, json!({}));

    let (status, _) = send(
        &app.router,
        post(
            "/workers/W1/jobs/J1/groups/J1-1-1/error",
            Body::from("1,timeout"),
            "text/csv",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.jobs.group_error("J1", 1).await.as_deref(), Some("1,timeout"));

    let results = json!({
        "completedRequestRange": "1-5",
        "failedRequestRange": "",
        "groupExecutedTime": 12,
        "applicationExecutedTime": 10
    });
    let (status, counters) = send(
        &app.router,
        post_json("/workers/W1/jobs/J1/groups/J1-1-1/results", results.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(counters["completedRequests"], 5);
    assert_eq!(counters["completed"], true);

    let (_, repeated) = send(
        &app.router,
        post_json("/workers/W1/jobs/J1/groups/J1-1-1/results", results),
    )
    .await;
    assert_eq!(repeated, json!({}));

    let (_, workers) = send(&app.router, get("/api/workers")).await;
    assert_eq!(workers["success"], true);
    assert_eq!(workers["data"][0]["id"], "W1");
}

#[tokio::test]
async fn test_invalid_result_range_is_rejected() {
    let app = test_app().await;
    let (status, _) = send(
        &app.router,
        post_json(
            "/workers/W1/jobs/J1/groups/J1-1-1/results",
            json!({"completedRequestRange": "1-x"}),
        ),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_missing_input_data_is_not_found() {
    let app = test_app().await;
    let (status, _) = send(
        &app.router,
        get("/workers/W1/jobs/J1/groups/J1-1-1/requests/1/inputData"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_module_artifacts_require_current_module_time() {
    let app = test_app().await;
    let module_time = app.registry.get_module("geo").await.unwrap().started_time();

    let (status, body) = send(&app.router, get(&format!("/modules/geo/{module_time}/urls"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["artifactPaths"], json!(["plugin.toml"]));

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/modules/geo/{module_time}/artifacts/0")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], WAIT_MANIFEST.as_bytes());

    let (status, _) = send(&app.router, get(&format!("/modules/geo/{module_time}/artifacts/5"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app.router, get(&format!("/modules/geo/{}/urls", module_time + 1))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_module_config_overlays_environment() {
    let app = test_app().await;
    app.config_store
        .set_property("DEFAULT", "geo", "GLOBAL", "url", json!("http://default"))
        .await;
    app.config_store
        .set_property("prod", "geo", "GLOBAL", "url", json!("http://prod"))
        .await;

    let (_, body) = send(&app.router, get("/modules/geo/0/config?environmentName=prod")).await;
    assert_eq!(body["url"], "http://prod");

    let (_, body) = send(&app.router, get("/modules/geo/0/config?environmentName=DEFAULT")).await;
    assert_eq!(body["url"], "http://default");

    let (status, _) = send(&app.router, get("/modules/nothing/0/config")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_module_administration() {
    let app = test_app().await;

    let (_, body) = send(&app.router, get("/api/modules")).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"][0]["name"], "geo");
    assert_eq!(body["data"][0]["started"], true);

    let (status, body) = send(&app.router, get("/api/modules/nothing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "MODULE_NOT_FOUND");
    assert_eq!(body["error"]["code"], 404);

    let (status, body) = send(&app.router, post_json("/api/modules/geo/stop", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["started"], false);
    assert!(!app.registry.get_module("geo").await.unwrap().is_started());

    let (_, body) = send(&app.router, post_json("/api/modules/geo/start", json!({}))).await;
    assert_eq!(body["data"]["started"], true);

    let (status, body) = send(&app.router, post_json("/api/modules/geo/explode", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "BAD_REQUEST");

    let (status, body) = send(&app.router, post_json("/api/modules/refresh", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}
