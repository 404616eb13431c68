//! Integration tests for the HTTP API and the per-request transaction.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Extension, Router, middleware};
use barbell::catalog::Muscle;
use barbell::config::{BarbellConfig, TokenEntry};
use barbell::identity::{self, NewIdentity, Role};
use barbell::server::auth::hash_token;
use barbell::server::{AbortTransaction, AppState, Executor, create_router, transaction};
use barbell::{DirectorySource, SqliteStore, StaticSource};
use serde_json::{Value, json};
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

const ADMIN_TOKEN: &str = "admin-token";
const USER_TOKEN: &str = "user-token";

fn config(required: bool) -> BarbellConfig {
    let mut config = BarbellConfig::default();
    config.auth.required = required;
    config.auth.tokens = vec![
        TokenEntry {
            token_sha256: hash_token(ADMIN_TOKEN),
            subject_id: "sub-admin".to_string(),
            email: "admin@example.com".to_string(),
        },
        TokenEntry {
            token_sha256: hash_token(USER_TOKEN),
            subject_id: "sub-user".to_string(),
            email: "user@example.com".to_string(),
        },
    ];
    config
}

async fn seeded_store() -> SqliteStore {
    let source = DirectorySource::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"));
    let store = SqliteStore::open_in_memory(&source).unwrap();

    let tx = store.begin().await.unwrap();
    for (subject_id, email, role) in [
        ("sub-admin", "admin@example.com", Role::Admin),
        ("sub-user", "user@example.com", Role::User),
    ] {
        let input = NewIdentity {
            subject_id: subject_id.to_string(),
            email: email.to_string(),
            role,
        };
        identity::create(&tx, input).await.unwrap();
    }
    tx.commit().await.unwrap();
    store
}

async fn setup() -> (Router, SqliteStore) {
    let store = seeded_store().await;
    let state = AppState::new(store.clone(), &config(false));
    (create_router(state), store)
}

async fn count(store: &SqliteStore, table: &'static str) -> i64 {
    let tx = store.begin().await.unwrap();
    let n = tx
        .run(move |conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
        })
        .await
        .unwrap();
    tx.rollback().await.unwrap();
    n
}

/// Helper to make JSON requests.
async fn json_request(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn bench_press() -> Value {
    json!({
        "name": "Bench Press",
        "type": "Reps",
        "muscles": [
            { "muscle_id": 1, "percentage": 70 },
            { "muscle_id": 6, "percentage": 30 }
        ]
    })
}

#[tokio::test]
async fn test_hello_and_reference_data() {
    let (router, _store) = setup().await;

    let (status, body) = json_request(&router, "GET", "/hello", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "hello");

    let (status, body) = json_request(&router, "GET", "/muscles", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let muscles: Vec<Value> = serde_json::from_value(body).unwrap();
    assert_eq!(muscles.len(), 11);

    assert_eq!(muscles[0]["region_name"], "Upper Body");
    assert!(muscles.iter().all(|m| m["exercise_areas"].as_array().is_some_and(|a| !a.is_empty())));

    let (_, body) = json_request(&router, "GET", "/exercise-types", None, None).await;
    assert_eq!(body, json!(["Reps", "Eccentric", "Isometric"]));
}

#[tokio::test]
async fn test_anatomy_hierarchy() {
    let (router, _store) = setup().await;

    let (status, regions) = json_request(&router, "GET", "/regions", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        regions.as_array().unwrap().iter().map(|r| r["name"].clone()).collect::<Vec<_>>(),
        vec![json!("Upper Body"), json!("Core"), json!("Lower Body")]
    );

    let (status, groups) = json_request(&router, "GET", "/muscle-groups", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let groups = groups.as_array().unwrap();
    assert_eq!(groups.len(), 7);
    let abs = groups.iter().find(|g| g["name"] == "Abdominals").unwrap();
    assert_eq!(abs["region_name"], "Core");

    let (status, areas) = json_request(&router, "GET", "/exercise-areas", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(areas.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_create_exercise_commits() {
    let (router, store) = setup().await;

    let (status, body) =
        json_request(&router, "POST", "/exercises", Some(bench_press()), Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Bench Press");
    assert_eq!(body["created_by"], "sub-admin");

    assert_eq!(count(&store, "exercise").await, 1);
    assert_eq!(count(&store, "exercise_muscle").await, 2);

    let id = body["id"].as_i64().unwrap();
    let (status, body) = json_request(&router, "GET", &format!("/exercises/{}", id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["muscles"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_duplicate_name_rolls_back() {
    let (router, store) = setup().await;
    json_request(&router, "POST", "/exercises", Some(bench_press()), Some(ADMIN_TOKEN)).await;

    let mut again = bench_press();
    again["name"] = json!("bench press");
    let (status, body) = json_request(&router, "POST", "/exercises", Some(again), Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "duplicate_name");
    assert_eq!(count(&store, "exercise").await, 1);
}

#[tokio::test]
async fn test_failure_after_insert_leaves_no_rows() {
    let (router, store) = setup().await;

    let input = json!({
        "name": "Mystery Lift",
        "type": "Reps",
        "muscles": [
            { "muscle_id": 1, "percentage": 50 },
            { "muscle_id": 999, "percentage": 50 }
        ]
    });
    let (status, body) = json_request(&router, "POST", "/exercises", Some(input), Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    assert_eq!(count(&store, "exercise").await, 0);
    assert_eq!(count(&store, "exercise_muscle").await, 0);
}

#[tokio::test]
async fn test_invalid_type() {
    let (router, _store) = setup().await;

    let mut input = bench_press();
    input["type"] = json!("Cardio");
    let (status, body) = json_request(&router, "POST", "/exercises", Some(input), Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_type");
}

#[tokio::test]
async fn test_admin_routes_guarded() {
    let (router, store) = setup().await;

    let (status, _) = json_request(&router, "POST", "/exercises", Some(bench_press()), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) =
        json_request(&router, "POST", "/exercises", Some(bench_press()), Some("not-a-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) =
        json_request(&router, "POST", "/exercises", Some(bench_press()), Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    assert_eq!(count(&store, "exercise").await, 0);
}

#[tokio::test]
async fn test_update_exercise() {
    let (router, _store) = setup().await;
    let (_, created) =
        json_request(&router, "POST", "/exercises", Some(bench_press()), Some(ADMIN_TOKEN)).await;
    let id = created["id"].as_i64().unwrap();

    let update = json!({
        "name": "Incline Bench Press",
        "type": "Reps",
        "muscles": [{ "muscle_id": 1, "percentage": 100 }]
    });
    let (status, body) =
        json_request(&router, "PUT", &format!("/exercises/{}", id), Some(update.clone()), Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);
    assert_eq!(body["muscles"].as_array().unwrap().len(), 1);

    let (status, _) = json_request(&router, "PUT", "/exercises/999", Some(update), Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_workouts_are_scoped_to_owner() {
    let (router, store) = setup().await;
    let (_, exercise) =
        json_request(&router, "POST", "/exercises", Some(bench_press()), Some(ADMIN_TOKEN)).await;

    let input = json!({ "name": "Push day", "exercises": [{ "exercise_id": exercise["id"] }] });
    let (status, created) = json_request(&router, "POST", "/workouts", Some(input), Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["exercises"][0]["exercise_name"], "Bench Press");
    let uri = format!("/workouts/{}", created["id"]);

    let (status, _) = json_request(&router, "GET", &uri, None, Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = json_request(&router, "GET", &uri, None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let rename = json!({ "name": "Hijacked" });
    let (status, _) = json_request(&router, "PUT", &uri, Some(rename), Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = json_request(&router, "DELETE", &uri, None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(count(&store, "workout").await, 1);

    let (status, body) = json_request(&router, "GET", "/workouts", None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) = json_request(&router, "GET", "/workouts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let bad = json!({ "name": "Ghost day", "exercises": [{ "exercise_id": 12345 }] });
    let (status, _) = json_request(&router, "POST", "/workouts", Some(bad), Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(count(&store, "workout").await, 1);
}

#[tokio::test]
async fn test_workout_lifecycle() {
    let (router, store) = setup().await;
    let (_, exercise) =
        json_request(&router, "POST", "/exercises", Some(bench_press()), Some(ADMIN_TOKEN)).await;
    let exercise_id = exercise["id"].clone();

    let input = json!({
        "name": "Upper A",
        "exercises": [{ "exercise_id": exercise_id, "sets": 3, "reps": 8 }]
    });
    let (_, created) = json_request(&router, "POST", "/workouts", Some(input), Some(USER_TOKEN)).await;
    let uri = format!("/workouts/{}", created["id"]);
    assert_eq!(created["exercises"][0]["position"], 0);
    assert_eq!(created["exercises"][0]["sets"], 3);

    let entries_uri = format!("{}/exercises", uri);
    let (status, added) = json_request(
        &router,
        "POST",
        &entries_uri,
        Some(json!({ "exercise_id": exercise_id, "time_seconds": 30 })),
        Some(USER_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(added["position"], 1);
    let entry_uri = format!("/workout-exercises/{}", added["id"]);

    let (status, entries) = json_request(&router, "GET", &entries_uri, None, Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entries.as_array().unwrap().len(), 2);

    let prescription = json!({ "sets": 4, "reps": 6, "weight": 80.5, "notes": "slow eccentric" });
    let (status, _) =
        json_request(&router, "PUT", &entry_uri, Some(prescription.clone()), Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = json_request(
        &router,
        "POST",
        &entries_uri,
        Some(json!({ "exercise_id": exercise_id })),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, updated) =
        json_request(&router, "PUT", &entry_uri, Some(prescription), Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["version"], 2);
    assert_eq!(updated["weight"], 80.5);
    assert_eq!(updated["time_seconds"], Value::Null);

    let negative = json!({ "reps": -5 });
    let (status, body) = json_request(&router, "PUT", &entry_uri, Some(negative), Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, renamed) =
        json_request(&router, "PUT", &uri, Some(json!({ "name": "Upper B" })), Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["name"], "Upper B");
    assert_eq!(renamed["version"], 2);

    let (status, _) = json_request(&router, "DELETE", &entry_uri, None, Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(count(&store, "workout_exercise").await, 1);

    let (status, _) = json_request(&router, "DELETE", &uri, None, Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(count(&store, "workout").await, 0);
    assert_eq!(count(&store, "workout_exercise").await, 0);

    let (status, _) = json_request(&router, "GET", &uri, None, Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

async fn raw_request(router: &Router, method: &str, uri: &str, body: &'static str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", ADMIN_TOKEN))
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_malformed_requests_are_invalid_input() {
    let (router, store) = setup().await;

    let (status, body) = raw_request(&router, "POST", "/exercises", "{ not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, body) = raw_request(&router, "POST", "/exercises", r#"{"name": 7}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, body) = json_request(&router, "GET", "/exercises/bench", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
    assert!(body["message"].is_string());

    assert_eq!(count(&store, "exercise").await, 0);
}

#[tokio::test]
async fn test_required_auth_rejects_anonymous() {
    let store = seeded_store().await;
    let router = create_router(AppState::new(store, &config(true)));

    let (status, body) = json_request(&router, "GET", "/hello", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = json_request(&router, "GET", "/hello", None, Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_identity_lookup_failure_fails_request() {
    let (router, store) = setup().await;
    let tx = store.begin().await.unwrap();
    tx.run(|conn| {
        conn.execute_batch("DROP TABLE user")?;
        Ok(())
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let (status, body) = json_request(&router, "GET", "/hello", None, Some(USER_TOKEN)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "storage_error");
    assert_eq!(body["message"], "internal server error");

    // Anonymous requests never look anything up
    let (status, _) = json_request(&router, "GET", "/hello", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let next = tokio::time::timeout(Duration::from_secs(2), store.begin())
        .await
        .expect("connection released")
        .unwrap();
    next.rollback().await.unwrap();
}

async fn insert_ghost_muscle(Executor(tx): Executor) {
    tx.run(|conn| {
        conn.execute(
            "INSERT INTO muscle (name, muscle_group_id) VALUES ('Ghost', 1)",
            [],
        )?;
        Ok(())
    })
    .await
    .unwrap();
}

async fn write_then_panic(executor: Executor) -> StatusCode {
    insert_ghost_muscle(executor).await;
    panic!("handler blew up");
}

async fn write_then_abort(executor: Executor) -> (Extension<AbortTransaction>, StatusCode) {
    insert_ghost_muscle(executor).await;
    (Extension(AbortTransaction), StatusCode::OK)
}

async fn write_and_succeed(executor: Executor) -> StatusCode {
    insert_ghost_muscle(executor).await;
    StatusCode::NO_CONTENT
}

fn coordinator_router(state: AppState) -> Router {
    Router::new()
        .route("/panic", post(write_then_panic))
        .route("/abort", post(write_then_abort))
        .route("/ok", post(write_and_succeed))
        .layer(middleware::from_fn_with_state(state.clone(), transaction::transaction))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

async fn muscle_names(store: &SqliteStore) -> Vec<String> {
    let tx = store.begin().await.unwrap();
    let muscles: Vec<Muscle> = barbell::catalog::muscle::list(&tx).await.unwrap();
    tx.rollback().await.unwrap();
    muscles.into_iter().map(|m| m.name).collect()
}

#[tokio::test]
async fn test_panic_rolls_back() {
    let store = seeded_store().await;
    let router = coordinator_router(AppState::new(store.clone(), &config(false)));

    let (status, _) = json_request(&router, "POST", "/panic", None, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!muscle_names(&store).await.contains(&"Ghost".to_string()));
}

#[tokio::test]
async fn test_abort_marker_rolls_back() {
    let store = seeded_store().await;
    let router = coordinator_router(AppState::new(store.clone(), &config(false)));

    let (status, _) = json_request(&router, "POST", "/abort", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!muscle_names(&store).await.contains(&"Ghost".to_string()));

    let (status, _) = json_request(&router, "POST", "/ok", None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(muscle_names(&store).await.contains(&"Ghost".to_string()));
}

#[tokio::test]
async fn test_executor_without_transaction_layer() {
    let store = seeded_store().await;
    let router = Router::new()
        .route("/ok", post(write_and_succeed))
        .with_state(AppState::new(store, &config(false)));

    let (status, body) = json_request(&router, "POST", "/ok", None, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "transaction_required");
}

#[tokio::test]
async fn test_concurrent_requests_all_commit() {
    let (router, store) = setup().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            let input = json!({
                "name": format!("Row variation {}", i),
                "type": "Reps",
                "muscles": [{ "muscle_id": 2, "percentage": 100 }]
            });
            json_request(&router, "POST", "/exercises", Some(input), Some(ADMIN_TOKEN)).await.0
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::CREATED);
    }
    assert_eq!(count(&store, "exercise").await, 8);
}

async fn write_then_stall(executor: Executor) -> StatusCode {
    insert_ghost_muscle(executor).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    StatusCode::NO_CONTENT
}

#[tokio::test]
async fn test_timeout_rolls_back_and_releases() {
    let store = seeded_store().await;
    let state = AppState::new(store.clone(), &config(false));
    let router = Router::new()
        .route("/stall", post(write_then_stall))
        .layer(middleware::from_fn_with_state(state.clone(), transaction::transaction))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_millis(100),
        ))
        .with_state(state);

    let (status, _) = json_request(&router, "POST", "/stall", None, None).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

    let next = tokio::time::timeout(Duration::from_secs(2), store.begin())
        .await
        .expect("connection released after timeout")
        .unwrap();
    next.rollback().await.unwrap();
    assert!(!muscle_names(&store).await.contains(&"Ghost".to_string()));
}

async fn insert_orphan_child(Executor(tx): Executor) -> StatusCode {
    tx.run(|conn| {
        conn.execute("INSERT INTO child (id, parent_id) VALUES (1, 99)", [])?;
        Ok(())
    })
    .await
    .unwrap();
    StatusCode::NO_CONTENT
}

#[tokio::test]
async fn test_commit_failure_replaces_success() {
    let source = StaticSource::new().with(
        "1_deferred",
        "CREATE TABLE parent (id INTEGER PRIMARY KEY);
         CREATE TABLE child (
             id INTEGER PRIMARY KEY,
             parent_id INTEGER NOT NULL REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
         );",
    );
    let store = SqliteStore::open_in_memory(&source).unwrap();
    let state = AppState::new(store.clone(), &config(false));
    let router = Router::new()
        .route("/orphan", post(insert_orphan_child))
        .layer(middleware::from_fn_with_state(state.clone(), transaction::transaction))
        .with_state(state);

    let (status, body) = json_request(&router, "POST", "/orphan", None, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "commit_failed");
    assert_eq!(count(&store, "child").await, 0);
}
