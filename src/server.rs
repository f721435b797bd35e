//! HTTP registration endpoint
//!
//! `POST /register` accepts a job description whose `dag` field is a
//! base64-encoded snapshot produced by
//! [`Pipeline::dump_bytes`](crate::pipeline::Pipeline::dump_bytes). The
//! payload is structurally validated and written under the dags directory,
//! named after the registration, where the periodic trigger picks it up.

use crate::error::{LoomError, Result};
use crate::persist::DagSnapshot;
use crate::settings::EnginePaths;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub const MAX_JOB_NAME_LEN: usize = 64;

/// Shared state of the registration service.
#[derive(Debug, Clone)]
pub struct AppState {
    pub paths: EnginePaths,
}

/// A pipeline registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub trigger: String,
    pub minutes: u64,
    pub max_instances: u32,
    pub executor: String,
    pub jobstore: String,
    pub replace_existing: bool,
    /// base64-encoded DAG snapshot
    pub dag: String,
}

#[derive(Serialize)]
struct JobRecord<'a> {
    name: &'a str,
    trigger: &'a str,
    minutes: u64,
    max_instances: u32,
    executor: &'a str,
    jobstore: &'a str,
    registered_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct Greeting {
    message: &'static str,
    version: &'static str,
}

/// Validate a registration name before it becomes a file name.
pub fn validate_job_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() > MAX_JOB_NAME_LEN
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(LoomError::InvalidJobName(name.to_string()));
    }
    Ok(())
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/register", post(register))
        .with_state(state)
}

async fn root() -> Json<Greeting> {
    Json(Greeting {
        message: "taskloom registration service",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(job): Json<Job>,
) -> core::result::Result<StatusCode, (StatusCode, String)> {
    if let Err(err) = validate_job_name(&job.name) {
        warn!("rejected registration: {}", err);
        return Err((StatusCode::UNPROCESSABLE_ENTITY, err.to_string()));
    }

    let bytes = BASE64.decode(job.dag.as_bytes()).map_err(|err| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("dag payload is not valid base64: {}", err),
        )
    })?;

    // structural check only; callables are re-bound by the trigger
    DagSnapshot::decode(&bytes).map_err(|err| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("dag payload is not a valid snapshot: {}", err),
        )
    })?;

    let target = state.paths.dags_dir.join(&job.name);
    if target.exists() && !job.replace_existing {
        return Err((
            StatusCode::CONFLICT,
            format!("pipeline '{}' is already registered", job.name),
        ));
    }

    fs::write(&target, &bytes).map_err(|err| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to persist dag: {}", err),
        )
    })?;

    let record = JobRecord {
        name: &job.name,
        trigger: &job.trigger,
        minutes: job.minutes,
        max_instances: job.max_instances,
        executor: &job.executor,
        jobstore: &job.jobstore,
        registered_at: Utc::now(),
    };
    let record_path = state.paths.jobs_dir.join(format!("{}.json", job.name));
    if let Err(err) = fs::write(
        &record_path,
        serde_json::to_vec_pretty(&record).unwrap_or_default(),
    ) {
        warn!("failed to write job record {:?}: {}", record_path, err);
    }

    info!("registered pipeline '{}' at {:?}", job.name, target);
    Ok(StatusCode::OK)
}

/// Bind and serve the registration API.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    state.paths.ensure()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("registration service listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityDef;
    use crate::pipeline::Pipeline;
    use crate::task::{TaskRegistry, TaskSpec};
    use crate::types::TypeTag;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::json;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state(temp_dir: &TempDir) -> Arc<AppState> {
        let paths = EnginePaths {
            dags_dir: temp_dir.path().join(".dags"),
            jobs_dir: temp_dir.path().join(".jobs"),
            config_dir: temp_dir.path().join(".config"),
        };
        paths.ensure().unwrap();
        Arc::new(AppState { paths })
    }

    fn snapshot_payload() -> String {
        let mut registry = TaskRegistry::new();
        registry.register("emit", vec![], Some(TypeTag::named("int")), |_, _| {
            Ok(json!(1))
        });
        let spec = TaskSpec::new(&registry, "emit").unwrap();
        let mut pipeline = Pipeline::sequential([ActivityDef::new(spec).named("emit").into()]);
        pipeline.compose().unwrap();
        BASE64.encode(pipeline.dump_bytes().unwrap())
    }

    fn job_body(name: &str, replace: bool, dag: String) -> String {
        serde_json::to_string(&Job {
            name: name.to_string(),
            trigger: "interval".to_string(),
            minutes: 5,
            max_instances: 1,
            executor: "default".to_string(),
            jobstore: "default".to_string(),
            replace_existing: replace,
            dag,
        })
        .unwrap()
    }

    async fn post_register(state: Arc<AppState>, body: String) -> StatusCode {
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        response.status()
    }

    #[test]
    fn test_validate_job_name() {
        validate_job_name("daily_load-v2").unwrap();
        assert!(validate_job_name("").is_err());
        assert!(validate_job_name("../escape").is_err());
        assert!(validate_job_name("has space").is_err());
        assert!(validate_job_name(&"x".repeat(MAX_JOB_NAME_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn test_root_greeting() {
        let temp_dir = TempDir::new().unwrap();
        let response = router(state(&temp_dir))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let greeting: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(greeting["message"], "taskloom registration service");
    }

    #[tokio::test]
    async fn test_register_accepts_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        let status = post_register(state.clone(), job_body("etl", false, snapshot_payload())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.paths.dags_dir.join("etl").is_file());
        assert!(state.paths.jobs_dir.join("etl.json").is_file());
    }

    #[tokio::test]
    async fn test_register_conflict_without_replace() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        let dag = snapshot_payload();
        assert_eq!(
            post_register(state.clone(), job_body("etl", false, dag.clone())).await,
            StatusCode::OK
        );
        assert_eq!(
            post_register(state.clone(), job_body("etl", false, dag.clone())).await,
            StatusCode::CONFLICT
        );
        assert_eq!(
            post_register(state, job_body("etl", true, dag)).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_register_rejects_bad_payloads() {
        let temp_dir = TempDir::new().unwrap();
        let state = state(&temp_dir);
        assert_eq!(
            post_register(state.clone(), job_body("../escape", false, snapshot_payload())).await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            post_register(state.clone(), job_body("etl", false, "%%%".to_string())).await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        let garbage = BASE64.encode(b"not a snapshot");
        assert_eq!(
            post_register(state, job_body("etl", false, garbage)).await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
