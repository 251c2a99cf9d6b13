use axum::{
    Router,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{Next, from_fn},
    response::{Json, Response},
    routing::{get, post},
};
use case_flow::{
    AttemptArchive, CaseFlowError, CasePipeline, CoverageReport, EvaluationOracle,
    FileCaseRepository, FileSessionStore, InMemoryAttemptArchive, InMemorySessionStore,
    PostgresAttemptArchive, PostgresSessionStore, RigOracle, SessionKey, SessionManager,
    SessionStore,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::{ServiceConfig, SessionBackend},
    models::{
        ClinicalFindingRequest, CoverageRequest, DiagnosisRequest, FinalDiagnosisRequest,
        FinalizeRequest, FinalizedResponse, HistoryExchangeRequest, MonitoringRequest,
        OsceRequest, SessionResponse, TestOrderRequest, TreatmentRequest,
    },
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn conflict_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn bad_gateway_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn pipeline_error(err: CaseFlowError) -> ApiError {
    let details = err.to_string();
    match err {
        CaseFlowError::SessionNotFound(_) => not_found_error("Session not found", &details),
        CaseFlowError::CaseNotFound(_) => not_found_error("Case not found", &details),
        CaseFlowError::PrerequisiteMissing { .. } | CaseFlowError::MissingInteraction(_) => {
            conflict_error("Stage prerequisites not met", &details)
        }
        CaseFlowError::VersionConflict { .. } => {
            conflict_error("Session was modified concurrently", &details)
        }
        CaseFlowError::OracleMalformed { .. } | CaseFlowError::Oracle(_) => {
            error!(error = %details, "evaluation oracle failed");
            bad_gateway_error("Evaluation oracle failed", &details)
        }
        _ => {
            error!(error = %details, "pipeline operation failed");
            internal_error("Pipeline operation failed", &details)
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| internal_error("Failed to serialize response", &e.to_string()))
}

fn require_text(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(bad_request_error(&format!("{field} is required")));
    }
    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: CasePipeline,
    pub default_department: String,
}

impl AppState {
    pub fn new(pipeline: CasePipeline, default_department: impl Into<String>) -> Self {
        Self {
            pipeline,
            default_department: default_department.into(),
        }
    }
}

pub async fn create_app(config: &ServiceConfig) -> anyhow::Result<Router> {
    let app_state = create_app_state(config).await?;
    Ok(build_router(app_state))
}

async fn create_app_state(config: &ServiceConfig) -> anyhow::Result<AppState> {
    let store = create_session_store(config).await?;
    let archive = create_attempt_archive(config).await?;
    let oracle: Arc<dyn EvaluationOracle> = Arc::new(RigOracle::from_env()?);
    let cases = Arc::new(FileCaseRepository::new(&config.cases_dir));
    info!(cases_dir = %config.cases_dir.display(), "loading case content from disk");

    let sessions = SessionManager::new(store).with_max_retries(config.recorder_max_retries);
    let pipeline = CasePipeline::with_sessions(sessions, cases, oracle, archive);
    Ok(AppState::new(pipeline, config.default_department.clone()))
}

async fn create_session_store(config: &ServiceConfig) -> anyhow::Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match config.session_backend {
        SessionBackend::Memory => {
            info!("Using in-memory session storage");
            Arc::new(InMemorySessionStore::new())
        }
        SessionBackend::File => {
            info!(dir = %config.session_dir.display(), "Using file session storage");
            Arc::new(FileSessionStore::new(&config.session_dir).await?)
        }
        SessionBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for postgres sessions"))?;
            info!("Using PostgreSQL session storage");
            Arc::new(PostgresSessionStore::connect(url).await?)
        }
    };
    Ok(store)
}

async fn create_attempt_archive(
    config: &ServiceConfig,
) -> anyhow::Result<Arc<dyn AttemptArchive>> {
    match config.database_url.as_deref() {
        Some(url) => {
            info!("Using PostgreSQL attempt archive");
            Ok(Arc::new(PostgresAttemptArchive::connect(url).await?))
        }
        None => {
            warn!("DATABASE_URL not set, finalized attempts are kept in memory only");
            Ok(Arc::new(InMemoryAttemptArchive::new()))
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route(
            "/sessions/{student_id}/{case_id}",
            get(get_session).post(create_or_load_session),
        )
        .route("/sessions/{student_id}/{case_id}/reset", post(reset_session))
        .route("/sessions/{student_id}/{case_id}/history", post(record_history))
        .route("/sessions/{student_id}/{case_id}/coverage", post(track_coverage))
        .route("/sessions/{student_id}/{case_id}/tests", post(order_test))
        .route("/sessions/{student_id}/{case_id}/findings", post(record_finding))
        .route("/sessions/{student_id}/{case_id}/diagnosis", post(submit_diagnosis))
        .route(
            "/sessions/{student_id}/{case_id}/final-diagnosis",
            post(submit_final_diagnosis),
        )
        .route("/sessions/{student_id}/{case_id}/treatment", post(submit_treatment))
        .route("/sessions/{student_id}/{case_id}/monitoring", post(submit_monitoring))
        .route(
            "/sessions/{student_id}/{case_id}/feedback/history/analysis",
            post(history_analysis),
        )
        .route(
            "/sessions/{student_id}/{case_id}/feedback/history/domains",
            post(history_domains),
        )
        .route(
            "/sessions/{student_id}/{case_id}/feedback/diagnosis",
            post(diagnosis_feedback),
        )
        .route(
            "/sessions/{student_id}/{case_id}/feedback/treatment",
            post(treatment_feedback),
        )
        .route("/sessions/{student_id}/{case_id}/osce", post(submit_osce))
        .route("/sessions/{student_id}/{case_id}/finalize", post(finalize_attempt))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }
    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Clinical Case Simulation Service",
        "version": "1.0.0",
        "description": "Session tracking and oracle-backed assessment for simulated clinical cases",
        "endpoints": {
            "POST /sessions/{student_id}/{case_id}": "Create or load an attempt",
            "GET /sessions/{student_id}/{case_id}": "Get the current session",
            "POST /sessions/{student_id}/{case_id}/reset": "Start the attempt over",
            "POST /sessions/{student_id}/{case_id}/history": "Record a question/response exchange",
            "POST /sessions/{student_id}/{case_id}/coverage": "Track expected question coverage",
            "POST /sessions/{student_id}/{case_id}/tests": "Order a physical exam or lab test",
            "POST /sessions/{student_id}/{case_id}/diagnosis": "Submit the working diagnosis",
            "POST /sessions/{student_id}/{case_id}/treatment": "Submit the treatment plan",
            "POST /sessions/{student_id}/{case_id}/feedback/...": "Run a feedback stage",
            "POST /sessions/{student_id}/{case_id}/osce": "Score OSCE answers and finalize",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

fn session_key(student_id: String, case_id: String) -> Result<SessionKey, ApiError> {
    require_text("student_id", &student_id)?;
    require_text("case_id", &case_id)?;
    Ok(SessionKey::new(student_id, case_id))
}

async fn create_or_load_session(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
) -> ApiResult<SessionResponse> {
    let key = session_key(student_id, case_id)?;
    let session = state
        .pipeline
        .sessions
        .create_or_load(&key)
        .await
        .map_err(pipeline_error)?;
    Ok(Json(session.into()))
}

async fn get_session(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
) -> ApiResult<SessionResponse> {
    let key = session_key(student_id, case_id)?;
    let session = state
        .pipeline
        .sessions
        .require(&key)
        .await
        .map_err(pipeline_error)?;
    Ok(Json(session.into()))
}

async fn reset_session(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
) -> ApiResult<SessionResponse> {
    let key = session_key(student_id, case_id)?;
    info!(student_id = %key.student_id, case_id = %key.case_id, "resetting attempt");
    let session = state
        .pipeline
        .sessions
        .reset(&key)
        .await
        .map_err(pipeline_error)?;
    Ok(Json(session.into()))
}

async fn record_history(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
    Json(request): Json<HistoryExchangeRequest>,
) -> ApiResult<SessionResponse> {
    let key = session_key(student_id, case_id)?;
    require_text("question", &request.question)?;
    let session = state
        .pipeline
        .sessions
        .record_history_exchange(&key, &request.question, &request.response)
        .await
        .map_err(pipeline_error)?;
    Ok(Json(session.into()))
}

async fn track_coverage(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
    Json(request): Json<CoverageRequest>,
) -> ApiResult<CoverageReport> {
    let key = session_key(student_id, case_id)?;
    let coverage = &state.pipeline.coverage;
    let report = match request.question.as_deref() {
        Some(question) => {
            require_text("question", question)?;
            let response = request.response.as_deref().unwrap_or_default();
            coverage
                .track_exchange(&key.case_id, &request.uncovered, question, response)
                .await
        }
        None => coverage.track_session(&key, &request.uncovered).await,
    }
    .map_err(pipeline_error)?;
    Ok(Json(report))
}

async fn order_test(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
    Json(request): Json<TestOrderRequest>,
) -> ApiResult<Value> {
    let key = session_key(student_id, case_id)?;
    require_text("test_name", &request.test_name)?;
    let resolution = state
        .pipeline
        .resolver
        .resolve(&key, request.category, &request.test_name)
        .await
        .map_err(pipeline_error)?;
    to_json(&resolution)
}

async fn record_finding(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
    Json(request): Json<ClinicalFindingRequest>,
) -> ApiResult<SessionResponse> {
    let key = session_key(student_id, case_id)?;
    require_text("finding", &request.finding)?;
    let session = state
        .pipeline
        .sessions
        .record_clinical_finding(&key, &request.finding)
        .await
        .map_err(pipeline_error)?;
    Ok(Json(session.into()))
}

async fn submit_diagnosis(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
    Json(request): Json<DiagnosisRequest>,
) -> ApiResult<SessionResponse> {
    let key = session_key(student_id, case_id)?;
    require_text("primary_diagnosis", &request.primary_diagnosis)?;
    let session = state
        .pipeline
        .sessions
        .record_diagnosis_submission(
            &key,
            &request.primary_diagnosis,
            &request.reason,
            &request.differentials,
        )
        .await
        .map_err(pipeline_error)?;
    Ok(Json(session.into()))
}

async fn submit_final_diagnosis(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
    Json(request): Json<FinalDiagnosisRequest>,
) -> ApiResult<SessionResponse> {
    let key = session_key(student_id, case_id)?;
    require_text("final_diagnosis", &request.final_diagnosis)?;
    let session = state
        .pipeline
        .sessions
        .record_final_diagnosis(&key, &request.final_diagnosis, &request.final_reason)
        .await
        .map_err(pipeline_error)?;
    Ok(Json(session.into()))
}

async fn submit_treatment(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
    Json(request): Json<TreatmentRequest>,
) -> ApiResult<SessionResponse> {
    let key = session_key(student_id, case_id)?;
    let session = state
        .pipeline
        .sessions
        .record_treatment_plan(&key, &request.treatment_steps)
        .await
        .map_err(pipeline_error)?;
    Ok(Json(session.into()))
}

async fn submit_monitoring(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
    Json(request): Json<MonitoringRequest>,
) -> ApiResult<SessionResponse> {
    let key = session_key(student_id, case_id)?;
    let session = state
        .pipeline
        .sessions
        .record_monitoring_plan(
            &key,
            &request.pre_treatment_checks,
            &request.post_treatment_monitoring,
        )
        .await
        .map_err(pipeline_error)?;
    Ok(Json(session.into()))
}

async fn history_analysis(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
) -> ApiResult<Value> {
    let key = session_key(student_id, case_id)?;
    let analysis = state
        .pipeline
        .feedback
        .analyze_history(&key)
        .await
        .map_err(pipeline_error)?;
    to_json(&analysis)
}

async fn history_domains(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
) -> ApiResult<Value> {
    let key = session_key(student_id, case_id)?;
    let synthesis = state
        .pipeline
        .feedback
        .synthesize_history_domains(&key)
        .await
        .map_err(pipeline_error)?;
    to_json(&synthesis)
}

async fn diagnosis_feedback(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
) -> ApiResult<Value> {
    let key = session_key(student_id, case_id)?;
    let feedback = state
        .pipeline
        .feedback
        .evaluate_diagnosis(&key)
        .await
        .map_err(pipeline_error)?;
    to_json(&feedback)
}

async fn treatment_feedback(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
) -> ApiResult<Value> {
    let key = session_key(student_id, case_id)?;
    let feedback = state
        .pipeline
        .feedback
        .evaluate_treatment(&key)
        .await
        .map_err(pipeline_error)?;
    to_json(&feedback)
}

async fn submit_osce(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
    Json(request): Json<OsceRequest>,
) -> ApiResult<FinalizedResponse> {
    let key = session_key(student_id, case_id)?;
    if request.answers.is_empty() {
        return Err(bad_request_error("At least one OSCE answer is required"));
    }
    state
        .pipeline
        .feedback
        .score_osce(&key, &request.answers)
        .await
        .map_err(pipeline_error)?;

    let department = request
        .department
        .unwrap_or_else(|| state.default_department.clone());
    finalize(&state, &key, &department).await
}

async fn finalize_attempt(
    State(state): State<AppState>,
    Path((student_id, case_id)): Path<(String, String)>,
    request: Option<Json<FinalizeRequest>>,
) -> ApiResult<FinalizedResponse> {
    let key = session_key(student_id, case_id)?;
    let department = request
        .and_then(|Json(request)| request.department)
        .unwrap_or_else(|| state.default_department.clone());
    finalize(&state, &key, &department).await
}

async fn finalize(
    state: &AppState,
    key: &SessionKey,
    department: &str,
) -> ApiResult<FinalizedResponse> {
    let record = state
        .pipeline
        .finalize(key, department)
        .await
        .map_err(pipeline_error)?;
    info!(
        attempt_id = %record.id,
        student_id = %key.student_id,
        case_id = %key.case_id,
        "attempt finalized"
    );
    Ok(Json(record.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::Request as HttpRequest,
    };
    use case_flow::{
        CaseContent, CaseContext, ExpectedQuestion, ScriptedOracle, StaticCaseRepository,
    };
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        oracle: Arc<ScriptedOracle>,
        archive: Arc<InMemoryAttemptArchive>,
    }

    fn test_app() -> TestApp {
        let case = CaseContent {
            case_id: "sle-01".into(),
            physical_exams: vec!["Skin inspection".into()],
            lab_tests: vec!["CBC".into(), "ANA".into()],
            expected_questions: vec![ExpectedQuestion::new("fever duration?", "HPI")],
            context: CaseContext {
                history_context: json!({"chief_complaint": "fever"}),
                diagnosis_context: json!({"diagnosis": "SLE"}),
                treatment_context: json!({"first_line": "hydroxychloroquine"}),
            },
        };
        let oracle = Arc::new(ScriptedOracle::new());
        let archive = Arc::new(InMemoryAttemptArchive::new());
        let pipeline = CasePipeline::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(StaticCaseRepository::new().with_case(case)),
            oracle.clone(),
            archive.clone(),
        );
        TestApp {
            router: build_router(AppState::new(pipeline, "Rheumatology")),
            oracle,
            archive,
        }
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let app = test_app();
        let (status, body) = call(&app.router, "GET", "/health", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let app = test_app();
        let (status, _) = call(&app.router, "GET", "/sessions/s1/sle-01", Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn history_is_recorded_on_the_session() {
        let app = test_app();
        let (status, _) = call(&app.router, "POST", "/sessions/s1/sle-01", Value::Null).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app.router,
            "POST",
            "/sessions/s1/sle-01/history",
            json!({"question": "How long?", "response": "Five days."}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_key"], "s1::sle-01");
        assert_eq!(body["current_step"], "history_taking");
        assert_eq!(body["session"]["interactions"]["history_taking"][0]["response"], "Five days.");
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let app = test_app();
        let (status, _) = call(
            &app.router,
            "POST",
            "/sessions/s1/sle-01/history",
            json!({"question": "  ", "response": ""}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn domain_feedback_before_analysis_is_conflict() {
        let app = test_app();
        call(&app.router, "POST", "/sessions/s1/sle-01", Value::Null).await;
        let (status, _) = call(
            &app.router,
            "POST",
            "/sessions/s1/sle-01/feedback/history/domains",
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(app.oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_treatment_feedback_is_bad_gateway() {
        let app = test_app();
        call(
            &app.router,
            "POST",
            "/sessions/s1/sle-01/treatment",
            json!({"treatment_steps": ["hydroxychloroquine"]}),
        )
        .await;
        app.oracle.push_reply("definitely not json");
        let (status, _) = call(
            &app.router,
            "POST",
            "/sessions/s1/sle-01/feedback/treatment",
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn finalize_accepts_a_bare_post() {
        let app = test_app();
        call(&app.router, "POST", "/sessions/s1/sle-01", Value::Null).await;

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/sessions/s1/sle-01/finalize")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let attempt_id: Uuid = serde_json::from_value(body["attempt_id"].clone()).unwrap();
        assert_eq!(app.archive.get(&attempt_id).unwrap().department, "Rheumatology");
    }

    #[tokio::test]
    async fn osce_scores_and_finalizes() {
        let app = test_app();
        call(&app.router, "POST", "/sessions/s1/sle-01", Value::Null).await;
        app.oracle.push_reply(
            r#"{"total_score": 1, "max_score": 2, "questions": [{"question": "Key antibody?", "score": 1, "max_score": 2}]}"#,
        );

        let (status, body) = call(
            &app.router,
            "POST",
            "/sessions/s1/sle-01/osce",
            json!({"answers": [{"question": "Key antibody?", "answer": "ANA"}]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["osce_summary"]["total_score"], 1.0);
        assert_eq!(app.archive.len(), 1);
    }
}
