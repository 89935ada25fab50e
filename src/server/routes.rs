//! REST and SSE handlers.
//!
//! Typed engine errors map onto HTTP statuses: validation 400, conflict 409,
//! not found 404, LLM auth 401, LLM quota 403, other LLM failures 502, store
//! failures 500.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::summary::generate_summary;
use crate::error::EngineError;
use crate::llm::LlmError;
use crate::runner::RunOptions;

use super::AppState;

pub(crate) type ApiError = (StatusCode, Json<Value>);

/// Map a typed engine error to its HTTP representation.
pub(crate) fn error_response(error: EngineError) -> ApiError {
    let status = match &error {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Llm(LlmError::Auth { .. }) => StatusCode::UNAUTHORIZED,
        EngineError::Llm(LlmError::Quota { .. }) => StatusCode::FORBIDDEN,
        EngineError::Llm(_) => StatusCode::BAD_GATEWAY,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() })))
}

/// Body of the run endpoints.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub rounds: Option<u32>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

impl RunRequest {
    pub(crate) fn into_options(self) -> RunOptions {
        RunOptions {
            rounds: self.rounds.unwrap_or(1),
            topic: self.topic,
            locale: self.locale,
        }
    }
}

/// GET /health — liveness probe.
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "virtlab",
    }))
}

/// POST /meetings/{id}/run — synchronous run; returns the meeting with all
/// of its messages once the requested rounds finish.
pub async fn run_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RunRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .runner
        .run_to_completion(&id, request.into_options())
        .await
        .map_err(error_response)?;

    let meeting = state
        .store
        .get_meeting(&id)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(EngineError::not_found(format!("meeting {id}"))))?;
    let messages = state
        .store
        .list_messages(&id)
        .await
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(json!({ "meeting": meeting, "messages": messages })))
}

/// POST /meetings/{id}/run-background — spawn a worker; 409 when one is
/// already in flight.
pub async fn run_background_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RunRequest>,
) -> Result<Json<Value>, ApiError> {
    let options = request.into_options();
    let rounds = options.rounds;
    let started = state
        .runner
        .start_background(&id, options)
        .await
        .map_err(error_response)?;
    if !started {
        return Err(error_response(EngineError::Conflict(id)));
    }
    Ok(Json(json!({
        "meeting_id": id,
        "status": "started",
        "rounds": rounds,
    })))
}

/// POST /meetings/{id}/stop — ask the worker to stop at the next turn
/// boundary. The meeting ends up `pending`, restartable.
pub async fn stop_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cancelling = state.runner.request_cancel(&id);
    Ok(Json(json!({ "meeting_id": id, "cancelling": cancelling })))
}

/// GET /meetings/{id}/status — poll run progress.
pub async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let meeting = state
        .store
        .get_meeting(&id)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(EngineError::not_found(format!("meeting {id}"))))?;
    let message_count = state
        .store
        .count_messages(&id)
        .await
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(json!({
        "meeting_id": meeting.id,
        "status": meeting.status,
        "current_round": meeting.current_round,
        "max_rounds": meeting.max_rounds,
        "message_count": message_count,
        "background_running": state.runner.is_running(&id),
    })))
}

/// GET /meetings/{id}/stream — SSE feed of bus events, one event per frame,
/// `event:` carrying the type and `data:` the JSON body.
pub async fn stream_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.bus.subscribe(&id).await;
    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        let frame = Event::default().event(event.event_type()).data(data);
        Some((Ok::<_, Infallible>(frame), subscription))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /meetings/{id}/summary — heuristic or LLM-backed meeting summary.
pub async fn summary_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let meeting = state
        .store
        .get_meeting(&id)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(EngineError::not_found(format!("meeting {id}"))))?;
    let messages = state
        .store
        .list_messages(&id)
        .await
        .map_err(|e| error_response(e.into()))?;

    let summary = generate_summary(&meeting, &messages, Some(state.llm.clone())).await;
    Ok(Json(json!({
        "meeting_id": meeting.id,
        "summary": summary.summary_text,
        "key_points": summary.key_points,
    })))
}

/// Body of the agenda proposal endpoint.
#[derive(Debug, Deserialize)]
pub struct ProposeAgendaRequest {
    pub topic: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// POST /meetings/{id}/propose-agenda — draft an agenda with the LLM
/// (`ai_auto` strategy) and apply it to the meeting. `suggested_rounds`
/// becomes the meeting's `max_rounds`.
pub async fn propose_agenda_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ProposeAgendaRequest>,
) -> Result<Json<Value>, ApiError> {
    let meeting = state
        .store
        .get_meeting(&id)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(EngineError::not_found(format!("meeting {id}"))))?;
    let agents = state
        .store
        .list_team_agents(&meeting.team_id, false)
        .await
        .map_err(|e| error_response(e.into()))?;
    if agents.is_empty() {
        return Err(error_response(EngineError::validation("no agents in team")));
    }

    let model = request.model.as_deref().unwrap_or("gpt-4o-mini");
    let proposal =
        crate::engine::agenda::propose_agenda(state.llm.clone(), &agents, &request.topic, model)
            .await
            .map_err(error_response)?;

    state
        .store
        .update_meeting_agenda(
            &id,
            &proposal.agenda,
            &proposal.questions,
            &proposal.rules,
            proposal.suggested_rounds,
        )
        .await
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(json!({
        "meeting_id": id,
        "agenda": proposal.agenda,
        "questions": proposal.questions,
        "rules": proposal.rules,
        "suggested_rounds": proposal.suggested_rounds,
    })))
}

/// GET /meetings/{id}/artifacts — list extracted artifacts.
pub async fn list_artifacts_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let artifacts = state
        .store
        .list_artifacts(&id)
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(json!({ "artifacts": artifacts })))
}

/// POST /meetings/{id}/extract-artifacts — run the deterministic extractor
/// over the current transcript.
pub async fn extract_artifacts_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .store
        .get_meeting(&id)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(EngineError::not_found(format!("meeting {id}"))))?;

    state.runner.auto_extract_artifacts(&id).await;
    let artifacts = state
        .store
        .list_artifacts(&id)
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(json!({ "artifacts": artifacts })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::in_memory::InMemoryBus;
    use crate::config::Settings;
    use crate::llm::testing::ScriptedLlm;
    use crate::models::{Agent, Meeting, MeetingStatus, OutputType, Team};
    use crate::runner::BackgroundRunner;
    use crate::server::{app_router, AppState};
    use crate::store::sqlite::SqliteStore;
    use crate::store::MeetingStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        _dir: tempfile::TempDir,
        state: AppState,
        team: Team,
    }

    async fn test_app(llm: Arc<ScriptedLlm>) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("api.db")).unwrap());
        let bus = Arc::new(InMemoryBus::new());
        let runner = BackgroundRunner::new(store.clone(), bus.clone(), llm.clone());
        let state = AppState::new(store.clone(), bus, runner, llm, Settings::default());

        let team = Team::new("Lab");
        store.create_team(&team).await.unwrap();
        TestApp { _dir: dir, state, team }
    }

    impl TestApp {
        fn router(&self) -> axum::Router {
            app_router(self.state.clone())
        }

        async fn add_agent(&self, name: &str, title: &str) {
            let agent = Agent::new(&self.team.id, name, title, "", "", "", "gpt-4o");
            self.state.store.create_agent(&agent).await.unwrap();
        }

        async fn add_meeting(&self, configure: impl FnOnce(&mut Meeting)) -> Meeting {
            let mut meeting = Meeting::new(&self.team.id, "Meeting");
            configure(&mut meeting);
            self.state.store.create_meeting(&meeting).await.unwrap();
            meeting
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_service() {
        let app = test_app(ScriptedLlm::counting()).await;
        let response = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "virtlab");
        assert_eq!(json["version"], crate::VERSION);
    }

    #[tokio::test]
    async fn status_endpoint_reports_progress() {
        let app = test_app(ScriptedLlm::counting()).await;
        app.add_agent("Lead", "Team Lead").await;
        let meeting = app
            .add_meeting(|m| {
                m.max_rounds = 3;
                m.current_round = 1;
            })
            .await;

        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri(format!("/meetings/{}/status", meeting.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["meeting_id"], meeting.id.as_str());
        assert_eq!(json["status"], "pending");
        assert_eq!(json["current_round"], 1);
        assert_eq!(json["max_rounds"], 3);
        assert_eq!(json["message_count"], 0);
        assert_eq!(json["background_running"], false);
    }

    #[tokio::test]
    async fn status_unknown_meeting_is_404() {
        let app = test_app(ScriptedLlm::counting()).await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri("/meetings/nope/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sync_run_returns_meeting_with_messages() {
        let app = test_app(ScriptedLlm::counting()).await;
        app.add_agent("Lead", "Team Lead").await;
        app.add_agent("Engineer", "Software Engineer").await;
        let meeting = app
            .add_meeting(|m| {
                m.agenda = "Build a parser".to_string();
                m.output_type = OutputType::Code;
                m.max_rounds = 1;
            })
            .await;

        let response = app
            .router()
            .oneshot(post_json(&format!("/meetings/{}/run", meeting.id), json!({"rounds": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["meeting"]["status"], "completed");
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["agent_name"], "Lead");
        assert_eq!(messages[1]["agent_name"], "Engineer");
    }

    #[tokio::test]
    async fn run_on_completed_meeting_is_400() {
        let app = test_app(ScriptedLlm::counting()).await;
        app.add_agent("Lead", "Team Lead").await;
        let meeting = app
            .add_meeting(|m| {
                m.status = MeetingStatus::Completed;
                m.max_rounds = 1;
                m.current_round = 1;
            })
            .await;

        let response = app
            .router()
            .oneshot(post_json(&format!("/meetings/{}/run", meeting.id), json!({"rounds": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn run_without_agents_is_400() {
        let app = test_app(ScriptedLlm::counting()).await;
        let meeting = app
            .add_meeting(|m| {
                m.agenda = "Empty".to_string();
                m.max_rounds = 1;
            })
            .await;

        let response = app
            .router()
            .oneshot(post_json(&format!("/meetings/{}/run", meeting.id), json!({"rounds": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn fatal_llm_error_maps_to_502() {
        let app = test_app(ScriptedLlm::failing()).await;
        app.add_agent("Lead", "Team Lead").await;
        let meeting = app
            .add_meeting(|m| {
                m.agenda = "Doomed".to_string();
                m.max_rounds = 1;
            })
            .await;

        let response = app
            .router()
            .oneshot(post_json(&format!("/meetings/{}/run", meeting.id), json!({"rounds": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn background_run_starts_then_conflicts() {
        let app = test_app(ScriptedLlm::with_script(|i| {
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(format!("response {i}"))
        }))
        .await;
        app.add_agent("Lead", "Team Lead").await;
        let meeting = app
            .add_meeting(|m| {
                m.agenda = "Long".to_string();
                m.max_rounds = 3;
            })
            .await;

        let response = app
            .router()
            .oneshot(post_json(
                &format!("/meetings/{}/run-background", meeting.id),
                json!({"rounds": 3}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["meeting_id"], meeting.id.as_str());
        assert_eq!(json["status"], "started");
        assert_eq!(json["rounds"], 3);

        let response = app
            .router()
            .oneshot(post_json(
                &format!("/meetings/{}/run-background", meeting.id),
                json!({"rounds": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn artifacts_roundtrip_through_the_api() {
        let app = test_app(ScriptedLlm::with_script(|_| {
            Ok("# filename: src/app.py\n```python\nprint('hi')\n```".to_string())
        }))
        .await;
        app.add_agent("Lead", "Team Lead").await;
        let meeting = app
            .add_meeting(|m| {
                m.agenda = "Code it".to_string();
                m.output_type = OutputType::Code;
                m.max_rounds = 1;
            })
            .await;

        let response = app
            .router()
            .oneshot(post_json(&format!("/meetings/{}/run", meeting.id), json!({"rounds": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri(format!("/meetings/{}/artifacts", meeting.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        let artifacts = json["artifacts"].as_array().unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0]["filename"], "src/app.py");
        assert_eq!(artifacts[0]["language"], "python");
        assert_eq!(artifacts[0]["version"], 1);
    }

    #[tokio::test]
    async fn on_demand_extraction_is_idempotent() {
        let app = test_app(ScriptedLlm::with_script(|_| {
            Ok("# filename: app.py\n```python\nx = 1\n```".to_string())
        }))
        .await;
        app.add_agent("Lead", "Team Lead").await;
        let meeting = app
            .add_meeting(|m| {
                m.agenda = "Code it".to_string();
                m.output_type = OutputType::Code;
                m.max_rounds = 1;
            })
            .await;

        app.router()
            .oneshot(post_json(&format!("/meetings/{}/run", meeting.id), json!({"rounds": 1})))
            .await
            .unwrap();

        // Re-extracting the unchanged transcript keeps version 1.
        for _ in 0..2 {
            let response = app
                .router()
                .oneshot(post_json(
                    &format!("/meetings/{}/extract-artifacts", meeting.id),
                    json!({}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let artifacts = app.state.store.list_artifacts(&meeting.id).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].version, 1);
    }

    #[tokio::test]
    async fn propose_agenda_applies_the_drafted_fields() {
        let app = test_app(ScriptedLlm::with_script(|_| {
            Ok(r#"{"agenda": "Compare folding models", "questions": ["Which baseline?"], "rules": ["Cite sources"], "suggested_rounds": 4}"#.to_string())
        }))
        .await;
        app.add_agent("Lead", "Team Lead").await;
        let meeting = app.add_meeting(|m| m.max_rounds = 5).await;

        let response = app
            .router()
            .oneshot(post_json(
                &format!("/meetings/{}/propose-agenda", meeting.id),
                json!({"topic": "protein folding"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["agenda"], "Compare folding models");
        assert_eq!(json["suggested_rounds"], 4);

        let loaded = app.state.store.get_meeting(&meeting.id).await.unwrap().unwrap();
        assert_eq!(loaded.agenda, "Compare folding models");
        assert_eq!(loaded.agenda_questions, vec!["Which baseline?".to_string()]);
        assert_eq!(loaded.max_rounds, 4);
        assert_eq!(loaded.agenda_strategy, crate::models::AgendaStrategy::AiAuto);
    }

    #[tokio::test]
    async fn stop_reports_whether_a_worker_was_cancelled() {
        let app = test_app(ScriptedLlm::counting()).await;
        let meeting = app.add_meeting(|m| m.max_rounds = 1).await;

        let response = app
            .router()
            .oneshot(post_json(&format!("/meetings/{}/stop", meeting.id), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["cancelling"], false);
    }
}
