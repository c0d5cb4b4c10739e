pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::ingestion::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health::health_handler))
        // CV ingestion
        .route(
            "/api/v1/consultants/:id/cv",
            post(handlers::handle_upload_cv).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/v1/runs/:run_id", get(handlers::handle_get_run))
        .route(
            "/api/v1/runs/:run_id/reanalyze",
            post(handlers::handle_reanalyze),
        )
        .route("/api/v1/runs/:run_id/confirm", post(handlers::handle_confirm))
        .route("/api/v1/runs/:run_id/discard", post(handlers::handle_discard))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::config::{Config, ExtractionClientConfig};
    use crate::ingestion::pipeline::testing::{pipeline, FakeLlm};
    use crate::ingestion::reconcile::ProfileSnapshot;
    use crate::ingestion::repository::memory::InMemoryProfileRepository;
    use crate::llm_client::ExtractionError;

    const BOUNDARY: &str = "cv-test-boundary";

    fn app(llm: FakeLlm, consultant_id: Uuid) -> (Router, Arc<InMemoryProfileRepository>) {
        let repo = Arc::new(InMemoryProfileRepository::with_consultant(
            consultant_id,
            ProfileSnapshot::default(),
        ));
        let state = AppState {
            pipeline: pipeline(Arc::new(llm), repo.clone(), "Jane Doe\nAcme Corp 2022"),
            config: Config {
                database_url: "postgres://unused".to_string(),
                llm: ExtractionClientConfig::new("k", "https://llm.example.com", "fake-model"),
                port: 0,
                rust_log: "info".to_string(),
                max_upload_bytes: 1024 * 1024,
            },
        };
        (build_router(state), repo)
    }

    fn upload_request(consultant_id: Uuid, field: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"cv.txt\"\r\n\
             Content-Type: text/plain\r\n\r\nJane Doe\r\n--{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri(format!("/api/v1/consultants/{consultant_id}/cv"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap_or_else(|e| panic!("{e}"))
    }

    fn post(uri: String, json: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap_or_else(|e| panic!("{e}"))
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        serde_json::from_slice(&bytes).unwrap_or_else(|e| panic!("{e}"))
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app(FakeLlm::replying("{}"), Uuid::new_v4());
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap_or_else(|e| panic!("{e}")))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_upload_then_confirm() {
        let consultant_id = Uuid::new_v4();
        let (router, repo) = app(
            FakeLlm::replying(
                r#"{"missions": [{"client": "Acme Corp", "date_debut": "2022-01-01"}],
                    "competences": {"technical": ["Rust"]}}"#,
            ),
            consultant_id,
        );

        let response = router
            .clone()
            .oneshot(upload_request(consultant_id, "file"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(response.status(), StatusCode::OK);
        let run = json_body(response).await;
        assert_eq!(run["state"], "decision_computed");
        assert_eq!(run["extraction"]["_metadata"]["source"], "fake-model");
        assert_eq!(run["decision"]["missions_to_add"][0]["client"], "Acme Corp");
        let run_id = run["id"].as_str().unwrap_or_default().to_string();

        let response = router
            .clone()
            .oneshot(post(format!("/api/v1/runs/{run_id}/confirm"), "{}"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(response.status(), StatusCode::OK);
        let confirmed = json_body(response).await;
        assert_eq!(confirmed["applied"]["mission_ids"].as_array().map(Vec::len), Some(1));
        assert_eq!(repo.snapshot(consultant_id).skills.len(), 1);

        let response = router
            .oneshot(post(format!("/api/v1/runs/{run_id}/discard"), ""))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_confirm_edited_dates_and_malformed_body() {
        let consultant_id = Uuid::new_v4();
        let (router, repo) = app(
            FakeLlm::replying(r#"{"missions": [{"client": "Acme Corp"}]}"#),
            consultant_id,
        );
        let response = router
            .clone()
            .oneshot(upload_request(consultant_id, "file"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let run_id = json_body(response).await["id"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let response = router
            .clone()
            .oneshot(post(format!("/api/v1/runs/{run_id}/confirm"), r#"{"missions": "nope"}"#))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");

        let edited = r#"{"missions": [{"client": "Acme Corp", "date_debut": "2021-03", "date_fin": "en cours"}]}"#;
        let response = router
            .oneshot(post(format!("/api/v1/runs/{run_id}/confirm"), edited))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(response.status(), StatusCode::OK);
        let confirmed = json_body(response).await;
        assert_eq!(confirmed["decision"]["missions_to_add"][0]["date_debut"], "2021-03-01");
        assert_eq!(confirmed["decision"]["missions_to_add"][0]["date_fin"], "ongoing");
        assert_eq!(repo.snapshot(consultant_id).missions.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_with_certificate_failure_is_bad_gateway() {
        let consultant_id = Uuid::new_v4();
        let (router, _) = app(
            FakeLlm::scripted(vec![Err(ExtractionError::Certificate {
                reason: "UnknownIssuer".to_string(),
            })]),
            consultant_id,
        );
        let response = router
            .oneshot(upload_request(consultant_id, "file"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let run = json_body(response).await;
        assert_eq!(run["state"], "failed");
        assert_eq!(run["failure"]["kind"], "certificate_error");
        assert!(run["extraction"].is_null());
    }

    #[tokio::test]
    async fn test_upload_without_file_field_is_bad_request() {
        let consultant_id = Uuid::new_v4();
        let (router, _) = app(FakeLlm::replying("{}"), consultant_id);
        let response = router
            .oneshot(upload_request(consultant_id, "attachment"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_for_unknown_consultant_is_not_found() {
        let (router, _) = app(FakeLlm::replying("{}"), Uuid::new_v4());
        let response = router
            .oneshot(upload_request(Uuid::new_v4(), "file"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_get_unknown_run_is_not_found() {
        let (router, _) = app(FakeLlm::replying("{}"), Uuid::new_v4());
        let response = router
            .oneshot(
                Request::get(format!("/api/v1/runs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap_or_else(|e| panic!("{e}")),
            )
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
