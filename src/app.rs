use std::net::SocketAddr;

use axum::{
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{response::ApiResponse, state::AppState, users};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(users::router(state.clone()))
                .route("/health", get(|| async { "ok" })),
        )
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::map_response(envelope_method_not_allowed))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

async fn not_found() -> ApiResponse<()> {
    ApiResponse::error("not found", StatusCode::NOT_FOUND, None)
}

/// Routing answers a known path with the wrong method with an empty 405.
async fn envelope_method_not_allowed(res: Response) -> Response {
    if res.status() != StatusCode::METHOD_NOT_ALLOWED
        || res.headers().contains_key(header::CONTENT_TYPE)
    {
        return res;
    }
    let allow = res.headers().get(header::ALLOW).cloned();
    let mut wrapped =
        ApiResponse::<()>::error("method not allowed", StatusCode::METHOD_NOT_ALLOWED, None)
            .into_response();
    if let Some(allow) = allow {
        wrapped.headers_mut().insert(header::ALLOW, allow);
    }
    wrapped
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        async_trait,
        body::{to_bytes, Body},
        http::Request,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::auth::AuthService;
    use crate::config::JwtConfig;
    use crate::storage::fake::FakeStorage;
    use crate::users::memory::MemoryUserRepository;
    use crate::users::{AvatarChange, NewUser, StoreError, User, UserRepository};

    const BOUNDARY: &str = "crowdfund-test-boundary";

    fn test_app() -> (Router, Arc<FakeStorage>) {
        let storage = Arc::new(FakeStorage::default());
        (build_app(AppState::fake(storage.clone())), storage)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn registration(email: &str) -> Value {
        json!({
            "name": "Ada Lovelace",
            "email": email,
            "occupation": "analyst",
            "password": "p4ssw0rd-long",
        })
    }

    async fn register(app: &Router, email: &str) -> (Uuid, String) {
        let (status, body) = send(app, post_json("/api/v1/users", registration(email))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let id = body["data"]["id"].as_str().unwrap().parse().unwrap();
        let token = body["data"]["token"].as_str().unwrap().to_string();
        (id, token)
    }

    fn avatar_request(authorization: Option<&str>, content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let mut req = Request::post("/api/v1/avatars").header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(value) = authorization {
            req = req.header(header::AUTHORIZATION, value);
        }
        req.body(Body::from(body)).unwrap()
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = test_app();
        let res = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn registered_user_can_log_in() {
        let (app, _) = test_app();
        let (status, body) =
            send(&app, post_json("/api/v1/users", registration("ada@example.com"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["status_code"], 200);
        assert_eq!(body["data"]["email"], "ada@example.com");
        assert_eq!(body["data"]["role"], "user");
        assert!(body["data"].get("password_hash").is_none());

        let (status, body) = send(
            &app,
            post_json(
                "/api/v1/sessions",
                json!({ "email": "ada@example.com", "password": "p4ssw0rd-long" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["data"]["token"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let (app, _) = test_app();
        register(&app, "ada@example.com").await;
        let (status, body) =
            send(&app, post_json("/api/v1/users", registration("ADA@example.com"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "error");
        assert_eq!(body["status_code"], 409);
    }

    #[tokio::test]
    async fn bad_payloads_get_field_errors() {
        let (app, _) = test_app();
        let (status, body) = send(
            &app,
            post_json("/api/v1/users", json!({ "email": "nope", "password": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["data"]["errors"].as_array().unwrap().len() >= 3);

        let malformed = Request::post("/api/v1/sessions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let (app, _) = test_app();
        register(&app, "ada@example.com").await;
        let (status, body) = send(
            &app,
            post_json(
                "/api/v1/sessions",
                json!({ "email": "ada@example.com", "password": "not-the-password" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn email_checker_reports_availability() {
        let (app, _) = test_app();
        let check = || post_json("/api/v1/email_checkers", json!({ "email": "ada@example.com" }));

        let (status, body) = send(&app, check()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["is_available"], true);

        register(&app, "ada@example.com").await;
        let (_, body) = send(&app, check()).await;
        assert_eq!(body["data"]["is_available"], false);
    }

    #[tokio::test]
    async fn avatar_rejects_unauthenticated_requests_before_the_handler() {
        let (app, storage) = test_app();
        let (user_id, token) = register(&app, "ada@example.com").await;

        let jwt = |secret: &str, ttl_minutes: i64| {
            AuthService::new(&JwtConfig {
                secret: secret.into(),
                issuer: "crowdfund-test".into(),
                ttl_minutes,
            })
        };
        let expired = jwt("test-secret", -1).issue_token(user_id).unwrap();
        let forged = jwt("other-secret", 5).issue_token(user_id).unwrap();
        let ghost = jwt("test-secret", 5).issue_token(Uuid::new_v4()).unwrap();

        let headers = [
            None,
            Some(format!("Basic {token}")),
            Some(token.clone()),
            Some("Bearer".to_string()),
            Some(format!("Bearer {token} extra")),
            Some(bearer("not.a.token")),
            Some(bearer(&expired)),
            Some(bearer(&forged)),
            Some(bearer(&ghost)),
        ];
        for header in headers {
            let (status, body) =
                send(&app, avatar_request(header.as_deref(), "image/png", b"png")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "header {header:?}");
            assert_eq!(body["status"], "error");
            assert_eq!(body["status_code"], 401);
        }
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn avatar_upload_stores_and_replaces_image() {
        let (app, storage) = test_app();
        let (_, token) = register(&app, "ada@example.com").await;

        let (status, body) = send(
            &app,
            avatar_request(Some(&bearer(&token)), "image/png", b"\x89PNG first"),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["is_uploaded"], true);
        let first = body["data"]["avatar_file_name"].as_str().unwrap().to_string();
        let (bytes, content_type) = storage.get(&first).unwrap();
        assert_eq!(&bytes[..], b"\x89PNG first");
        assert_eq!(content_type, "image/png");

        let (status, body) = send(
            &app,
            avatar_request(Some(&bearer(&token)), "image/jpeg", b"jpeg second"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let second = body["data"]["avatar_file_name"].as_str().unwrap().to_string();
        assert!(second.ends_with(".jpg"));
        assert_eq!(storage.keys(), vec![second.clone()]);

        let me = Request::get("/api/v1/users/me")
            .header(header::AUTHORIZATION, bearer(&token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, me).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["avatar_file_name"], second.as_str());
    }

    #[tokio::test]
    async fn avatar_must_be_a_non_empty_image() {
        let (app, storage) = test_app();
        let (_, token) = register(&app, "ada@example.com").await;

        let (status, _) = send(
            &app,
            avatar_request(Some(&bearer(&token)), "application/pdf", b"%PDF"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, avatar_request(Some(&bearer(&token)), "image/png", b"")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(storage.keys().is_empty());
    }

    /// Accepts everything except avatar writes, which fail as a lost row would.
    #[derive(Default)]
    struct AvatarWritesFail(MemoryUserRepository);

    #[async_trait]
    impl UserRepository for AvatarWritesFail {
        async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
            self.0.insert(user).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.0.find_by_email(email).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            self.0.find_by_id(id).await
        }

        async fn update_avatar(&self, _: Uuid, _: &str) -> Result<AvatarChange, StoreError> {
            Err(StoreError::NotFound)
        }

        async fn update_profile(
            &self,
            id: Uuid,
            name: &str,
            occupation: &str,
        ) -> Result<User, StoreError> {
            self.0.update_profile(id, name, occupation).await
        }
    }

    #[tokio::test]
    async fn failed_avatar_save_removes_the_uploaded_object() {
        let storage = Arc::new(FakeStorage::default());
        let state = AppState::fake_with_repo(Arc::new(AvatarWritesFail::default()), storage.clone());
        let app = build_app(state);
        let (_, token) = register(&app, "ada@example.com").await;

        let (status, body) =
            send(&app, avatar_request(Some(&bearer(&token)), "image/png", b"png")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn avatar_over_limit_is_413() {
        let (app, storage) = test_app();
        let (_, token) = register(&app, "ada@example.com").await;

        // One byte over the avatar cap, then past the multipart allowance too.
        for size in [64 * 1024 + 1, 84 * 1024] {
            let data = vec![0u8; size];
            let (status, body) =
                send(&app, avatar_request(Some(&bearer(&token)), "image/png", &data)).await;
            assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "size {size}");
            assert_eq!(body["status"], "error");
            assert_eq!(body["status_code"], 413);
            if size == 64 * 1024 + 1 {
                assert_eq!(body["message"], "avatar exceeds 65536 bytes");
            }
        }
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn unknown_routes_and_methods_get_the_envelope() {
        let (app, _) = test_app();

        let (status, body) =
            send(&app, Request::get("/api/v1/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
        assert_eq!(body["status_code"], 404);
        assert!(body["data"].is_null());

        let res = app
            .clone()
            .oneshot(Request::get("/api/v1/users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(res.headers().contains_key(header::ALLOW));
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status_code"], 405);
        assert_eq!(body["message"], "method not allowed");
    }

    #[tokio::test]
    async fn profile_update_requires_auth_and_persists() {
        let (app, _) = test_app();
        let (_, token) = register(&app, "ada@example.com").await;
        let update = |auth: Option<String>| {
            let mut req = Request::put("/api/v1/users/me")
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(value) = auth {
                req = req.header(header::AUTHORIZATION, value);
            }
            req.body(Body::from(
                json!({ "name": "Countess", "occupation": "mathematician" }).to_string(),
            ))
            .unwrap()
        };

        let (status, _) = send(&app, update(None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, update(Some(bearer(&token)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Countess");
        assert_eq!(body["data"]["occupation"], "mathematician");
    }
}
