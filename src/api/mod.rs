// REST API and the request pipeline wrapped around it.

pub mod auth;
pub mod error;
pub mod extract;
pub mod users;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method, header},
    response::Json,
    routing::get,
};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::server::AppState;
use error::{not_found, panic_response};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Helmet-style response headers. Content-Security-Policy and
/// Cross-Origin-Resource-Policy are left out so the identity provider's
/// scripts and cross-origin assets keep loading.
const SECURITY_HEADERS: [(&str, &str); 9] = [
    ("cross-origin-opener-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
];

/// Build the full application.
///
/// Stages, outermost first: request id, CORS (which also answers every
/// OPTIONS request), body limit, security headers, access log, panic
/// capture, routes, 404 fallback.
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let routes = Router::new()
        .route("/", get(root))
        .nest("/api/auth", auth::router())
        .nest("/api/users", users::router())
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(panic_response)),
        );

    SECURITY_HEADERS
        .into_iter()
        .fold(routes, |router, (name, value)| {
            router.layer(SetResponseHeaderLayer::if_not_present(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            ))
        })
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors_layer(cors_origins))
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

/// CORS for the configured origins. With no origins configured the request
/// origin is echoed back, which (unlike `*`) stays valid with credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

async fn root() -> Json<Value> {
    Json(serde_json::json!({ "message": "API is running" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, TokenVerifier, UserStore, test_token};
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request as HttpRequest, StatusCode};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "pipeline-secret";

    async fn test_app() -> Router {
        let db = create_connection(DatabaseConfig::in_memory()).await.unwrap();
        ensure_schema(&db).await.unwrap();
        let state = AppState {
            users: Arc::new(UserStore::new(db)),
            verifier: Arc::new(TokenVerifier::new(AuthConfig::with_secret(SECRET)).unwrap()),
        };
        create_router(state, &[])
    }

    fn token(sub: &str, email: &str) -> String {
        format!("Bearer {}", test_token(SECRET, sub, Some(email), 300))
    }

    async fn send(app: &Router, req: HttpRequest<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_root_liveness() {
        let app = test_app().await;
        let req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "API is running" }));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404_for_every_method() {
        let app = test_app().await;
        for method in ["GET", "POST", "PUT", "DELETE", "PATCH"] {
            for uri in ["/nope", "/api/auth/nope", "/"] {
                if method == "GET" && uri == "/" {
                    continue;
                }
                let req = HttpRequest::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap();
                let (status, body) = send(&app, req).await;

                assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
                assert_eq!(body, json!({ "success": false, "message": "Resource not found" }));
            }
        }
    }

    #[tokio::test]
    async fn test_wrong_method_on_known_path_is_404() {
        let app = test_app().await;
        let req = HttpRequest::builder()
            .method("GET")
            .uri("/api/auth/register")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Resource not found");
    }

    #[tokio::test]
    async fn test_preflight_returns_cors_headers() {
        let app = test_app().await;
        let req = HttpRequest::builder()
            .method("OPTIONS")
            .uri("/api/auth/register")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type,authorization")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        let headers = response.headers();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
        assert!(methods.contains("POST") && methods.contains("DELETE"));
    }

    #[tokio::test]
    async fn test_bare_options_on_any_route_is_200() {
        let app = test_app().await;
        let req = HttpRequest::builder()
            .method("OPTIONS")
            .uri("/does/not/exist")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);

        // Answered by CORS before the route's handler or auth check runs.
        let req = HttpRequest::builder()
            .method("OPTIONS")
            .uri("/api/users/me")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_configured_origin_list() {
        let db = create_connection(DatabaseConfig::in_memory()).await.unwrap();
        let state = AppState {
            users: Arc::new(UserStore::new(db)),
            verifier: Arc::new(TokenVerifier::new(AuthConfig::with_secret(SECRET)).unwrap()),
        };
        let app = create_router(state, &["https://app.example.com".to_string()]);

        let req = HttpRequest::builder()
            .uri("/")
            .header(header::ORIGIN, "https://app.example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );

        let req = HttpRequest::builder()
            .uri("/")
            .header(header::ORIGIN, "https://evil.example.com")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_security_headers_without_csp_or_corp() {
        let app = test_app().await;
        let req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        let headers = response.headers();

        for (name, value) in SECURITY_HEADERS {
            assert_eq!(headers[name], value, "{}", name);
        }
        assert!(headers.get("content-security-policy").is_none());
        assert!(headers.get("cross-origin-resource-policy").is_none());
        assert!(headers.get("x-request-id").is_some());
    }

    #[tokio::test]
    async fn test_register_requires_token() {
        let app = test_app().await;
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/api/auth/register")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_security_headers_on_fallback_and_error_responses() {
        let app = test_app().await;
        let req = HttpRequest::builder()
            .method("DELETE")
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["referrer-policy"], "no-referrer");

        let req = HttpRequest::builder()
            .uri("/api/auth/verify")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_bad_signature_is_401_not_500() {
        let app = test_app().await;
        let forged = test_token("some-other-secret", "uid-1", Some("a@x.com"), 300);
        let req = HttpRequest::builder()
            .uri("/api/auth/verify")
            .header(header::AUTHORIZATION, format!("Bearer {}", forged))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_expired_token_is_401() {
        let app = test_app().await;
        let expired = test_token(SECRET, "uid-1", Some("a@x.com"), -600);
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/api/auth/register")
            .header(header::AUTHORIZATION, format!("Bearer {}", expired))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_verify_before_register_is_404() {
        let app = test_app().await;
        let req = HttpRequest::builder()
            .uri("/api/auth/verify")
            .header(header::AUTHORIZATION, token("uid-1", "a@x.com"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "success": false, "message": "User not found" }));
    }

    #[tokio::test]
    async fn test_register_then_verify_defaults_to_user() {
        let app = test_app().await;
        let auth = token("uid-1", "a@x.com");

        let req = HttpRequest::builder()
            .method("POST")
            .uri("/api/auth/register")
            .header(header::AUTHORIZATION, &auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);

        let req = HttpRequest::builder()
            .uri("/api/auth/verify")
            .header(header::AUTHORIZATION, &auth)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["role"], "user");
        assert_eq!(body["data"]["external_id"], "uid-1");
        assert_eq!(body["data"]["email"], "a@x.com");
    }

    #[tokio::test]
    async fn test_register_with_admin_hint_is_idempotent() {
        let app = test_app().await;
        let auth = token("uid-admin", "root@x.com");

        let register = |body: &'static str, content_type: &'static str| {
            HttpRequest::builder()
                .method("POST")
                .uri("/api/auth/register")
                .header(header::AUTHORIZATION, &auth)
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap()
        };

        let (status, first) = send(&app, register("", "application/json")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["data"]["role"], "user");

        let (status, second) =
            send(&app, register("role=admin", "application/x-www-form-urlencoded")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["data"]["role"], "admin");
        assert_eq!(second["data"]["id"], first["data"]["id"]);

        let (status, _) = send(&app, register(r#"{"role":"admin"}"#, "application/json")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_role() {
        let app = test_app().await;
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/api/auth/register")
            .header(header::AUTHORIZATION, token("uid-1", "a@x.com"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"role":"root"}"#))
            .unwrap();
        let (status, body) = send(&app, req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_users_routes_enforce_admin_flag() {
        let app = test_app().await;
        let user = token("uid-user", "u@x.com");
        let admin = token("uid-admin", "root@x.com");

        for (auth, hint) in [(&user, "{}"), (&admin, r#"{"role":"admin"}"#)] {
            let req = HttpRequest::builder()
                .method("POST")
                .uri("/api/auth/register")
                .header(header::AUTHORIZATION, auth)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(hint))
                .unwrap();
            send(&app, req).await;
        }

        let list = |auth: &str| {
            HttpRequest::builder()
                .uri("/api/users")
                .header(header::AUTHORIZATION, auth)
                .body(Body::empty())
                .unwrap()
        };

        let (status, _) = send(&app, list(&user)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, list(&admin)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let req = HttpRequest::builder()
            .method("DELETE")
            .uri("/api/users/uid-user")
            .header(header::AUTHORIZATION, &admin)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "User deleted");
    }

    #[tokio::test]
    async fn test_update_own_display_name() {
        let app = test_app().await;
        let auth = token("uid-1", "a@x.com");

        let req = HttpRequest::builder()
            .method("POST")
            .uri("/api/auth/register")
            .header(header::AUTHORIZATION, &auth)
            .body(Body::empty())
            .unwrap();
        send(&app, req).await;

        let req = HttpRequest::builder()
            .method("PUT")
            .uri("/api/users/me")
            .header(header::AUTHORIZATION, &auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"display_name":"  Ada  "}"#))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["display_name"], "Ada");

        let req = HttpRequest::builder()
            .method("PUT")
            .uri("/api/users/me")
            .header(header::AUTHORIZATION, &auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"display_name":"   "}"#))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = HttpRequest::builder()
            .uri("/api/users/me")
            .header(header::AUTHORIZATION, &auth)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["display_name"], "Ada");
    }
}
