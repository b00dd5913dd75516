//! JSON management API
//!
//! - POST   /api/v1/auth/login
//! - GET    /api/v1/auth/whoami
//! - GET|POST             /api/v1/{operators,accounts,users,signing-keys,clusters,api-users}
//! - GET|PATCH|DELETE     /api/v1/<collection>/{id}
//! - GET    /api/v1/users/{id}/credentials
//! - POST   /api/v1/clusters/{id}/sync
//! - GET    /api/v1/clusters/{id}/health
//! - POST   /api/v1/clusters/{id}/health/check
//! - GET|DELETE /api/v1/clusters/{id}/accounts/{account_id}
//!
//! Requests other than login carry `Authorization: Bearer <token>`.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::auth::{extract_bearer, Principal};
use crate::server::AppState;
use crate::services::{DeleteAccountOptions, ListQuery};
use crate::types::{GatekeeperError, Result};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub const API_PREFIX: &str = "/api/v1";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
struct ForceQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: crate::types::ErrorClass,
    pub message: String,
}

enum Reply {
    Json(StatusCode, serde_json::Value),
    /// Credentials bundles are returned as plain text
    Text(String),
    NoContent,
}

fn ok<T: Serialize>(value: T) -> Result<Reply> {
    reply(StatusCode::OK, value)
}

fn created<T: Serialize>(value: T) -> Result<Reply> {
    reply(StatusCode::CREATED, value)
}

fn reply<T: Serialize>(status: StatusCode, value: T) -> Result<Reply> {
    let value = serde_json::to_value(value)
        .map_err(|e| GatekeeperError::Internal(format!("Failed to serialize response: {e}")))?;
    Ok(Reply::Json(status, value))
}

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

fn response(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<BoxBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

impl Reply {
    fn into_response(self) -> Response<BoxBody> {
        match self {
            Reply::Json(status, value) => response(status, "application/json", value.to_string()),
            Reply::Text(text) => response(StatusCode::OK, "text/plain; charset=utf-8", text),
            Reply::NoContent => response(StatusCode::NO_CONTENT, "application/json", Bytes::new()),
        }
    }
}

pub fn error_response(err: &GatekeeperError) -> Response<BoxBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    let body = ErrorResponse {
        error: err.class(),
        message: err.public_message(),
    };
    let json = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
    response(status, "application/json", json)
}

fn json<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    let body: &[u8] = if body.is_empty() { b"{}" } else { &body[..] };
    serde_json::from_slice(body).map_err(|e| GatekeeperError::Validation(format!("invalid request body: {e}")))
}

fn query<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_urlencoded::from_str(raw)
        .map_err(|e| GatekeeperError::Validation(format!("invalid query string: {e}")))
}

// =============================================================================
// Dispatch
// =============================================================================

/// Handle a request under [`API_PREFIX`]
pub async fn handle_api_request(req: Request<Incoming>, state: &AppState) -> Response<BoxBody> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(b) => b.to_bytes(),
        Err(e) => {
            return error_response(&GatekeeperError::Validation(format!(
                "Failed to read body: {e}"
            )))
        }
    };
    let authorization = parts
        .headers
        .get(hyper::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    respond(
        state,
        &parts.method,
        parts.uri.path(),
        parts.uri.query().unwrap_or(""),
        authorization,
        body,
    )
    .await
}

/// Route an already-read request
pub async fn respond(
    state: &AppState,
    method: &Method,
    path: &str,
    query_string: &str,
    authorization: Option<&str>,
    body: Bytes,
) -> Response<BoxBody> {
    let segments: Vec<&str> = path
        .strip_prefix(API_PREFIX)
        .unwrap_or(path)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if method == Method::POST && segments == ["auth", "login"] {
        return match login(state, &body).await {
            Ok(reply) => reply.into_response(),
            Err(e) => error_response(&e),
        };
    }

    let principal = match authenticate(state, authorization).await {
        Ok(principal) => principal,
        Err(e) => return error_response(&e),
    };

    match route(state, principal.as_ref(), method, &segments, query_string, &body).await {
        Ok(reply) => reply.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn login(state: &AppState, body: &Bytes) -> Result<Reply> {
    let request: LoginRequest = json(body)?;
    ok(state
        .services
        .auth
        .login(&request.username, &request.password)
        .await?)
}

/// A missing header leaves the principal unset; a malformed one is rejected
async fn authenticate(state: &AppState, authorization: Option<&str>) -> Result<Option<Principal>> {
    let Some(header) = authorization else {
        return Ok(None);
    };
    let token = extract_bearer(header)
        .ok_or_else(|| GatekeeperError::Unauthenticated("expected a bearer token".into()))?;
    Ok(Some(state.services.auth.authenticate_token(token).await?))
}

async fn route(
    state: &AppState,
    p: Option<&Principal>,
    method: &Method,
    segments: &[&str],
    raw_query: &str,
    body: &Bytes,
) -> Result<Reply> {
    let s = &state.services;
    match (method, segments) {
        (&Method::GET, ["auth", "whoami"]) => ok(s.auth.whoami(p).await?),

        // Operators
        (&Method::GET, ["operators"]) => ok(s.operators.list(p, &query::<ListQuery>(raw_query)?).await?),
        (&Method::POST, ["operators"]) => created(s.operators.create(p, json(body)?).await?),
        (&Method::GET, ["operators", id]) => ok(s.operators.get(p, id).await?),
        (&Method::PATCH, ["operators", id]) => ok(s.operators.update(p, id, json(body)?).await?),
        (&Method::DELETE, ["operators", id]) => {
            let q: ForceQuery = query(raw_query)?;
            s.operators.delete(p, id, q.force).await?;
            Ok(Reply::NoContent)
        }

        // Accounts
        (&Method::GET, ["accounts"]) => ok(s.accounts.list(p, &query::<ListQuery>(raw_query)?).await?),
        (&Method::POST, ["accounts"]) => created(s.accounts.create(p, json(body)?).await?),
        (&Method::GET, ["accounts", id]) => ok(s.accounts.get(p, id).await?),
        (&Method::PATCH, ["accounts", id]) => ok(s.accounts.update(p, id, json(body)?).await?),
        (&Method::DELETE, ["accounts", id]) => {
            let options: DeleteAccountOptions = query(raw_query)?;
            s.accounts.delete(p, id, options).await?;
            Ok(Reply::NoContent)
        }

        // Users
        (&Method::GET, ["users"]) => ok(s.users.list(p, &query::<ListQuery>(raw_query)?).await?),
        (&Method::POST, ["users"]) => created(s.users.create(p, json(body)?).await?),
        (&Method::GET, ["users", id]) => ok(s.users.get(p, id).await?),
        (&Method::PATCH, ["users", id]) => ok(s.users.update(p, id, json(body)?).await?),
        (&Method::DELETE, ["users", id]) => {
            s.users.delete(p, id).await?;
            Ok(Reply::NoContent)
        }
        (&Method::GET, ["users", id, "credentials"]) => {
            let creds = s.users.credentials(p, id).await?;
            Ok(Reply::Text(creds.format().to_string()))
        }

        // Scoped signing keys
        (&Method::GET, ["signing-keys"]) => {
            ok(s.signing_keys.list(p, &query::<ListQuery>(raw_query)?).await?)
        }
        (&Method::POST, ["signing-keys"]) => created(s.signing_keys.create(p, json(body)?).await?),
        (&Method::GET, ["signing-keys", id]) => ok(s.signing_keys.get(p, id).await?),
        (&Method::PATCH, ["signing-keys", id]) => {
            ok(s.signing_keys.update(p, id, json(body)?).await?)
        }
        (&Method::DELETE, ["signing-keys", id]) => {
            let q: ForceQuery = query(raw_query)?;
            s.signing_keys.delete(p, id, q.force).await?;
            Ok(Reply::NoContent)
        }

        // Clusters
        (&Method::GET, ["clusters"]) => ok(s.clusters.list(p, &query::<ListQuery>(raw_query)?).await?),
        (&Method::POST, ["clusters"]) => created(s.clusters.create(p, json(body)?).await?),
        (&Method::GET, ["clusters", id]) => ok(s.clusters.get(p, id).await?),
        (&Method::PATCH, ["clusters", id]) => ok(s.clusters.update(p, id, json(body)?).await?),
        (&Method::DELETE, ["clusters", id]) => {
            s.clusters.delete(p, id).await?;
            Ok(Reply::NoContent)
        }
        (&Method::POST, ["clusters", id, "sync"]) => ok(s.clusters.sync(p, id).await?),
        (&Method::GET, ["clusters", id, "health"]) => ok(s.clusters.health(p, id).await?),
        (&Method::POST, ["clusters", id, "health", "check"]) => {
            ok(s.clusters.check_health(p, id).await?)
        }
        (&Method::GET, ["clusters", id, "accounts", account_id]) => {
            let jwt = s.clusters.lookup_account_on_cluster(p, id, account_id).await?;
            ok(serde_json::json!({ "jwt": jwt }))
        }
        (&Method::DELETE, ["clusters", id, "accounts", account_id]) => {
            let message = s.clusters.delete_account_from_cluster(p, id, account_id).await?;
            ok(serde_json::json!({ "message": message }))
        }

        // API users
        (&Method::GET, ["api-users"]) => ok(s.api_users.list(p, &query::<ListQuery>(raw_query)?).await?),
        (&Method::POST, ["api-users"]) => created(s.api_users.create(p, json(body)?).await?),
        (&Method::GET, ["api-users", id]) => ok(s.api_users.get(p, id).await?),
        (&Method::PATCH, ["api-users", id]) => ok(s.api_users.update(p, id, json(body)?).await?),
        (&Method::DELETE, ["api-users", id]) => {
            s.api_users.delete(p, id).await?;
            Ok(Reply::NoContent)
        }

        _ => Err(GatekeeperError::NotFound(format!(
            "no route for {method} {API_PREFIX}/{}",
            segments.join("/")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::context;
    use crate::services::Services;
    use crate::auth::SessionTokens;

    async fn state() -> (AppState, String) {
        let services = Services::new(context(), SessionTokens::new_dev());
        services
            .auth
            .bootstrap_admin("root", "hunter2hunter2")
            .await
            .unwrap();
        let token = services
            .auth
            .login("root", "hunter2hunter2")
            .await
            .unwrap()
            .token;
        (AppState { services }, format!("Bearer {token}"))
    }

    async fn body_json(response: Response<BoxBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_login_route() {
        let (state, _) = state().await;
        let body = Bytes::from(r#"{"username":"root","password":"hunter2hunter2"}"#);
        let response = respond(&state, &Method::POST, "/api/v1/auth/login", "", None, body).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["token"].as_str().is_some());
        assert_eq!(json["principal"]["role"], "admin");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let (state, _) = state().await;
        let response = respond(&state, &Method::GET, "/api/v1/operators", "", None, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = respond(
            &state,
            &Method::GET,
            "/api/v1/operators",
            "",
            Some("Basic abc"),
            Bytes::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_and_list_operators() {
        let (state, auth) = state().await;
        let body = Bytes::from(r#"{"name":"acme"}"#);
        let response =
            respond(&state, &Method::POST, "/api/v1/operators", "", Some(auth.as_str()), body).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert!(created.get("encrypted_seed").is_none());

        let response = respond(
            &state,
            &Method::GET,
            "/api/v1/operators",
            "limit=10",
            Some(auth.as_str()),
            Bytes::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let list = body_json(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["name"], "acme");
    }

    #[tokio::test]
    async fn test_duplicate_is_conflict() {
        let (state, auth) = state().await;
        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            let response = respond(
                &state,
                &Method::POST,
                "/api/v1/operators",
                "",
                Some(auth.as_str()),
                Bytes::from(r#"{"name":"acme"}"#),
            )
            .await;
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (state, auth) = state().await;
        let response =
            respond(&state, &Method::GET, "/api/v1/widgets", "", Some(auth.as_str()), Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"], "not_found");

        // Unmapped verbs on known resources are not routed either
        for (method, path) in [
            (Method::POST, "/api/v1/users/u1/purge"),
            (Method::PUT, "/api/v1/operators"),
        ] {
            let response =
                respond(&state, &method, path, "", Some(auth.as_str()), Bytes::new()).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }
}
