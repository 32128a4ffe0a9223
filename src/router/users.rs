//! Users-related HTTP API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;

use super::Json;
use crate::provisioning::attributes::AttributeMap;
use crate::provisioning::{self, UserRecord};
use crate::telemetry::record_operation;
use crate::{AppState, ServerError};

pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /Users` goes to `create`.
        .route("/", post(create))
        // `GET`, `PUT` and `DELETE /Users/{id}`.
        .route("/{id}", get(read).put(update).delete(delete))
}

/// Count the operation, then hand the result back.
fn counted<T>(
    operation: &'static str,
    result: provisioning::Result<T>,
) -> provisioning::Result<T> {
    let outcome = match &result {
        Ok(_) => "success",
        Err(err) => err.outcome(),
    };
    record_operation(operation, outcome);
    result
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<AttributeMap>,
) -> Result<(StatusCode, axum::Json<UserRecord>), ServerError> {
    let record = counted("create", state.provisioner.create(&body).await)?;
    Ok((StatusCode::CREATED, axum::Json(record)))
}

pub async fn read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<axum::Json<UserRecord>, ServerError> {
    let record = counted("read", state.provisioner.read(&id).await)?;
    Ok(axum::Json(record))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AttributeMap>,
) -> Result<axum::Json<UserRecord>, ServerError> {
    let record =
        counted("update", state.provisioner.update(&id, &body).await)?;
    Ok(axum::Json(record))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    counted("delete", state.provisioner.delete(&id).await)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    use crate::directory::memory::MemoryDirectory;
    use crate::provisioning::{DeleteBehavior, UserRecord};
    use crate::*;

    async fn body(response: axum::http::Response<axum::body::Body>) -> UserRecord {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_user_lifecycle() {
        let directory = Arc::new(MemoryDirectory::new());
        let app = app(router::state(directory.clone(), DeleteBehavior::Disable));

        let user = json!({ "username": "alice", "sn": "Liddell" }).to_string();
        let response =
            make_request(app.clone(), Method::POST, "/Users", user.clone()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let record = body(response).await;
        assert_eq!(record.attributes.single_value("id"), Some("alice"));

        let response =
            make_request(app.clone(), Method::POST, "/Users", user).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let changes = json!({ "sn": ["Pleasance"] }).to_string();
        let response =
            make_request(app.clone(), Method::PUT, "/Users/alice", changes).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body(response).await.attributes.single_value("sn"),
            Some("Pleasance")
        );

        let response = make_request(
            app.clone(),
            Method::DELETE,
            "/Users/alice",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response =
            make_request(app, Method::GET, "/Users/alice", String::default())
                .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(directory.entry("cn=alice,ou=people,dc=example,dc=org").is_some());
    }

    #[tokio::test]
    async fn test_missing_username_is_bad_request() {
        let directory = Arc::new(MemoryDirectory::new());
        let app = app(router::state(directory, DeleteBehavior::Delete));

        let response = make_request(
            app,
            Method::POST,
            "/Users",
            json!({ "sn": "Liddell" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unparsable_body_is_rejected() {
        let directory = Arc::new(MemoryDirectory::new());
        let app = app(router::state(directory, DeleteBehavior::Delete));

        let response =
            make_request(app, Method::POST, "/Users", "not json".into()).await;
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_unavailable_directory() {
        let directory = Arc::new(MemoryDirectory::new());
        directory.set_offline(true);
        let app = app(router::state(directory, DeleteBehavior::Disable));

        let response =
            make_request(app, Method::GET, "/Users/alice", String::default())
                .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
