//! Error handler for the provisioner.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::provisioning::ProvisionError;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/problem+json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
        }
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Axum(rejection) => rejection.status(),
            ServerError::Provision(err) => match err {
                ProvisionError::Conflict(_) => StatusCode::CONFLICT,
                ProvisionError::NotFound(_) => StatusCode::NOT_FOUND,
                ProvisionError::BadRequest(_) => StatusCode::BAD_REQUEST,
                ProvisionError::Unavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                },
            },
            ServerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .details(&self.to_string())
            .status(self.status());

        let response = match &self {
            ServerError::Axum(_) => {
                response.title("Request body could not be parsed.")
            },
            ServerError::Provision(ProvisionError::Conflict(_)) => {
                response.title("User already exists.")
            },
            ServerError::Provision(ProvisionError::NotFound(_)) => {
                response.title("User not found.")
            },
            ServerError::Provision(ProvisionError::BadRequest(_)) => {
                response.title("The directory refused the request.")
            },
            ServerError::Provision(ProvisionError::Unavailable(source)) => {
                tracing::error!(error = %source, "directory unavailable");
                response.title("Directory is unavailable.")
            },
            ServerError::Config(details) => {
                tracing::error!(%details, "server returned 500 status");
                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/problem+json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryError;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ProvisionError::Conflict("x".into()), StatusCode::CONFLICT),
            (ProvisionError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ProvisionError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (
                ProvisionError::Unavailable(DirectoryError::Timeout),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, status) in cases {
            let response = ServerError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
