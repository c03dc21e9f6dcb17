use application::{ApplicationError, DirectoryError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }

    pub fn message(&self) -> &str {
        &self.body.message
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        match error {
            ApplicationError::Domain(err) => match err {
                DomainError::InvalidArgument { field, reason } => ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "INVALID_ARGUMENT",
                    format!("{field}: {reason}"),
                ),
                DomainError::ChatNotFound => {
                    ApiError::new(StatusCode::NOT_FOUND, "CHAT_NOT_FOUND", "chat not found")
                }
                DomainError::NotChatMember => ApiError::new(
                    StatusCode::FORBIDDEN,
                    "NOT_CHAT_MEMBER",
                    "user is not a member of the chat",
                ),
                DomainError::AlreadyChatMember => ApiError::new(
                    StatusCode::CONFLICT,
                    "ALREADY_CHAT_MEMBER",
                    "user already in chat",
                ),
                DomainError::UsersNotFound(usernames) => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "USERS_NOT_FOUND",
                    format!("users not found: {}", usernames.join(",")),
                ),
                DomainError::OperationNotAllowed { reason } => {
                    ApiError::new(StatusCode::FORBIDDEN, "OPERATION_NOT_ALLOWED", reason)
                }
            },
            ApplicationError::Repository(repo_err) => match repo_err {
                RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                RepositoryError::Conflict => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
                }
                RepositoryError::Storage { message } => {
                    tracing::error!(error = %message, "storage failure");
                    ApiError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "DATABASE_ERROR",
                        "storage failure",
                    )
                }
            },
            ApplicationError::Directory(err) => {
                tracing::error!(error = %err, "user directory failure");
                let message = match err {
                    DirectoryError::Unavailable(_) => "auth service unavailable",
                    DirectoryError::InvalidResponse(_) => "auth service returned invalid response",
                };
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DIRECTORY_ERROR", message)
            }
            ApplicationError::Infrastructure(message) => {
                tracing::error!(error = %message, "infrastructure failure");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INFRASTRUCTURE_ERROR",
                    "internal error",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
