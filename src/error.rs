//! Error Handling Module
//!
//! Provides the engine's typed error taxonomy with HTTP status code mapping.
//! Uses thiserror for domain errors and integrates with tracing for structured logging.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// 엔진 결과 타입
pub type RewardResult<T> = Result<T, RewardError>;

/// 리워드 엔진 에러 타입
///
/// # Design Decision
///
/// 모든 코어 연산은 이 타입을 호출자에게 그대로 반환한다.
/// `ExternalService`만 예외: 알림 디스패처 내부에서 로깅 후 버려진다.
#[derive(Debug, Error)]
pub enum RewardError {
    // ============ 400 Bad Request ============
    #[error("Validation failed: {0}")]
    Validation(String),

    // ============ 403 Forbidden ============
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ============ 404 Not Found ============
    #[error("Resource not found: {0}")]
    NotFound(String),

    // ============ 409 Conflict ============
    #[error("Conflict: {0}")]
    Conflict(ConflictKind),

    /// 조건부 UPDATE가 0행에 매칭됨 (다른 요청이 먼저 커밋)
    #[error("Concurrent update lost: {0}")]
    RaceLost(String),

    // ============ 502 Bad Gateway ============
    #[error("External service error: {0}")]
    ExternalService(String),

    // ============ 500 Internal Server Error ============
    #[error("Database error: {0}")]
    Database(String),

    /// 생성한 코드가 기존 코드와 충돌 (서비스가 새 코드로 재시도)
    #[error("Generated code collided: {0}")]
    CodeCollision(String),
}

/// 상태 충돌 세부 사유
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConflictKind {
    InsufficientPoints { required: i64, available: i64 },
    InsufficientBalance { balance: i64, delta: i64 },
    OutOfStock,
    RewardInactive,
    AlreadyUsed { used_at: Option<DateTime<Utc>> },
    Expired { expires_at: DateTime<Utc> },
    Cancelled,
    WrongMerchant,
    AlreadySpunToday,
    ClientNotActive,
}

impl ConflictKind {
    pub fn code(&self) -> &'static str {
        match self {
            ConflictKind::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            ConflictKind::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            ConflictKind::OutOfStock => "OUT_OF_STOCK",
            ConflictKind::RewardInactive => "REWARD_INACTIVE",
            ConflictKind::AlreadyUsed { .. } => "ALREADY_USED",
            ConflictKind::Expired { .. } => "EXPIRED",
            ConflictKind::Cancelled => "CANCELLED",
            ConflictKind::WrongMerchant => "WRONG_MERCHANT",
            ConflictKind::AlreadySpunToday => "ALREADY_SPUN_TODAY",
            ConflictKind::ClientNotActive => "CLIENT_NOT_ACTIVE",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::InsufficientPoints { required, available } => {
                write!(f, "insufficient points: need {}, have {}", required, available)
            }
            ConflictKind::InsufficientBalance { balance, delta } => {
                write!(f, "balance {} cannot absorb {}", balance, delta)
            }
            ConflictKind::OutOfStock => write!(f, "reward out of stock"),
            ConflictKind::RewardInactive => write!(f, "reward is not active"),
            ConflictKind::AlreadyUsed { used_at: Some(at) } => {
                write!(f, "token already used at {}", at.to_rfc3339())
            }
            ConflictKind::AlreadyUsed { used_at: None } => write!(f, "token already used"),
            ConflictKind::Expired { expires_at } => {
                write!(f, "token expired at {}", expires_at.to_rfc3339())
            }
            ConflictKind::Cancelled => write!(f, "token was cancelled"),
            ConflictKind::WrongMerchant => write!(f, "token belongs to another merchant"),
            ConflictKind::AlreadySpunToday => write!(f, "already spun today"),
            ConflictKind::ClientNotActive => write!(f, "client is not active"),
        }
    }
}

impl RewardError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        RewardError::NotFound(resource.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        RewardError::Validation(msg.into())
    }

    /// 충돌 사유 (Conflict가 아니면 None)
    pub fn conflict_kind(&self) -> Option<&ConflictKind> {
        match self {
            RewardError::Conflict(kind) => Some(kind),
            _ => None,
        }
    }
}

/// API 에러 응답 구조
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RewardError {
    fn status_and_body(&self) -> (StatusCode, ErrorResponse) {
        let (status, code, message, details) = match self {
            RewardError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR".to_string(),
                "Validation failed".to_string(),
                Some(serde_json::Value::String(msg.clone())),
            ),
            RewardError::Configuration(msg) => (
                StatusCode::FORBIDDEN,
                "CONFIGURATION_ERROR".to_string(),
                msg.clone(),
                None,
            ),
            RewardError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND".to_string(),
                format!("{} not found", resource),
                None,
            ),
            RewardError::Conflict(kind) => (
                StatusCode::CONFLICT,
                kind.code().to_string(),
                kind.to_string(),
                serde_json::to_value(kind).ok(),
            ),
            RewardError::RaceLost(msg) => (
                StatusCode::CONFLICT,
                "RACE_LOST".to_string(),
                "Concurrent update, re-fetch and retry".to_string(),
                Some(serde_json::Value::String(msg.clone())),
            ),
            RewardError::ExternalService(_) => (
                StatusCode::BAD_GATEWAY,
                "EXTERNAL_SERVICE_ERROR".to_string(),
                "External service unavailable".to_string(),
                None,
            ),

            RewardError::CodeCollision(what) => {
                tracing::error!(collided = %what, "Code generation exhausted its attempts");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CODE_COLLISION".to_string(),
                    "Could not allocate a unique code".to_string(),
                    None,
                )
            }

            // 내부 에러는 클라이언트에 상세 정보 노출 안 함
            RewardError::Database(_) => {
                tracing::error!("Database error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR".to_string(),
                    "Database error occurred".to_string(),
                    None,
                )
            }
        };

        (
            status,
            ErrorResponse {
                error: message,
                code,
                details,
            },
        )
    }
}

impl IntoResponse for RewardError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

/// SQLx 에러를 RewardError로 변환
impl From<sqlx::Error> for RewardError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RewardError::NotFound("row".to_string()),
            other => {
                tracing::error!("SQLx error: {:?}", other);
                RewardError::Database(other.to_string())
            }
        }
    }
}

/// anyhow 에러를 RewardError로 변환
impl From<anyhow::Error> for RewardError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {:?}", err);
        RewardError::Database(err.to_string())
    }
}
