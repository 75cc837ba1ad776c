//! Token Scan Endpoints
//!
//! 직원 스캔: 쿠폰 / 교환 코드 검증, 사용 처리, 취소.
//! 세 핸들러 모두 경로의 머천트가 토큰 소유 머천트와 같아야 한다.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    db::{CancellationReceipt, RewardToken},
    error::RewardError,
    types::ApiResponse,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// 쿠폰 코드 또는 RWD- 교환 코드 (대소문자 무관)
    pub code: String,
}

/// POST /merchants/:merchant_id/tokens/validate
pub async fn validate_token(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<ApiResponse<RewardToken>>, RewardError> {
    let token = state.engine.validate_token(&req.code, merchant_id).await?;
    Ok(Json(ApiResponse::success(token)))
}

/// POST /merchants/:merchant_id/tokens/use
pub async fn use_token(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<ApiResponse<RewardToken>>, RewardError> {
    let token = state.engine.mark_token_used(&req.code, merchant_id).await?;
    Ok(Json(ApiResponse::success(token)))
}

/// POST /merchants/:merchant_id/tokens/cancel
pub async fn cancel_token(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<ApiResponse<CancellationReceipt>>, RewardError> {
    let receipt = state.engine.cancel_redemption(&req.code, merchant_id).await?;
    Ok(Json(ApiResponse::success(receipt)))
}
