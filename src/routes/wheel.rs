//! Wheel Endpoints
//!
//! 휠 미리보기 + 하루 1회 스핀

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::RewardError,
    services::{SpinOutcome, WheelSegment},
    types::ApiResponse,
    AppState,
};

// ============ Request/Response Types ============

#[derive(Debug, Serialize)]
pub struct WheelResponse {
    pub merchant_id: Uuid,
    pub segments: Vec<WheelSegment>,
}

/// 스핀 요청
#[derive(Debug, Deserialize)]
pub struct SpinRequest {
    /// 방문자 브라우저가 생성한 불투명 토큰 (하루 1회 제한 키)
    pub identity_token: String,
}

// ============ Handlers ============

/// GET /merchants/:merchant_id/wheel
pub async fn preview_wheel(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
) -> Result<Json<ApiResponse<WheelResponse>>, RewardError> {
    let segments = state.engine.build_segments(merchant_id).await?;
    Ok(Json(ApiResponse::success(WheelResponse {
        merchant_id,
        segments,
    })))
}

/// POST /merchants/:merchant_id/spin
///
/// # Response
///
/// ```json
/// {
///   "success": true,
///   "data": {
///     "outcome": "prize",
///     "segment_index": 2,
///     "segments": [...],
///     "spin": { "id": "...", ... },
///     "coupon": { "code": "CAFE-7K2Q9X", "expires_at": "..." }
///   }
/// }
/// ```
pub async fn spin(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(req): Json<SpinRequest>,
) -> Result<Json<ApiResponse<SpinOutcome>>, RewardError> {
    let outcome = state.engine.spin(merchant_id, &req.identity_token).await?;
    Ok(Json(ApiResponse::success(outcome)))
}
