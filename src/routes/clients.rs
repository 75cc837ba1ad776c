//! Loyalty Client Endpoints
//!
//! 고객 등록(멱등), 포인트 적립/조정, 거래 내역, 보상 교환

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::{LoyaltyClient, PointsTransaction},
    error::RewardError,
    services::BalanceUpdate,
    types::{ApiResponse, Contact},
    AppState,
};

// ============ Request/Response Types ============

/// 고객 조회/등록 요청 (phone 또는 email 필수)
#[derive(Debug, Deserialize)]
pub struct ResolveClientRequest {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveClientResponse {
    pub client: LoyaltyClient,
    pub is_new: bool,
}

/// 구매 적립 요청
#[derive(Debug, Deserialize)]
pub struct EarnRequest {
    /// 구매 금액 (최소 화폐 단위, 예: 센트)
    pub purchase_amount: i64,
}

/// 수동 조정 요청
#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    /// 부호 있는 증감량
    pub points: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub reward_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub redemption_code: String,
    pub reward_name: String,
    pub points_spent: i64,
    pub balance: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

// ============ Handlers ============

/// POST /merchants/:merchant_id/clients
pub async fn resolve_client(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    Json(req): Json<ResolveClientRequest>,
) -> Result<Json<ApiResponse<ResolveClientResponse>>, RewardError> {
    let contact = Contact {
        phone: req.phone,
        email: req.email,
    };

    let (client, is_new) = state
        .engine
        .resolve_or_create_client(merchant_id, &contact, req.name.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(ResolveClientResponse { client, is_new })))
}

/// POST /merchants/:merchant_id/clients/:client_id/earn
pub async fn earn_points(
    State(state): State<AppState>,
    Path((merchant_id, client_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<EarnRequest>,
) -> Result<Json<ApiResponse<BalanceUpdate>>, RewardError> {
    let update = state
        .engine
        .earn_points(client_id, merchant_id, req.purchase_amount)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

/// POST /merchants/:merchant_id/clients/:client_id/adjust
pub async fn adjust_points(
    State(state): State<AppState>,
    Path((merchant_id, client_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<AdjustRequest>,
) -> Result<Json<ApiResponse<BalanceUpdate>>, RewardError> {
    let update = state
        .engine
        .adjust_points(client_id, merchant_id, req.points, req.reason.as_deref().unwrap_or(""))
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

/// GET /merchants/:merchant_id/clients/:client_id/transactions
pub async fn transactions(
    State(state): State<AppState>,
    Path((merchant_id, client_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<Vec<PointsTransaction>>>, RewardError> {
    let rows = state.engine.transactions(client_id, merchant_id).await?;
    Ok(Json(ApiResponse::success(rows)))
}

/// POST /merchants/:merchant_id/clients/:client_id/redeem
pub async fn redeem_reward(
    State(state): State<AppState>,
    Path((merchant_id, client_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<ApiResponse<RedeemResponse>>, RewardError> {
    let receipt = state
        .engine
        .redeem_reward(merchant_id, client_id, req.reward_id)
        .await?;

    Ok(Json(ApiResponse::success(RedeemResponse {
        redemption_code: receipt.redemption.redemption_code,
        reward_name: receipt.reward.name,
        points_spent: receipt.redemption.points_spent,
        balance: receipt.transaction.balance_after,
        expires_at: receipt.redemption.expires_at,
    })))
}
