//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크
//! - `/merchants/:merchant_id/wheel`, `/spin` - 스핀 휠
//! - `/merchants/:merchant_id/clients/*` - 로열티 고객, 포인트, 교환
//! - `/merchants/:merchant_id/tokens/*` - 직원 스캔 (검증/사용/취소)
//! - `/merchants/:merchant_id/feed` - WebSocket 실시간 알림

pub mod clients;
pub mod feed;
pub mod health;
pub mod tokens;
pub mod wheel;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

/// 라우트 테이블 (미들웨어 제외)
///
/// ```text
/// GET  /health
///
/// GET  /merchants/:merchant_id/wheel                          - 세그먼트 미리보기
/// POST /merchants/:merchant_id/spin                           - 하루 1회 스핀
///
/// POST /merchants/:merchant_id/clients                        - 조회 또는 등록
/// POST /merchants/:merchant_id/clients/:client_id/earn        - 구매 적립
/// POST /merchants/:merchant_id/clients/:client_id/adjust      - 수동 조정
/// GET  /merchants/:merchant_id/clients/:client_id/transactions
/// POST /merchants/:merchant_id/clients/:client_id/redeem      - 보상 교환
///
/// POST /merchants/:merchant_id/tokens/validate
/// POST /merchants/:merchant_id/tokens/use
/// POST /merchants/:merchant_id/tokens/cancel
///
/// GET  /merchants/:merchant_id/feed                           - WebSocket
/// ```
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        // Wheel
        .route("/merchants/:merchant_id/wheel", get(wheel::preview_wheel))
        .route("/merchants/:merchant_id/spin", post(wheel::spin))
        // Loyalty
        .route("/merchants/:merchant_id/clients", post(clients::resolve_client))
        .route(
            "/merchants/:merchant_id/clients/:client_id/earn",
            post(clients::earn_points),
        )
        .route(
            "/merchants/:merchant_id/clients/:client_id/adjust",
            post(clients::adjust_points),
        )
        .route(
            "/merchants/:merchant_id/clients/:client_id/transactions",
            get(clients::transactions),
        )
        .route(
            "/merchants/:merchant_id/clients/:client_id/redeem",
            post(clients::redeem_reward),
        )
        // Staff scan
        .route("/merchants/:merchant_id/tokens/validate", post(tokens::validate_token))
        .route("/merchants/:merchant_id/tokens/use", post(tokens::use_token))
        .route("/merchants/:merchant_id/tokens/cancel", post(tokens::cancel_token))
        // Dashboard
        .route("/merchants/:merchant_id/feed", get(feed::feed_handler))
        .with_state(state)
}
