//! Review Rewards Engine API Library
//!
//! # Overview
//!
//! 리뷰 보상 플랫폼의 보상 발급/교환 엔진.
//! 스핀 휠 쿠폰과 로열티 포인트 두 가지 보상 경로를 제공한다.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                           API                             │
//! │                                                           │
//! │  ┌─────────┐   ┌──────────────────────────────────────┐  │
//! │  │ Routes  │──▶│            RewardEngine              │  │
//! │  └─────────┘   │  WheelService   IdentityResolver     │  │
//! │                │  PointsLedger   RedemptionManager    │  │
//! │                └──────────┬───────────────┬───────────┘  │
//! │                           │               │              │
//! │                   ┌───────▼──────┐  ┌─────▼──────┐       │
//! │                   │ RewardStore  │  │  Notifier  │       │
//! │                   └───────┬──────┘  └─────┬──────┘       │
//! └───────────────────────────┼───────────────┼──────────────┘
//!                             ▼               ▼
//!                      ┌────────────┐  ┌──────────────┐
//!                      │ PostgreSQL │  │ /feed (ws)   │
//!                      └────────────┘  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 + 엔진 정책 (쿠폰/교환 코드 TTL)
//! - `error`: 에러 타입 및 HTTP 매핑
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `services`: 휠, 원장, 고객 식별, 교환/토큰 생명주기
//! - `db`: 저장소 트레이트 + PostgreSQL 구현
//! - `types`: 공통 타입 정의
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reward_engine_api::{config::Config, db::Database, services::{Notifier, RewardEngine}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::connect(&config.database_url, config.db_max_connections).await?;
//!     let engine = RewardEngine::new(Arc::new(db), Notifier::disabled(), config.engine_policy());
//!
//!     let (client, is_new) = engine
//!         .resolve_or_create_client(merchant_id, &Contact::phone("0612345678"), None)
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod db;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use error::RewardError;
pub use db::Database;
pub use services::RewardEngine;

use services::BroadcastDispatcher;

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RewardEngine>,
    /// 대시보드 WebSocket 구독용 (엔진의 Notifier와 같은 인스턴스)
    pub feed: Arc<BroadcastDispatcher>,
    pub config: Arc<Config>,
}
