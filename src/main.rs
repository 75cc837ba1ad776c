//! Review Rewards Engine API Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Visitor page / Staff scanner / Dashboard            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum Web Server                         │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Routes Layer                        ││
//! │  │  /health  /spin  /clients/*  /tokens/*  /feed           ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Services Layer                        ││
//! │  │  RewardEngine  (wheel, ledger, identity, redemption)    ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Data Layer                            ││
//! │  │  PostgreSQL (conditional UPDATE + transactions)         ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::HeaderValue, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// 라이브러리에서 가져오기
use reward_engine_api::{
    routes,
    services::{BroadcastDispatcher, Notifier},
    AppState, Config, Database, RewardEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "reward_engine_api=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Review Rewards Engine API Server");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!(environment = ?config.environment, "📋 Configuration loaded");

    // 데이터베이스 연결
    let db = Database::connect(&config.database_url, config.db_max_connections).await?;
    tracing::info!("🗄️  Database connected");

    // 마이그레이션 실행
    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    // 알림 채널 + 엔진
    let feed = Arc::new(BroadcastDispatcher::new());
    let engine = RewardEngine::new(
        Arc::new(db),
        Notifier::new(feed.clone()),
        config.engine_policy(),
    );
    tracing::info!(
        coupon_ttl_hours = config.coupon_ttl_hours,
        reward_code_ttl_days = ?config.reward_code_ttl_days,
        "🎡 Reward engine initialized"
    );

    // 앱 상태 구성
    let state = AppState {
        engine: Arc::new(engine),
        feed,
        config: Arc::new(config.clone()),
    };

    // 라우터 구성
    let app = create_router(state);

    // 서버 시작
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// 라우터 생성 (라우트 테이블은 `routes::router`)
fn create_router(state: AppState) -> Router {
    // CORS 설정
    // 프로덕션에서는 특정 도메인만 허용
    // 개발 환경에서는 localhost 허용
    let cors = if state.config.is_production() {
        // 프로덕션: 특정 도메인만 허용 (환경변수로 설정)
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "https://yourdomain.com".to_string());
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        // 개발: localhost 허용
        CorsLayer::new()
            .allow_origin([
                HeaderValue::from_static("http://localhost:5173"), // Vite dev server
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:5173"),
            ])
            .allow_methods(Any)
            .allow_headers(Any)
    };

    routes::router(state)
        // 미들웨어
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
