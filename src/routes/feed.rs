//! Live Feed WebSocket
//!
//! 머천트 대시보드용 실시간 알림 스트림
//!
//! # Endpoints
//! - `GET /merchants/:merchant_id/feed` - WebSocket 연결

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::error::RewardError;
use crate::AppState;

/// WebSocket 업그레이드 핸들러
///
/// 등록되지 않은 머천트는 업그레이드 전에 404.
pub async fn feed_handler(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, RewardError> {
    state.engine.merchant_settings(merchant_id).await?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, merchant_id))
        .into_response())
}

/// WebSocket 연결 처리
async fn handle_socket(socket: WebSocket, state: AppState, merchant_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.feed.subscribe(merchant_id).await;

    tracing::info!(merchant_id = %merchant_id, "Dashboard feed connected");

    // 수신 태스크 (Close 감지용, 클라이언트 메시지는 무시)
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    // 송신 태스크
    let mut send_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(notification) => {
                    let Ok(json) = serde_json::to_string(&notification) else {
                        continue;
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(merchant_id = %merchant_id, skipped, "Dashboard feed lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 한쪽이 끝나면 다른 쪽도 정리
    tokio::select! {
        _ = &mut recv_task => {
            send_task.abort();
            // 수신기 drop 대기
            let _ = send_task.await;
        }
        _ = &mut send_task => recv_task.abort(),
    }

    state.feed.release(merchant_id).await;

    tracing::info!(merchant_id = %merchant_id, "Dashboard feed disconnected");
}
