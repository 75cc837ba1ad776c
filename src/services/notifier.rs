//! Notification Service
//!
//! Best-effort outbound events emitted after a core operation commits.
//!
//! # Features
//! - Per-merchant live dashboard feed (broadcast channels)
//! - Fire-and-forget emission: failures are logged, never returned
//!
//! ```text
//! ┌──────────────┐  emit   ┌──────────┐ spawn ┌─────────────────────┐
//! │ RewardEngine │────────▶│ Notifier │──────▶│ NotificationDispatcher│
//! └──────────────┘ (after  └──────────┘       └──────────┬──────────┘
//!                  commit)                               │
//!                                     ┌──────────────────┼─────────────┐
//!                                     ▼                  ▼             ▼
//!                               merchant A tx      merchant B tx     ...
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::error::{RewardError, RewardResult};

/// 머천트 채널 버퍼 크기
const MERCHANT_CHANNEL_CAPACITY: usize = 256;

/// 알림 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    ClientEnrolled,
    PointsEarned,
    PointsAdjusted,
    RewardRedeemed,
    RedemptionCancelled,
    TokenUsed,
    SpinCompleted,
    CouponIssued,
}

/// 알림 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub merchant_id: Uuid,
    pub event: NotificationEvent,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(merchant_id: Uuid, event: NotificationEvent, payload: serde_json::Value) -> Self {
        Self {
            merchant_id,
            event,
            payload,
            emitted_at: Utc::now(),
        }
    }
}

/// 알림 전송 seam (메시징 제공자, 대시보드 피드 등)
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> RewardResult<()>;
}

/// 머천트별 브로드캐스트 허브
///
/// 대시보드가 `subscribe`로 구독. 구독자가 없으면 메시지는 그냥 버려진다.
pub struct BroadcastDispatcher {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<Notification>>>>,
}

impl BroadcastDispatcher {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 머천트 채널 구독
    pub async fn subscribe(&self, merchant_id: Uuid) -> broadcast::Receiver<Notification> {
        let mut channels = self.channels.write().await;

        let tx = channels.entry(merchant_id).or_insert_with(|| {
            let (tx, _) = broadcast::channel(MERCHANT_CHANNEL_CAPACITY);
            tx
        });

        tx.subscribe()
    }

    /// 구독 해제 후 정리: 남은 수신자가 없으면 채널 제거
    pub async fn release(&self, merchant_id: Uuid) {
        let mut channels = self.channels.write().await;
        if channels
            .get(&merchant_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(&merchant_id);
        }
    }

    /// 구독 중인 머천트 수
    pub async fn active_channels(&self) -> usize {
        let channels = self.channels.read().await;
        channels.values().filter(|tx| tx.receiver_count() > 0).count()
    }

    /// 보관 중인 채널 수 (수신자 없는 채널 포함)
    pub async fn tracked_channels(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for BroadcastDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationDispatcher for BroadcastDispatcher {
    async fn dispatch(&self, notification: Notification) -> RewardResult<()> {
        let merchant_id = notification.merchant_id;
        let orphaned = {
            let channels = self.channels.read().await;
            match channels.get(&merchant_id) {
                // 수신자 0명은 실패 아님
                Some(tx) => tx.send(notification).is_err(),
                None => false,
            }
        };

        if orphaned {
            self.release(merchant_id).await;
        }
        Ok(())
    }
}

/// 알림 발행기
///
/// 코어 연산 커밋 이후에만 호출. 디스패치는 별도 태스크에서 실행되어
/// 호출자의 결과에 영향을 주지 않는다.
#[derive(Clone)]
pub struct Notifier {
    dispatcher: Option<Arc<dyn NotificationDispatcher>>,
}

impl Notifier {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self {
            dispatcher: Some(dispatcher),
        }
    }

    /// 알림 없음 (배치 작업, 테스트)
    pub fn disabled() -> Self {
        Self { dispatcher: None }
    }

    pub fn emit(&self, merchant_id: Uuid, event: NotificationEvent, payload: serde_json::Value) {
        let Some(dispatcher) = self.dispatcher.clone() else {
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(?event, %merchant_id, "no runtime available, notification dropped");
            return;
        };

        let notification = Notification::new(merchant_id, event, payload);
        handle.spawn(async move {
            if let Err(err) = dispatcher.dispatch(notification).await {
                let err = match err {
                    RewardError::ExternalService(_) => err,
                    other => RewardError::ExternalService(other.to_string()),
                };
                tracing::warn!(?event, %merchant_id, error = %err, "notification dispatch failed");
            }
        });
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("enabled", &self.dispatcher.is_some())
            .finish()
    }
}
