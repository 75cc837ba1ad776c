//! Redemption Lifecycle Manager
//!
//! Issues and closes single-use reward tokens.
//!
//! # Token lifecycle
//!
//! ```text
//! coupon:      used=false ──scan──▶ used=true
//!                  │
//!                  └── expires_at passed ──▶ (rejected as Expired)
//!
//! redemption:  pending ──scan──────▶ used
//!                 │ ├───cancel─────▶ cancelled (refund + restock)
//!                 │ └───expired────▶ expired
//! ```
//!
//! Every transition is a compare-and-set in the store. When the
//! conditional write matches nothing, the token is re-read and the
//! resulting conflict (`AlreadyUsed`, `Cancelled`, `Expired`) is reported.
//! `RaceLost` only surfaces when the re-read still looks eligible.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use super::codes;
use super::ledger::{ensure_active, loyalty_settings, merchant_client};
use super::notifier::{NotificationEvent, Notifier};
use crate::config::EnginePolicy;
use crate::db::{
    CancellationReceipt, Coupon, LoyaltyClient, LoyaltyReward, MerchantSettings, NewCoupon, Prize,
    RedemptionReceipt, RedemptionRequest, RedemptionStatus, RewardStore, RewardToken,
};
use crate::error::{ConflictKind, RewardError, RewardResult};

// ============ Pure rules ============

/// 교환 가능 여부 (비활성 → 고객 상태 → 포인트 → 재고 순)
pub fn ensure_redeemable(reward: &LoyaltyReward, client: &LoyaltyClient) -> RewardResult<()> {
    if !reward.is_active {
        return Err(RewardError::Conflict(ConflictKind::RewardInactive));
    }

    ensure_active(client)?;

    if client.points < reward.points_cost {
        return Err(RewardError::Conflict(ConflictKind::InsufficientPoints {
            required: reward.points_cost,
            available: client.points,
        }));
    }

    if matches!(reward.quantity_available, Some(left) if left <= 0) {
        return Err(RewardError::Conflict(ConflictKind::OutOfStock));
    }

    Ok(())
}

/// 스캔 시점 토큰 상태 판정
pub fn evaluate_token(token: &RewardToken, merchant_id: Uuid, now: DateTime<Utc>) -> RewardResult<()> {
    if token.merchant_id() != merchant_id {
        return Err(RewardError::Conflict(ConflictKind::WrongMerchant));
    }

    let conflict = match token {
        RewardToken::Coupon(coupon) => {
            if coupon.used {
                Some(ConflictKind::AlreadyUsed {
                    used_at: coupon.used_at,
                })
            } else if coupon.expires_at <= now {
                Some(ConflictKind::Expired {
                    expires_at: coupon.expires_at,
                })
            } else {
                None
            }
        }
        RewardToken::Redemption(redemption) => match redemption.status {
            RedemptionStatus::Used => Some(ConflictKind::AlreadyUsed {
                used_at: redemption.used_at,
            }),
            RedemptionStatus::Cancelled => Some(ConflictKind::Cancelled),
            RedemptionStatus::Expired => Some(ConflictKind::Expired {
                expires_at: redemption.expires_at.unwrap_or(redemption.created_at),
            }),
            RedemptionStatus::Pending => match redemption.expires_at {
                Some(expires_at) if expires_at <= now => Some(ConflictKind::Expired { expires_at }),
                _ => None,
            },
        },
    };

    match conflict {
        Some(kind) => Err(RewardError::Conflict(kind)),
        None => Ok(()),
    }
}

/// 휠 당첨 쿠폰 생성 요청
pub(crate) fn new_coupon(
    settings: &MerchantSettings,
    prize: &Prize,
    policy: &EnginePolicy,
    now: DateTime<Utc>,
) -> NewCoupon {
    let code = codes::coupon_code(&mut rand::thread_rng(), &settings.coupon_prefix);
    NewCoupon {
        merchant_id: settings.merchant_id,
        code,
        prize_name: prize.name.clone(),
        expires_at: now + policy.coupon_ttl,
    }
}

// ============ Service ============

pub struct RedemptionManager {
    store: Arc<dyn RewardStore>,
    notifier: Notifier,
    policy: EnginePolicy,
}

impl RedemptionManager {
    pub fn new(store: Arc<dyn RewardStore>, notifier: Notifier, policy: EnginePolicy) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    /// 당첨 스핀에 쿠폰 발급
    pub async fn issue_coupon(&self, spin_id: Uuid, prize: &Prize) -> RewardResult<Coupon> {
        let settings = self
            .store
            .merchant_settings(prize.merchant_id)
            .await?
            .ok_or_else(|| RewardError::not_found("merchant"))?;

        let coupon = codes::with_fresh_code(|| {
            self.store
                .insert_coupon(spin_id, new_coupon(&settings, prize, &self.policy, Utc::now()))
        })
        .await?;

        tracing::info!(
            spin_id = %spin_id,
            code = %coupon.code,
            prize = %coupon.prize_name,
            "Coupon issued"
        );

        self.notifier.emit(
            coupon.merchant_id,
            NotificationEvent::CouponIssued,
            json!({
                "code": coupon.code,
                "prize_name": coupon.prize_name,
                "expires_at": coupon.expires_at,
            }),
        );

        Ok(coupon)
    }

    /// 포인트로 보상 교환
    ///
    /// 사전 검사는 빠른 실패용. 실제 판정은 스토어가 잠금 안에서 다시 수행한다.
    pub async fn redeem_reward(
        &self,
        merchant_id: Uuid,
        client_id: Uuid,
        reward_id: Uuid,
    ) -> RewardResult<RedemptionReceipt> {
        let reward = self
            .store
            .find_reward(reward_id)
            .await?
            .filter(|reward| reward.merchant_id == merchant_id)
            .ok_or_else(|| RewardError::not_found("reward"))?;

        loyalty_settings(self.store.as_ref(), merchant_id).await?;
        let client = merchant_client(self.store.as_ref(), client_id, merchant_id).await?;

        if let Err(err) = ensure_redeemable(&reward, &client) {
            tracing::debug!(client_id = %client_id, reward_id = %reward_id, error = %err, "Redemption rejected");
            return Err(err);
        }

        let now = Utc::now();
        let expires_at = self.policy.reward_code_ttl.map(|ttl| now + ttl);
        let receipt = codes::with_fresh_code(|| {
            self.store.redeem_reward(RedemptionRequest {
                client_id,
                merchant_id,
                reward_id,
                redemption_code: codes::redemption_code(&mut rand::thread_rng()),
                expires_at,
            })
        })
        .await?;

        tracing::info!(
            client_id = %client_id,
            reward = %receipt.reward.name,
            code = %receipt.redemption.redemption_code,
            balance = receipt.transaction.balance_after,
            "Reward redeemed"
        );

        self.notifier.emit(
            merchant_id,
            NotificationEvent::RewardRedeemed,
            json!({
                "client_id": client_id,
                "reward_id": reward_id,
                "redemption_code": receipt.redemption.redemption_code,
                "points_spent": receipt.redemption.points_spent,
            }),
        );

        Ok(receipt)
    }

    /// 스캔 검증 (상태 변경 없음, 만료된 pending 교환 코드만 expired 처리)
    pub async fn validate_token(&self, code: &str, merchant_id: Uuid) -> RewardResult<RewardToken> {
        let token = self.lookup(code).await?;
        let now = Utc::now();

        if let Err(err) = evaluate_token(&token, merchant_id, now) {
            self.settle_expired(&token, &err, now).await?;
            return Err(err);
        }

        Ok(token)
    }

    /// 사용 처리 (compare-and-set)
    pub async fn mark_token_used(&self, code: &str, merchant_id: Uuid) -> RewardResult<RewardToken> {
        let token = self.lookup(code).await?;
        let now = Utc::now();

        if let Err(err) = evaluate_token(&token, merchant_id, now) {
            self.settle_expired(&token, &err, now).await?;
            tracing::debug!(code = %token.code(), error = %err, "Token use rejected");
            return Err(err);
        }

        let used = match &token {
            RewardToken::Coupon(coupon) => self
                .store
                .mark_coupon_used(coupon.id, now)
                .await?
                .map(RewardToken::Coupon),
            RewardToken::Redemption(redemption) => self
                .store
                .mark_redemption_used(redemption.id, now)
                .await?
                .map(RewardToken::Redemption),
        };

        let Some(used) = used else {
            return Err(self.lost_transition(token.code(), merchant_id).await);
        };

        tracing::info!(code = %used.code(), kind = used.kind(), "Token used");

        self.notifier.emit(
            merchant_id,
            NotificationEvent::TokenUsed,
            json!({ "code": used.code(), "kind": used.kind() }),
        );

        Ok(used)
    }

    /// pending 교환 취소 (환불 + 재고 복구)
    pub async fn cancel_redemption(&self, code: &str, merchant_id: Uuid) -> RewardResult<CancellationReceipt> {
        let token = self.lookup(code).await?;
        let RewardToken::Redemption(redemption) = &token else {
            return Err(RewardError::validation("only redemption codes can be cancelled"));
        };

        let now = Utc::now();
        if let Err(err) = evaluate_token(&token, merchant_id, now) {
            self.settle_expired(&token, &err, now).await?;
            return Err(err);
        }

        let Some(receipt) = self.store.cancel_redemption(redemption.id, now).await? else {
            return Err(self.lost_transition(&redemption.redemption_code, merchant_id).await);
        };

        tracing::info!(
            code = %receipt.redemption.redemption_code,
            refund = receipt.refund.points,
            balance = receipt.refund.balance_after,
            "Redemption cancelled"
        );

        self.notifier.emit(
            merchant_id,
            NotificationEvent::RedemptionCancelled,
            json!({
                "client_id": receipt.redemption.client_id,
                "redemption_code": receipt.redemption.redemption_code,
                "refund": receipt.refund.points,
            }),
        );

        Ok(receipt)
    }

    async fn lookup(&self, code: &str) -> RewardResult<RewardToken> {
        let code = codes::normalize_code(code);
        if code.is_empty() {
            return Err(RewardError::validation("code is required"));
        }

        self.store
            .find_token(&code)
            .await?
            .ok_or_else(|| RewardError::not_found("token"))
    }

    /// 만료 판정된 pending 교환 코드를 expired로 전이
    async fn settle_expired(&self, token: &RewardToken, err: &RewardError, now: DateTime<Utc>) -> RewardResult<()> {
        if let (RewardToken::Redemption(redemption), Some(ConflictKind::Expired { .. })) =
            (token, err.conflict_kind())
        {
            if redemption.status == RedemptionStatus::Pending
                && self.store.expire_redemption(redemption.id, now).await?.is_some()
            {
                tracing::info!(code = %redemption.redemption_code, "Redemption expired");
            }
        }
        Ok(())
    }

    /// CAS 실패 후 재조회해서 실제 충돌 사유 보고
    async fn lost_transition(&self, code: &str, merchant_id: Uuid) -> RewardError {
        let current = match self.store.find_token(code).await {
            Ok(Some(token)) => token,
            Ok(None) => return RewardError::not_found("token"),
            Err(err) => return err,
        };

        match evaluate_token(&current, merchant_id, Utc::now()) {
            Err(err) => {
                tracing::debug!(code = %code, error = %err, "Lost token transition");
                err
            }
            Ok(()) => RewardError::RaceLost(format!("token {} changed concurrently", code)),
        }
    }
}
