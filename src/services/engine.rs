//! Reward Engine
//!
//! Facade the HTTP layer talks to. Owns one instance of each component,
//! all sharing the same store and notifier.
//!
//! ```text
//!                      ┌──────────────┐
//!   routes ───────────▶│ RewardEngine │
//!                      └──────┬───────┘
//!        ┌──────────┬─────────┼───────────┬────────────────┐
//!        ▼          ▼         ▼           ▼                ▼
//!   WheelService Identity  PointsLedger RedemptionManager  Notifier
//!        │       Resolver     │           │
//!        └──────────┴─────────┴───────────┴──▶ RewardStore
//! ```

use std::sync::Arc;

use uuid::Uuid;

use super::identity::IdentityResolver;
use super::ledger::{BalanceUpdate, LedgerAudit, PointsLedger};
use super::notifier::Notifier;
use super::redemption::RedemptionManager;
use super::segments::WheelSegment;
use super::selector::{self, SpecialOdds};
use super::wheel::{SpinOutcome, WheelService};
use crate::config::EnginePolicy;
use crate::db::{
    CancellationReceipt, Coupon, LoyaltyClient, MerchantSettings, PointsTransaction, Prize,
    RedemptionReceipt, RewardStore, RewardToken,
};
use crate::error::{RewardError, RewardResult};
use crate::types::Contact;

pub struct RewardEngine {
    store: Arc<dyn RewardStore>,
    wheel: WheelService,
    identity: IdentityResolver,
    ledger: PointsLedger,
    redemption: RedemptionManager,
}

impl RewardEngine {
    pub fn new(store: Arc<dyn RewardStore>, notifier: Notifier, policy: EnginePolicy) -> Self {
        Self {
            wheel: WheelService::new(store.clone(), notifier.clone(), policy.clone()),
            identity: IdentityResolver::new(store.clone(), notifier.clone()),
            ledger: PointsLedger::new(store.clone(), notifier.clone()),
            redemption: RedemptionManager::new(store.clone(), notifier, policy),
            store,
        }
    }

    // ============ Wheel ============

    pub async fn build_segments(&self, merchant_id: Uuid) -> RewardResult<Vec<WheelSegment>> {
        self.wheel.preview(merchant_id).await
    }

    pub fn select_outcome(&self, segments: &[WheelSegment], odds: SpecialOdds) -> RewardResult<usize> {
        selector::select_outcome(segments, odds, &mut rand::thread_rng())
    }

    pub async fn spin(&self, merchant_id: Uuid, identity_token: &str) -> RewardResult<SpinOutcome> {
        self.wheel.spin(merchant_id, identity_token).await
    }

    pub async fn issue_coupon(&self, spin_id: Uuid, prize: &Prize) -> RewardResult<Coupon> {
        self.redemption.issue_coupon(spin_id, prize).await
    }

    // ============ Loyalty ============

    pub async fn resolve_or_create_client(
        &self,
        merchant_id: Uuid,
        contact: &Contact,
        name: Option<&str>,
    ) -> RewardResult<(LoyaltyClient, bool)> {
        self.identity.resolve_or_create(merchant_id, contact, name).await
    }

    pub async fn earn_points(
        &self,
        client_id: Uuid,
        merchant_id: Uuid,
        purchase_amount: i64,
    ) -> RewardResult<BalanceUpdate> {
        self.ledger.earn_points(client_id, merchant_id, purchase_amount).await
    }

    pub async fn adjust_points(
        &self,
        client_id: Uuid,
        merchant_id: Uuid,
        delta: i64,
        reason: &str,
    ) -> RewardResult<BalanceUpdate> {
        self.ledger.adjust_points(client_id, merchant_id, delta, reason).await
    }

    pub async fn transactions(
        &self,
        client_id: Uuid,
        merchant_id: Uuid,
    ) -> RewardResult<Vec<PointsTransaction>> {
        self.ledger.transactions(client_id, merchant_id).await
    }

    pub async fn verify_balance(&self, client_id: Uuid, merchant_id: Uuid) -> RewardResult<LedgerAudit> {
        self.ledger.verify_balance(client_id, merchant_id).await
    }

    // ============ Redemption ============

    pub async fn redeem_reward(
        &self,
        merchant_id: Uuid,
        client_id: Uuid,
        reward_id: Uuid,
    ) -> RewardResult<RedemptionReceipt> {
        self.redemption.redeem_reward(merchant_id, client_id, reward_id).await
    }

    pub async fn validate_token(&self, code: &str, merchant_id: Uuid) -> RewardResult<RewardToken> {
        self.redemption.validate_token(code, merchant_id).await
    }

    pub async fn mark_token_used(&self, code: &str, merchant_id: Uuid) -> RewardResult<RewardToken> {
        self.redemption.mark_token_used(code, merchant_id).await
    }

    pub async fn cancel_redemption(&self, code: &str, merchant_id: Uuid) -> RewardResult<CancellationReceipt> {
        self.redemption.cancel_redemption(code, merchant_id).await
    }

    /// 머천트 설정 (없으면 NotFound)
    pub async fn merchant_settings(&self, merchant_id: Uuid) -> RewardResult<MerchantSettings> {
        self.store
            .merchant_settings(merchant_id)
            .await?
            .ok_or_else(|| RewardError::not_found("merchant"))
    }

    pub async fn health_check(&self) -> RewardResult<()> {
        self.store.health_check().await
    }
}
