//! Repository Pattern Implementation
//!
//! `RewardStore` is the narrow persistence seam the engine talks to.
//!
//! Every method is one atomic unit against the store: the PostgreSQL
//! implementation wraps multi-row work in a transaction and expresses
//! single-row state transitions as conditional updates; the in-memory
//! test store holds one lock for the whole call.
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌──────────────────┐
//! │   Services   │────▶│  RewardStore  │────▶│ Database (PgPool)│
//! └──────────────┘     │    (trait)    │     └──────────────────┘
//!                      │               │     ┌──────────────────┐
//!                      │               │────▶│ MemoryStore(test)│
//!                      └───────────────┘     └──────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::models::*;
use crate::error::RewardResult;

/// 고객 생성 결과
#[derive(Debug, Clone)]
pub enum ClientInsert {
    /// 새 고객 + 웰컴 원장 행
    Created {
        client: LoyaltyClient,
        welcome: PointsTransaction,
    },
    /// (merchant, phone) 또는 (merchant, email) 유니크 충돌
    Duplicate,
}

#[async_trait]
pub trait RewardStore: Send + Sync {
    // ============ Merchant / Wheel ============

    async fn merchant_settings(&self, merchant_id: Uuid) -> RewardResult<Option<MerchantSettings>>;

    async fn active_prizes(&self, merchant_id: Uuid) -> RewardResult<Vec<Prize>>;

    async fn find_spin_on(
        &self,
        merchant_id: Uuid,
        identity_token: &str,
        day: NaiveDate,
    ) -> RewardResult<Option<SpinRecord>>;

    /// Persists the spin and, for a winning spin, its coupon.
    /// A second spin for the same `(merchant, token, day)` fails with
    /// `Conflict(AlreadySpunToday)`.
    async fn record_spin(
        &self,
        spin: NewSpin,
        coupon: Option<NewCoupon>,
    ) -> RewardResult<(SpinRecord, Option<Coupon>)>;

    async fn insert_coupon(&self, spin_id: Uuid, coupon: NewCoupon) -> RewardResult<Coupon>;

    // ============ Clients ============

    async fn find_client(&self, client_id: Uuid) -> RewardResult<Option<LoyaltyClient>>;

    async fn find_client_by_phone(
        &self,
        merchant_id: Uuid,
        phone: &str,
    ) -> RewardResult<Option<LoyaltyClient>>;

    async fn find_client_by_email(
        &self,
        merchant_id: Uuid,
        email: &str,
    ) -> RewardResult<Option<LoyaltyClient>>;

    async fn touch_client(&self, client_id: Uuid, at: DateTime<Utc>) -> RewardResult<LoyaltyClient>;

    /// Inserts the client with `points = 0` and posts its welcome entry
    /// through the ledger in the same unit.
    async fn create_client(&self, client: NewClient, welcome_points: i64) -> RewardResult<ClientInsert>;

    // ============ Ledger ============

    /// The only writer of `loyalty_clients.points`.
    async fn apply_ledger_entry(&self, entry: LedgerEntry) -> RewardResult<PointsTransaction>;

    async fn transactions(&self, client_id: Uuid) -> RewardResult<Vec<PointsTransaction>>;

    // ============ Rewards / Tokens ============

    async fn find_reward(&self, reward_id: Uuid) -> RewardResult<Option<LoyaltyReward>>;

    /// Stock decrement, ledger debit and code creation, all or nothing.
    async fn redeem_reward(&self, request: RedemptionRequest) -> RewardResult<RedemptionReceipt>;

    /// Looks a code up among redemption codes, then coupons.
    async fn find_token(&self, code: &str) -> RewardResult<Option<RewardToken>>;

    /// `used = false → true` when unexpired. `None` when the condition failed.
    async fn mark_coupon_used(&self, coupon_id: Uuid, at: DateTime<Utc>) -> RewardResult<Option<Coupon>>;

    /// `pending → used` when unexpired. `None` when the condition failed.
    async fn mark_redemption_used(
        &self,
        redemption_id: Uuid,
        at: DateTime<Utc>,
    ) -> RewardResult<Option<RedeemedReward>>;

    /// `pending → expired` once `expires_at <= at`.
    async fn expire_redemption(
        &self,
        redemption_id: Uuid,
        at: DateTime<Utc>,
    ) -> RewardResult<Option<RedeemedReward>>;

    /// `pending → cancelled` with points refund and stock restore.
    async fn cancel_redemption(
        &self,
        redemption_id: Uuid,
        at: DateTime<Utc>,
    ) -> RewardResult<Option<CancellationReceipt>>;

    async fn health_check(&self) -> RewardResult<()>;
}
