//! In-memory `RewardStore` for tests
//!
//! One write lock per trait call, so every call is atomic in the same way
//! a PostgreSQL transaction is. Uniqueness rules mirror the migration's
//! constraints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::models::*;
use super::repository::{ClientInsert, RewardStore};
use crate::error::{ConflictKind, RewardError, RewardResult};
use crate::services::{ledger, redemption};

#[derive(Default)]
struct State {
    merchants: HashMap<Uuid, MerchantSettings>,
    prizes: Vec<Prize>,
    spins: Vec<SpinRecord>,
    coupons: Vec<Coupon>,
    clients: HashMap<Uuid, LoyaltyClient>,
    transactions: Vec<PointsTransaction>,
    rewards: HashMap<Uuid, LoyaltyReward>,
    redemptions: Vec<RedeemedReward>,
    next_transaction_id: i64,
}

impl State {
    fn apply_entry(&mut self, entry: &LedgerEntry) -> RewardResult<PointsTransaction> {
        let client = self
            .clients
            .get_mut(&entry.client_id)
            .filter(|c| c.merchant_id == entry.merchant_id)
            .ok_or_else(|| RewardError::not_found("client"))?;

        let balance_after = ledger::next_balance(client.points, entry.kind, entry.delta)?;
        let now = Utc::now();

        client.points = balance_after;
        if let Some(amount) = entry.purchase_amount {
            client.total_purchases += amount;
            client.last_visit = now;
        }

        self.next_transaction_id += 1;
        let transaction = PointsTransaction {
            id: self.next_transaction_id,
            client_id: entry.client_id,
            merchant_id: entry.merchant_id,
            kind: entry.kind,
            points: entry.delta,
            balance_after,
            description: entry.description.clone(),
            created_at: now,
        };
        self.transactions.push(transaction.clone());
        Ok(transaction)
    }

    fn insert_coupon(&mut self, spin_id: Uuid, coupon: &NewCoupon) -> RewardResult<Coupon> {
        if self.coupons.iter().any(|c| c.code == coupon.code) {
            return Err(RewardError::CodeCollision("uq_coupons_code".into()));
        }
        if self.coupons.iter().any(|c| c.spin_id == spin_id) {
            return Err(RewardError::Database("duplicate key value violates unique constraint".into()));
        }

        let coupon = Coupon {
            id: Uuid::new_v4(),
            spin_id,
            merchant_id: coupon.merchant_id,
            code: coupon.code.clone(),
            prize_name: coupon.prize_name.clone(),
            expires_at: coupon.expires_at,
            used: false,
            used_at: None,
            created_at: Utc::now(),
        };
        self.coupons.push(coupon.clone());
        Ok(coupon)
    }

    fn has_contact(&self, merchant_id: Uuid, phone: Option<&str>, email: Option<&str>) -> bool {
        self.clients.values().any(|c| {
            c.merchant_id == merchant_id
                && ((phone.is_some() && c.phone.as_deref() == phone)
                    || (email.is_some() && c.email.as_deref() == email))
        })
    }
}

pub struct MemoryStore {
    state: RwLock<State>,
    /// 남은 횟수만큼 연락처 조회가 None 반환 (동시 생성 경쟁 재현용)
    stale_lookups: AtomicUsize,
    /// 남은 횟수만큼 코드 INSERT가 유니크 충돌
    code_collisions: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            stale_lookups: AtomicUsize::new(0),
            code_collisions: AtomicUsize::new(0),
        }
    }

    pub fn insert_merchant(&self, settings: MerchantSettings) {
        self.state
            .write()
            .unwrap()
            .merchants
            .insert(settings.merchant_id, settings);
    }

    pub fn insert_prize(&self, prize: Prize) {
        self.state.write().unwrap().prizes.push(prize);
    }

    pub fn insert_reward(&self, reward: LoyaltyReward) {
        self.state.write().unwrap().rewards.insert(reward.id, reward);
    }

    /// 원장 없이 교환 코드만 삽입
    pub fn insert_redemption(&self, redemption: RedeemedReward) {
        self.state.write().unwrap().redemptions.push(redemption);
    }

    pub fn set_client_status(&self, client_id: Uuid, status: ClientStatus) {
        if let Some(client) = self.state.write().unwrap().clients.get_mut(&client_id) {
            client.status = status;
        }
    }

    pub fn simulate_stale_lookups(&self, count: usize) {
        self.stale_lookups.store(count, Ordering::SeqCst);
    }

    /// 다음 `count`번의 코드 INSERT를 충돌로 처리
    pub fn simulate_code_collisions(&self, count: usize) {
        self.code_collisions.store(count, Ordering::SeqCst);
    }

    pub fn ledger_sum(&self, client_id: Uuid) -> i64 {
        self.state
            .read()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| t.client_id == client_id)
            .map(|t| t.points)
            .sum()
    }

    pub fn client_count(&self, merchant_id: Uuid) -> usize {
        self.state
            .read()
            .unwrap()
            .clients
            .values()
            .filter(|c| c.merchant_id == merchant_id)
            .count()
    }

    pub fn redemptions(&self) -> Vec<RedeemedReward> {
        self.state.read().unwrap().redemptions.clone()
    }

    pub fn spins(&self) -> Vec<SpinRecord> {
        self.state.read().unwrap().spins.clone()
    }

    pub fn coupons(&self) -> Vec<Coupon> {
        self.state.read().unwrap().coupons.clone()
    }

    fn stale(&self) -> bool {
        self.stale_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn collide(&self, constraint: &str) -> RewardResult<()> {
        let hit = self
            .code_collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hit {
            return Err(RewardError::CodeCollision(constraint.to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RewardStore for MemoryStore {
    async fn merchant_settings(&self, merchant_id: Uuid) -> RewardResult<Option<MerchantSettings>> {
        Ok(self.state.read().unwrap().merchants.get(&merchant_id).cloned())
    }

    async fn active_prizes(&self, merchant_id: Uuid) -> RewardResult<Vec<Prize>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .prizes
            .iter()
            .filter(|p| p.merchant_id == merchant_id && p.is_active)
            .cloned()
            .collect())
    }

    async fn find_spin_on(
        &self,
        merchant_id: Uuid,
        identity_token: &str,
        day: NaiveDate,
    ) -> RewardResult<Option<SpinRecord>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .spins
            .iter()
            .find(|s| {
                s.merchant_id == merchant_id
                    && s.client_identity_token == identity_token
                    && s.spin_date == day
            })
            .cloned())
    }

    async fn record_spin(
        &self,
        spin: NewSpin,
        coupon: Option<NewCoupon>,
    ) -> RewardResult<(SpinRecord, Option<Coupon>)> {
        let mut state = self.state.write().unwrap();

        let exists = state.spins.iter().any(|s| {
            s.merchant_id == spin.merchant_id
                && s.client_identity_token == spin.client_identity_token
                && s.spin_date == spin.spin_date
        });
        if exists {
            return Err(RewardError::Conflict(ConflictKind::AlreadySpunToday));
        }

        let record = SpinRecord {
            id: Uuid::new_v4(),
            merchant_id: spin.merchant_id,
            prize_id: spin.prize_id,
            client_identity_token: spin.client_identity_token,
            spin_date: spin.spin_date,
            created_at: Utc::now(),
        };

        let coupon = match coupon {
            Some(new_coupon) => {
                self.collide("uq_coupons_code")?;
                Some(state.insert_coupon(record.id, &new_coupon)?)
            }
            None => None,
        };

        state.spins.push(record.clone());
        Ok((record, coupon))
    }

    async fn insert_coupon(&self, spin_id: Uuid, coupon: NewCoupon) -> RewardResult<Coupon> {
        let mut state = self.state.write().unwrap();
        self.collide("uq_coupons_code")?;
        state.insert_coupon(spin_id, &coupon)
    }

    async fn find_client(&self, client_id: Uuid) -> RewardResult<Option<LoyaltyClient>> {
        Ok(self.state.read().unwrap().clients.get(&client_id).cloned())
    }

    async fn find_client_by_phone(
        &self,
        merchant_id: Uuid,
        phone: &str,
    ) -> RewardResult<Option<LoyaltyClient>> {
        if self.stale() {
            return Ok(None);
        }
        Ok(self
            .state
            .read()
            .unwrap()
            .clients
            .values()
            .find(|c| c.merchant_id == merchant_id && c.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn find_client_by_email(
        &self,
        merchant_id: Uuid,
        email: &str,
    ) -> RewardResult<Option<LoyaltyClient>> {
        if self.stale() {
            return Ok(None);
        }
        Ok(self
            .state
            .read()
            .unwrap()
            .clients
            .values()
            .find(|c| c.merchant_id == merchant_id && c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn touch_client(&self, client_id: Uuid, at: DateTime<Utc>) -> RewardResult<LoyaltyClient> {
        let mut state = self.state.write().unwrap();
        let client = state
            .clients
            .get_mut(&client_id)
            .ok_or_else(|| RewardError::not_found("client"))?;
        client.last_visit = at;
        Ok(client.clone())
    }

    async fn create_client(&self, client: NewClient, welcome_points: i64) -> RewardResult<ClientInsert> {
        let mut state = self.state.write().unwrap();

        if state.has_contact(client.merchant_id, client.phone.as_deref(), client.email.as_deref()) {
            return Ok(ClientInsert::Duplicate);
        }
        self.collide("uq_clients_card_id")?;
        if state.clients.values().any(|c| c.card_id == client.card_id) {
            return Err(RewardError::CodeCollision("uq_clients_card_id".into()));
        }
        if state.clients.values().any(|c| c.qr_code_data == client.qr_code_data) {
            return Err(RewardError::CodeCollision("uq_clients_qr_code".into()));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        state.clients.insert(
            id,
            LoyaltyClient {
                id,
                merchant_id: client.merchant_id,
                card_id: client.card_id,
                name: client.name,
                phone: client.phone,
                email: client.email,
                points: 0,
                total_purchases: 0,
                qr_code_data: client.qr_code_data,
                status: ClientStatus::Active,
                last_visit: now,
                created_at: now,
            },
        );

        let welcome = state.apply_entry(&LedgerEntry {
            client_id: id,
            merchant_id: client.merchant_id,
            kind: TransactionType::Welcome,
            delta: welcome_points,
            description: "Welcome bonus".to_string(),
            purchase_amount: None,
        });

        let welcome = match welcome {
            Ok(welcome) => welcome,
            Err(err) => {
                state.clients.remove(&id);
                return Err(err);
            }
        };

        let created = state
            .clients
            .get(&id)
            .cloned()
            .ok_or_else(|| RewardError::not_found("client"))?;

        Ok(ClientInsert::Created {
            client: created,
            welcome,
        })
    }

    async fn apply_ledger_entry(&self, entry: LedgerEntry) -> RewardResult<PointsTransaction> {
        self.state.write().unwrap().apply_entry(&entry)
    }

    async fn transactions(&self, client_id: Uuid) -> RewardResult<Vec<PointsTransaction>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| t.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn find_reward(&self, reward_id: Uuid) -> RewardResult<Option<LoyaltyReward>> {
        Ok(self.state.read().unwrap().rewards.get(&reward_id).cloned())
    }

    async fn redeem_reward(&self, request: RedemptionRequest) -> RewardResult<RedemptionReceipt> {
        let mut state = self.state.write().unwrap();

        let reward = state
            .rewards
            .get(&request.reward_id)
            .filter(|r| r.merchant_id == request.merchant_id)
            .cloned()
            .ok_or_else(|| RewardError::not_found("reward"))?;

        let client = state
            .clients
            .get(&request.client_id)
            .filter(|c| c.merchant_id == request.merchant_id)
            .cloned()
            .ok_or_else(|| RewardError::not_found("client"))?;

        redemption::ensure_redeemable(&reward, &client)?;

        self.collide("uq_redeemed_rewards_code")?;
        if state
            .redemptions
            .iter()
            .any(|r| r.redemption_code == request.redemption_code)
        {
            return Err(RewardError::CodeCollision("uq_redeemed_rewards_code".into()));
        }

        // 원장 먼저 (실패 시 재고 변경 없음)
        let transaction = state.apply_entry(&LedgerEntry {
            client_id: client.id,
            merchant_id: client.merchant_id,
            kind: TransactionType::Redeem,
            delta: -reward.points_cost,
            description: format!("Redeemed: {}", reward.name),
            purchase_amount: None,
        })?;

        let reward = match state.rewards.get_mut(&reward.id) {
            Some(stored) => {
                if let Some(left) = stored.quantity_available.as_mut() {
                    *left -= 1;
                }
                stored.clone()
            }
            None => reward,
        };

        let redemption = RedeemedReward {
            id: Uuid::new_v4(),
            client_id: client.id,
            merchant_id: client.merchant_id,
            reward_id: reward.id,
            redemption_code: request.redemption_code,
            points_spent: reward.points_cost,
            status: RedemptionStatus::Pending,
            expires_at: request.expires_at,
            used_at: None,
            created_at: Utc::now(),
        };
        state.redemptions.push(redemption.clone());

        Ok(RedemptionReceipt {
            redemption,
            transaction,
            reward,
        })
    }

    async fn find_token(&self, code: &str) -> RewardResult<Option<RewardToken>> {
        let state = self.state.read().unwrap();

        if let Some(redemption) = state.redemptions.iter().find(|r| r.redemption_code == code) {
            return Ok(Some(RewardToken::Redemption(redemption.clone())));
        }

        Ok(state
            .coupons
            .iter()
            .find(|c| c.code == code)
            .cloned()
            .map(RewardToken::Coupon))
    }

    async fn mark_coupon_used(&self, coupon_id: Uuid, at: DateTime<Utc>) -> RewardResult<Option<Coupon>> {
        let mut state = self.state.write().unwrap();
        let coupon = state
            .coupons
            .iter_mut()
            .find(|c| c.id == coupon_id && !c.used && c.expires_at > at);

        Ok(coupon.map(|c| {
            c.used = true;
            c.used_at = Some(at);
            c.clone()
        }))
    }

    async fn mark_redemption_used(
        &self,
        redemption_id: Uuid,
        at: DateTime<Utc>,
    ) -> RewardResult<Option<RedeemedReward>> {
        let mut state = self.state.write().unwrap();
        let redemption = state.redemptions.iter_mut().find(|r| {
            r.id == redemption_id
                && r.status == RedemptionStatus::Pending
                && r.expires_at.map_or(true, |e| e > at)
        });

        Ok(redemption.map(|r| {
            r.status = RedemptionStatus::Used;
            r.used_at = Some(at);
            r.clone()
        }))
    }

    async fn expire_redemption(
        &self,
        redemption_id: Uuid,
        at: DateTime<Utc>,
    ) -> RewardResult<Option<RedeemedReward>> {
        let mut state = self.state.write().unwrap();
        let redemption = state.redemptions.iter_mut().find(|r| {
            r.id == redemption_id
                && r.status == RedemptionStatus::Pending
                && r.expires_at.map_or(false, |e| e <= at)
        });

        Ok(redemption.map(|r| {
            r.status = RedemptionStatus::Expired;
            r.clone()
        }))
    }

    async fn cancel_redemption(
        &self,
        redemption_id: Uuid,
        at: DateTime<Utc>,
    ) -> RewardResult<Option<CancellationReceipt>> {
        let mut state = self.state.write().unwrap();

        let Some(index) = state.redemptions.iter().position(|r| {
            r.id == redemption_id
                && r.status == RedemptionStatus::Pending
                && r.expires_at.map_or(true, |e| e > at)
        }) else {
            return Ok(None);
        };

        let pending = state.redemptions[index].clone();
        let refund = state.apply_entry(&LedgerEntry {
            client_id: pending.client_id,
            merchant_id: pending.merchant_id,
            kind: TransactionType::Adjustment,
            delta: pending.points_spent,
            description: format!("Refund: {}", pending.redemption_code),
            purchase_amount: None,
        })?;

        if let Some(left) = state
            .rewards
            .get_mut(&pending.reward_id)
            .and_then(|r| r.quantity_available.as_mut())
        {
            *left += 1;
        }

        let redemption = &mut state.redemptions[index];
        redemption.status = RedemptionStatus::Cancelled;

        Ok(Some(CancellationReceipt {
            redemption: redemption.clone(),
            refund,
        }))
    }

    async fn health_check(&self) -> RewardResult<()> {
        Ok(())
    }
}

/// 테스트 데이터
pub mod fixtures {
    use super::*;
    use crate::services::codes;

    pub fn merchant_settings(merchant_id: Uuid) -> MerchantSettings {
        MerchantSettings {
            merchant_id,
            name: "Café Test".to_string(),
            coupon_prefix: "CAFE".to_string(),
            wheel_enabled: true,
            unlucky_quantity: 1,
            retry_quantity: 1,
            unlucky_probability: 20,
            retry_probability: 10,
            loyalty_enabled: true,
            welcome_points: 50,
            points_per_purchase: 10,
            purchase_threshold: 1000,
        }
    }

    pub fn prize(merchant_id: Uuid, name: &str, probability: i32) -> Prize {
        Prize {
            id: Uuid::new_v4(),
            merchant_id,
            name: name.to_string(),
            probability,
            quantity: 10,
            image_url: None,
            is_active: true,
        }
    }

    pub fn reward(merchant_id: Uuid, name: &str, points_cost: i64, quantity_available: Option<i32>) -> LoyaltyReward {
        LoyaltyReward {
            id: Uuid::new_v4(),
            merchant_id,
            name: name.to_string(),
            reward_type: RewardType::Product,
            value: 0,
            points_cost,
            quantity_available,
            is_active: true,
        }
    }

    pub fn new_client(merchant_id: Uuid, phone: Option<&str>, email: Option<&str>) -> NewClient {
        NewClient {
            merchant_id,
            card_id: codes::card_id(&mut rand::thread_rng()),
            name: None,
            phone: phone.map(str::to_string),
            email: email.map(str::to_string),
            qr_code_data: codes::qr_token(),
        }
    }

    /// 저장되지 않은 고객 (순수 규칙 테스트용)
    pub fn client(merchant_id: Uuid, points: i64) -> LoyaltyClient {
        let now = Utc::now();
        LoyaltyClient {
            id: Uuid::new_v4(),
            merchant_id,
            card_id: "CARD-00000001".to_string(),
            name: None,
            phone: Some("+33600000000".to_string()),
            email: None,
            points,
            total_purchases: 0,
            qr_code_data: codes::qr_token(),
            status: ClientStatus::Active,
            last_visit: now,
            created_at: now,
        }
    }

    pub fn redemption(
        merchant_id: Uuid,
        client_id: Uuid,
        code: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> RedeemedReward {
        RedeemedReward {
            id: Uuid::new_v4(),
            client_id,
            merchant_id,
            reward_id: Uuid::new_v4(),
            redemption_code: code.to_string(),
            points_spent: 0,
            status: RedemptionStatus::Pending,
            expires_at,
            used_at: None,
            created_at: Utc::now(),
        }
    }
}
