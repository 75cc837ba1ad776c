//! Points Ledger
//!
//! Append-only transaction log behind every client's point balance.
//!
//! # Invariant
//!
//! ```text
//! client.points == Σ points_transactions.points
//! row[i].balance_after == Σ points[0..=i]
//! ```
//!
//! `RewardStore::apply_ledger_entry` is the single write path for
//! `loyalty_clients.points`: the row insert and the cached balance update
//! commit together or not at all. Balance arithmetic lives in
//! [`next_balance`] so the PostgreSQL store and the in-memory store apply
//! the same rules.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::notifier::{NotificationEvent, Notifier};
use crate::db::{
    ClientStatus, LedgerEntry, LoyaltyClient, MerchantSettings, PointsTransaction, RewardStore,
    TransactionType,
};
use crate::error::{ConflictKind, RewardError, RewardResult};

// ============ Pure rules ============

/// 잔액 계산 규칙
///
/// - welcome / earn: `delta >= 0`
/// - redeem: `delta < 0`
/// - adjustment: 양방향
/// - 결과가 음수면 `InsufficientBalance`
pub fn next_balance(current: i64, kind: TransactionType, delta: i64) -> RewardResult<i64> {
    match kind {
        TransactionType::Welcome | TransactionType::Earn if delta < 0 => {
            return Err(RewardError::validation(format!(
                "{} transaction cannot be negative",
                kind.as_str()
            )));
        }
        TransactionType::Redeem if delta >= 0 => {
            return Err(RewardError::validation("redeem transaction must be negative"));
        }
        _ => {}
    }

    let balance = current
        .checked_add(delta)
        .ok_or_else(|| RewardError::validation("points overflow"))?;

    if balance < 0 {
        return Err(RewardError::Conflict(ConflictKind::InsufficientBalance {
            balance: current,
            delta,
        }));
    }

    Ok(balance)
}

/// 원장 체인 검사: `(Σ points, balance_after 체인 일치 여부)`
///
/// 체인 순서는 `id` (고객 행 잠금 안에서 할당). `created_at`은 트랜잭션
/// 시작 시각일 수 있어 순서 기준으로 쓰지 않는다.
pub fn ledger_chain(rows: &[PointsTransaction]) -> (i64, bool) {
    let mut ordered: Vec<&PointsTransaction> = rows.iter().collect();
    ordered.sort_by_key(|row| row.id);

    let mut running = 0i64;
    let mut consistent = true;
    for row in ordered {
        running += row.points;
        if row.balance_after != running {
            consistent = false;
        }
    }
    (running, consistent)
}

/// 구매 금액 → 적립 포인트
///
/// `floor(amount / threshold) * points_per_purchase`, 기준 미만은 0
pub fn earned_points(purchase_amount: i64, threshold: i64, points_per_purchase: i64) -> i64 {
    if threshold <= 0 || purchase_amount < threshold || points_per_purchase <= 0 {
        return 0;
    }
    (purchase_amount / threshold).saturating_mul(points_per_purchase)
}

// ============ Shared lookups ============

/// 로열티가 활성화된 머천트 설정
pub(crate) async fn loyalty_settings(
    store: &dyn RewardStore,
    merchant_id: Uuid,
) -> RewardResult<MerchantSettings> {
    let settings = store
        .merchant_settings(merchant_id)
        .await?
        .ok_or_else(|| RewardError::not_found("merchant"))?;

    if !settings.loyalty_enabled {
        return Err(RewardError::Configuration(format!(
            "loyalty program is disabled for merchant {}",
            merchant_id
        )));
    }

    Ok(settings)
}

/// 머천트 소속 고객 (다른 머천트 고객은 NotFound)
pub(crate) async fn merchant_client(
    store: &dyn RewardStore,
    client_id: Uuid,
    merchant_id: Uuid,
) -> RewardResult<LoyaltyClient> {
    store
        .find_client(client_id)
        .await?
        .filter(|client| client.merchant_id == merchant_id)
        .ok_or_else(|| RewardError::not_found("client"))
}

pub(crate) fn ensure_active(client: &LoyaltyClient) -> RewardResult<()> {
    if client.status != ClientStatus::Active {
        return Err(RewardError::Conflict(ConflictKind::ClientNotActive));
    }
    Ok(())
}

// ============ Service ============

/// 잔액 변경 결과
#[derive(Debug, Clone, Serialize)]
pub struct BalanceUpdate {
    pub client_id: Uuid,
    pub delta: i64,
    pub balance: i64,
    /// delta == 0 이면 원장 행 없음
    pub transaction: Option<PointsTransaction>,
}

/// 원장 검증 결과
#[derive(Debug, Clone, Serialize)]
pub struct LedgerAudit {
    pub client_id: Uuid,
    pub cached_balance: i64,
    pub ledger_sum: i64,
    pub transaction_count: usize,
    /// 모든 행의 balance_after가 누적합과 일치
    pub chain_consistent: bool,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.chain_consistent && self.cached_balance == self.ledger_sum
    }
}

pub struct PointsLedger {
    store: Arc<dyn RewardStore>,
    notifier: Notifier,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn RewardStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// 원장 기록 후 새 잔액 반환
    pub async fn apply_transaction(
        &self,
        client_id: Uuid,
        merchant_id: Uuid,
        kind: TransactionType,
        delta: i64,
        description: &str,
    ) -> RewardResult<i64> {
        let transaction = self
            .store
            .apply_ledger_entry(LedgerEntry {
                client_id,
                merchant_id,
                kind,
                delta,
                description: description.to_string(),
                purchase_amount: None,
            })
            .await?;

        tracing::info!(
            client_id = %client_id,
            kind = kind.as_str(),
            points = delta,
            balance = transaction.balance_after,
            "Ledger entry recorded"
        );

        Ok(transaction.balance_after)
    }

    /// 구매 적립
    pub async fn earn_points(
        &self,
        client_id: Uuid,
        merchant_id: Uuid,
        purchase_amount: i64,
    ) -> RewardResult<BalanceUpdate> {
        if purchase_amount < 0 {
            return Err(RewardError::validation("purchase amount cannot be negative"));
        }

        let settings = loyalty_settings(self.store.as_ref(), merchant_id).await?;
        if settings.purchase_threshold <= 0 {
            return Err(RewardError::Configuration(
                "purchase threshold must be positive".to_string(),
            ));
        }

        let client = merchant_client(self.store.as_ref(), client_id, merchant_id).await?;
        ensure_active(&client)?;

        let points = earned_points(
            purchase_amount,
            settings.purchase_threshold,
            settings.points_per_purchase,
        );

        if points == 0 {
            tracing::debug!(
                client_id = %client_id,
                purchase_amount,
                threshold = settings.purchase_threshold,
                "Purchase below earn threshold"
            );
            let client = self.store.touch_client(client_id, chrono::Utc::now()).await?;
            return Ok(BalanceUpdate {
                client_id,
                delta: 0,
                balance: client.points,
                transaction: None,
            });
        }

        let transaction = self
            .store
            .apply_ledger_entry(LedgerEntry {
                client_id,
                merchant_id,
                kind: TransactionType::Earn,
                delta: points,
                description: format!("Purchase of {}", purchase_amount),
                purchase_amount: Some(purchase_amount),
            })
            .await?;

        tracing::info!(
            client_id = %client_id,
            points,
            balance = transaction.balance_after,
            "Points earned"
        );

        self.notifier.emit(
            merchant_id,
            NotificationEvent::PointsEarned,
            json!({
                "client_id": client_id,
                "points": points,
                "balance": transaction.balance_after,
            }),
        );

        Ok(BalanceUpdate {
            client_id,
            delta: points,
            balance: transaction.balance_after,
            transaction: Some(transaction),
        })
    }

    /// 직원 수동 조정
    pub async fn adjust_points(
        &self,
        client_id: Uuid,
        merchant_id: Uuid,
        delta: i64,
        reason: &str,
    ) -> RewardResult<BalanceUpdate> {
        if delta == 0 {
            return Err(RewardError::validation("adjustment cannot be zero"));
        }

        loyalty_settings(self.store.as_ref(), merchant_id).await?;
        let client = merchant_client(self.store.as_ref(), client_id, merchant_id).await?;
        ensure_active(&client)?;

        let description = match reason.trim() {
            "" => "Manual adjustment".to_string(),
            reason => reason.to_string(),
        };

        let transaction = self
            .store
            .apply_ledger_entry(LedgerEntry {
                client_id,
                merchant_id,
                kind: TransactionType::Adjustment,
                delta,
                description,
                purchase_amount: None,
            })
            .await?;

        tracing::info!(
            client_id = %client_id,
            points = delta,
            balance = transaction.balance_after,
            "Points adjusted"
        );

        self.notifier.emit(
            merchant_id,
            NotificationEvent::PointsAdjusted,
            json!({
                "client_id": client_id,
                "points": delta,
                "balance": transaction.balance_after,
            }),
        );

        Ok(BalanceUpdate {
            client_id,
            delta,
            balance: transaction.balance_after,
            transaction: Some(transaction),
        })
    }

    /// 거래 내역 (생성순)
    pub async fn transactions(
        &self,
        client_id: Uuid,
        merchant_id: Uuid,
    ) -> RewardResult<Vec<PointsTransaction>> {
        merchant_client(self.store.as_ref(), client_id, merchant_id).await?;
        self.store.transactions(client_id).await
    }

    /// 캐시 잔액 vs 원장 재계산
    pub async fn verify_balance(&self, client_id: Uuid, merchant_id: Uuid) -> RewardResult<LedgerAudit> {
        let client = merchant_client(self.store.as_ref(), client_id, merchant_id).await?;
        let rows = self.store.transactions(client_id).await?;
        let (ledger_sum, chain_consistent) = ledger_chain(&rows);

        let audit = LedgerAudit {
            client_id,
            cached_balance: client.points,
            ledger_sum,
            transaction_count: rows.len(),
            chain_consistent,
        };

        if !audit.is_consistent() {
            tracing::warn!(
                client_id = %client_id,
                cached = audit.cached_balance,
                ledger = audit.ledger_sum,
                "Ledger drift detected"
            );
        }

        Ok(audit)
    }
}
