//! Database Module
//!
//! PostgreSQL-backed `RewardStore`.
//!
//! # Atomicity
//!
//! - 원장 기록: `SELECT ... FOR UPDATE`로 고객 행 잠금 → 원장 INSERT → 잔액 UPDATE (한 트랜잭션)
//! - 포인트 교환: 보상 행 잠금 → 고객 행 잠금 → 재고 조건부 차감 → 원장 → 교환 코드 INSERT
//! - 토큰 사용: `UPDATE ... WHERE status = 'pending' RETURNING` (compare-and-set)
//! - 고객 생성: `(merchant_id, phone)`, `(merchant_id, email)` 유니크 제약 위반 → `Duplicate`
//!
//! 잠금 순서는 항상 보상 → 고객 (교환/취소 간 데드락 방지).

mod models;
mod repository;
#[cfg(test)]
pub mod mock;

pub use models::*;
pub use repository::{ClientInsert, RewardStore};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{ConflictKind, RewardError, RewardResult};
use crate::services::{ledger, redemption};

/// 클라이언트 유니크 제약 (마이그레이션과 동일한 이름)
const CLIENT_CONTACT_CONSTRAINTS: [&str; 2] = ["uq_clients_merchant_phone", "uq_clients_merchant_email"];
const SPIN_DAILY_CONSTRAINT: &str = "uq_spins_daily";
/// 생성 코드 유니크 제약 (충돌 시 서비스가 새 코드로 재시도)
const CODE_CONSTRAINTS: [&str; 4] = [
    "uq_coupons_code",
    "uq_redeemed_rewards_code",
    "uq_clients_card_id",
    "uq_clients_qr_code",
];

/// 포인트 내역 (체인 순서 = 행 잠금 안에서 할당된 id 순서)
const LEDGER_HISTORY_SQL: &str = "SELECT * FROM points_transactions WHERE client_id = $1 ORDER BY id";

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 설정값 (기본 10)
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 3초 (요청 타임아웃 안에서 끝나야 함)
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

/// 코드 제약 위반은 `CodeCollision`, 나머지는 일반 변환
fn insert_error(err: sqlx::Error) -> RewardError {
    match unique_violation(&err) {
        Some(constraint) if CODE_CONSTRAINTS.contains(&constraint.as_str()) => {
            RewardError::CodeCollision(constraint)
        }
        _ => err.into(),
    }
}

// ============ Transaction helpers ============

/// 원장 기록 (호출자 트랜잭션 안에서)
async fn apply_ledger_entry_tx(
    conn: &mut PgConnection,
    entry: &LedgerEntry,
) -> RewardResult<PointsTransaction> {
    let current: Option<(i64,)> = sqlx::query_as(
        "SELECT points FROM loyalty_clients WHERE id = $1 AND merchant_id = $2 FOR UPDATE",
    )
    .bind(entry.client_id)
    .bind(entry.merchant_id)
    .fetch_optional(&mut *conn)
    .await?;

    let (current,) = current.ok_or_else(|| RewardError::not_found("client"))?;
    let balance_after = ledger::next_balance(current, entry.kind, entry.delta)?;

    let transaction = sqlx::query_as::<_, PointsTransaction>(
        r#"
        INSERT INTO points_transactions (
            client_id, merchant_id, type, points, balance_after, description, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, clock_timestamp())
        RETURNING *
        "#,
    )
    .bind(entry.client_id)
    .bind(entry.merchant_id)
    .bind(entry.kind.as_str())
    .bind(entry.delta)
    .bind(balance_after)
    .bind(&entry.description)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        UPDATE loyalty_clients
        SET points = $2,
            total_purchases = total_purchases + COALESCE($3, 0),
            last_visit = CASE WHEN $3 IS NULL THEN last_visit ELSE NOW() END
        WHERE id = $1
        "#,
    )
    .bind(entry.client_id)
    .bind(balance_after)
    .bind(entry.purchase_amount)
    .execute(&mut *conn)
    .await?;

    Ok(transaction)
}

async fn insert_coupon_tx(
    conn: &mut PgConnection,
    spin_id: Uuid,
    coupon: &NewCoupon,
) -> RewardResult<Coupon> {
    let coupon = sqlx::query_as::<_, Coupon>(
        r#"
        INSERT INTO coupons (id, spin_id, merchant_id, code, prize_name, expires_at, used, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, FALSE, NOW())
        RETURNING id, spin_id, merchant_id, code, prize_name, expires_at, used, used_at, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(spin_id)
    .bind(coupon.merchant_id)
    .bind(&coupon.code)
    .bind(&coupon.prize_name)
    .bind(coupon.expires_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(insert_error)?;

    Ok(coupon)
}

#[async_trait]
impl RewardStore for Database {
    async fn merchant_settings(&self, merchant_id: Uuid) -> RewardResult<Option<MerchantSettings>> {
        let settings = sqlx::query_as::<_, MerchantSettings>(
            r#"
            SELECT
                id AS merchant_id,
                name,
                coupon_prefix,
                wheel_enabled,
                unlucky_quantity,
                retry_quantity,
                unlucky_probability,
                retry_probability,
                loyalty_enabled,
                welcome_points,
                points_per_purchase,
                purchase_threshold
            FROM merchants
            WHERE id = $1
            "#,
        )
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(settings)
    }

    async fn active_prizes(&self, merchant_id: Uuid) -> RewardResult<Vec<Prize>> {
        let prizes = sqlx::query_as::<_, Prize>(
            r#"
            SELECT id, merchant_id, name, probability, quantity, image_url, is_active
            FROM prizes
            WHERE merchant_id = $1 AND is_active = TRUE
            ORDER BY created_at, id
            "#,
        )
        .bind(merchant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(prizes)
    }

    async fn find_spin_on(
        &self,
        merchant_id: Uuid,
        identity_token: &str,
        day: NaiveDate,
    ) -> RewardResult<Option<SpinRecord>> {
        let spin = sqlx::query_as::<_, SpinRecord>(
            r#"
            SELECT id, merchant_id, prize_id, client_identity_token, spin_date, created_at
            FROM spins
            WHERE merchant_id = $1 AND client_identity_token = $2 AND spin_date = $3
            "#,
        )
        .bind(merchant_id)
        .bind(identity_token)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;

        Ok(spin)
    }

    async fn record_spin(
        &self,
        spin: NewSpin,
        coupon: Option<NewCoupon>,
    ) -> RewardResult<(SpinRecord, Option<Coupon>)> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, SpinRecord>(
            r#"
            INSERT INTO spins (id, merchant_id, prize_id, client_identity_token, spin_date, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING id, merchant_id, prize_id, client_identity_token, spin_date, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(spin.merchant_id)
        .bind(spin.prize_id)
        .bind(&spin.client_identity_token)
        .bind(spin.spin_date)
        .fetch_one(&mut *tx)
        .await;

        let record = match inserted {
            Ok(record) => record,
            Err(err) => {
                if unique_violation(&err).as_deref() == Some(SPIN_DAILY_CONSTRAINT) {
                    return Err(RewardError::Conflict(ConflictKind::AlreadySpunToday));
                }
                return Err(err.into());
            }
        };

        let coupon = match coupon {
            Some(new_coupon) => Some(insert_coupon_tx(&mut tx, record.id, &new_coupon).await?),
            None => None,
        };

        tx.commit().await?;
        Ok((record, coupon))
    }

    async fn insert_coupon(&self, spin_id: Uuid, coupon: NewCoupon) -> RewardResult<Coupon> {
        let mut conn = self.pool.acquire().await?;
        insert_coupon_tx(&mut conn, spin_id, &coupon).await
    }

    async fn find_client(&self, client_id: Uuid) -> RewardResult<Option<LoyaltyClient>> {
        let client = sqlx::query_as::<_, LoyaltyClient>("SELECT * FROM loyalty_clients WHERE id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(client)
    }

    async fn find_client_by_phone(
        &self,
        merchant_id: Uuid,
        phone: &str,
    ) -> RewardResult<Option<LoyaltyClient>> {
        let client = sqlx::query_as::<_, LoyaltyClient>(
            "SELECT * FROM loyalty_clients WHERE merchant_id = $1 AND phone = $2",
        )
        .bind(merchant_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }

    async fn find_client_by_email(
        &self,
        merchant_id: Uuid,
        email: &str,
    ) -> RewardResult<Option<LoyaltyClient>> {
        let client = sqlx::query_as::<_, LoyaltyClient>(
            "SELECT * FROM loyalty_clients WHERE merchant_id = $1 AND email = $2",
        )
        .bind(merchant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(client)
    }

    async fn touch_client(&self, client_id: Uuid, at: DateTime<Utc>) -> RewardResult<LoyaltyClient> {
        let client = sqlx::query_as::<_, LoyaltyClient>(
            "UPDATE loyalty_clients SET last_visit = $2 WHERE id = $1 RETURNING *",
        )
        .bind(client_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        client.ok_or_else(|| RewardError::not_found("client"))
    }

    async fn create_client(&self, client: NewClient, welcome_points: i64) -> RewardResult<ClientInsert> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, LoyaltyClient>(
            r#"
            INSERT INTO loyalty_clients (
                id, merchant_id, card_id, name, phone, email, points, total_purchases,
                qr_code_data, status, last_visit, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, 0, $7, 'active', NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client.merchant_id)
        .bind(&client.card_id)
        .bind(&client.name)
        .bind(&client.phone)
        .bind(&client.email)
        .bind(&client.qr_code_data)
        .fetch_one(&mut *tx)
        .await;

        let mut created = match inserted {
            Ok(created) => created,
            Err(err) => match unique_violation(&err) {
                Some(constraint) if CLIENT_CONTACT_CONSTRAINTS.contains(&constraint.as_str()) => {
                    // 트랜잭션은 drop 시 롤백
                    return Ok(ClientInsert::Duplicate);
                }
                _ => return Err(insert_error(err)),
            },
        };

        let welcome = apply_ledger_entry_tx(
            &mut tx,
            &LedgerEntry {
                client_id: created.id,
                merchant_id: created.merchant_id,
                kind: TransactionType::Welcome,
                delta: welcome_points,
                description: "Welcome bonus".to_string(),
                purchase_amount: None,
            },
        )
        .await?;

        tx.commit().await?;

        created.points = welcome.balance_after;
        Ok(ClientInsert::Created {
            client: created,
            welcome,
        })
    }

    async fn apply_ledger_entry(&self, entry: LedgerEntry) -> RewardResult<PointsTransaction> {
        let mut tx = self.pool.begin().await?;
        let transaction = apply_ledger_entry_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    async fn transactions(&self, client_id: Uuid) -> RewardResult<Vec<PointsTransaction>> {
        let rows = sqlx::query_as::<_, PointsTransaction>(
            LEDGER_HISTORY_SQL,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_reward(&self, reward_id: Uuid) -> RewardResult<Option<LoyaltyReward>> {
        let reward = sqlx::query_as::<_, LoyaltyReward>("SELECT * FROM loyalty_rewards WHERE id = $1")
            .bind(reward_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(reward)
    }

    async fn redeem_reward(&self, request: RedemptionRequest) -> RewardResult<RedemptionReceipt> {
        let mut tx = self.pool.begin().await?;

        // 1. 보상 행 잠금 (재고 경쟁 직렬화)
        let mut reward = sqlx::query_as::<_, LoyaltyReward>(
            "SELECT * FROM loyalty_rewards WHERE id = $1 AND merchant_id = $2 FOR UPDATE",
        )
        .bind(request.reward_id)
        .bind(request.merchant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RewardError::not_found("reward"))?;

        // 2. 고객 행 잠금 (동일 고객 이중 차감 방지)
        let client = sqlx::query_as::<_, LoyaltyClient>(
            "SELECT * FROM loyalty_clients WHERE id = $1 AND merchant_id = $2 FOR UPDATE",
        )
        .bind(request.client_id)
        .bind(request.merchant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RewardError::not_found("client"))?;

        redemption::ensure_redeemable(&reward, &client)?;

        // 3. 유한 재고만 조건부 차감
        if reward.quantity_available.is_some() {
            let updated = sqlx::query(
                r#"
                UPDATE loyalty_rewards
                SET quantity_available = quantity_available - 1
                WHERE id = $1 AND quantity_available > 0
                "#,
            )
            .bind(reward.id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() != 1 {
                return Err(RewardError::Conflict(ConflictKind::OutOfStock));
            }
            reward.quantity_available = reward.quantity_available.map(|q| q - 1);
        }

        // 4. 원장 차감
        let transaction = apply_ledger_entry_tx(
            &mut tx,
            &LedgerEntry {
                client_id: client.id,
                merchant_id: client.merchant_id,
                kind: TransactionType::Redeem,
                delta: -reward.points_cost,
                description: format!("Redeemed: {}", reward.name),
                purchase_amount: None,
            },
        )
        .await?;

        // 5. 교환 코드 발급
        let redemption = sqlx::query_as::<_, RedeemedReward>(
            r#"
            INSERT INTO redeemed_rewards (
                id, client_id, merchant_id, reward_id, redemption_code,
                points_spent, status, expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client.id)
        .bind(client.merchant_id)
        .bind(reward.id)
        .bind(&request.redemption_code)
        .bind(reward.points_cost)
        .bind(request.expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(insert_error)?;

        tx.commit().await?;

        Ok(RedemptionReceipt {
            redemption,
            transaction,
            reward,
        })
    }

    async fn find_token(&self, code: &str) -> RewardResult<Option<RewardToken>> {
        let redemption = sqlx::query_as::<_, RedeemedReward>(
            "SELECT * FROM redeemed_rewards WHERE redemption_code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(redemption) = redemption {
            return Ok(Some(RewardToken::Redemption(redemption)));
        }

        let coupon = sqlx::query_as::<_, Coupon>(
            r#"
            SELECT id, spin_id, merchant_id, code, prize_name, expires_at, used, used_at, created_at
            FROM coupons
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coupon.map(RewardToken::Coupon))
    }

    async fn mark_coupon_used(&self, coupon_id: Uuid, at: DateTime<Utc>) -> RewardResult<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>(
            r#"
            UPDATE coupons
            SET used = TRUE, used_at = $2
            WHERE id = $1 AND used = FALSE AND expires_at > $2
            RETURNING id, spin_id, merchant_id, code, prize_name, expires_at, used, used_at, created_at
            "#,
        )
        .bind(coupon_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(coupon)
    }

    async fn mark_redemption_used(
        &self,
        redemption_id: Uuid,
        at: DateTime<Utc>,
    ) -> RewardResult<Option<RedeemedReward>> {
        let redemption = sqlx::query_as::<_, RedeemedReward>(
            r#"
            UPDATE redeemed_rewards
            SET status = 'used', used_at = $2
            WHERE id = $1
              AND status = 'pending'
              AND (expires_at IS NULL OR expires_at > $2)
            RETURNING *
            "#,
        )
        .bind(redemption_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(redemption)
    }

    async fn expire_redemption(
        &self,
        redemption_id: Uuid,
        at: DateTime<Utc>,
    ) -> RewardResult<Option<RedeemedReward>> {
        let redemption = sqlx::query_as::<_, RedeemedReward>(
            r#"
            UPDATE redeemed_rewards
            SET status = 'expired'
            WHERE id = $1
              AND status = 'pending'
              AND expires_at IS NOT NULL
              AND expires_at <= $2
            RETURNING *
            "#,
        )
        .bind(redemption_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(redemption)
    }

    async fn cancel_redemption(
        &self,
        redemption_id: Uuid,
        at: DateTime<Utc>,
    ) -> RewardResult<Option<CancellationReceipt>> {
        let mut tx = self.pool.begin().await?;

        let cancelled = sqlx::query_as::<_, RedeemedReward>(
            r#"
            UPDATE redeemed_rewards
            SET status = 'cancelled'
            WHERE id = $1
              AND status = 'pending'
              AND (expires_at IS NULL OR expires_at > $2)
            RETURNING *
            "#,
        )
        .bind(redemption_id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(redemption) = cancelled else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE loyalty_rewards
            SET quantity_available = quantity_available + 1
            WHERE id = $1 AND quantity_available IS NOT NULL
            "#,
        )
        .bind(redemption.reward_id)
        .execute(&mut *tx)
        .await?;

        let refund = apply_ledger_entry_tx(
            &mut tx,
            &LedgerEntry {
                client_id: redemption.client_id,
                merchant_id: redemption.merchant_id,
                kind: TransactionType::Adjustment,
                delta: redemption.points_spent,
                description: format!("Refund: {}", redemption.redemption_code),
                purchase_amount: None,
            },
        )
        .await?;

        tx.commit().await?;

        Ok(Some(CancellationReceipt { redemption, refund }))
    }

    async fn health_check(&self) -> RewardResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
