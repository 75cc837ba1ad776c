//! Database Models
//!
//! Domain records for the wheel (prizes, spins, coupons) and the loyalty
//! program (clients, ledger rows, rewards, redemption codes).
//! Status and type columns are stored as TEXT and decoded into enums.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

// ============ Merchant / Wheel ============

/// 머천트별 휠 + 로열티 설정
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MerchantSettings {
    pub merchant_id: Uuid,
    pub name: String,
    /// 쿠폰 코드 접두사 (예: "CAFE")
    pub coupon_prefix: String,
    pub wheel_enabled: bool,
    /// 휠에 배치할 꽝 칸 수
    pub unlucky_quantity: i32,
    /// 휠에 배치할 다시 돌리기 칸 수
    pub retry_quantity: i32,
    /// 꽝 카테고리 전체 확률 (칸 수로 균등 분할)
    pub unlucky_probability: i32,
    /// 다시 돌리기 카테고리 전체 확률
    pub retry_probability: i32,
    pub loyalty_enabled: bool,
    /// 신규 가입 웰컴 포인트 (0 가능)
    pub welcome_points: i64,
    /// 구매 기준 금액당 적립 포인트
    pub points_per_purchase: i64,
    /// 적립 기준 금액 (최소 화폐 단위)
    pub purchase_threshold: i64,
}

/// 휠 경품
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Prize {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub name: String,
    /// 가중치 (1-100)
    pub probability: i32,
    /// 표시용 수량 (재고 차감 없음)
    pub quantity: i32,
    pub image_url: Option<String>,
    pub is_active: bool,
}

/// 스핀 기록 (하루 1회 제한 판단 근거)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SpinRecord {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub prize_id: Option<Uuid>,
    pub client_identity_token: String,
    pub spin_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSpin {
    pub merchant_id: Uuid,
    pub prize_id: Option<Uuid>,
    pub client_identity_token: String,
    pub spin_date: NaiveDate,
}

/// 휠 당첨 쿠폰 (1회용)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Coupon {
    pub id: Uuid,
    pub spin_id: Uuid,
    pub merchant_id: Uuid,
    pub code: String,
    pub prize_name: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCoupon {
    pub merchant_id: Uuid,
    pub code: String,
    pub prize_name: String,
    pub expires_at: DateTime<Utc>,
}

// ============ Loyalty ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Active,
    Suspended,
    Inactive,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Suspended => "suspended",
            ClientStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for ClientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ClientStatus::Active),
            "suspended" => Ok(ClientStatus::Suspended),
            "inactive" => Ok(ClientStatus::Inactive),
            other => Err(format!("unknown client status: {}", other)),
        }
    }
}

/// 로열티 고객
///
/// `points`는 원장 합계의 캐시. 원장(`apply_ledger_entry`) 외에는 갱신 금지.
#[derive(Debug, Clone, Serialize)]
pub struct LoyaltyClient {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub card_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub points: i64,
    /// 누적 구매 금액 (최소 화폐 단위)
    pub total_purchases: i64,
    pub qr_code_data: String,
    pub status: ClientStatus,
    pub last_visit: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewClient {
    pub merchant_id: Uuid,
    pub card_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub qr_code_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Welcome,
    Earn,
    Redeem,
    Adjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Welcome => "welcome",
            TransactionType::Earn => "earn",
            TransactionType::Redeem => "redeem",
            TransactionType::Adjustment => "adjustment",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "welcome" => Ok(TransactionType::Welcome),
            "earn" => Ok(TransactionType::Earn),
            "redeem" => Ok(TransactionType::Redeem),
            "adjustment" => Ok(TransactionType::Adjustment),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// 포인트 원장 행 (append-only)
#[derive(Debug, Clone, Serialize)]
pub struct PointsTransaction {
    pub id: i64,
    pub client_id: Uuid,
    pub merchant_id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// 부호 있는 증감량
    pub points: i64,
    pub balance_after: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// 원장 기록 요청
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub client_id: Uuid,
    pub merchant_id: Uuid,
    pub kind: TransactionType,
    pub delta: i64,
    pub description: String,
    /// 적립 시 누적 구매 금액에 더할 값
    pub purchase_amount: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardType {
    Discount,
    Product,
    Service,
    Cashback,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardType::Discount => "discount",
            RewardType::Product => "product",
            RewardType::Service => "service",
            RewardType::Cashback => "cashback",
        }
    }
}

impl FromStr for RewardType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discount" => Ok(RewardType::Discount),
            "product" => Ok(RewardType::Product),
            "service" => Ok(RewardType::Service),
            "cashback" => Ok(RewardType::Cashback),
            other => Err(format!("unknown reward type: {}", other)),
        }
    }
}

/// 포인트 교환 카탈로그 항목
#[derive(Debug, Clone, Serialize)]
pub struct LoyaltyReward {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub reward_type: RewardType,
    /// 할인율(%) 또는 금액 (최소 화폐 단위)
    pub value: i64,
    pub points_cost: i64,
    /// None = 무제한
    pub quantity_available: Option<i32>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Pending,
    Used,
    Cancelled,
    Expired,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "pending",
            RedemptionStatus::Used => "used",
            RedemptionStatus::Cancelled => "cancelled",
            RedemptionStatus::Expired => "expired",
        }
    }
}

impl FromStr for RedemptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RedemptionStatus::Pending),
            "used" => Ok(RedemptionStatus::Used),
            "cancelled" => Ok(RedemptionStatus::Cancelled),
            "expired" => Ok(RedemptionStatus::Expired),
            other => Err(format!("unknown redemption status: {}", other)),
        }
    }
}

/// 교환 코드 (RWD-XXXXXX)
#[derive(Debug, Clone, Serialize)]
pub struct RedeemedReward {
    pub id: Uuid,
    pub client_id: Uuid,
    pub merchant_id: Uuid,
    pub reward_id: Uuid,
    pub redemption_code: String,
    pub points_spent: i64,
    pub status: RedemptionStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 교환 요청 (스토어 원자 연산 입력)
#[derive(Debug, Clone)]
pub struct RedemptionRequest {
    pub client_id: Uuid,
    pub merchant_id: Uuid,
    pub reward_id: Uuid,
    pub redemption_code: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// 교환 커밋 결과
#[derive(Debug, Clone, Serialize)]
pub struct RedemptionReceipt {
    pub redemption: RedeemedReward,
    pub transaction: PointsTransaction,
    pub reward: LoyaltyReward,
}

/// 교환 취소 결과 (환불 원장 행 포함)
#[derive(Debug, Clone, Serialize)]
pub struct CancellationReceipt {
    pub redemption: RedeemedReward,
    pub refund: PointsTransaction,
}

/// 스캔 가능한 1회용 토큰
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "token", rename_all = "snake_case")]
pub enum RewardToken {
    Coupon(Coupon),
    Redemption(RedeemedReward),
}

impl RewardToken {
    pub fn merchant_id(&self) -> Uuid {
        match self {
            RewardToken::Coupon(c) => c.merchant_id,
            RewardToken::Redemption(r) => r.merchant_id,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            RewardToken::Coupon(c) => &c.code,
            RewardToken::Redemption(r) => &r.redemption_code,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RewardToken::Coupon(_) => "coupon",
            RewardToken::Redemption(_) => "redemption",
        }
    }
}

// ============ Row decoding ============

fn decode_text<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

impl<'r> FromRow<'r, PgRow> for LoyaltyClient {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            merchant_id: row.try_get("merchant_id")?,
            card_id: row.try_get("card_id")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            email: row.try_get("email")?,
            points: row.try_get("points")?,
            total_purchases: row.try_get("total_purchases")?,
            qr_code_data: row.try_get("qr_code_data")?,
            status: decode_text(row, "status")?,
            last_visit: row.try_get("last_visit")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for PointsTransaction {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            merchant_id: row.try_get("merchant_id")?,
            kind: decode_text(row, "type")?,
            points: row.try_get("points")?,
            balance_after: row.try_get("balance_after")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for LoyaltyReward {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            merchant_id: row.try_get("merchant_id")?,
            name: row.try_get("name")?,
            reward_type: decode_text(row, "type")?,
            value: row.try_get("value")?,
            points_cost: row.try_get("points_cost")?,
            quantity_available: row.try_get("quantity_available")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for RedeemedReward {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            merchant_id: row.try_get("merchant_id")?,
            reward_id: row.try_get("reward_id")?,
            redemption_code: row.try_get("redemption_code")?,
            points_spent: row.try_get("points_spent")?,
            status: decode_text(row, "status")?,
            expires_at: row.try_get("expires_at")?,
            used_at: row.try_get("used_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
