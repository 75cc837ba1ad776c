//! Wheel Spin Flow
//!
//! Daily-gated spin: build segments from the live prize list, draw one,
//! persist the spin (and the coupon on a win) in one unit.
//!
//! A `retry` outcome is not persisted, so the visitor may spin again the
//! same day. `unlucky` and prize outcomes close the day for that token.

use std::sync::Arc;

use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::codes;
use super::notifier::{NotificationEvent, Notifier};
use super::redemption::new_coupon;
use super::segments::{build_segments, SegmentKind, WheelSegment};
use super::selector::{select_outcome, SpecialOdds};
use crate::config::EnginePolicy;
use crate::db::{Coupon, MerchantSettings, NewSpin, RewardStore, SpinRecord};
use crate::error::{ConflictKind, RewardError, RewardResult};

/// 방문자 토큰 최대 길이
const MAX_IDENTITY_TOKEN_LEN: usize = 128;

/// 스핀 결과
#[derive(Debug, Clone, Serialize)]
pub struct SpinOutcome {
    pub outcome: SegmentKind,
    pub segment_index: usize,
    pub segments: Vec<WheelSegment>,
    /// retry 결과면 None
    pub spin: Option<SpinRecord>,
    pub coupon: Option<Coupon>,
}

pub struct WheelService {
    store: Arc<dyn RewardStore>,
    notifier: Notifier,
    policy: EnginePolicy,
}

impl WheelService {
    pub fn new(store: Arc<dyn RewardStore>, notifier: Notifier, policy: EnginePolicy) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    /// 현재 설정 기준 휠 구성 (스핀 없음)
    pub async fn preview(&self, merchant_id: Uuid) -> RewardResult<Vec<WheelSegment>> {
        let settings = self.wheel_settings(merchant_id).await?;
        self.segments(&settings).await
    }

    pub async fn spin(&self, merchant_id: Uuid, identity_token: &str) -> RewardResult<SpinOutcome> {
        let mut rng = StdRng::from_entropy();
        self.spin_with_rng(merchant_id, identity_token, &mut rng).await
    }

    pub async fn spin_with_rng<R: Rng + Send>(
        &self,
        merchant_id: Uuid,
        identity_token: &str,
        rng: &mut R,
    ) -> RewardResult<SpinOutcome> {
        let identity_token = identity_token.trim();
        if identity_token.is_empty() {
            return Err(RewardError::validation("identity token is required"));
        }
        if identity_token.len() > MAX_IDENTITY_TOKEN_LEN {
            return Err(RewardError::validation("identity token is too long"));
        }

        let settings = self.wheel_settings(merchant_id).await?;

        let now = Utc::now();
        let today = now.date_naive();
        if self
            .store
            .find_spin_on(merchant_id, identity_token, today)
            .await?
            .is_some()
        {
            tracing::debug!(merchant_id = %merchant_id, "Spin rejected, already spun today");
            return Err(RewardError::Conflict(ConflictKind::AlreadySpunToday));
        }

        let segments = self.segments(&settings).await?;
        let segment_index = select_outcome(&segments, SpecialOdds::from(&settings), rng)?;
        let landed = segments[segment_index].clone();

        if landed.kind == SegmentKind::Retry {
            tracing::info!(merchant_id = %merchant_id, segment_index, "Spin landed on retry");
            return Ok(SpinOutcome {
                outcome: SegmentKind::Retry,
                segment_index,
                segments,
                spin: None,
                coupon: None,
            });
        }

        // 쿠폰 코드가 충돌하면 스핀 기록까지 새 코드로 다시 시도
        let (spin, coupon) = codes::with_fresh_code(|| {
            let coupon = landed
                .prize
                .as_ref()
                .map(|prize| new_coupon(&settings, prize, &self.policy, now));
            self.store.record_spin(
                NewSpin {
                    merchant_id,
                    prize_id: landed.prize.as_ref().map(|p| p.id),
                    client_identity_token: identity_token.to_string(),
                    spin_date: today,
                },
                coupon,
            )
        })
        .await?;

        tracing::info!(
            merchant_id = %merchant_id,
            spin_id = %spin.id,
            outcome = ?landed.kind,
            coupon = coupon.as_ref().map(|c| c.code.as_str()).unwrap_or("-"),
            "Spin completed"
        );

        self.notifier.emit(
            merchant_id,
            NotificationEvent::SpinCompleted,
            json!({ "spin_id": spin.id, "outcome": landed.kind }),
        );
        if let Some(coupon) = &coupon {
            self.notifier.emit(
                merchant_id,
                NotificationEvent::CouponIssued,
                json!({
                    "code": coupon.code,
                    "prize_name": coupon.prize_name,
                    "expires_at": coupon.expires_at,
                }),
            );
        }

        Ok(SpinOutcome {
            outcome: landed.kind,
            segment_index,
            segments,
            spin: Some(spin),
            coupon,
        })
    }

    async fn wheel_settings(&self, merchant_id: Uuid) -> RewardResult<MerchantSettings> {
        let settings = self
            .store
            .merchant_settings(merchant_id)
            .await?
            .ok_or_else(|| RewardError::not_found("merchant"))?;

        if !settings.wheel_enabled {
            return Err(RewardError::Configuration(format!(
                "wheel is disabled for merchant {}",
                merchant_id
            )));
        }
        Ok(settings)
    }

    async fn segments(&self, settings: &MerchantSettings) -> RewardResult<Vec<WheelSegment>> {
        let prizes = self.store.active_prizes(settings.merchant_id).await?;
        Ok(build_segments(
            &prizes,
            settings.unlucky_quantity.max(0) as usize,
            settings.retry_quantity.max(0) as usize,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::{fixtures, MemoryStore};

    fn setup(configure: impl FnOnce(&mut MerchantSettings)) -> (Arc<MemoryStore>, WheelService, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let merchant_id = Uuid::new_v4();
        let mut settings = fixtures::merchant_settings(merchant_id);
        configure(&mut settings);
        store.insert_merchant(settings);
        let wheel = WheelService::new(store.clone(), Notifier::disabled(), EnginePolicy::default());
        (store, wheel, merchant_id)
    }

    /// 꽝/다시 확률 0 → 항상 경품
    fn always_win(settings: &mut MerchantSettings) {
        settings.unlucky_probability = 0;
        settings.retry_probability = 0;
    }

    #[tokio::test]
    async fn test_preview_reflects_live_prizes() {
        let (store, wheel, merchant_id) = setup(|_| {});
        let before = wheel.preview(merchant_id).await.unwrap();
        assert_eq!(before.len(), 4);

        store.insert_prize(fixtures::prize(merchant_id, "Cookie", 40));
        store.insert_prize(fixtures::prize(merchant_id, "Tea", 40));
        store.insert_prize(fixtures::prize(merchant_id, "Cake", 20));

        let after = wheel.preview(merchant_id).await.unwrap();
        assert_eq!(after.len(), 6);
        assert_eq!(after[0].kind, SegmentKind::Prize);
    }

    #[tokio::test]
    async fn test_winning_spin_issues_coupon() {
        let (store, wheel, merchant_id) = setup(always_win);
        store.insert_prize(fixtures::prize(merchant_id, "Free espresso", 100));

        let mut rng = StdRng::seed_from_u64(11);
        let outcome = wheel.spin_with_rng(merchant_id, "visitor-1", &mut rng).await.unwrap();

        assert_eq!(outcome.outcome, SegmentKind::Prize);
        let coupon = outcome.coupon.expect("prize outcome issues a coupon");
        assert!(coupon.code.starts_with("CAFE-"));
        assert_eq!(coupon.prize_name, "Free espresso");

        let spin = outcome.spin.unwrap();
        assert_eq!(coupon.spin_id, spin.id);
        assert!(spin.prize_id.is_some());
        assert_eq!(store.coupons().len(), 1);
    }

    #[tokio::test]
    async fn test_coupon_collision_keeps_spin_and_coupon_together() {
        let (store, wheel, merchant_id) = setup(always_win);
        store.insert_prize(fixtures::prize(merchant_id, "Free espresso", 100));
        store.simulate_code_collisions(2);

        let mut rng = StdRng::seed_from_u64(12);
        let outcome = wheel.spin_with_rng(merchant_id, "visitor-7", &mut rng).await.unwrap();

        let coupon = outcome.coupon.unwrap();
        assert_eq!(coupon.spin_id, outcome.spin.unwrap().id);
        assert_eq!(store.spins().len(), 1);
        assert_eq!(store.coupons().len(), 1);
    }

    #[tokio::test]
    async fn test_reserved_prefix_stays_out_of_redemption_codes() {
        let (store, wheel, merchant_id) = setup(|settings| {
            always_win(settings);
            settings.coupon_prefix = "rwd".to_string();
        });
        store.insert_prize(fixtures::prize(merchant_id, "Free espresso", 100));

        let mut rng = StdRng::seed_from_u64(13);
        let outcome = wheel.spin_with_rng(merchant_id, "visitor-8", &mut rng).await.unwrap();

        let coupon = outcome.coupon.unwrap();
        assert!(coupon.code.starts_with("WIN-"));
        assert!(!codes::is_redemption_code(&coupon.code));
    }

    #[tokio::test]
    async fn test_one_spin_per_day() {
        let (store, wheel, merchant_id) = setup(always_win);
        store.insert_prize(fixtures::prize(merchant_id, "Free espresso", 100));
        let mut rng = StdRng::seed_from_u64(12);

        wheel.spin_with_rng(merchant_id, "visitor-2", &mut rng).await.unwrap();
        let err = wheel
            .spin_with_rng(merchant_id, " visitor-2 ", &mut rng)
            .await
            .unwrap_err();
        assert_eq!(err.conflict_kind(), Some(&ConflictKind::AlreadySpunToday));

        // 다른 방문자는 영향 없음
        assert!(wheel.spin_with_rng(merchant_id, "visitor-3", &mut rng).await.is_ok());
        assert_eq!(store.spins().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_spins_single_record() {
        let (store, wheel, merchant_id) = setup(always_win);
        store.insert_prize(fixtures::prize(merchant_id, "Free espresso", 100));
        let wheel = Arc::new(wheel);

        let mut handles = Vec::new();
        for seed in 0..8u64 {
            let wheel = wheel.clone();
            handles.push(tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(seed);
                wheel.spin_with_rng(merchant_id, "same-visitor", &mut rng).await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.spins().len(), 1);
        assert_eq!(store.coupons().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_outcome_is_not_recorded() {
        let (store, wheel, merchant_id) = setup(|s| {
            s.unlucky_probability = 0;
            s.retry_probability = 100;
        });

        let mut rng = StdRng::seed_from_u64(13);
        let outcome = wheel.spin_with_rng(merchant_id, "visitor-4", &mut rng).await.unwrap();

        assert_eq!(outcome.outcome, SegmentKind::Retry);
        assert!(outcome.spin.is_none());
        assert!(store.spins().is_empty());
        assert!(wheel.spin_with_rng(merchant_id, "visitor-4", &mut rng).await.is_ok());
    }

    #[tokio::test]
    async fn test_unlucky_outcome_closes_the_day() {
        let (store, wheel, merchant_id) = setup(|s| {
            s.unlucky_probability = 100;
            s.retry_probability = 0;
        });
        store.insert_prize(fixtures::prize(merchant_id, "Rare", 1));

        let mut rng = StdRng::seed_from_u64(14);
        // retry 가중치 0 → 꽝이든 경품이든 기록은 남음
        let outcome = wheel.spin_with_rng(merchant_id, "visitor-5", &mut rng).await.unwrap();
        assert_ne!(outcome.outcome, SegmentKind::Retry);
        assert_eq!(store.spins().len(), 1);
        assert_eq!(outcome.coupon.is_some(), outcome.outcome == SegmentKind::Prize);
    }

    #[tokio::test]
    async fn test_spin_rejections() {
        let (store, wheel, merchant_id) = setup(|s| s.wheel_enabled = false);

        assert!(matches!(
            wheel.spin(merchant_id, "visitor").await,
            Err(RewardError::Configuration(_))
        ));
        assert!(matches!(
            wheel.spin(merchant_id, "   ").await,
            Err(RewardError::Validation(_))
        ));
        assert!(matches!(
            wheel.spin(Uuid::new_v4(), "visitor").await,
            Err(RewardError::NotFound(_))
        ));
        assert!(store.spins().is_empty());
    }
}
