//! Weighted Selector
//!
//! Draws one wheel segment with probability proportional to its weight.
//!
//! # Weights
//!
//! - prize segment: `prize.probability / (occurrences of that prize on the wheel)`
//! - special segment: `category_probability / (segments of that category on the wheel)`
//!
//! Occurrences are counted on the built wheel (after cycling, truncation and
//! padding), so each prize and each special category keeps exactly its
//! configured share of the total.

use std::collections::HashMap;

use rand::Rng;
use uuid::Uuid;

use super::segments::{SegmentKind, WheelSegment};
use crate::db::MerchantSettings;
use crate::error::{RewardError, RewardResult};

/// 특수 칸 카테고리 전체 확률
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpecialOdds {
    pub unlucky_probability: f64,
    pub retry_probability: f64,
}

impl From<&MerchantSettings> for SpecialOdds {
    fn from(settings: &MerchantSettings) -> Self {
        Self {
            unlucky_probability: f64::from(settings.unlucky_probability.max(0)),
            retry_probability: f64::from(settings.retry_probability.max(0)),
        }
    }
}

/// 세그먼트별 가중치
pub fn segment_weights(segments: &[WheelSegment], odds: SpecialOdds) -> Vec<f64> {
    let unlucky = segments.iter().filter(|s| s.kind == SegmentKind::Unlucky).count();
    let retry = segments.iter().filter(|s| s.kind == SegmentKind::Retry).count();

    let mut prize_occurrences: HashMap<Uuid, usize> = HashMap::new();
    for prize in segments.iter().filter_map(|s| s.prize.as_ref()) {
        *prize_occurrences.entry(prize.id).or_insert(0) += 1;
    }

    segments
        .iter()
        .map(|segment| match (segment.kind, segment.prize.as_ref()) {
            (SegmentKind::Prize, Some(prize)) => {
                let copies = prize_occurrences.get(&prize.id).copied().unwrap_or(1);
                f64::from(prize.probability.max(0)) / copies as f64
            }
            (SegmentKind::Prize, None) => 0.0,
            (SegmentKind::Unlucky, _) => odds.unlucky_probability / unlucky as f64,
            (SegmentKind::Retry, _) => odds.retry_probability / retry as f64,
        })
        .collect()
}

/// 누적 가중치 탐색
///
/// `r ∈ [0, total)`에 대해 누적합이 처음으로 `r` 이상이 되는 양수 가중치 칸.
/// 가중치 합이 0이면 0번 칸.
pub fn pick(weights: &[f64], r: f64) -> usize {
    let mut cumulative = 0.0;
    let mut last_positive = None;

    for (index, weight) in weights.iter().enumerate() {
        if *weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        last_positive = Some(index);
        if cumulative >= r {
            return index;
        }
    }

    // 부동소수점 누적 오차로 끝까지 간 경우
    last_positive.unwrap_or(0)
}

/// 결과 칸 인덱스 추첨
pub fn select_outcome<R: Rng + ?Sized>(
    segments: &[WheelSegment],
    odds: SpecialOdds,
    rng: &mut R,
) -> RewardResult<usize> {
    if segments.is_empty() {
        return Err(RewardError::validation("wheel has no segments"));
    }

    let weights = segment_weights(segments, odds);
    let total: f64 = weights.iter().sum();

    if total <= 0.0 {
        tracing::debug!(segments = segments.len(), "all weights zero, falling back to first segment");
        return Ok(0);
    }

    let r = rng.gen_range(0.0..total);
    Ok(pick(&weights, r))
}
