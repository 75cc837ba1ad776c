//! Wheel Segment Builder
//!
//! Turns a merchant's prize list and special-slot quantities into the
//! ordered wedges of the spin wheel. Pure function over the current
//! configuration: rebuilt for every request, never cached.
//!
//! # Algorithm
//!
//! ```text
//! specials = [unlucky × n] ++ [retry × m]
//! prizes   = 0 → fallback [U, R, U, R]        (configured counts ignored)
//!            1-2 → cycle until ≥ 4 prize slots
//! total > 8 → keep specials, truncate prizes
//! total < 6 → pad with unlucky
//! interleave: P S P S ... (leftovers appended)
//! ```

use serde::Serialize;

use crate::db::Prize;

/// 휠 최대 칸 수
pub const MAX_SEGMENTS: usize = 8;
/// 패딩 후 최소 칸 수
pub const MIN_SEGMENTS: usize = 6;
/// 경품이 1-2개일 때 복제해서 채울 최소 경품 칸 수
const MIN_PRIZE_SEGMENTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Prize,
    Unlucky,
    Retry,
}

/// 휠 한 칸 (요청마다 계산, 저장 안 함)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WheelSegment {
    pub kind: SegmentKind,
    /// kind == Prize 일 때만
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prize: Option<Prize>,
}

impl WheelSegment {
    pub fn prize(prize: Prize) -> Self {
        Self {
            kind: SegmentKind::Prize,
            prize: Some(prize),
        }
    }

    pub fn unlucky() -> Self {
        Self {
            kind: SegmentKind::Unlucky,
            prize: None,
        }
    }

    pub fn retry() -> Self {
        Self {
            kind: SegmentKind::Retry,
            prize: None,
        }
    }

    pub fn is_special(&self) -> bool {
        self.kind != SegmentKind::Prize
    }
}

/// 세그먼트 목록 생성
pub fn build_segments(
    prizes: &[Prize],
    unlucky_quantity: usize,
    retry_quantity: usize,
) -> Vec<WheelSegment> {
    // NOTE: 경품이 없으면 머천트가 설정한 꽝/다시 수량과 무관하게 고정 4칸.
    // 설정 무시가 의도인지 확인 전까지 기존 동작 유지.
    if prizes.is_empty() {
        return vec![
            WheelSegment::unlucky(),
            WheelSegment::retry(),
            WheelSegment::unlucky(),
            WheelSegment::retry(),
        ];
    }

    let mut specials: Vec<WheelSegment> = std::iter::repeat_with(WheelSegment::unlucky)
        .take(unlucky_quantity)
        .chain(std::iter::repeat_with(WheelSegment::retry).take(retry_quantity))
        .collect();

    let mut prize_segments: Vec<WheelSegment> = if prizes.len() <= 2 {
        prizes
            .iter()
            .cycle()
            .take(MIN_PRIZE_SEGMENTS)
            .cloned()
            .map(WheelSegment::prize)
            .collect()
    } else {
        prizes.iter().cloned().map(WheelSegment::prize).collect()
    };

    if specials.len() + prize_segments.len() > MAX_SEGMENTS {
        prize_segments.truncate(MAX_SEGMENTS.saturating_sub(specials.len()));
    }

    while specials.len() + prize_segments.len() < MIN_SEGMENTS {
        specials.push(WheelSegment::unlucky());
    }

    interleave(prize_segments, specials)
}

/// P S P S ... 교차 배치, 남는 쪽은 순서대로 뒤에 붙임
fn interleave(prizes: Vec<WheelSegment>, specials: Vec<WheelSegment>) -> Vec<WheelSegment> {
    let mut out = Vec::with_capacity(prizes.len() + specials.len());
    let mut prizes = prizes.into_iter();
    let mut specials = specials.into_iter();

    loop {
        match (prizes.next(), specials.next()) {
            (None, None) => break,
            (p, s) => {
                out.extend(p);
                out.extend(s);
            }
        }
    }

    out
}
