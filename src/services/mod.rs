//! Services Module
//!
//! 비즈니스 로직을 담당하는 서비스 레이어
//!
//! # Services
//! - `segments` / `selector`: 휠 구성 및 가중치 추첨 (순수 함수)
//! - `WheelService`: 하루 1회 스핀 + 당첨 쿠폰
//! - `IdentityResolver`: 연락처 → 로열티 고객 (멱등)
//! - `PointsLedger`: 포인트 원장 (잔액의 유일한 writer)
//! - `RedemptionManager`: 보상 교환, 토큰 검증/사용/취소
//! - `Notifier`: 커밋 이후 best-effort 알림
//! - `RewardEngine`: 위 컴포넌트를 묶은 facade

pub mod codes;
mod engine;
pub mod identity;
pub mod ledger;
pub mod notifier;
pub mod redemption;
pub mod segments;
pub mod selector;
pub mod wheel;

pub use engine::RewardEngine;
pub use identity::IdentityResolver;
pub use ledger::{BalanceUpdate, LedgerAudit, PointsLedger};
pub use notifier::{BroadcastDispatcher, Notification, NotificationDispatcher, NotificationEvent, Notifier};
pub use redemption::RedemptionManager;
pub use segments::{build_segments, SegmentKind, WheelSegment};
pub use selector::{select_outcome, SpecialOdds};
pub use wheel::{SpinOutcome, WheelService};
