//! Token Generation
//!
//! Human-legible reward codes and opaque client identifiers.
//! Uniqueness is enforced by the store's unique constraints; these
//! functions only provide enough entropy to make collisions rare.

use std::future::Future;

use rand::Rng;
use uuid::Uuid;

use crate::error::{RewardError, RewardResult};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 6;
const MAX_PREFIX_LEN: usize = 6;
const DEFAULT_COUPON_PREFIX: &str = "WIN";
const REDEMPTION_PREFIX: &str = "RWD-";
/// 교환 코드 네임스페이스 (쿠폰 접두사로 사용 불가)
const RESERVED_PREFIX: &str = "RWD";
/// 코드 충돌 시 최대 생성 시도 횟수
pub const CODE_ATTEMPTS: usize = 5;

fn random_suffix<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// 머천트 접두사 정리 (대문자, 영숫자만, 최대 6자)
pub fn coupon_prefix(raw: &str) -> String {
    let prefix: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .take(MAX_PREFIX_LEN)
        .collect();

    if prefix.is_empty() || prefix == RESERVED_PREFIX {
        DEFAULT_COUPON_PREFIX.to_string()
    } else {
        prefix
    }
}

/// `CAFE-7K2Q9X`
pub fn coupon_code<R: Rng + ?Sized>(rng: &mut R, merchant_prefix: &str) -> String {
    format!("{}-{}", coupon_prefix(merchant_prefix), random_suffix(rng, SUFFIX_LEN))
}

/// `RWD-AB12CD`
pub fn redemption_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{}{}", REDEMPTION_PREFIX, random_suffix(rng, SUFFIX_LEN))
}

/// `CARD-04718263`
pub fn card_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("CARD-{:08}", rng.gen_range(0..100_000_000u32))
}

/// QR 코드에 인코딩되는 불투명 토큰
pub fn qr_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 새 코드로 재시도
///
/// `op`는 호출마다 코드를 새로 생성해야 한다. 저장소가 `CodeCollision`을
/// 반환하면 최대 `CODE_ATTEMPTS`번까지 다시 호출한다.
pub async fn with_fresh_code<T, F, Fut>(mut op: F) -> RewardResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RewardResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(RewardError::CodeCollision(what)) if attempt < CODE_ATTEMPTS => {
                tracing::warn!(attempt, collided = %what, "Generated code collided, regenerating");
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// 스캔 입력 정규화
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// `RWD-[A-Z0-9]{5,8}`
pub fn is_redemption_code(code: &str) -> bool {
    match code.strip_prefix(REDEMPTION_PREFIX) {
        Some(rest) => {
            (5..=8).contains(&rest.len())
                && rest.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_coupon_prefix_sanitized() {
        assert_eq!(coupon_prefix("Café Lumière"), "CAFLUM");
        assert_eq!(coupon_prefix("bar"), "BAR");
        assert_eq!(coupon_prefix("  -- "), "WIN");
        assert_eq!(coupon_prefix(""), "WIN");
    }

    #[test]
    fn test_coupon_code_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let code = coupon_code(&mut rng, "cafe");
        let (prefix, suffix) = code.split_once('-').unwrap();

        assert_eq!(prefix, "CAFE");
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_redemption_code_matches_format() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            assert!(is_redemption_code(&redemption_code(&mut rng)));
        }
    }

    #[test]
    fn test_is_redemption_code() {
        assert!(is_redemption_code("RWD-AB12C"));
        assert!(is_redemption_code("RWD-AB12CD34"));
        assert!(!is_redemption_code("RWD-AB12"));
        assert!(!is_redemption_code("RWD-AB12CD345"));
        assert!(!is_redemption_code("RWD-ab12c"));
        assert!(!is_redemption_code("CAFE-AB12CD"));
    }

    #[test]
    fn test_card_id_and_qr_token() {
        let mut rng = StdRng::seed_from_u64(3);
        let card = card_id(&mut rng);
        assert!(card.starts_with("CARD-"));
        assert_eq!(card.len(), 13);

        let a = qr_token();
        let b = qr_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  rwd-ab12c \n"), "RWD-AB12C");
    }

    #[test]
    fn test_redemption_prefix_reserved_for_coupons() {
        assert_eq!(coupon_prefix("RWD"), "WIN");
        assert_eq!(coupon_prefix("r.w.d"), "WIN");
        assert_eq!(coupon_prefix("RWDX"), "RWDX");

        let mut rng = StdRng::seed_from_u64(4);
        let code = coupon_code(&mut rng, "rwd");
        assert!(code.starts_with("WIN-"));
        assert!(!is_redemption_code(&code));
    }

    #[tokio::test]
    async fn test_with_fresh_code_retries_collisions() {
        let mut calls = 0;
        let result = with_fresh_code(|| {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(RewardError::CodeCollision("coupon code".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_with_fresh_code_gives_up() {
        let mut calls = 0;
        let result: RewardResult<()> = with_fresh_code(|| {
            calls += 1;
            async { Err(RewardError::CodeCollision("card id".into())) }
        })
        .await;

        assert!(matches!(result, Err(RewardError::CodeCollision(_))));
        assert_eq!(calls, CODE_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_with_fresh_code_passes_other_errors_through() {
        let mut calls = 0;
        let result: RewardResult<()> = with_fresh_code(|| {
            calls += 1;
            async { Err(RewardError::not_found("reward")) }
        })
        .await;

        assert!(matches!(result, Err(RewardError::NotFound(_))));
        assert_eq!(calls, 1);
    }
}
