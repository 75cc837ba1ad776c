//! Common Types Module
//!
//! 애플리케이션 전반에서 사용되는 공통 타입 정의

use serde::{Deserialize, Serialize};

use crate::error::{RewardError, RewardResult};

/// API 응답 래퍼
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// 고객 연락처 (전화번호 또는 이메일)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contact {
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Contact {
    pub fn phone(phone: &str) -> Self {
        Self {
            phone: Some(phone.to_string()),
            email: None,
        }
    }

    pub fn email(email: &str) -> Self {
        Self {
            phone: None,
            email: Some(email.to_string()),
        }
    }

    /// 정규화 + 검증
    ///
    /// - 전화번호: 공백/구분자 제거, 선행 `+` 유지
    /// - 이메일: trim + 소문자
    /// - 둘 다 없으면 `Validation`
    pub fn normalized(&self) -> RewardResult<Contact> {
        let phone = match self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => Some(normalize_phone(raw)?),
            None => None,
        };

        let email = match self.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            Some(raw) => Some(normalize_email(raw)?),
            None => None,
        };

        if phone.is_none() && email.is_none() {
            return Err(RewardError::validation("phone or email is required"));
        }

        Ok(Contact { phone, email })
    }
}

fn normalize_phone(raw: &str) -> RewardResult<String> {
    let mut out = String::with_capacity(raw.len());
    for (i, c) in raw.chars().enumerate() {
        match c {
            '+' if i == 0 => out.push(c),
            '0'..='9' => out.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(RewardError::validation(format!("invalid phone number: {}", raw))),
        }
    }

    let digits = out.trim_start_matches('+').len();
    if !(6..=15).contains(&digits) {
        return Err(RewardError::validation(format!("invalid phone number: {}", raw)));
    }
    Ok(out)
}

fn normalize_email(raw: &str) -> RewardResult<String> {
    let email = raw.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(RewardError::validation(format!("invalid email: {}", raw))),
    }
}
