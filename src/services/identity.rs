//! Identity Resolver
//!
//! Maps `(merchant, phone | email)` to exactly one loyalty client.
//!
//! # Design Decision
//!
//! Lookup-then-insert is racy on its own. The store's unique constraints
//! on `(merchant_id, phone)` and `(merchant_id, email)` settle the race:
//! the losing insert comes back as `ClientInsert::Duplicate` and the
//! resolver re-reads the winner's row.
//!
//! ```text
//! lookup(phone) ─▶ lookup(email) ─▶ found? ── yes ─▶ touch last_visit ─▶ (client, false)
//!                                     │
//!                                     no
//!                                     ▼
//!                         create + welcome entry ─▶ (client, true)
//!                                     │
//!                                 Duplicate
//!                                     ▼
//!                         re-fetch ─▶ (client, false)   (still missing → RaceLost)
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::codes;
use super::ledger::loyalty_settings;
use super::notifier::{NotificationEvent, Notifier};
use crate::db::{ClientInsert, LoyaltyClient, NewClient, RewardStore};
use crate::error::{RewardError, RewardResult};
use crate::types::Contact;

pub struct IdentityResolver {
    store: Arc<dyn RewardStore>,
    notifier: Notifier,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn RewardStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// 고객 조회 또는 생성
    ///
    /// 반환값의 `bool`은 이번 호출에서 새로 생성되었는지 여부.
    pub async fn resolve_or_create(
        &self,
        merchant_id: Uuid,
        contact: &Contact,
        name: Option<&str>,
    ) -> RewardResult<(LoyaltyClient, bool)> {
        let contact = contact.normalized()?;
        let settings = loyalty_settings(self.store.as_ref(), merchant_id).await?;

        if let Some(existing) = self.lookup(merchant_id, &contact).await? {
            return self.returning(existing).await;
        }

        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let inserted = codes::with_fresh_code(|| {
            let new_client = NewClient {
                merchant_id,
                card_id: codes::card_id(&mut rand::thread_rng()),
                name: name.map(str::to_string),
                phone: contact.phone.clone(),
                email: contact.email.clone(),
                qr_code_data: codes::qr_token(),
            };
            self.store.create_client(new_client, settings.welcome_points)
        })
        .await?;

        match inserted {
            ClientInsert::Created { client, welcome } => {
                tracing::info!(
                    client_id = %client.id,
                    merchant_id = %merchant_id,
                    card_id = %client.card_id,
                    welcome_points = welcome.points,
                    "Loyalty client enrolled"
                );

                self.notifier.emit(
                    merchant_id,
                    NotificationEvent::ClientEnrolled,
                    json!({
                        "client_id": client.id,
                        "card_id": client.card_id,
                        "points": client.points,
                    }),
                );

                Ok((client, true))
            }
            ClientInsert::Duplicate => {
                tracing::debug!(merchant_id = %merchant_id, "Concurrent enrolment detected, re-fetching");
                match self.lookup(merchant_id, &contact).await? {
                    Some(existing) => self.returning(existing).await,
                    None => Err(RewardError::RaceLost(
                        "client created concurrently but not yet visible".to_string(),
                    )),
                }
            }
        }
    }

    /// 전화번호 우선, 없으면 이메일
    async fn lookup(&self, merchant_id: Uuid, contact: &Contact) -> RewardResult<Option<LoyaltyClient>> {
        if let Some(phone) = contact.phone.as_deref() {
            if let Some(client) = self.store.find_client_by_phone(merchant_id, phone).await? {
                return Ok(Some(client));
            }
        }

        if let Some(email) = contact.email.as_deref() {
            if let Some(client) = self.store.find_client_by_email(merchant_id, email).await? {
                return Ok(Some(client));
            }
        }

        Ok(None)
    }

    async fn returning(&self, client: LoyaltyClient) -> RewardResult<(LoyaltyClient, bool)> {
        let client = self.store.touch_client(client.id, Utc::now()).await?;
        tracing::debug!(client_id = %client.id, "Returning loyalty client");
        Ok((client, false))
    }
}
