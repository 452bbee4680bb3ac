//! Per-user daily usage quotas.
//!
//! Counters live at `resume_enhancer:quota:<class>:<user>:<YYYY-MM-DD>` (UTC).
//! Nothing ever resets a counter on rollover: a new date is simply a new key,
//! and the backend drops old keys after a short retention window.
//!
//! Quotas fail open. A disabled tracker or an unreachable backend allows
//! everything and reports unlimited remaining.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{SharedStore, StoreError, KEY_NAMESPACE};

pub mod handlers;

/// How long a counter key is kept after its last increment.
const COUNTER_RETENTION: Duration = Duration::from_secs(2 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaClass {
    /// Calls that reach the external generator.
    Generative,
    /// Every transform that produced new output, whichever path produced it.
    AnyTransform,
}

impl QuotaClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaClass::Generative => "generative",
            QuotaClass::AnyTransform => "any_transform",
        }
    }

    fn key_segment(&self) -> &'static str {
        match self {
            QuotaClass::Generative => "gpt_usage",
            QuotaClass::AnyTransform => "enhancement_usage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub daily_generative: u32,
    pub daily_any_transform: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            daily_generative: 10,
            daily_any_transform: 20,
        }
    }
}

impl QuotaLimits {
    pub fn limit_for(&self, class: QuotaClass) -> u32 {
        match class {
            QuotaClass::Generative => self.daily_generative,
            QuotaClass::AnyTransform => self.daily_any_transform,
        }
    }
}

/// Snapshot of a user's quota state, as returned by `GET /api/v1/usage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub unlimited: bool,
    /// `None` when unlimited.
    pub generative_remaining: Option<u32>,
    pub any_transform_remaining: Option<u32>,
    pub can_use_generative: bool,
    pub can_use_any_transform: bool,
    pub resets_in_seconds: u64,
}

#[derive(Clone)]
pub struct QuotaTracker {
    backend: Option<Arc<dyn SharedStore>>,
    limits: QuotaLimits,
}

impl QuotaTracker {
    pub fn disabled(limits: QuotaLimits) -> Self {
        Self {
            backend: None,
            limits,
        }
    }

    pub fn shared(store: Arc<dyn SharedStore>, limits: QuotaLimits) -> Self {
        Self {
            backend: Some(store),
            limits,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// True while today's count for `class` is below the daily ceiling. Never increments.
    pub async fn allowed(&self, user: Uuid, class: QuotaClass) -> bool {
        self.allowed_on(user, class, today()).await
    }

    /// Records one unit of usage. Atomic with respect to concurrent consumers.
    pub async fn consume(&self, user: Uuid, class: QuotaClass) {
        self.consume_on(user, class, today()).await
    }

    /// Units left today, or `None` when quotas are not enforced.
    pub async fn remaining(&self, user: Uuid, class: QuotaClass) -> Option<u32> {
        self.remaining_on(user, class, today()).await
    }

    /// Clears both of today's counters for `user`. Earlier dates are untouched.
    pub async fn reset_all(&self, user: Uuid) {
        self.reset_all_on(user, today()).await
    }

    pub async fn usage(&self, user: Uuid, now: DateTime<Utc>) -> UsageReport {
        let date = now.date_naive();
        let generative_remaining = self.remaining_on(user, QuotaClass::Generative, date).await;
        let any_transform_remaining = self
            .remaining_on(user, QuotaClass::AnyTransform, date)
            .await;
        UsageReport {
            unlimited: !self.is_enabled(),
            generative_remaining,
            any_transform_remaining,
            can_use_generative: generative_remaining.map_or(true, |n| n > 0),
            can_use_any_transform: any_transform_remaining.map_or(true, |n| n > 0),
            resets_in_seconds: time_until_reset(now).as_secs(),
        }
    }

    pub(crate) async fn allowed_on(&self, user: Uuid, class: QuotaClass, date: NaiveDate) -> bool {
        match self.count_on(user, class, date).await {
            Some(count) => count < u64::from(self.limits.limit_for(class)),
            None => true,
        }
    }

    pub(crate) async fn consume_on(&self, user: Uuid, class: QuotaClass, date: NaiveDate) {
        let Some(store) = self.backend.as_ref() else {
            return;
        };
        let key = counter_key(user, class, date);
        match store.increment(&key, COUNTER_RETENTION).await {
            Ok(count) => debug!("Quota {} for user {user} now at {count}", class.as_str()),
            Err(e) => warn!("Failed to record {} usage for user {user}: {e}", class.as_str()),
        }
    }

    pub(crate) async fn remaining_on(
        &self,
        user: Uuid,
        class: QuotaClass,
        date: NaiveDate,
    ) -> Option<u32> {
        let count = self.count_on(user, class, date).await?;
        let limit = u64::from(self.limits.limit_for(class));
        Some(limit.saturating_sub(count) as u32)
    }

    pub(crate) async fn reset_all_on(&self, user: Uuid, date: NaiveDate) {
        let Some(store) = self.backend.as_ref() else {
            return;
        };
        let keys = [QuotaClass::Generative, QuotaClass::AnyTransform]
            .map(|class| counter_key(user, class, date));
        match store.delete(&keys).await {
            Ok(()) => debug!("Reset daily usage for user {user}"),
            Err(e) => warn!("Failed to reset daily usage for user {user}: {e}"),
        }
    }

    /// Today's count, or `None` when the count is unknown (disabled or backend error).
    async fn count_on(&self, user: Uuid, class: QuotaClass, date: NaiveDate) -> Option<u64> {
        let store = self.backend.as_ref()?;
        let key = counter_key(user, class, date);
        let value = match store.get(&key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Quota read failed for {key}, allowing request: {e}");
                return None;
            }
        };
        match value {
            None => Some(0),
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(n) => Some(n.max(0) as u64),
                Err(_) => {
                    let e = StoreError::NotAnInteger { key, value: raw };
                    warn!("Ignoring corrupt quota counter: {e}");
                    None
                }
            },
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn counter_key(user: Uuid, class: QuotaClass, date: NaiveDate) -> String {
    format!(
        "{KEY_NAMESPACE}:quota:{}:{user}:{}",
        class.key_segment(),
        date.format("%Y-%m-%d")
    )
}

/// Time left until the next UTC midnight, when every daily counter starts over.
pub fn time_until_reset(now: DateTime<Utc>) -> Duration {
    now.date_naive()
        .succ_opt()
        .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc() - now)
        .and_then(|delta| delta.to_std().ok())
        .unwrap_or_default()
}
