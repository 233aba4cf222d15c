//! Expiration policies and the backing-store custom-expiry hook.
//!
//! Policies answer "how long may this session live from now?" with a signed
//! [`Duration`]. `None` means the policy has no opinion and the store's own default
//! applies. A result `<= 0` means the session is already due; it is propagated as-is
//! and only clamped when converted to [`ExpiryAttributes`].

use crate::clock::{Clock, SystemClock};
use crate::error::{invalid_argument, SessionResult};
use crate::model::{expiry_interval_in_range, SessionRecord, MAX_EXPIRY_INTERVAL};
use crate::serialization::{self, SessionSerializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{trace, warn};

/// What the store does with an entry once it expires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum ExpirationAction {
    /// Remove the entry entirely.
    Destroy,
    /// Drop the value but keep the key.
    #[default]
    Invalidate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpirationDecision {
    pub timeout: Duration,
    pub action: ExpirationAction,
}

impl ExpirationDecision {
    pub fn is_expired(&self) -> bool {
        self.timeout <= Duration::ZERO
    }
}

pub trait ExpirationPolicy: Send + Sync + fmt::Debug {
    /// Remaining lifetime of `session` at `now`, or `None` for no opinion.
    fn determine_expiration(&self, session: &SessionRecord, now: OffsetDateTime)
        -> Option<Duration>;

    fn expiration_action(&self) -> ExpirationAction {
        ExpirationAction::Invalidate
    }

    /// Lifetime paired with the action to take when it runs out.
    fn evaluate(&self, session: &SessionRecord, now: OffsetDateTime) -> Option<ExpirationDecision> {
        self.determine_expiration(session, now)
            .map(|timeout| ExpirationDecision {
                timeout,
                action: self.expiration_action(),
            })
    }
}

/// Expires sessions that have not been accessed for `idle_timeout`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdleTimeoutPolicy {
    idle_timeout: Option<Duration>,
    action: ExpirationAction,
}

impl IdleTimeoutPolicy {
    pub fn new(idle_timeout: Option<Duration>) -> SessionResult<Self> {
        if let Some(timeout) = idle_timeout {
            if timeout.is_negative() || !expiry_interval_in_range(timeout) {
                return Err(invalid_argument(format!(
                    "idle timeout must be between 0 and {MAX_EXPIRY_INTERVAL}, got {timeout}"
                )));
            }
        }
        Ok(Self {
            idle_timeout,
            action: ExpirationAction::default(),
        })
    }

    pub fn with_action(mut self, action: ExpirationAction) -> Self {
        self.action = action;
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

impl ExpirationPolicy for IdleTimeoutPolicy {
    fn determine_expiration(
        &self,
        session: &SessionRecord,
        now: OffsetDateTime,
    ) -> Option<Duration> {
        let idle_timeout = self.idle_timeout?;
        idle_timeout.checked_sub(now - session.last_accessed_time())
    }

    fn expiration_action(&self) -> ExpirationAction {
        self.action
    }
}

/// Expires sessions `fixed_timeout` after creation, regardless of activity.
///
/// The idle limit still applies: when the idle deadline falls on or before the fixed
/// one, idle wins. With an idle delegate that has an opinion its result is returned;
/// otherwise the session's own `max_inactive_interval` is used for the comparison and
/// `None` is returned so the store's idle configuration governs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedDurationPolicy {
    fixed_timeout: Duration,
    idle: Option<IdleTimeoutPolicy>,
    action: ExpirationAction,
}

impl FixedDurationPolicy {
    pub fn new(fixed_timeout: Duration) -> SessionResult<Self> {
        if fixed_timeout <= Duration::ZERO || !expiry_interval_in_range(fixed_timeout) {
            return Err(invalid_argument(format!(
                "fixed timeout must be positive and at most {MAX_EXPIRY_INTERVAL}, \
                 got {fixed_timeout}"
            )));
        }
        Ok(Self {
            fixed_timeout,
            idle: None,
            action: ExpirationAction::default(),
        })
    }

    pub fn with_idle_policy(mut self, idle: IdleTimeoutPolicy) -> Self {
        self.idle = Some(idle);
        self
    }

    pub fn with_action(mut self, action: ExpirationAction) -> Self {
        self.action = action;
        self
    }

    pub fn fixed_timeout(&self) -> Duration {
        self.fixed_timeout
    }
}

impl ExpirationPolicy for FixedDurationPolicy {
    fn determine_expiration(
        &self,
        session: &SessionRecord,
        now: OffsetDateTime,
    ) -> Option<Duration> {
        self.evaluate(session, now).map(|decision| decision.timeout)
    }

    fn expiration_action(&self) -> ExpirationAction {
        self.action
    }

    fn evaluate(&self, session: &SessionRecord, now: OffsetDateTime) -> Option<ExpirationDecision> {
        let fixed_remaining = self
            .fixed_timeout
            .checked_sub(now - session.creation_time())?;
        let delegated = self
            .idle
            .as_ref()
            .and_then(|idle| idle.evaluate(session, now));
        let idle_remaining = delegated.map(|decision| decision.timeout).or_else(|| {
            let interval = session.max_inactive_interval();
            if interval.is_negative() {
                return None;
            }
            interval.checked_sub(now - session.last_accessed_time())
        });

        match idle_remaining {
            Some(idle) if idle <= fixed_remaining => delegated,
            _ => Some(ExpirationDecision {
                timeout: fixed_remaining,
                action: self.action,
            }),
        }
    }
}

/// Asks each policy in turn and returns the first opinion.
#[derive(Clone, Debug, Default)]
pub struct CompositePolicy {
    policies: Vec<Arc<dyn ExpirationPolicy>>,
}

impl CompositePolicy {
    pub fn new(policies: Vec<Arc<dyn ExpirationPolicy>>) -> Self {
        Self { policies }
    }

    pub fn push(mut self, policy: Arc<dyn ExpirationPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn policies(&self) -> &[Arc<dyn ExpirationPolicy>] {
        &self.policies
    }
}

impl ExpirationPolicy for CompositePolicy {
    fn determine_expiration(
        &self,
        session: &SessionRecord,
        now: OffsetDateTime,
    ) -> Option<Duration> {
        self.evaluate(session, now).map(|decision| decision.timeout)
    }

    fn evaluate(&self, session: &SessionRecord, now: OffsetDateTime) -> Option<ExpirationDecision> {
        self.policies
            .iter()
            .find_map(|policy| policy.evaluate(session, now))
    }
}

/// Expiry settings in the store's native form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExpiryAttributes {
    /// Always within `1..=i32::MAX`.
    pub ttl_seconds: i32,
    pub action: ExpirationAction,
}

impl ExpiryAttributes {
    pub fn from_decision(decision: ExpirationDecision) -> Self {
        let seconds = decision
            .timeout
            .whole_seconds()
            .clamp(1, i64::from(i32::MAX));
        Self {
            ttl_seconds: seconds as i32,
            action: decision.action,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::seconds(i64::from(self.ttl_seconds))
    }
}

/// A value as the backing store holds it.
#[derive(Clone, Copy, Debug)]
pub enum StoredValue<'a> {
    Session(&'a SessionRecord),
    /// An encoded payload that must be decoded before a policy can look at it.
    Portable(&'a [u8]),
}

/// Custom-expiry hook handed to a backing store.
#[derive(Clone, Debug)]
pub struct SessionExpiry {
    policy: Arc<dyn ExpirationPolicy>,
    serializer: Option<Arc<dyn SessionSerializer>>,
    clock: Arc<dyn Clock>,
}

impl SessionExpiry {
    pub fn new(policy: Arc<dyn ExpirationPolicy>) -> Self {
        Self {
            policy,
            serializer: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Codec used to unwrap [`StoredValue::Portable`] values.
    pub fn with_serializer(mut self, serializer: Arc<dyn SessionSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &Arc<dyn ExpirationPolicy> {
        &self.policy
    }

    /// Resolves the expiry for a stored value; `None` keeps the store's defaults.
    pub fn resolve_expiry(
        &self,
        stored: StoredValue<'_>,
    ) -> SessionResult<Option<ExpiryAttributes>> {
        let decoded;
        let session = match stored {
            StoredValue::Session(session) => session,
            StoredValue::Portable(payload) => {
                let Some(serializer) = self.serializer.as_deref() else {
                    warn!("portable session value without a serializer; using store defaults");
                    return Ok(None);
                };
                decoded = serialization::decode(serializer, payload)?;
                &decoded
            }
        };

        let attributes = self
            .policy
            .evaluate(session, self.clock.now())
            .map(ExpiryAttributes::from_decision);
        trace!(
            session_id = %session.id(),
            ttl_secs = attributes.map(|a| a.ttl_seconds),
            action = ?attributes.map(|a| a.action),
            "resolved session expiry"
        );
        Ok(attributes)
    }
}
