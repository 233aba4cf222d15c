use crate::error::{invalid_argument, SessionResult};
use crate::expiry::{ExpirationAction, ExpirationPolicy, FixedDurationPolicy, IdleTimeoutPolicy};
use crate::model::{expiry_interval_in_range, MAX_EXPIRY_INTERVAL};
use crate::serialization::{
    ComposableSerializer, DataSerializer, SchemaSerializer, SessionSerializer,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::Duration;

pub const DEFAULT_REGION_NAME: &str = "ClusteredSpringSessions";
pub const DEFAULT_POOL_NAME: &str = "DEFAULT";
pub const DEFAULT_MAX_INACTIVE_INTERVAL_SECONDS: i64 = 1800;

/// How a client process holds the session region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum ClientRegionShortcut {
    Local,
    #[default]
    Proxy,
    CachingProxy,
}

/// How server members hold the session region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum ServerRegionShortcut {
    #[default]
    Partition,
    PartitionRedundant,
    Replicate,
    Local,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum SerializerSelector {
    /// Binary codec with delta writes.
    DataSerialization,
    /// Portable named-field codec.
    #[default]
    Pdx,
    /// Portable codec first, falling back to the binary one.
    Composite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpirationPolicySelector {
    Idle {
        #[serde(default)]
        idle_timeout_seconds: Option<i64>,
    },
    FixedDuration {
        fixed_timeout_seconds: i64,
        #[serde(default)]
        idle_timeout_seconds: Option<i64>,
    },
}

impl Default for ExpirationPolicySelector {
    fn default() -> Self {
        ExpirationPolicySelector::Idle {
            idle_timeout_seconds: None,
        }
    }
}

/// Plain configuration values for wiring a session repository.
///
/// Nothing here is loaded from disk; callers deserialize it from whatever source
/// they use and hand it over.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct SessionConfig {
    pub region_name: String,
    pub pool_name: String,
    pub client_region_shortcut: ClientRegionShortcut,
    pub server_region_shortcut: ServerRegionShortcut,
    pub indexable_session_attributes: Vec<String>,
    /// Negative disables idle expiry.
    pub max_inactive_interval_seconds: i64,
    pub serializer: SerializerSelector,
    pub expiration_policy: ExpirationPolicySelector,
    pub expiration_action: ExpirationAction,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            region_name: DEFAULT_REGION_NAME.to_owned(),
            pool_name: DEFAULT_POOL_NAME.to_owned(),
            client_region_shortcut: ClientRegionShortcut::default(),
            server_region_shortcut: ServerRegionShortcut::default(),
            indexable_session_attributes: Vec::new(),
            max_inactive_interval_seconds: DEFAULT_MAX_INACTIVE_INTERVAL_SECONDS,
            serializer: SerializerSelector::default(),
            expiration_policy: ExpirationPolicySelector::default(),
            expiration_action: ExpirationAction::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_region_name(mut self, name: impl Into<String>) -> Self {
        self.region_name = name.into();
        self
    }

    pub fn with_pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    pub fn with_client_region_shortcut(mut self, shortcut: ClientRegionShortcut) -> Self {
        self.client_region_shortcut = shortcut;
        self
    }

    pub fn with_server_region_shortcut(mut self, shortcut: ServerRegionShortcut) -> Self {
        self.server_region_shortcut = shortcut;
        self
    }

    pub fn with_indexable_session_attributes<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.indexable_session_attributes = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_inactive_interval_seconds(mut self, seconds: i64) -> Self {
        self.max_inactive_interval_seconds = seconds;
        self
    }

    pub fn with_serializer(mut self, serializer: SerializerSelector) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_expiration_policy(mut self, policy: ExpirationPolicySelector) -> Self {
        self.expiration_policy = policy;
        self
    }

    pub fn with_expiration_action(mut self, action: ExpirationAction) -> Self {
        self.expiration_action = action;
        self
    }

    pub fn max_inactive_interval(&self) -> Duration {
        Duration::seconds(self.max_inactive_interval_seconds)
    }

    /// Fixed session lifetime, when the fixed-duration policy is selected.
    pub fn fixed_duration(&self) -> Option<Duration> {
        match self.expiration_policy {
            ExpirationPolicySelector::FixedDuration {
                fixed_timeout_seconds,
                ..
            } => Some(Duration::seconds(fixed_timeout_seconds)),
            ExpirationPolicySelector::Idle { .. } => None,
        }
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.region_name.trim().is_empty() {
            return Err(invalid_argument("region_name must not be empty"));
        }
        if self.pool_name.trim().is_empty() {
            return Err(invalid_argument("pool_name must not be empty"));
        }
        if !expiry_interval_in_range(self.max_inactive_interval()) {
            return Err(invalid_argument(format!(
                "max_inactive_interval_seconds must be at most {}, got {}",
                MAX_EXPIRY_INTERVAL.whole_seconds(),
                self.max_inactive_interval_seconds
            )));
        }
        if let Some(name) = self
            .indexable_session_attributes
            .iter()
            .find(|name| name.trim().is_empty())
        {
            return Err(invalid_argument(format!(
                "indexable attribute name {name:?} is blank"
            )));
        }
        self.build_expiration_policy().map(|_| ())
    }

    pub fn build_serializer(&self) -> SessionResult<Arc<dyn SessionSerializer>> {
        let data: Arc<dyn SessionSerializer> = Arc::new(DataSerializer::new());
        let pdx: Arc<dyn SessionSerializer> = Arc::new(SchemaSerializer::new());
        let serializer = match self.serializer {
            SerializerSelector::DataSerialization => Some(data),
            SerializerSelector::Pdx => Some(pdx),
            SerializerSelector::Composite => ComposableSerializer::compose(vec![pdx, data]),
        };
        serializer.ok_or_else(|| invalid_argument("no session serializer configured"))
    }

    pub fn build_expiration_policy(&self) -> SessionResult<Arc<dyn ExpirationPolicy>> {
        let idle = |seconds: Option<i64>| {
            IdleTimeoutPolicy::new(seconds.map(Duration::seconds))
                .map(|policy| policy.with_action(self.expiration_action))
        };
        let policy: Arc<dyn ExpirationPolicy> = match self.expiration_policy {
            ExpirationPolicySelector::Idle {
                idle_timeout_seconds,
            } => Arc::new(idle(idle_timeout_seconds)?),
            ExpirationPolicySelector::FixedDuration {
                fixed_timeout_seconds,
                idle_timeout_seconds,
            } => {
                let mut policy = FixedDurationPolicy::new(Duration::seconds(fixed_timeout_seconds))?
                    .with_action(self.expiration_action);
                if idle_timeout_seconds.is_some() {
                    policy = policy.with_idle_policy(idle(idle_timeout_seconds)?);
                }
                Arc::new(policy)
            }
        };
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordKind;
    use crate::serialization::{DATA_SERIALIZER_TYPE_TAG, SCHEMA_SERIALIZER_TYPE_TAG};

    #[test]
    fn defaults_match_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.region_name, "ClusteredSpringSessions");
        assert_eq!(config.pool_name, "DEFAULT");
        assert_eq!(config.client_region_shortcut, ClientRegionShortcut::Proxy);
        assert_eq!(config.server_region_shortcut, ServerRegionShortcut::Partition);
        assert_eq!(config.max_inactive_interval(), Duration::seconds(1800));
        assert_eq!(config.serializer, SerializerSelector::Pdx);
        assert_eq!(config.expiration_action, ExpirationAction::Invalidate);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: SessionConfig = serde_json::from_str(
            r#"{
                "region_name": "Sessions",
                "serializer": "composite",
                "expiration_policy": { "kind": "fixed_duration", "fixed_timeout_seconds": 120 },
                "expiration_action": "destroy"
            }"#,
        )
        .expect("parse config");
        assert_eq!(config.region_name, "Sessions");
        assert_eq!(config.pool_name, "DEFAULT");
        assert_eq!(config.fixed_duration(), Some(Duration::seconds(120)));
        assert_eq!(config.expiration_action, ExpirationAction::Destroy);
        let policy = config.build_expiration_policy().expect("policy");
        assert_eq!(policy.expiration_action(), ExpirationAction::Destroy);
    }

    #[test]
    fn serializer_selection() {
        let pdx = SessionConfig::default().build_serializer().expect("pdx");
        assert_eq!(pdx.type_tag(), SCHEMA_SERIALIZER_TYPE_TAG);

        let data = SessionConfig::default()
            .with_serializer(SerializerSelector::DataSerialization)
            .build_serializer()
            .expect("data");
        assert_eq!(data.type_tag(), DATA_SERIALIZER_TYPE_TAG);

        let chain = SessionConfig::default()
            .with_serializer(SerializerSelector::Composite)
            .build_serializer()
            .expect("composite");
        assert!(chain.can_serialize(RecordKind::Session));
        assert!(chain.can_serialize(RecordKind::DeltaCapableSession));
    }

    #[test]
    fn invalid_values_fail_fast() {
        assert!(SessionConfig::default().with_pool_name(" ").validate().is_err());
        assert!(SessionConfig::default()
            .with_indexable_session_attributes(["team", ""])
            .validate()
            .is_err());
        assert!(SessionConfig::default()
            .with_expiration_policy(ExpirationPolicySelector::FixedDuration {
                fixed_timeout_seconds: 0,
                idle_timeout_seconds: None,
            })
            .validate()
            .is_err());
        assert!(SessionConfig::default()
            .with_expiration_policy(ExpirationPolicySelector::Idle {
                idle_timeout_seconds: Some(-3),
            })
            .validate()
            .is_err());
        assert!(SessionConfig::default()
            .with_max_inactive_interval_seconds(i64::MAX)
            .validate()
            .is_err());
        assert!(SessionConfig::default()
            .with_max_inactive_interval_seconds(-1)
            .validate()
            .is_ok());
    }
}
