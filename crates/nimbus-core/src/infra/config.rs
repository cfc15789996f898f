use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::common::timeutils::{deserialize_human_duration_opt, get_duration_from_env};
use crate::infra::connectivity::ConnectivityKind;
use crate::specification::{RequestType, Specification};

pub const DEFAULT_IDLE_LIFETIME: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_ORDER_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_RESOURCE_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECTION_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{0}` must be greater than zero")]
    ZeroValue(&'static str),
    #[error("A non-elastic infrastructure needs at least one initial specification")]
    NoInitialSpecs,
    #[error("Invalid environment override: {0}")]
    Environment(String),
    #[error("Initial specification {index} is invalid: {reason}")]
    InvalidSpecification { index: usize, reason: String },
}

/// `[infrastructure]` table as written by the user.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct InfrastructureConfigDef {
    #[serde(default)]
    pub elastic: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub idle_lifetime: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub order_period: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub resource_period: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub connection_timeout: Option<Duration>,
    #[serde(default)]
    pub connection_retries: Option<u32>,
    #[serde(default)]
    pub max_resource_reuse: Option<u32>,
    #[serde(default)]
    pub connectivity: ConnectivityKind,
    #[serde(default)]
    pub persistence: Option<PathBuf>,
    #[serde(default)]
    pub initial_specs: Vec<Specification>,
}

/// Validated configuration of the infrastructure manager.
#[derive(Debug, Clone)]
pub struct InfrastructureConfig {
    /// May new resources be provisioned on demand of a scheduler?
    pub elastic: bool,
    /// How long a one-time resource may stay idle before it is disposed.
    pub idle_lifetime: Duration,
    pub order_period: Duration,
    pub resource_period: Duration,
    pub connection_timeout: Duration,
    pub connection_retries: u32,
    /// Dispose one-time resources after they have served this many tasks.
    pub max_resource_reuse: Option<u32>,
    pub connectivity: ConnectivityKind,
    pub persistence: Option<PathBuf>,
    /// Always persistent.
    pub initial_specs: Vec<Specification>,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            elastic: true,
            idle_lifetime: DEFAULT_IDLE_LIFETIME,
            order_period: DEFAULT_ORDER_PERIOD,
            resource_period: DEFAULT_RESOURCE_PERIOD,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            connection_retries: DEFAULT_CONNECTION_RETRIES,
            max_resource_reuse: None,
            connectivity: ConnectivityKind::Tcp,
            persistence: None,
            initial_specs: vec![],
        }
    }
}

fn non_zero(value: Duration, name: &'static str) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        Err(ConfigError::ZeroValue(name))
    } else {
        Ok(value)
    }
}

impl InfrastructureConfig {
    pub fn from_def(def: InfrastructureConfigDef) -> Result<Self, ConfigError> {
        let InfrastructureConfigDef {
            elastic,
            idle_lifetime,
            order_period,
            resource_period,
            connection_timeout,
            connection_retries,
            max_resource_reuse,
            connectivity,
            persistence,
            initial_specs,
        } = def;

        let elastic = elastic.unwrap_or(true);
        if !elastic && initial_specs.is_empty() {
            return Err(ConfigError::NoInitialSpecs);
        }

        let order_period = get_duration_from_env("NIMBUS_ORDER_PERIOD_MS")
            .map_err(ConfigError::Environment)?
            .or(order_period)
            .unwrap_or(DEFAULT_ORDER_PERIOD);
        let resource_period = get_duration_from_env("NIMBUS_RESOURCE_PERIOD_MS")
            .map_err(ConfigError::Environment)?
            .or(resource_period)
            .unwrap_or(DEFAULT_RESOURCE_PERIOD);

        let connection_retries = connection_retries.unwrap_or(DEFAULT_CONNECTION_RETRIES);
        if connection_retries == 0 {
            return Err(ConfigError::ZeroValue("connection-retries"));
        }
        if max_resource_reuse == Some(0) {
            return Err(ConfigError::ZeroValue("max-resource-reuse"));
        }

        let initial_specs = initial_specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                spec.parse_requirements()
                    .map_err(|error| ConfigError::InvalidSpecification {
                        index,
                        reason: error.to_string(),
                    })?;
                Ok(spec.with_request_type(RequestType::Persistent))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            elastic,
            idle_lifetime: non_zero(
                idle_lifetime.unwrap_or(DEFAULT_IDLE_LIFETIME),
                "idle-lifetime",
            )?,
            order_period: non_zero(order_period, "order-period")?,
            resource_period: non_zero(resource_period, "resource-period")?,
            connection_timeout: non_zero(
                connection_timeout.unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
                "connection-timeout",
            )?,
            connection_retries,
            max_resource_reuse,
            connectivity,
            persistence,
            initial_specs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, InfrastructureConfig, InfrastructureConfigDef};
    use crate::infra::connectivity::ConnectivityKind;
    use crate::specification::RequestType;
    use std::time::Duration;

    fn parse(input: &str) -> Result<InfrastructureConfig, ConfigError> {
        let def: InfrastructureConfigDef = toml::from_str(input).unwrap();
        InfrastructureConfig::from_def(def)
    }

    fn parse_def(input: &str) -> Result<InfrastructureConfigDef, toml::de::Error> {
        toml::from_str(input)
    }

    #[test]
    fn defaults() {
        let config = parse("").unwrap();
        assert!(config.elastic);
        assert_eq!(config.idle_lifetime, Duration::from_secs(120));
        assert_eq!(config.connection_retries, 3);
        assert_eq!(config.connectivity, ConnectivityKind::Tcp);
        assert!(config.initial_specs.is_empty());
    }

    #[test]
    fn human_durations() {
        let config = parse(
            r#"
idle-lifetime = "10m"
connection-timeout = "1500ms"
connectivity = "none"
"#,
        )
        .unwrap();
        assert_eq!(config.idle_lifetime, Duration::from_secs(600));
        assert_eq!(config.connection_timeout, Duration::from_millis(1500));
        assert_eq!(config.connectivity, ConnectivityKind::None);
    }

    #[test]
    fn non_elastic_requires_initial_specs() {
        assert!(matches!(
            parse("elastic = false"),
            Err(ConfigError::NoInitialSpecs)
        ));
    }

    #[test]
    fn initial_specs_are_persistent() {
        let config = parse(
            r#"
elastic = false

[[initial-specs]]
image = "ubuntu"
public-key = "key"
"#,
        )
        .unwrap();
        assert_eq!(config.initial_specs.len(), 1);
        assert_eq!(config.initial_specs[0].request_type, RequestType::Persistent);
    }

    #[test]
    fn reject_zero_values() {
        assert!(matches!(
            parse("idle-lifetime = \"0s\""),
            Err(ConfigError::ZeroValue("idle-lifetime"))
        ));
        assert!(matches!(
            parse("connection-retries = 0"),
            Err(ConfigError::ZeroValue("connection-retries"))
        ));
    }

    #[test]
    fn reject_malformed_values() {
        assert!(parse_def("connection-retries = \"three\"").is_err());
        assert!(parse_def("idle-lifetime = \"soon\"").is_err());
        assert!(parse_def("unknown = 1").is_err());
    }

    #[test]
    fn reject_invalid_requirements() {
        let result = parse(
            r#"
[[initial-specs]]
image = "ubuntu"
public-key = "key"
requirements = { cpu = "vcpu >=" }
"#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidSpecification { index: 0, .. })
        ));
    }
}
