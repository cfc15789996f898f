use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use nimbus_core::infra::connectivity::ConnectivityKind;
use nimbus_core::infra::provider::ProviderConfig;
use nimbus_core::infra::{InfrastructureConfig, InfrastructureConfigDef};
use nimbus_core::scheduler::{SchedulerConfig, SchedulerConfigDef};

/// Configuration file as written by the user.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct NimbusConfigDef {
    #[serde(default)]
    infrastructure: InfrastructureConfigDef,
    #[serde(default)]
    provider: ProviderConfig,
    #[serde(default)]
    scheduler: SchedulerConfigDef,
}

/// Validated configuration of a run.
#[derive(Debug, Clone)]
pub struct NimbusConfig {
    pub infrastructure: InfrastructureConfig,
    pub provider: ProviderConfig,
    pub scheduler: SchedulerConfig,
}

impl NimbusConfig {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let def: NimbusConfigDef = toml::from_str(text)?;
        let config = Self {
            infrastructure: InfrastructureConfig::from_def(def.infrastructure)?,
            provider: def.provider,
            scheduler: SchedulerConfig::from_def(def.scheduler)?,
        };
        if matches!(config.provider, ProviderConfig::Local(_))
            && config.infrastructure.connectivity == ConnectivityKind::Tcp
        {
            log::warn!(
                "Local instances do not listen on any port and will never pass the TCP check, \
                 consider `connectivity = \"none\"`"
            );
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read configuration file {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }
}
