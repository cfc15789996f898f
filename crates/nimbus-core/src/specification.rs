use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::requirements::{parse_requirement, Expr};

/// How long a provisioned resource is expected to live.
///
/// Persistent resources are never disposed because of idleness and are refreshed instead of
/// being dropped when they stop answering.
#[derive(Debug, Default, Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestType {
    #[default]
    OneTime,
    Persistent,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::OneTime => "one-time",
            RequestType::Persistent => "persistent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "one-time" | "one_time" | "onetime" => Some(RequestType::OneTime),
            "persistent" => Some(RequestType::Persistent),
            _ => None,
        }
    }
}

/// Declarative description of a resource. Used both to request a resource from the provider
/// and to decide whether an existing resource can serve a task.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Specification {
    pub image: String,
    pub public_key: String,
    /// Named requirement expressions, all of them have to hold.
    #[serde(default)]
    pub requirements: BTreeMap<String, String>,
    #[serde(default)]
    pub request_type: RequestType,
    #[serde(default)]
    pub user_data: Option<String>,
}

impl Specification {
    pub fn new(image: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            public_key: public_key.into(),
            requirements: Default::default(),
            request_type: RequestType::OneTime,
            user_data: None,
        }
    }

    pub fn with_requirement(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.requirements.insert(name.into(), expr.into());
        self
    }

    pub fn with_request_type(mut self, request_type: RequestType) -> Self {
        self.request_type = request_type;
        self
    }

    /// Parses all requirement expressions, failing on the first invalid one.
    pub fn parse_requirements(&self) -> anyhow::Result<Vec<(&str, Expr)>> {
        self.requirements
            .iter()
            .map(|(name, expr)| {
                parse_requirement(expr)
                    .map(|parsed| (name.as_str(), parsed))
                    .map_err(|error| anyhow::anyhow!("Invalid requirement '{name}': {error}"))
            })
            .collect()
    }
}

impl Display for Specification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.image, self.request_type.as_str())?;
        for (name, expr) in &self.requirements {
            write!(f, " {name}=[{expr}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{RequestType, Specification};
    use crate::Set;

    #[test]
    fn structural_equality() {
        let a = Specification::new("ubuntu", "key").with_requirement("cpu", "vcpu >= 2");
        let b = Specification::new("ubuntu", "key").with_requirement("cpu", "vcpu >= 2");
        let c = Specification::new("ubuntu", "key").with_requirement("cpu", "vcpu >= 4");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: Set<Specification> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn deserialize_from_toml() {
        let spec: Specification = toml::from_str(
            r#"
image = "ubuntu-22.04"
public-key = "ssh-rsa AAA"
request-type = "persistent"

[requirements]
cpu = "vcpu >= 2"
"#,
        )
        .unwrap();
        assert_eq!(spec.request_type, RequestType::Persistent);
        assert_eq!(spec.requirements["cpu"], "vcpu >= 2");
        assert!(spec.user_data.is_none());
    }

    #[test]
    fn invalid_requirement_is_reported() {
        let spec = Specification::new("ubuntu", "key").with_requirement("cpu", "vcpu >=");
        let error = spec.parse_requirements().unwrap_err().to_string();
        assert!(error.contains("'cpu'"));
    }
}
