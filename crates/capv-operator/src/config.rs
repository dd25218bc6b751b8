//! Operator configuration assembled from the command line

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use capv_vcenter::{Credentials, SessionOptions};
use thiserror::Error;

/// Gate enabling vCenter cluster modules for control planes and machine
/// deployments
pub const NODE_ANTI_AFFINITY: &str = "NodeAntiAffinity";

/// Errors in the `--feature-gates` flag
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureGateError {
    /// An entry is not `Name=bool`
    #[error("invalid feature gate {0:?}, expected Name=true|false")]
    Malformed(String),

    /// The gate name is not known
    #[error("unrecognized feature gate: {0}")]
    Unknown(String),

    /// The value does not parse as a bool
    #[error("invalid value {value:?} for feature gate {name}")]
    InvalidValue {
        /// Gate name
        name: String,
        /// Offending value
        value: String,
    },
}

/// Parsed `--feature-gates`, e.g. `NodeAntiAffinity=true`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureGates {
    gates: BTreeMap<String, bool>,
}

impl FeatureGates {
    const KNOWN: &'static [&'static str] = &[NODE_ANTI_AFFINITY];

    /// Whether `name` is enabled; unset gates are off
    pub fn enabled(&self, name: &str) -> bool {
        self.gates.get(name).copied().unwrap_or(false)
    }

    /// Whether cluster modules are managed
    pub fn node_anti_affinity(&self) -> bool {
        self.enabled(NODE_ANTI_AFFINITY)
    }
}

impl FromStr for FeatureGates {
    type Err = FeatureGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut gates = BTreeMap::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, value) = entry
                .split_once('=')
                .ok_or_else(|| FeatureGateError::Malformed(entry.to_string()))?;
            let (name, value) = (name.trim(), value.trim());
            if !Self::KNOWN.contains(&name) {
                return Err(FeatureGateError::Unknown(name.to_string()));
            }
            let enabled = value
                .parse::<bool>()
                .map_err(|_| FeatureGateError::InvalidValue {
                    name: name.to_string(),
                    value: value.to_string(),
                })?;
            gates.insert(name.to_string(), enabled);
        }
        Ok(Self { gates })
    }
}

/// Everything the controller needs from the command line
#[derive(Debug)]
pub struct OperatorConfig {
    /// Kubeconfig for the management cluster; in-cluster config when unset
    pub kubeconfig: Option<PathBuf>,
    /// vCenter login
    pub credentials: Credentials,
    /// Enabled feature gates
    pub feature_gates: FeatureGates,
    /// vCenter HTTP client options
    pub session: SessionOptions,
}

impl OperatorConfig {
    /// Assemble the configuration, requiring vCenter credentials
    pub fn new(
        kubeconfig: Option<PathBuf>,
        username: Option<String>,
        password: Option<String>,
        feature_gates: FeatureGates,
        insecure_skip_tls_verify: bool,
    ) -> anyhow::Result<Self> {
        let username = username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow::anyhow!("vCenter username not set (--vsphere-username or VSPHERE_USERNAME)"))?;
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow::anyhow!("vCenter password not set (--vsphere-password or VSPHERE_PASSWORD)"))?;

        Ok(Self {
            kubeconfig,
            credentials: Credentials { username, password },
            feature_gates,
            session: SessionOptions {
                insecure_skip_tls_verify,
                ..Default::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod feature_gates {
        use super::*;

        #[test]
        fn empty_flag_disables_everything() {
            let gates: FeatureGates = "".parse().unwrap();
            assert!(!gates.node_anti_affinity());
        }

        #[test]
        fn node_anti_affinity_can_be_enabled() {
            let gates: FeatureGates = "NodeAntiAffinity=true".parse().unwrap();
            assert!(gates.node_anti_affinity());

            let gates: FeatureGates = " NodeAntiAffinity = false ".parse().unwrap();
            assert!(!gates.node_anti_affinity());
        }

        #[test]
        fn last_entry_wins() {
            let gates: FeatureGates = "NodeAntiAffinity=true,NodeAntiAffinity=false"
                .parse()
                .unwrap();
            assert!(!gates.node_anti_affinity());
        }

        #[test]
        fn unknown_gate_is_rejected() {
            let err = "NodeAntiAffinity=true,Foo=true"
                .parse::<FeatureGates>()
                .unwrap_err();
            assert_eq!(err, FeatureGateError::Unknown("Foo".to_string()));
        }

        #[test]
        fn malformed_entries_are_rejected() {
            assert_eq!(
                "NodeAntiAffinity".parse::<FeatureGates>().unwrap_err(),
                FeatureGateError::Malformed("NodeAntiAffinity".to_string())
            );
            assert!(matches!(
                "NodeAntiAffinity=yes".parse::<FeatureGates>().unwrap_err(),
                FeatureGateError::InvalidValue { .. }
            ));
        }
    }

    mod operator_config {
        use super::*;

        #[test]
        fn credentials_are_required() {
            let err = OperatorConfig::new(
                None,
                None,
                Some("secret".into()),
                FeatureGates::default(),
                false,
            )
            .unwrap_err();
            assert!(err.to_string().contains("username"));

            let err = OperatorConfig::new(
                None,
                Some("admin@vsphere.local".into()),
                Some(String::new()),
                FeatureGates::default(),
                false,
            )
            .unwrap_err();
            assert!(err.to_string().contains("password"));
        }

        #[test]
        fn tls_flag_reaches_session_options() {
            let config = OperatorConfig::new(
                Some(PathBuf::from("/tmp/kubeconfig")),
                Some("admin@vsphere.local".into()),
                Some("secret".into()),
                "NodeAntiAffinity=true".parse().unwrap(),
                true,
            )
            .unwrap();
            assert!(config.session.insecure_skip_tls_verify);
            assert!(config.feature_gates.node_anti_affinity());
            assert_eq!(config.credentials.username, "admin@vsphere.local");
        }
    }
}
