//! Shared types for provider CRDs: conditions, references and endpoints.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How bad a False condition is, following Cluster API conventions
///
/// Only meaningful when the status is False; True conditions carry `None`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    /// Something is broken and needs attention
    Error,
    /// Something may be wrong but reconciliation can continue
    Warning,
    /// Informational, no action needed
    Info,
    /// No severity (True and Unknown conditions)
    #[default]
    #[serde(rename = "")]
    None,
}

impl ConditionSeverity {
    fn is_none(&self) -> bool {
        *self == Self::None
    }
}

/// Cluster API style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., ClusterModulesAvailable)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Severity of a False condition
    #[serde(default, skip_serializing_if = "ConditionSeverity::is_none")]
    pub severity: ConditionSeverity,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// A True condition with no reason
    pub fn true_condition(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::True,
            severity: ConditionSeverity::None,
            reason: String::new(),
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    /// A False condition with reason, severity and message
    pub fn false_condition(
        type_: impl Into<String>,
        reason: impl Into<String>,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::False,
            severity,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    fn same_state(&self, other: &Condition) -> bool {
        self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Condition list operations shared by every status carrying conditions
///
/// Setting a condition whose status did not change keeps the previous
/// `lastTransitionTime`.
pub trait Conditions {
    /// The underlying condition list
    fn conditions(&self) -> &[Condition];

    /// Mutable access to the underlying condition list
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// Look up a condition by type
    fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// Whether a condition exists and is True
    fn is_condition_true(&self, type_: &str) -> bool {
        self.get_condition(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Insert or replace a condition
    fn set_condition(&mut self, mut condition: Condition) {
        let conditions = self.conditions_mut();
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.same_state(&condition) {
                    return;
                }
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => conditions.push(condition),
        }
    }

    /// Set a condition True
    fn mark_true(&mut self, type_: &str) {
        self.set_condition(Condition::true_condition(type_));
    }

    /// Set a condition False
    fn mark_false(
        &mut self,
        type_: &str,
        reason: &str,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) {
        self.set_condition(Condition::false_condition(type_, reason, severity, message));
    }

    /// Remove a condition entirely
    fn delete_condition(&mut self, type_: &str) {
        self.conditions_mut().retain(|c| c.type_ != type_);
    }
}

/// Reference to another object, as used by Cluster API infrastructure refs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Kind of the referent
    #[serde(default)]
    pub kind: String,
    /// Name of the referent
    #[serde(default)]
    pub name: String,
    /// Namespace of the referent (defaults to the referrer's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Endpoint of a Kubernetes API server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ApiEndpoint {
    /// Hostname or IP
    #[serde(default)]
    pub host: String,
    /// Port
    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    /// True when neither host nor port is set
    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

impl std::fmt::Display for ApiEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
