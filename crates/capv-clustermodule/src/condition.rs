//! Projection of a pass outcome onto the `ClusterModulesAvailable` condition

use capv_common::crd::{
    ConditionSeverity, Conditions, VCenterVersion, CLUSTER_MODULES_AVAILABLE_CONDITION,
    CLUSTER_MODULE_SETUP_FAILED_REASON, VCENTER_VERSION_INCOMPATIBLE_REASON,
};

use crate::engine::ModulePassOutcome;

/// Change to apply to `ClusterModulesAvailable`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConditionUpdate {
    /// Every owner has a module
    MarkTrue,
    /// Something is missing
    MarkFalse {
        /// Machine-readable reason
        reason: &'static str,
        /// Severity
        severity: ConditionSeverity,
        /// Human-readable message
        message: String,
    },
    /// Nothing to report, e.g. no eligible owners
    Delete,
}

impl ConditionUpdate {
    /// Condition for a finished pass
    pub fn from_outcome(outcome: &ModulePassOutcome) -> Self {
        if !outcome.errors.is_empty() {
            Self::MarkFalse {
                reason: CLUSTER_MODULE_SETUP_FAILED_REASON,
                severity: ConditionSeverity::Warning,
                message: outcome.errors.message(),
            }
        } else if !outcome.modules.is_empty() {
            Self::MarkTrue
        } else {
            Self::Delete
        }
    }

    /// Condition for a vCenter too old (or unknown) for cluster modules
    pub fn incompatible_version(version: Option<&VCenterVersion>) -> Self {
        Self::MarkFalse {
            reason: VCENTER_VERSION_INCOMPATIBLE_REASON,
            severity: ConditionSeverity::Info,
            message: format!(
                "vCenter API version {} is not compatible with cluster modules",
                version.map(VCenterVersion::as_str).unwrap_or_default()
            ),
        }
    }

    /// Write the update into a condition list
    pub fn apply(self, target: &mut impl Conditions) {
        match self {
            Self::MarkTrue => target.mark_true(CLUSTER_MODULES_AVAILABLE_CONDITION),
            Self::MarkFalse {
                reason,
                severity,
                message,
            } => target.mark_false(CLUSTER_MODULES_AVAILABLE_CONDITION, reason, severity, message),
            Self::Delete => target.delete_condition(CLUSTER_MODULES_AVAILABLE_CONDITION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ModuleError;
    use crate::testing::record;
    use capv_common::crd::{ConditionStatus, VSphereClusterStatus};

    #[test]
    fn errors_win_over_modules() {
        let mut outcome = ModulePassOutcome {
            modules: vec![record(false, "md", "uuid")],
            ..Default::default()
        };
        outcome
            .errors
            .push("kcp", ModuleError::incompatible_owner("foo-123"));

        match ConditionUpdate::from_outcome(&outcome) {
            ConditionUpdate::MarkFalse {
                reason,
                severity,
                message,
            } => {
                assert_eq!(reason, CLUSTER_MODULE_SETUP_FAILED_REASON);
                assert_eq!(severity, ConditionSeverity::Warning);
                assert!(message.contains("kcp"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn modules_without_errors_mark_true() {
        let outcome = ModulePassOutcome {
            modules: vec![record(true, "kcp", "uuid")],
            ..Default::default()
        };
        assert_eq!(
            ConditionUpdate::from_outcome(&outcome),
            ConditionUpdate::MarkTrue
        );
    }

    #[test]
    fn empty_outcome_deletes_condition() {
        let mut status = VSphereClusterStatus::default();
        status.mark_true(CLUSTER_MODULES_AVAILABLE_CONDITION);

        ConditionUpdate::from_outcome(&ModulePassOutcome::default()).apply(&mut status);
        assert!(status
            .get_condition(CLUSTER_MODULES_AVAILABLE_CONDITION)
            .is_none());
    }

    #[test]
    fn incompatible_version_message() {
        let mut status = VSphereClusterStatus::default();
        ConditionUpdate::incompatible_version(Some(&VCenterVersion::new("6.7.0")))
            .apply(&mut status);

        let c = status
            .get_condition(CLUSTER_MODULES_AVAILABLE_CONDITION)
            .unwrap();
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.severity, ConditionSeverity::Info);
        assert_eq!(c.reason, VCENTER_VERSION_INCOMPATIBLE_REASON);
        assert_eq!(
            c.message,
            "vCenter API version 6.7.0 is not compatible with cluster modules"
        );
    }
}
