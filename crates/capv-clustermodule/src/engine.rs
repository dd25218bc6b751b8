//! Convergence of tracked cluster modules against live owner objects
//!
//! One pass walks the tracked records in order, then creates modules for the
//! owners left without one:
//!
//! - owner gone: the module is removed, failures are only logged
//! - verification fails: the record is kept and the failure reported
//! - module exists: the record is kept
//! - module missing: the record is dropped and a new module created
//!
//! Nothing is written to the cluster object here. The caller persists the
//! returned list, so an abandoned pass leaves no partial state behind.

use capv_common::crd::{ClusterModule, VSphereCluster};
use capv_common::metrics::{self, ModuleErrorKind};
use capv_common::Error;
use tracing::{debug, error, info, warn};

use crate::owner::{OwnerKey, OwnerMap};
use crate::service::{ClusterModuleService, CreateOutcome, ModuleError, ModuleErrors};

/// Result of one convergence pass
#[derive(Debug, Default)]
pub struct ModulePassOutcome {
    /// The new tracked list, replacing the old one wholesale
    pub modules: Vec<ClusterModule>,
    /// Per-owner failures
    pub errors: ModuleErrors,
}

impl ModulePassOutcome {
    /// `Ok` unless a failure other than an incompatible owner happened
    pub fn result(&self) -> Result<(), Error> {
        if self.errors.is_empty() || self.errors.all_incompatible() {
            Ok(())
        } else {
            Err(Error::cluster_modules(self.errors.message()))
        }
    }
}

/// Reconcile `cluster.spec.clusterModules` against `owners`
pub async fn converge(
    service: &dyn ClusterModuleService,
    cluster: &VSphereCluster,
    mut owners: OwnerMap,
) -> ModulePassOutcome {
    let mut outcome = ModulePassOutcome::default();

    for record in &cluster.spec.cluster_modules {
        let key = OwnerKey::for_module(record);
        let module = record.module_uuid.as_str();

        let Some(owner) = owners.remove(&key) else {
            // Owner deleted or being deleted
            match service.remove(cluster, module).await {
                Ok(()) => {
                    metrics::record_module_removed();
                    info!(target_object = %record.target_object_name, module, "Removed cluster module");
                }
                Err(e) => {
                    error!(target_object = %record.target_object_name, module, error = %e, "failed to delete cluster module for object");
                }
            }
            continue;
        };

        match service.does_exist(cluster, &owner, module).await {
            Ok(true) => outcome.modules.push(owner.module(module)),
            Ok(false) => {
                info!(target_object = %record.target_object_name, module, "module for object not found");
                owners.insert(key, owner);
            }
            Err(e) => {
                error!(target_object = %record.target_object_name, module, error = %e, "failed to verify cluster module for object");
                metrics::record_module_error(ModuleErrorKind::Transient);
                outcome.modules.push(owner.module(module));
                outcome
                    .errors
                    .push(owner.name(), ModuleError::verify(module, e));
            }
        }
    }

    for owner in owners.into_values() {
        match service.create(cluster, &owner).await {
            Ok(CreateOutcome::Created(module)) => {
                metrics::record_module_created(owner.is_control_plane());
                info!(target_object = %owner.name(), kind = owner.kind(), module = %module, "Created cluster module");
                outcome.modules.push(owner.module(module));
            }
            Ok(CreateOutcome::Skipped) => {
                debug!(target_object = %owner.name(), "Skipped cluster module creation");
            }
            Err(e) => {
                let kind = if e.is_incompatible_owner() {
                    ModuleErrorKind::Incompatible
                } else {
                    ModuleErrorKind::Transient
                };
                metrics::record_module_error(kind);
                warn!(target_object = %owner.name(), error = %e, "failed to create cluster module for target object");
                outcome.errors.push(owner.name(), e);
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::OwnerObject;
    use crate::service::MockClusterModuleService;
    use crate::testing::{control_plane, machine_deployment, record, vsphere_cluster};

    fn owners(list: Vec<OwnerObject>) -> OwnerMap {
        list.into_iter().map(|o| (o.key(), o)).collect()
    }

    mod key_collisions {
        use super::*;

        #[tokio::test]
        async fn control_plane_and_deployment_with_same_name_get_separate_modules() {
            let mut svc = MockClusterModuleService::new();
            svc.expect_create()
                .withf(|_, owner| owner.is_control_plane())
                .times(1)
                .returning(|_, _| Ok(CreateOutcome::Created("cp-uuid".into())));
            svc.expect_create()
                .withf(|_, owner| !owner.is_control_plane())
                .times(1)
                .returning(|_, _| Ok(CreateOutcome::Created("md-uuid".into())));

            let cluster = vsphere_cluster(vec![]);
            let live = owners(vec![
                control_plane("shared").into(),
                machine_deployment("shared").into(),
            ]);

            let outcome = converge(&svc, &cluster, live).await;

            assert!(outcome.errors.is_empty());
            assert_eq!(outcome.modules.len(), 2);
            assert!(outcome.modules.contains(&record(true, "shared", "cp-uuid")));
            assert!(outcome.modules.contains(&record(false, "shared", "md-uuid")));
        }

        #[tokio::test]
        async fn records_verify_against_their_own_role() {
            let mut svc = MockClusterModuleService::new();
            svc.expect_does_exist()
                .withf(|_, owner, id| owner.is_control_plane() && id == "cp-uuid")
                .returning(|_, _, _| Ok(true));
            svc.expect_does_exist()
                .withf(|_, owner, id| !owner.is_control_plane() && id == "md-uuid")
                .returning(|_, _, _| Ok(true));
            svc.expect_create().never();
            svc.expect_remove().never();

            let cluster = vsphere_cluster(vec![
                record(true, "shared", "cp-uuid"),
                record(false, "shared", "md-uuid"),
            ]);
            let live = owners(vec![
                control_plane("shared").into(),
                machine_deployment("shared").into(),
            ]);

            let outcome = converge(&svc, &cluster, live).await;
            assert_eq!(outcome.modules, cluster.spec.cluster_modules);
        }
    }

    mod stale_records {
        use super::*;

        #[tokio::test]
        async fn remove_failure_is_logged_and_record_dropped() {
            let mut svc = MockClusterModuleService::new();
            svc.expect_remove()
                .withf(|_, id| id == "gone-uuid")
                .times(1)
                .returning(|_, _| Err(ModuleError::incompatible_owner("whatever")));

            let cluster = vsphere_cluster(vec![record(false, "md-gone", "gone-uuid")]);
            let outcome = converge(&svc, &cluster, OwnerMap::new()).await;

            assert!(outcome.modules.is_empty());
            assert!(outcome.errors.is_empty());
            assert!(outcome.result().is_ok());
        }

        #[tokio::test]
        async fn duplicate_record_for_one_owner_is_removed() {
            let mut svc = MockClusterModuleService::new();
            svc.expect_does_exist()
                .withf(|_, _, id| id == "first")
                .times(1)
                .returning(|_, _, _| Ok(true));
            svc.expect_remove()
                .withf(|_, id| id == "second")
                .times(1)
                .returning(|_, _| Ok(()));

            let cluster = vsphere_cluster(vec![
                record(false, "md-0", "first"),
                record(false, "md-0", "second"),
            ]);
            let live = owners(vec![machine_deployment("md-0").into()]);

            let outcome = converge(&svc, &cluster, live).await;
            assert_eq!(outcome.modules, vec![record(false, "md-0", "first")]);
        }
    }

    mod outcome_result {
        use super::*;

        #[tokio::test]
        async fn skipped_owner_is_neither_tracked_nor_error() {
            let mut svc = MockClusterModuleService::new();
            svc.expect_create()
                .returning(|_, _| Ok(CreateOutcome::Skipped));

            let cluster = vsphere_cluster(vec![]);
            let live = owners(vec![machine_deployment("md-0").into()]);

            let outcome = converge(&svc, &cluster, live).await;
            assert!(outcome.modules.is_empty());
            assert!(outcome.errors.is_empty());
            assert!(outcome.result().is_ok());
        }

        #[tokio::test]
        async fn hard_failure_mixed_with_incompatible_is_error() {
            let mut svc = MockClusterModuleService::new();
            svc.expect_create()
                .withf(|_, owner| owner.is_control_plane())
                .returning(|_, _| Err(ModuleError::incompatible_owner("resgroup-9")));
            svc.expect_create()
                .withf(|_, owner| !owner.is_control_plane())
                .returning(|_, _| {
                    Err(ModuleError::Template {
                        owner: "default/md-0".into(),
                        message: "500 Internal Server Error".into(),
                    })
                });

            let cluster = vsphere_cluster(vec![]);
            let live = owners(vec![
                control_plane("prod").into(),
                machine_deployment("md-0").into(),
            ]);

            let outcome = converge(&svc, &cluster, live).await;
            let err = outcome.result().unwrap_err();
            assert!(matches!(err, Error::ClusterModules { .. }));
            let msg = err.to_string();
            assert!(msg.starts_with("failed to create cluster modules for: "));
            assert!(msg.contains("prod resgroup-9 is not compatible with cluster modules"));
            assert!(msg.contains("md-0 error fetching machine template"));
        }
    }
}
