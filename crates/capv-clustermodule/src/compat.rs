//! Cluster module compatibility helpers

use capv_common::crd::{ClusterModule, VSphereCluster};

/// Whether the cluster's vCenter (major version 7 or later) supports modules
///
/// A missing or unparsable version is treated as incompatible.
pub fn is_cluster_compatible(cluster: &VSphereCluster) -> bool {
    cluster
        .vcenter_version()
        .is_some_and(|v| v.supports_cluster_modules())
}

/// Order-insensitive equality of two tracked module lists
pub fn modules_equal(a: &[ClusterModule], b: &[ClusterModule]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    fn sorted(list: &[ClusterModule]) -> Vec<&ClusterModule> {
        let mut list: Vec<&ClusterModule> = list.iter().collect();
        list.sort_by(|x, y| {
            (x.control_plane, &x.target_object_name, &x.module_uuid).cmp(&(
                y.control_plane,
                &y.target_object_name,
                &y.module_uuid,
            ))
        });
        list
    }
    sorted(a) == sorted(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, vsphere_cluster_with_version};

    #[test]
    fn compatibility_by_version() {
        for (version, expected) in [
            ("foo", false),
            ("", false),
            ("6.7.0", false),
            ("7.0.3", true),
            ("8.0.0", true),
        ] {
            let cluster = vsphere_cluster_with_version(Some(version));
            assert_eq!(is_cluster_compatible(&cluster), expected, "version {version:?}");
        }
    }

    #[test]
    fn missing_version_is_incompatible() {
        assert!(!is_cluster_compatible(&vsphere_cluster_with_version(None)));
    }

    #[test]
    fn different_lengths_differ() {
        let old = vec![record(true, "foo", "1")];
        let new = vec![record(true, "foo", "1"), record(false, "bar", "2")];
        assert!(!modules_equal(&old, &new));
    }

    #[test]
    fn same_length_different_objects_differ() {
        let old = vec![record(true, "foo", "1"), record(false, "baz", "2")];
        let new = vec![record(true, "foo", "1"), record(false, "bar", "2")];
        assert!(!modules_equal(&old, &new));
    }

    #[test]
    fn order_does_not_matter() {
        let old = vec![record(true, "foo", "1"), record(false, "baz", "2")];
        let new = vec![record(false, "baz", "2"), record(true, "foo", "1")];
        assert!(modules_equal(&old, &old.clone()));
        assert!(modules_equal(&old, &new));
    }
}
