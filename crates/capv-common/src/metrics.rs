//! OpenTelemetry instruments for the provider
//!
//! Instruments are created lazily against the global meter, so they are
//! no-ops until `telemetry::init_telemetry` installs an exporter.

use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

static METER: Lazy<Meter> = Lazy::new(|| global::meter("capv"));

/// Cluster modules created in vCenter
///
/// Labels:
/// - `role`: control_plane, worker
pub static CLUSTER_MODULES_CREATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("capv_cluster_modules_created_total")
        .with_description("Total number of cluster modules created")
        .with_unit("{modules}")
        .build()
});

/// Cluster modules removed because their owner disappeared
pub static CLUSTER_MODULES_REMOVED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("capv_cluster_modules_removed_total")
        .with_description("Total number of stale cluster modules removed")
        .with_unit("{modules}")
        .build()
});

/// Per-owner cluster module failures
///
/// Labels:
/// - `kind`: incompatible, transient
pub static CLUSTER_MODULE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("capv_cluster_module_errors_total")
        .with_description("Total number of per-owner cluster module failures")
        .with_unit("{errors}")
        .build()
});

/// VSphereCluster reconcile duration
///
/// Labels:
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("capv_vspherecluster_reconcile_duration_seconds")
        .with_description("Duration of VSphereCluster reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Kind label for [`CLUSTER_MODULE_ERRORS`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleErrorKind {
    /// Owner lives outside a compute cluster
    Incompatible,
    /// Anything a retry might fix
    Transient,
}

impl ModuleErrorKind {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incompatible => "incompatible",
            Self::Transient => "transient",
        }
    }
}

/// Count a created module
pub fn record_module_created(control_plane: bool) {
    let role = if control_plane { "control_plane" } else { "worker" };
    CLUSTER_MODULES_CREATED.add(1, &[KeyValue::new("role", role)]);
}

/// Count a removed module
pub fn record_module_removed() {
    CLUSTER_MODULES_REMOVED.add(1, &[]);
}

/// Count a per-owner failure
pub fn record_module_error(kind: ModuleErrorKind) {
    CLUSTER_MODULE_ERRORS.add(1, &[KeyValue::new("kind", kind.as_str())]);
}

/// Times one reconcile pass
pub struct ReconcileTimer {
    start: Instant,
}

impl ReconcileTimer {
    /// Start timing
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record a successful pass
    pub fn success(self) {
        self.record("success");
    }

    /// Record a failed pass
    pub fn error(self) {
        self.record("error");
    }

    fn record(self, result: &'static str) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[KeyValue::new("result", result)],
        );
    }
}
