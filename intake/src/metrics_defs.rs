//! Metrics definitions for the intake service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const ISSUES_SUBMITTED: MetricDef = MetricDef {
    name: "submit.issues",
    metric_type: MetricType::Counter,
    description: "Issues stored and attached to a bug",
};

pub const BUGS_CREATED: MetricDef = MetricDef {
    name: "submit.bugs_created",
    metric_type: MetricType::Counter,
    description: "Submissions that created a new bug",
};

pub const SUBMIT_FAILED: MetricDef = MetricDef {
    name: "submit.failed",
    metric_type: MetricType::Counter,
    description: "Submissions that failed before the issue was stored",
};

pub const SUBMIT_PARTIAL_FAILURE: MetricDef = MetricDef {
    name: "submit.partial_failure",
    metric_type: MetricType::Counter,
    description: "Submissions whose issue was stored but not attached to a bug",
};

pub const SUBMIT_DURATION: MetricDef = MetricDef {
    name: "submit.duration",
    metric_type: MetricType::Histogram,
    description: "Time to store and attach an issue in seconds",
};

pub const QUERY_FAILED: MetricDef = MetricDef {
    name: "query.failed",
    metric_type: MetricType::Counter,
    description: "Read requests that failed with a store error. Tagged with kind.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    ISSUES_SUBMITTED,
    BUGS_CREATED,
    SUBMIT_FAILED,
    SUBMIT_PARTIAL_FAILURE,
    SUBMIT_DURATION,
    QUERY_FAILED,
];
