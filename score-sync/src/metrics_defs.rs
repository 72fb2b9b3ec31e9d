//! Metrics emitted by the sync pipeline.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Gauge => "Gauge",
            MetricType::Histogram => "Histogram",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

/// `counter!(DEF)` or `counter!(DEF, "label" => value)`.
#[macro_export]
macro_rules! counter {
    ($def:expr $(, $label:expr => $value:expr)* $(,)?) => {
        metrics::counter!($def.name $(, $label => $value)*)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr $(, $label:expr => $value:expr)* $(,)?) => {
        metrics::gauge!($def.name $(, $label => $value)*)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr $(, $label:expr => $value:expr)* $(,)?) => {
        metrics::histogram!($def.name $(, $label => $value)*)
    };
}

pub const DEBOUNCE_FIRED: MetricDef = MetricDef {
    name: "score_sync.debounce.fired",
    metric_type: MetricType::Counter,
    description: "Settled field changes handed to validation",
};

pub const VALIDATION_REJECTED: MetricDef = MetricDef {
    name: "score_sync.validation.rejected",
    metric_type: MetricType::Counter,
    description: "Settled field changes rejected by the validator, labelled by reason",
};

pub const RATE_LIMIT_REJECTED: MetricDef = MetricDef {
    name: "score_sync.rate_limit.rejected",
    metric_type: MetricType::Counter,
    description: "Admission checks refused by the per-field rate limiter",
};

pub const QUEUE_DEPTH: MetricDef = MetricDef {
    name: "score_sync.queue.depth",
    metric_type: MetricType::Gauge,
    description: "Number of saves waiting in the save queue",
};

pub const SAVE_ATTEMPT: MetricDef = MetricDef {
    name: "score_sync.save.attempt",
    metric_type: MetricType::Counter,
    description: "Remote save calls, labelled by result",
};

pub const SAVE_OUTCOME: MetricDef = MetricDef {
    name: "score_sync.save.outcome",
    metric_type: MetricType::Counter,
    description: "Completed save runs including retries, labelled by outcome",
};

pub const SAVE_DURATION: MetricDef = MetricDef {
    name: "score_sync.save.duration",
    metric_type: MetricType::Histogram,
    description: "Time from dispatch to final save outcome in seconds",
};

pub const SUBMIT_OUTCOME: MetricDef = MetricDef {
    name: "score_sync.submit.outcome",
    metric_type: MetricType::Counter,
    description: "Submit attempts, labelled by outcome",
};

pub const ALL_METRICS: &[MetricDef] = &[
    DEBOUNCE_FIRED,
    VALIDATION_REJECTED,
    RATE_LIMIT_REJECTED,
    QUEUE_DEPTH,
    SAVE_ATTEMPT,
    SAVE_OUTCOME,
    SAVE_DURATION,
    SUBMIT_OUTCOME,
];
