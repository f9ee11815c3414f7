//! Process-wide metrics registry with Prometheus text exposition.
//!
//! One family per metric name, registered up-front; label sets are built
//! fresh per observation and may differ between samples of the same family
//! (correlation labels attach only when their value is non-empty). The
//! registry is shared between every stage actor (writers) and the metrics
//! endpoint (reader) behind a single mutex, and renders a deterministic
//! snapshot: families ordered by name, samples ordered by label set.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use parking_lot::Mutex;

pub const STEP_DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0];
pub const FLOW_DURATION_BUCKETS: &[f64] = &[0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FamilyKind {
    Counter,
    Gauge,
    Histogram,
}

impl FamilyKind {
    fn type_str(&self) -> &'static str {
        match self {
            FamilyKind::Counter => "counter",
            FamilyKind::Gauge => "gauge",
            FamilyKind::Histogram => "histogram",
        }
    }
}

#[derive(Debug, Clone)]
enum Sample {
    Counter(u64),
    Gauge(i64),
    Histogram {
        bucket_counts: Vec<u64>,
        sum: f64,
        count: u64,
    },
}

type LabelSet = Vec<(String, String)>;

struct Family {
    help: &'static str,
    kind: FamilyKind,
    buckets: &'static [f64],
    samples: BTreeMap<LabelSet, Sample>,
}

pub struct MetricsRegistry {
    families: Mutex<BTreeMap<&'static str, Family>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut families = BTreeMap::new();
        let mut register = |name, kind, help, buckets| {
            families.insert(
                name,
                Family {
                    help,
                    kind,
                    buckets,
                    samples: BTreeMap::new(),
                },
            );
        };

        register(
            "worker_step_executions_total",
            FamilyKind::Counter,
            "Total number of step executions",
            &[],
        );
        register(
            "worker_step_errors_total",
            FamilyKind::Counter,
            "Total number of step errors",
            &[],
        );
        register(
            "worker_step_execution_duration_seconds",
            FamilyKind::Histogram,
            "Step execution duration in seconds",
            STEP_DURATION_BUCKETS,
        );
        register(
            "worker_flow_execution_duration_seconds",
            FamilyKind::Histogram,
            "Flow execution duration in seconds",
            FLOW_DURATION_BUCKETS,
        );
        register(
            "worker_queue_depth",
            FamilyKind::Gauge,
            "Current queue depth",
            &[],
        );
        register(
            "worker_active_tasks",
            FamilyKind::Gauge,
            "Current number of active tasks",
            &[],
        );
        register(
            "worker_health_status",
            FamilyKind::Gauge,
            "Health status (1 = healthy, 0 = unhealthy)",
            &[],
        );

        Self {
            families: Mutex::new(families),
        }
    }

    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = canonical_labels(labels);
        let mut families = self.families.lock();
        let Some(family) = families.get_mut(name) else {
            return;
        };
        if family.kind != FamilyKind::Counter {
            return;
        }
        match family
            .samples
            .entry(key)
            .or_insert(Sample::Counter(0))
        {
            Sample::Counter(value) => *value += 1,
            _ => {}
        }
    }

    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: i64) {
        let key = canonical_labels(labels);
        let mut families = self.families.lock();
        let Some(family) = families.get_mut(name) else {
            return;
        };
        if family.kind != FamilyKind::Gauge {
            return;
        }
        family.samples.insert(key, Sample::Gauge(value));
    }

    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = canonical_labels(labels);
        let mut families = self.families.lock();
        let Some(family) = families.get_mut(name) else {
            return;
        };
        if family.kind != FamilyKind::Histogram {
            return;
        }
        let bucket_len = family.buckets.len();
        let sample = family.samples.entry(key).or_insert(Sample::Histogram {
            bucket_counts: vec![0; bucket_len],
            sum: 0.0,
            count: 0,
        });
        if let Sample::Histogram {
            bucket_counts,
            sum,
            count,
        } = sample
        {
            for (i, bound) in family.buckets.iter().enumerate() {
                if value <= *bound {
                    bucket_counts[i] += 1;
                }
            }
            *sum += value;
            *count += 1;
        }
    }

    /// Render the whole registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let families = self.families.lock();
        let mut out = String::new();

        for (name, family) in families.iter() {
            let _ = writeln!(out, "# HELP {name} {}", family.help);
            let _ = writeln!(out, "# TYPE {name} {}", family.kind.type_str());

            for (labels, sample) in family.samples.iter() {
                match sample {
                    Sample::Counter(value) => {
                        let _ = writeln!(out, "{name}{} {value}", render_labels(labels));
                    }
                    Sample::Gauge(value) => {
                        let _ = writeln!(out, "{name}{} {value}", render_labels(labels));
                    }
                    Sample::Histogram {
                        bucket_counts,
                        sum,
                        count,
                    } => {
                        for (i, bound) in family.buckets.iter().enumerate() {
                            let le = format_bound(*bound);
                            let _ = writeln!(
                                out,
                                "{name}_bucket{} {}",
                                render_labels_with(labels, "le", &le),
                                bucket_counts[i]
                            );
                        }
                        let _ = writeln!(
                            out,
                            "{name}_bucket{} {count}",
                            render_labels_with(labels, "le", "+Inf")
                        );
                        let _ = writeln!(out, "{name}_sum{} {sum}", render_labels(labels));
                        let _ = writeln!(out, "{name}_count{} {count}", render_labels(labels));
                    }
                }
            }
        }

        out
    }
}

fn canonical_labels(labels: &[(&str, &str)]) -> LabelSet {
    let mut set: LabelSet = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    set.sort();
    set
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn render_labels(labels: &LabelSet) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let body = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{body}}}")
}

fn render_labels_with(labels: &LabelSet, extra_key: &str, extra_value: &str) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect();
    parts.push(format!("{extra_key}=\"{extra_value}\""));
    format!("{{{}}}", parts.join(","))
}

fn format_bound(bound: f64) -> String {
    // 1.0 renders as "1", 0.005 as "0.005".
    if bound == bound.trunc() {
        format!("{}", bound as i64)
    } else {
        format!("{bound}")
    }
}
