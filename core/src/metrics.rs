use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const PREFIX: &str = "sentix_alerts";

/// Fixed-bucket latency histogram, in seconds.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    overflow: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        let bounds = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];
        Self {
            buckets: bounds.into_iter().map(|b| (b, AtomicU64::new(0))).collect(),
            overflow: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    pub fn record(&self, seconds: f64) {
        self.sum_micros
            .fetch_add((seconds.max(0.0) * 1_000_000.0) as u64, Ordering::Relaxed);
        match self.buckets.iter().find(|(bound, _)| seconds <= *bound) {
            Some((_, count)) => count.fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn count(&self) -> u64 {
        self.buckets.iter().map(|(_, c)| c.load(Ordering::Relaxed)).sum::<u64>()
            + self.overflow.load(Ordering::Relaxed)
    }

    fn write_prometheus(&self, out: &mut String, name: &str) {
        let _ = writeln!(out, "# HELP {name} Delivery latency in seconds.");
        let _ = writeln!(out, "# TYPE {name} histogram");
        let mut cumulative = 0;
        for (bound, count) in &self.buckets {
            cumulative += count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
        }
        let total = self.count();
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {total}");
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(out, "{name}_sum {sum}");
        let _ = writeln!(out, "{name}_count {total}");
    }
}

/// Counters owned by one engine instance.
#[derive(Debug)]
pub struct EngineMetrics {
    pub ticks_total: AtomicU64,
    pub ticks_skipped: AtomicU64,
    pub rules_evaluated: AtomicU64,
    pub triggers_total: AtomicU64,
    pub suppressed_by_cooldown: AtomicU64,
    pub snapshots_missing: AtomicU64,
    pub deliveries_total: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub delivery_duration: Histogram,
    rule_triggers: Mutex<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks_total: u64,
    pub ticks_skipped: u64,
    pub rules_evaluated: u64,
    pub triggers_total: u64,
    pub suppressed_by_cooldown: u64,
    pub snapshots_missing: u64,
    pub deliveries_total: u64,
    pub delivery_failures: u64,
    pub rule_triggers: BTreeMap<String, u64>,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            rules_evaluated: AtomicU64::new(0),
            triggers_total: AtomicU64::new(0),
            suppressed_by_cooldown: AtomicU64::new(0),
            snapshots_missing: AtomicU64::new(0),
            deliveries_total: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            delivery_duration: Histogram::new(),
            rule_triggers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn record_trigger(&self, rule_id: &str) {
        self.triggers_total.fetch_add(1, Ordering::Relaxed);
        let mut per_rule = self.rule_triggers.lock().unwrap_or_else(|e| e.into_inner());
        *per_rule.entry(rule_id.to_string()).or_insert(0) += 1;
    }

    pub fn record_delivery(&self, succeeded: bool, latency_ms: u64) {
        self.deliveries_total.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.delivery_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.delivery_duration.record(latency_ms as f64 / 1000.0);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            rules_evaluated: self.rules_evaluated.load(Ordering::Relaxed),
            triggers_total: self.triggers_total.load(Ordering::Relaxed),
            suppressed_by_cooldown: self.suppressed_by_cooldown.load(Ordering::Relaxed),
            snapshots_missing: self.snapshots_missing.load(Ordering::Relaxed),
            deliveries_total: self.deliveries_total.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            rule_triggers: self
                .rule_triggers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    pub fn to_prometheus(&self) -> String {
        let snap = self.snapshot();
        let counters = [
            ("ticks_total", "Evaluation ticks run.", snap.ticks_total),
            ("ticks_skipped_total", "Scheduled ticks skipped because one was running.", snap.ticks_skipped),
            ("rules_evaluated_total", "Rule evaluations against a snapshot.", snap.rules_evaluated),
            ("triggers_total", "Rules triggered.", snap.triggers_total),
            ("suppressed_by_cooldown_total", "Matches suppressed by cooldown.", snap.suppressed_by_cooldown),
            ("snapshots_missing_total", "Rule evaluations skipped for lack of a snapshot.", snap.snapshots_missing),
            ("deliveries_total", "Actions attempted.", snap.deliveries_total),
            ("delivery_failures_total", "Actions that failed after all attempts.", snap.delivery_failures),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {PREFIX}_{name} {help}");
            let _ = writeln!(out, "# TYPE {PREFIX}_{name} counter");
            let _ = writeln!(out, "{PREFIX}_{name} {value}");
        }

        let _ = writeln!(out, "# HELP {PREFIX}_rule_triggers_total Triggers per rule.");
        let _ = writeln!(out, "# TYPE {PREFIX}_rule_triggers_total counter");
        for (rule_id, count) in &snap.rule_triggers {
            let _ = writeln!(out, "{PREFIX}_rule_triggers_total{{rule_id=\"{rule_id}\"}} {count}");
        }

        self.delivery_duration
            .write_prometheus(&mut out, &format!("{PREFIX}_delivery_duration_seconds"));
        out
    }
}
