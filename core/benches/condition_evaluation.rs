use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sentix_alert_core::condition::{evaluate, Condition, Field, Operator, Threshold};
use sentix_alert_core::rule::{Action, AlertRule};
use sentix_alert_core::snapshot::Snapshot;
use sentix_alert_core::state::RuleEntry;

fn snapshots(n: usize) -> Vec<Snapshot> {
    (0..n)
        .map(|i| {
            let x = (i as f64 * 0.37).sin();
            Snapshot::default()
                .with(Field::Mean, x)
                .with(Field::TimeDecayedMean, x * 0.9)
                .with(Field::Volatility, x.abs())
        })
        .collect()
}

fn benchmark_single_operator(c: &mut Criterion) {
    let values: Vec<f64> = snapshots(1000).iter().map(|s| s.mean).collect();
    let scalar = Threshold::Scalar(0.6);
    let range = Threshold::Range([-0.5, 0.5]);

    c.bench_function("greater_than_1k", |b| {
        b.iter(|| {
            values
                .iter()
                .filter(|v| evaluate(Operator::GreaterThan, &scalar, black_box(**v), None))
                .count()
        })
    });

    c.bench_function("outside_1k", |b| {
        b.iter(|| {
            values
                .iter()
                .filter(|v| evaluate(Operator::Outside, &range, black_box(**v), None))
                .count()
        })
    });
}

fn benchmark_rule_evaluation(c: &mut Criterion) {
    let rule = AlertRule::new("bench", "Benchmark rule", "PETR4.SA")
        .with_condition(Condition::new(Field::Mean, Operator::CrossedAbove, 0.6))
        .with_condition(Condition::new(Field::Volatility, Operator::GreaterThan, 0.2))
        .with_condition(Condition::new(Field::TimeDecayedMean, Operator::Between, (-1.0, 1.0)))
        .with_action(Action::Log)
        .with_cooldown_minutes(0);
    let series = snapshots(1000);
    let start = Utc::now();

    c.bench_function("rule_entry_three_conditions_1k_ticks", |b| {
        b.iter(|| {
            let mut entry = RuleEntry::new(rule.clone(), start);
            for (i, snap) in series.iter().enumerate() {
                black_box(entry.evaluate("PETR4.SA", snap, start + Duration::seconds(i as i64)));
            }
        })
    });
}

criterion_group!(benches, benchmark_single_operator, benchmark_rule_evaluation);
criterion_main!(benches);
