use proptest::prelude::*;
use sentix_alert_core::condition::{evaluate, Operator, Threshold};
use sentix_alert_core::delivery::RetryPolicy;
use std::time::Duration;

proptest! {
    #[test]
    fn test_comparison_pairs_are_complements(
        current in -1.0f64..1.0f64,
        threshold in -1.0f64..1.0f64,
    ) {
        let t = Threshold::Scalar(threshold);
        prop_assert_ne!(
            evaluate(Operator::GreaterThan, &t, current, None),
            evaluate(Operator::LessOrEqual, &t, current, None)
        );
        prop_assert_ne!(
            evaluate(Operator::LessThan, &t, current, None),
            evaluate(Operator::GreaterOrEqual, &t, current, None)
        );
        prop_assert_ne!(
            evaluate(Operator::Equal, &t, current, None),
            evaluate(Operator::NotEqual, &t, current, None)
        );
    }

    #[test]
    fn test_between_and_outside_partition_the_line(
        current in -2.0f64..2.0f64,
        a in -1.0f64..1.0f64,
        b in -1.0f64..1.0f64,
    ) {
        let range = Threshold::Range([a.min(b), a.max(b)]);
        prop_assert_ne!(
            evaluate(Operator::Between, &range, current, None),
            evaluate(Operator::Outside, &range, current, None)
        );
    }

    #[test]
    fn test_crossing_requires_both_sides(
        previous in proptest::option::of(-1.0f64..1.0f64),
        current in -1.0f64..1.0f64,
        threshold in -1.0f64..1.0f64,
    ) {
        let t = Threshold::Scalar(threshold);
        let above = evaluate(Operator::CrossedAbove, &t, current, previous);
        let below = evaluate(Operator::CrossedBelow, &t, current, previous);
        prop_assert_eq!(above, previous.is_some_and(|p| p <= threshold) && current > threshold);
        prop_assert_eq!(below, previous.is_some_and(|p| p >= threshold) && current < threshold);
        prop_assert!(!(above && below));
    }

    #[test]
    fn test_backoff_grows_and_stays_capped(
        initial_ms in 1u64..5_000,
        multiplier in 1.0f64..4.0f64,
        cap_ms in 1u64..60_000,
    ) {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(initial_ms),
            backoff_multiplier: multiplier,
            max_backoff: Duration::from_millis(cap_ms),
            ..RetryPolicy::default()
        };
        let mut last = Duration::ZERO;
        for attempt in 1..20 {
            let delay = policy.backoff_after(attempt);
            prop_assert!(delay >= last);
            prop_assert!(delay <= policy.max_backoff);
            last = delay;
        }
    }
}
