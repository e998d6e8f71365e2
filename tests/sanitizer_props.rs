// Enviro Relay - Sanitizer Property Tests
//
// Whatever the input stream, emitted values stay inside the configured range
// and never move by more than the configured step between emissions.

use enviro_relay::{Bounds, Sanitizer};
use proptest::prelude::*;

fn candidate() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        8 => (-200.0f64..300.0).prop_map(Some),
        1 => Just(Some(f64::NAN)),
        1 => Just(Some(f64::INFINITY)),
        1 => Just(None),
    ]
}

proptest! {
    #[test]
    fn emitted_values_respect_range_and_step(
        stream in prop::collection::vec(candidate(), 1..200),
        min in -50.0f64..0.0,
        width in 1.0f64..150.0,
        step in 0.1f64..20.0,
    ) {
        let bounds = Bounds::new(min, min + width, step);
        let mut sanitizer = Sanitizer::new();
        let mut previous: Option<f64> = None;

        for value in stream {
            let emitted = sanitizer.sanitize("metric", value, &bounds);
            if let Some(v) = emitted {
                prop_assert!(v.is_finite());
                prop_assert!(v >= min && v <= min + width, "{} outside range", v);
                if let Some(p) = previous {
                    prop_assert!((v - p).abs() <= step, "jump {} -> {}", p, v);
                }
            }
            // Once a value was emitted, later cycles never go back to nothing
            if previous.is_some() {
                prop_assert!(emitted.is_some());
            }
            previous = emitted.or(previous);
        }
    }

    #[test]
    fn in_range_small_steps_are_all_accepted(
        start in 0.0f64..100.0,
        deltas in prop::collection::vec(-0.9f64..0.9, 1..100),
    ) {
        let bounds = Bounds::new(-1000.0, 1000.0, 1.0);
        let mut sanitizer = Sanitizer::new();
        let mut value = start;

        prop_assert_eq!(sanitizer.sanitize("t", Some(value), &bounds), Some(value));
        for d in deltas {
            value += d;
            prop_assert_eq!(sanitizer.sanitize("t", Some(value), &bounds), Some(value));
        }
        prop_assert_eq!(sanitizer.rejected(), 0);
    }
}
