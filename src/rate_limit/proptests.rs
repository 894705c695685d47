//! Property-Based Tests for the Rate Limiter
//!
//! ```bash
//! cargo test --lib rate_limit::proptests
//! ```

use proptest::prelude::*;
use std::sync::Arc;

use super::{Category, ManualClock, RateLimitConfig, RateLimiter, SlidingWindow, DEFAULT_WINDOW_MS};

// Non-decreasing timestamps built from random gaps
fn arb_timestamps(max_len: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..20_000, 1..max_len).prop_map(|gaps| {
        gaps.into_iter()
            .scan(0u64, |now, gap| {
                *now += gap;
                Some(*now)
            })
            .collect()
    })
}

fn arb_category() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::DocumentRead),
        Just(Category::DocumentWrite),
        Just(Category::CollectionRead),
        Just(Category::Subscription),
    ]
}

proptest! {
    #[test]
    fn prop_burst_allows_exactly_limit(limit in 1u32..60, attempts in 1usize..150, category in arb_category()) {
        let clock = ManualClock::new(1_000);
        let limiter = RateLimiter::with_clock(RateLimitConfig::uniform(limit), Arc::new(clock));

        let allowed = (0..attempts)
            .filter(|_| limiter.check_and_record(category, Some("burst/key")).is_ok())
            .count();

        prop_assert_eq!(allowed, attempts.min(limit as usize));
    }

    #[test]
    fn prop_window_only_holds_recent_entries(times in arb_timestamps(200)) {
        let mut window = SlidingWindow::new();
        for &now in &times {
            window.record(now, DEFAULT_WINDOW_MS);
            let held: Vec<u64> = window.timestamps().collect();
            prop_assert!(held.iter().all(|&ts| now - ts < DEFAULT_WINDOW_MS));
            prop_assert!(held.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(held.last().copied(), Some(now));
        }
    }

    #[test]
    fn prop_limiter_matches_reference_model(limit in 1u32..10, times in arb_timestamps(120)) {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::with_clock(RateLimitConfig::uniform(limit), Arc::new(clock.clone()));
        let mut model: Vec<u64> = Vec::new();

        for &now in &times {
            clock.set(now);
            model.push(now);
            model.retain(|&ts| now - ts < DEFAULT_WINDOW_MS);
            let expected = model.len() <= limit as usize;

            let actual = limiter.check_and_record(Category::DocumentWrite, Some("users/42")).is_ok();
            prop_assert_eq!(actual, expected);
        }
    }

    #[test]
    fn prop_other_keys_unaffected(limit in 1u32..20, extra in 1usize..40) {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::with_clock(RateLimitConfig::uniform(limit), Arc::new(clock));

        for _ in 0..(limit as usize + extra) {
            let _ = limiter.check_and_record(Category::DocumentRead, Some("hot/a"));
        }
        prop_assert!(limiter.check_and_record(Category::DocumentRead, Some("cold/b")).is_ok());
        prop_assert!(limiter.check_and_record(Category::Subscription, Some("hot/a")).is_ok());
    }
}
