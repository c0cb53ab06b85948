//! Property tests for store and resumption invariants.
//!
//! Uses proptest to verify:
//! 1. Merge: every timestamp appears once, ascending, later rows win
//! 2. Resumption: a checkpoint-adjusted window never reaches at or before the checkpoint
//! 3. Backoff: retry delays stay within `[base * 2^n, max_delay]`

use barvault_core::connector::RetryPolicy;
use barvault_core::domain::{Bar, TimeWindow};
use barvault_core::storage::merge_rows;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_rows(tag: f64) -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec(0i64..200, 0..60).prop_map(move |ts| {
        ts.into_iter()
            .enumerate()
            .map(|(i, t)| Bar {
                symbol: "AAPL".into(),
                ts_ns: t,
                open: tag,
                high: tag,
                low: tag,
                close: tag + i as f64,
                volume: 1,
                trade_count: None,
                vwap: None,
            })
            .collect()
    })
}

// ── 1. Merge ─────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn merge_is_sorted_unique_and_prefers_later(
        existing in arb_rows(1.0),
        incoming in arb_rows(2.0),
    ) {
        let merged = merge_rows(existing.clone(), incoming.clone());

        for pair in merged.windows(2) {
            prop_assert!(pair[0].ts_ns < pair[1].ts_ns);
        }

        let expected_ts: BTreeSet<i64> =
            existing.iter().chain(incoming.iter()).map(|b| b.ts_ns).collect();
        let got_ts: BTreeSet<i64> = merged.iter().map(|b| b.ts_ns).collect();
        prop_assert_eq!(got_ts, expected_ts);
        prop_assert_eq!(merged.len(), got_ts_len(&merged));

        // The last occurrence of each timestamp, scanning existing then incoming.
        let mut winner: BTreeMap<i64, &Bar> = BTreeMap::new();
        for bar in existing.iter().chain(incoming.iter()) {
            winner.insert(bar.ts_ns, bar);
        }
        for bar in &merged {
            prop_assert_eq!(bar, winner[&bar.ts_ns]);
        }
    }
}

fn got_ts_len(rows: &[Bar]) -> usize {
    rows.iter().map(|b| b.ts_ns).collect::<BTreeSet<_>>().len()
}

// ── 2. Resumption ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn adjusted_window_starts_after_checkpoint(
        start in -1_000i64..1_000,
        len in 0i64..1_000,
        checkpoint in proptest::option::of(-2_000i64..3_000),
    ) {
        let window = TimeWindow::new(start, start + len).unwrap();
        match window.after_checkpoint(checkpoint) {
            None => {
                let cp = checkpoint.expect("only a checkpoint can cover a window");
                prop_assert!(window.end_ns() <= cp);
            }
            Some(adjusted) => {
                prop_assert_eq!(adjusted.end_ns(), window.end_ns());
                prop_assert!(adjusted.start_ns() >= window.start_ns());
                if let Some(cp) = checkpoint {
                    prop_assert!(adjusted.start_ns() > cp);
                }
            }
        }
    }
}

// ── 3. Backoff ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn backoff_within_bounds(attempt in 0u32..12, base_ms in 1u64..200, max_ms in 1u64..20_000) {
        let policy = RetryPolicy::new(10)
            .with_base_delay(Duration::from_millis(base_ms))
            .with_max_delay(Duration::from_millis(max_ms));
        let delay = policy.delay_for(attempt, None);
        let floor = Duration::from_millis(base_ms.saturating_mul(1 << attempt));
        prop_assert!(delay <= Duration::from_millis(max_ms));
        prop_assert!(delay >= floor.min(Duration::from_millis(max_ms)));
    }
}
