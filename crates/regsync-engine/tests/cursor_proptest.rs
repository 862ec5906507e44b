use std::time::Duration;

use chrono::{NaiveDate, Timelike};
use proptest::prelude::*;
use regsync_engine::checkpoint::{advance_cursor, read_cursor};
use regsync_engine::RetryPolicy;
use regsync_state::{CursorStore, SqliteCursorStore};
use regsync_types::cursor::{CursorKind, CursorValue};
use regsync_types::state::{EndpointId, TableName};
use regsync_types::timefmt::{format_ddmmyyyyhhmm, parse_ddmmyyyyhhmm};

proptest! {
    #[test]
    fn cursor_is_monotonic(steps in prop::collection::vec((any::<i64>(), 0_u64..3), 1..24)) {
        let store = SqliteCursorStore::in_memory().expect("in-memory store");
        let ep = EndpointId::new("mcb");
        let table = TableName::new("LEDGER");

        let mut high: Option<i64> = None;
        for (candidate, inserted) in steps {
            let pos = read_cursor(&store, &ep, &table, CursorKind::Int64).expect("read");
            advance_cursor(
                &store,
                &ep,
                &table,
                "ENTRYID",
                &pos,
                inserted,
                Some(&CursorValue::Int64 { value: candidate }),
            )
            .expect("advance");

            if inserted > 0 && high.map_or(candidate > i64::MIN, |h| candidate > h) {
                high = Some(candidate);
            }
            let stored = store
                .get_cursor(&ep, &table)
                .expect("get")
                .and_then(|s| s.cursor_value);
            prop_assert_eq!(stored, high.map(|h| h.to_string()));
        }
    }

    #[test]
    fn report_date_parse_never_panics(raw in "\\PC{0,16}") {
        let _ = parse_ddmmyyyyhhmm(&raw);
    }

    #[test]
    fn report_date_rejects_wrong_width(raw in "[0-9]{0,11}|[0-9]{13,16}") {
        prop_assert!(parse_ddmmyyyyhhmm(&raw).is_none());
    }

    #[test]
    fn report_date_round_trips(
        days in 0_i64..73_000,
        hour in 0_u32..24,
        minute in 0_u32..60,
    ) {
        let date = NaiveDate::from_ymd_opt(1900, 1, 1).expect("base date")
            + chrono::Duration::days(days);
        let ts = date.and_hms_opt(hour, minute, 0).expect("valid time");
        let text = format_ddmmyyyyhhmm(&ts);
        prop_assert_eq!(text.len(), 12);
        let parsed = parse_ddmmyyyyhhmm(&text).expect("formatted date parses");
        prop_assert_eq!(parsed, ts);
        prop_assert_eq!(parsed.second(), 0);
    }

    #[test]
    fn backoff_doubles_until_saturation(base_secs in 1_u64..60, attempt in 1_u32..12) {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(base_secs),
        };
        prop_assert_eq!(policy.delay(1), Duration::from_secs(base_secs));
        prop_assert_eq!(policy.delay(attempt + 1), policy.delay(attempt) * 2);
    }
}
