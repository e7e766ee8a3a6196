use chrono::{DateTime, Days, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use time::{OffsetDateTime, UtcOffset};

pub fn localized_datetime(time: OffsetDateTime, tz: Tz) -> DateTime<Tz> {
    let utc = time.to_offset(UtcOffset::UTC);
    let datetime_utc = DateTime::<Utc>::from_timestamp(utc.unix_timestamp(), utc.nanosecond())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    tz.from_utc_datetime(&datetime_utc.naive_utc())
}

/// Whole seconds from `now` until the next local midnight in `tz`.
///
/// Always at least one second. Where midnight falls into a DST gap the first
/// valid instant of the next day is used.
pub fn seconds_until_next_midnight(now: OffsetDateTime, tz: Tz) -> i64 {
    let local = localized_datetime(now, tz);
    let Some(tomorrow) = local.date_naive().checked_add_days(Days::new(1)) else {
        return 1;
    };

    let midnight = tomorrow.and_time(chrono::NaiveTime::MIN);
    let next = match tz.from_local_datetime(&midnight) {
        LocalResult::Single(next) | LocalResult::Ambiguous(next, _) => next,
        LocalResult::None => (1..=24)
            .filter_map(|hour| {
                tz.from_local_datetime(&(midnight + chrono::Duration::hours(hour)))
                    .earliest()
            })
            .next()
            .unwrap_or(local),
    };

    (next - local).num_seconds().max(1)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn counts_down_to_local_midnight() {
        let now = datetime!(2024-05-01 22:30:00 UTC);
        assert_eq!(seconds_until_next_midnight(now, Tz::UTC), 90 * 60);

        // 22:30 UTC is 00:30 next day in Berlin (CEST).
        assert_eq!(
            seconds_until_next_midnight(now, Tz::Europe__Berlin),
            23 * 3600 + 30 * 60
        );
    }

    #[test]
    fn exactly_midnight_waits_a_full_day() {
        let now = datetime!(2024-05-02 0:00:00 UTC);
        assert_eq!(seconds_until_next_midnight(now, Tz::UTC), 86_400);
    }

    #[test]
    fn result_stays_within_a_day() {
        let now = datetime!(2024-01-15 12:34:56 UTC);
        for tz in [Tz::UTC, Tz::Asia__Tokyo, Tz::America__New_York] {
            let seconds = seconds_until_next_midnight(now, tz);
            assert!((1..=86_400).contains(&seconds), "{tz}: {seconds}");
        }
    }
}
