//! Utility functions for the dashboard metrics

use chrono::{DateTime, Datelike, Utc};

/// Start of the calendar month containing `now`, in UTC
#[must_use]
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map_or(now, |midnight| midnight.and_utc())
}

/// Whether `at` falls in the half-open window `[start, end)`
#[must_use]
pub fn in_window(at: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    start <= at && at < end
}

/// Clamp a value into `[min, max]`, mapping non-finite input to `min`
#[must_use]
pub fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    }
}

/// Clamp a percentage into `[0, 100]`
#[must_use]
pub fn clamp_percentage(value: f64) -> f64 {
    clamp_finite(value, 0.0, 100.0)
}

/// `part / whole * 100`, or `0` for an empty population
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    clamp_percentage(part as f64 / whole as f64 * 100.0)
}

/// Arithmetic mean, or `None` for an empty iterator
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0_u64), |(sum, count), value| (sum + value, count + 1));

    (count > 0).then(|| sum / count as f64)
}

/// Round to a fixed number of decimals
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Format an integer with `,` thousands separators
#[must_use]
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    grouped
}

/// Format a percentage with one decimal and an explicit sign
#[must_use]
pub fn format_signed_percent(value: f64) -> String {
    format!("{value:+.1}%")
}

#[cfg(test)]
#[allow(
    clippy::missing_panics_doc,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_start_of_month() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 14, 25, 30).unwrap();
        assert_eq!(
            start_of_month(now),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );

        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(start_of_month(first), first);
    }

    #[test]
    fn test_in_window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();

        assert!(in_window(start, start, end));
        assert!(!in_window(end, start, end));
        assert!(!in_window(start - chrono::Duration::seconds(1), start, end));
    }

    #[rstest]
    #[case(0, 0, 0.0)]
    #[case(0, 10, 0.0)]
    #[case(5, 10, 50.0)]
    #[case(10, 10, 100.0)]
    #[case(15, 10, 100.0)]
    fn test_percentage(#[case] part: u64, #[case] whole: u64, #[case] expected: f64) {
        assert_eq!(percentage(part, whole), expected);
    }

    #[rstest]
    #[case(-5.0, 0.0)]
    #[case(42.5, 42.5)]
    #[case(180.0, 100.0)]
    #[case(f64::NAN, 0.0)]
    #[case(f64::INFINITY, 0.0)]
    fn test_clamp_percentage(#[case] input: f64, #[case] expected: f64) {
        assert_eq!(clamp_percentage(input), expected);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(Vec::<f64>::new()), None);
        assert_eq!(mean([4.0, 5.0, 3.0]), Some(4.0));
    }

    #[rstest]
    #[case(11.111_111, 1, 11.1)]
    #[case(11.15, 0, 11.0)]
    #[case(-3.46, 1, -3.5)]
    fn test_round_to(#[case] value: f64, #[case] decimals: i32, #[case] expected: f64) {
        assert_eq!(round_to(value, decimals), expected);
    }

    #[rstest]
    #[case(0, "0")]
    #[case(999, "999")]
    #[case(1_000, "1,000")]
    #[case(8_400, "8,400")]
    #[case(1_234_567, "1,234,567")]
    fn test_group_thousands(#[case] value: u64, #[case] expected: &str) {
        assert_eq!(group_thousands(value), expected);
    }

    #[test]
    fn test_format_signed_percent() {
        assert_eq!(format_signed_percent(11.111), "+11.1%");
        assert_eq!(format_signed_percent(-4.0), "-4.0%");
        assert_eq!(format_signed_percent(0.0), "+0.0%");
    }

    proptest! {
        #[test]
        fn prop_percentage_stays_in_range(part in 0_u64..1_000_000, whole in 0_u64..1_000_000) {
            let value = percentage(part, whole);
            prop_assert!((0.0..=100.0).contains(&value));
        }

        #[test]
        fn prop_clamp_finite_stays_in_range(value in proptest::num::f64::ANY) {
            let clamped = clamp_finite(value, 0.0, 5.0);
            prop_assert!((0.0..=5.0).contains(&clamped));
        }
    }
}
