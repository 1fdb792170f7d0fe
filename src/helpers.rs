use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use num_traits::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::Timestamp;

/// Strips trailing zeros so decimals render without an artificial scale.
pub fn remove_exponent(value: Decimal) -> Decimal {
    value.normalize()
}

/// Truncates toward zero to `places` decimals.
pub fn format_decimal(value: Decimal, places: u32) -> Decimal {
    remove_exponent(value.round_dp_with_strategy(places, RoundingStrategy::ToZero))
}

/// Converts a float result into a decimal, rounding half to even.
pub fn to_decimal(value: f64, digits: u32) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp_with_strategy(digits, RoundingStrategy::MidpointNearestEven))
}

/// Snaps `value` onto a multiple of `step`.
pub fn to_decimal_places(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    (value / step).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven) * step
}

pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    remove_exponent(to_decimal_places(value, step))
}

pub fn now_ms() -> Timestamp {
    Utc::now().timestamp_millis()
}

pub fn datetime_from_ms(timestamp: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
}

/// Half-hour rounded period used for replay progress logs.
pub fn replay_period(timestamp: Timestamp) -> Option<DateTime<Utc>> {
    let dt = datetime_from_ms(timestamp)?;
    let hour = dt.duration_trunc(Duration::hours(1)).ok()?;
    if dt.minute() >= 30 {
        Some(hour + Duration::hours(1))
    } else {
        Some(hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_decimal_truncates() {
        assert_eq!(format_decimal(dec!(1.23456), 2), dec!(1.23));
        assert_eq!(format_decimal(dec!(-1.239), 2), dec!(-1.23));
        assert_eq!(format_decimal(dec!(5.000), 2).to_string(), "5");
    }

    #[test]
    fn test_to_decimal_places_snaps_to_step() {
        assert_eq!(to_decimal_places(dec!(0.12345), dec!(0.001)), dec!(0.123));
        assert_eq!(round_to_step(dec!(1.0049), dec!(0.01)).to_string(), "1");
        assert_eq!(to_decimal_places(dec!(7), Decimal::ZERO), dec!(7));
    }

    #[test]
    fn test_to_decimal_rejects_non_finite() {
        assert_eq!(to_decimal(f64::NAN, 2), None);
        assert_eq!(to_decimal(f64::INFINITY, 2), None);
        assert_eq!(to_decimal(12.3456, 2), Some(dec!(12.35)));
    }

    #[test]
    fn test_replay_period_rounds_half_hour() {
        // 2021-01-01 10:29:00 UTC
        let early = 1_609_496_940_000;
        // 2021-01-01 10:31:00 UTC
        let late = 1_609_497_060_000;
        assert_eq!(replay_period(early).map(|d| d.hour()), Some(10));
        assert_eq!(replay_period(late).map(|d| d.hour()), Some(11));
    }
}
