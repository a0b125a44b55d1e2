use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use super::CalcError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub duration_days: u32,
}

/// Start/return window for a rental of `duration_days` beginning at
/// `start`. The return date is the last paid day, so a one-day rental
/// starts and ends on the same date.
pub fn rental_window(start: NaiveDate, duration_days: u32) -> Result<RentalWindow, CalcError> {
    if duration_days == 0 {
        return Err(CalcError::InvalidArgument(
            "rental duration must be at least one day".to_string(),
        ));
    }

    let end = start + Duration::days(i64::from(duration_days) - 1);
    Ok(RentalWindow { start, end, duration_days })
}

/// Date the order lands, `lead_time_days` after `order_date`. With
/// `business_days_only` every counted day must be a weekday outside the
/// holiday set; the clock starts the day after the order.
pub fn delivery_date(
    order_date: NaiveDate,
    lead_time_days: u32,
    business_days_only: bool,
    holidays: &[NaiveDate],
) -> NaiveDate {
    if !business_days_only {
        return order_date + Duration::days(i64::from(lead_time_days));
    }

    let mut date = order_date;
    let mut remaining = lead_time_days;
    while remaining > 0 {
        date += Duration::days(1);
        if is_business_day(date, holidays) {
            remaining -= 1;
        }
    }
    date
}

fn is_business_day(date: NaiveDate, holidays: &[NaiveDate]) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !holidays.contains(&date)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate, Weekday};

    use super::{delivery_date, rental_window};
    use crate::calc::CalcError;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn calendar_lead_time_ignores_weekends() {
        // 2026-02-06 is a Friday.
        let delivered = delivery_date(date(2026, 2, 6), 5, false, &[]);
        assert_eq!(delivered, date(2026, 2, 11));
    }

    #[test]
    fn five_business_days_from_friday_is_next_friday() {
        let order = date(2026, 2, 6);
        assert_eq!(order.weekday(), Weekday::Fri);

        let delivered = delivery_date(order, 5, true, &[]);
        assert_eq!(delivered, date(2026, 2, 13));
        assert_eq!(delivered.weekday(), Weekday::Fri);
    }

    #[test]
    fn one_business_day_from_friday_is_monday() {
        let delivered = delivery_date(date(2026, 2, 6), 1, true, &[]);
        assert_eq!(delivered, date(2026, 2, 9));
        assert_eq!(delivered.weekday(), Weekday::Mon);
    }

    #[test]
    fn saturday_order_with_one_business_day_lands_monday() {
        let delivered = delivery_date(date(2026, 2, 7), 1, true, &[]);
        assert_eq!(delivered, date(2026, 2, 9));
    }

    #[test]
    fn holidays_push_delivery_out() {
        // Monday 2026-02-09 declared a holiday: Fri + 1 business day -> Tuesday.
        let holidays = [date(2026, 2, 9)];
        let delivered = delivery_date(date(2026, 2, 6), 1, true, &holidays);
        assert_eq!(delivered, date(2026, 2, 10));
    }

    #[test]
    fn consecutive_holidays_are_all_skipped() {
        let holidays = [date(2026, 2, 9), date(2026, 2, 10)];
        let delivered = delivery_date(date(2026, 2, 6), 2, true, &holidays);
        assert_eq!(delivered, date(2026, 2, 12));
    }

    #[test]
    fn zero_lead_time_is_the_order_date() {
        assert_eq!(delivery_date(date(2026, 2, 6), 0, true, &[]), date(2026, 2, 6));
        assert_eq!(delivery_date(date(2026, 2, 6), 0, false, &[]), date(2026, 2, 6));
    }

    #[test]
    fn weekend_holidays_do_not_double_count() {
        // A holiday falling on Saturday changes nothing.
        let holidays = [date(2026, 2, 7)];
        let delivered = delivery_date(date(2026, 2, 6), 1, true, &holidays);
        assert_eq!(delivered, date(2026, 2, 9));
    }

    #[test]
    fn rental_window_spans_inclusive_days() {
        let window = rental_window(date(2026, 2, 6), 10).expect("valid window");
        assert_eq!(window.start, date(2026, 2, 6));
        assert_eq!(window.end, date(2026, 2, 15));
    }

    #[test]
    fn one_day_rental_returns_same_day() {
        let window = rental_window(date(2026, 2, 6), 1).expect("valid window");
        assert_eq!(window.start, window.end);
    }

    #[test]
    fn zero_duration_window_is_rejected() {
        assert!(matches!(
            rental_window(date(2026, 2, 6), 0),
            Err(CalcError::InvalidArgument(_))
        ));
    }
}
