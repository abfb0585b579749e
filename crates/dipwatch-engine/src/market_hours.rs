use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

/// Whether the exchange is open: Monday-Friday, 09:15-15:30 exchange-local.
pub fn is_market_open(now: DateTime<Utc>, timezone: Tz) -> bool {
    let local = now.with_timezone(&timezone);

    match local.weekday() {
        Weekday::Sat | Weekday::Sun => return false,
        _ => {}
    }

    let open = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
    let close = NaiveTime::from_hms_opt(15, 30, 0).unwrap();
    let time = local.time();

    open <= time && time <= close
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn open_midday_on_a_weekday() {
        // 2024-06-03 is a Monday; 06:30 UTC = 12:00 IST.
        assert!(is_market_open(utc(2024, 6, 3, 6, 30), Kolkata));
    }

    #[test]
    fn closed_before_open_and_after_close() {
        // 03:00 UTC = 08:30 IST
        assert!(!is_market_open(utc(2024, 6, 3, 3, 0), Kolkata));
        // 10:30 UTC = 16:00 IST
        assert!(!is_market_open(utc(2024, 6, 3, 10, 30), Kolkata));
    }

    #[test]
    fn boundaries_are_inclusive() {
        // 03:45 UTC = 09:15 IST, 10:00 UTC = 15:30 IST
        assert!(is_market_open(utc(2024, 6, 3, 3, 45), Kolkata));
        assert!(is_market_open(utc(2024, 6, 3, 10, 0), Kolkata));
    }

    #[test]
    fn closed_on_weekends() {
        // 2024-06-01 is a Saturday.
        assert!(!is_market_open(utc(2024, 6, 1, 6, 30), Kolkata));
        assert!(!is_market_open(utc(2024, 6, 2, 6, 30), Kolkata));
    }

    #[test]
    fn weekday_resolved_in_exchange_timezone() {
        // Sunday 21:30 UTC is already Monday 09:30 in Auckland (UTC+12).
        assert!(is_market_open(
            utc(2024, 6, 2, 21, 30),
            chrono_tz::Pacific::Auckland
        ));
        // ...but still Sunday in Kolkata.
        assert!(!is_market_open(utc(2024, 6, 2, 21, 30), Kolkata));
    }
}
