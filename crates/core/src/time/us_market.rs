use crate::config::env_or;
use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::HashSet;

// US equity options session, standard time. Override with US_MARKET_UTC_OFFSET_HOURS.
const DEFAULT_UTC_OFFSET_HOURS: i32 = -5;

/// The trading day a run archives: the explicit `--data-date`, otherwise today in
/// market time, rolled back over weekends and configured holidays.
pub fn resolve_data_date(
    data_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    resolve_with(
        data_date_arg,
        now_utc,
        env_or("US_MARKET_UTC_OFFSET_HOURS", DEFAULT_UTC_OFFSET_HOURS),
        &configured_holidays(),
    )
}

fn resolve_with(
    data_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
    offset_hours: i32,
    holidays: &HashSet<NaiveDate>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = data_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid data date {s:?}, expected YYYY-MM-DD"));
    }

    let offset = chrono::FixedOffset::east_opt(offset_hours * 3600)
        .with_context(|| format!("invalid UTC offset: {offset_hours}h"))?;
    let mut date = now_utc.with_timezone(&offset).date_naive();

    while is_weekend(date) || holidays.contains(&date) {
        date = date - Duration::days(1);
    }

    Ok(date)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

fn configured_holidays() -> HashSet<NaiveDate> {
    // Fixed-date closures only. Extend via US_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
    let mut out = HashSet::new();
    for y in 2019..=2030 {
        for (m, d) in [(1, 1), (7, 4), (12, 25)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }

    if let Ok(s) = std::env::var("US_MARKET_HOLIDAYS") {
        out.extend(parse_holiday_list(&s));
    }

    out
}

fn parse_holiday_list(s: &str) -> Vec<NaiveDate> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| NaiveDate::parse_from_str(p, "%Y-%m-%d").ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn explicit_date_wins() {
        let now = Utc.with_ymd_and_hms(2019, 2, 23, 12, 0, 0).unwrap();
        let got = resolve_with(Some("2019-02-20"), now, -5, &HashSet::new()).unwrap();
        assert_eq!(got, d(2019, 2, 20));
        assert!(resolve_with(Some("02/20/2019"), now, -5, &HashSet::new()).is_err());
    }

    #[test]
    fn uses_market_local_day() {
        // 2019-02-22 03:00 UTC is still Thursday evening in New York.
        let now = Utc.with_ymd_and_hms(2019, 2, 22, 3, 0, 0).unwrap();
        assert_eq!(resolve_with(None, now, -5, &HashSet::new()).unwrap(), d(2019, 2, 21));
        assert_eq!(resolve_with(None, now, 0, &HashSet::new()).unwrap(), d(2019, 2, 22));
    }

    #[test]
    fn rolls_back_over_weekend() {
        // Sunday afternoon -> Friday.
        let now = Utc.with_ymd_and_hms(2019, 2, 24, 18, 0, 0).unwrap();
        assert_eq!(resolve_with(None, now, -5, &HashSet::new()).unwrap(), d(2019, 2, 22));
    }

    #[test]
    fn rolls_back_over_holidays() {
        // Monday 2019-02-18 (Presidents' Day) -> Friday 2019-02-15.
        let now = Utc.with_ymd_and_hms(2019, 2, 18, 18, 0, 0).unwrap();
        let holidays: HashSet<NaiveDate> = parse_holiday_list("2019-02-18, bogus,").into_iter().collect();
        assert_eq!(resolve_with(None, now, -5, &holidays).unwrap(), d(2019, 2, 15));
    }
}
