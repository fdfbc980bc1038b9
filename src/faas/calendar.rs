//! Business-date arithmetic. "Today" is resolved in the configured zone so a
//! run shortly after midnight UTC still sees the provider's calendar day.

use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;

use crate::configs::CalendarConfig;
use crate::core::error::NgError;

pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Today in the configured zone, falling back to UTC on an unknown zone name.
pub fn today(config: &CalendarConfig) -> NaiveDate {
    match config.timezone.parse::<Tz>() {
        Ok(tz) => today_in(tz),
        Err(_) => Utc::now().date_naive(),
    }
}

/// Whole days between `date` and `today`; negative for future dates.
pub fn age_in_days(date: NaiveDate, today: NaiveDate) -> i64 {
    (today - date).num_days()
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// The `n`-th weekday strictly before `from`. `n == 0` returns `from` itself.
pub fn previous_business_day(from: NaiveDate, n: u32) -> NaiveDate {
    let mut date = from;
    let mut remaining = n;
    while remaining > 0 {
        date -= Duration::days(1);
        if !is_weekend(date) {
            remaining -= 1;
        }
    }
    date
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, NgError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| NgError::InvalidDate(format!("'{}' is not YYYY-MM-DD ({})", raw, e)))
}

/// Outcome of the pre-flight check: hard rejection is an `Err`, soft concerns are warnings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DateCheck {
    pub age_days: i64,
    pub warnings: Vec<String>,
}

/// Rejects dates that cannot have data (future, beyond the retention horizon)
/// and lists the reasons a valid date may still come back empty.
pub fn check_business_date(
    date: NaiveDate,
    today: NaiveDate,
    config: &CalendarConfig,
) -> Result<DateCheck, NgError> {
    let age_days = age_in_days(date, today);

    if age_days < 0 {
        return Err(NgError::InvalidDate(format!(
            "{} is in the future; reports cannot be extracted ahead of time",
            date
        )));
    }
    if age_days > config.max_age_days {
        return Err(NgError::InvalidDate(format!(
            "{} is {} days old (limit {}); data is no longer available",
            date, age_days, config.max_age_days
        )));
    }

    let mut warnings = Vec::new();
    if age_days < config.recent_warning_days {
        warnings.push(format!("{} is very recent; data may not be consolidated yet", date));
    }
    if is_weekend(date) {
        warnings.push(format!("{} is a weekend; usually there is no financial activity", date));
    }
    if age_days > config.archived_warning_days {
        warnings.push(format!("{} is older than {} days; data may have been archived", date, config.archived_warning_days));
    }

    Ok(DateCheck { age_days, warnings })
}
