use chrono::NaiveDate;
use rs_faas_ng::configs::{CalendarConfig, PollingConfig};
use rs_faas_ng::core::error::NgError;
use rs_faas_ng::faas::budget::{AgeBucket, BudgetPolicy};
use rs_faas_ng::faas::calendar::{
    age_in_days, check_business_date, is_weekend, parse_date, previous_business_day,
};
use std::time::Duration;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

// =========================================================================
// CALENDAR
// =========================================================================

#[test]
fn previous_business_day_skips_weekends() {
    // 2024-06-10 is a Monday.
    assert_eq!(previous_business_day(d(2024, 6, 10), 1), d(2024, 6, 7));
    assert_eq!(previous_business_day(d(2024, 6, 10), 2), d(2024, 6, 6));
    assert_eq!(previous_business_day(d(2024, 6, 9), 1), d(2024, 6, 7));
    assert_eq!(previous_business_day(d(2024, 6, 12), 1), d(2024, 6, 11));
    assert_eq!(previous_business_day(d(2024, 6, 10), 0), d(2024, 6, 10));
}

#[test]
fn weekends_are_detected() {
    assert!(is_weekend(d(2024, 6, 8)));
    assert!(is_weekend(d(2024, 6, 9)));
    assert!(!is_weekend(d(2024, 6, 10)));
}

#[test]
fn dates_parse_only_in_iso_form() {
    assert_eq!(parse_date("2024-06-10").unwrap(), d(2024, 6, 10));
    assert_eq!(parse_date(" 2024-06-10 ").unwrap(), d(2024, 6, 10));
    assert!(matches!(parse_date("10/06/2024"), Err(NgError::InvalidDate(_))));
    assert!(matches!(parse_date("2024-02-30"), Err(NgError::InvalidDate(_))));
}

#[test]
fn age_is_negative_for_future_dates() {
    assert_eq!(age_in_days(d(2024, 6, 1), d(2024, 6, 10)), 9);
    assert_eq!(age_in_days(d(2024, 6, 11), d(2024, 6, 10)), -1);
}

#[test]
fn future_and_expired_dates_are_rejected() {
    let cfg = CalendarConfig::default();
    let today = d(2024, 6, 10);

    let future = check_business_date(d(2024, 6, 11), today, &cfg).unwrap_err();
    assert!(future.to_string().contains("future"));

    let expired = check_business_date(today - chrono::Duration::days(731), today, &cfg).unwrap_err();
    assert!(matches!(expired, NgError::InvalidDate(_)));

    let horizon = check_business_date(today - chrono::Duration::days(730), today, &cfg).unwrap();
    assert_eq!(horizon.age_days, 730);
}

#[test]
fn soft_concerns_are_warnings() {
    let cfg = CalendarConfig::default();
    let today = d(2024, 6, 10);

    let plain = check_business_date(d(2024, 6, 4), today, &cfg).unwrap();
    assert_eq!(plain.age_days, 6);
    assert!(plain.warnings.is_empty());

    let recent = check_business_date(d(2024, 6, 10), today, &cfg).unwrap();
    assert_eq!(recent.warnings.len(), 1);
    assert!(recent.warnings[0].contains("recent"));

    let weekend = check_business_date(d(2024, 6, 1), today, &cfg).unwrap();
    assert_eq!(weekend.warnings.len(), 1);
    assert!(weekend.warnings[0].contains("weekend"));

    // 2023-11-29 is a Wednesday, 194 days before today.
    let archived = check_business_date(d(2023, 11, 29), today, &cfg).unwrap();
    assert_eq!(archived.warnings.len(), 1);
    assert!(archived.warnings[0].contains("archived"));
}

// =========================================================================
// BUDGET
// =========================================================================

#[test]
fn buckets_follow_the_age_boundaries() {
    let policy = BudgetPolicy::default();
    assert_eq!(policy.bucket_for(45), AgeBucket::Stale);
    assert_eq!(policy.bucket_for(31), AgeBucket::Stale);
    assert_eq!(policy.bucket_for(30), AgeBucket::Aging);
    assert_eq!(policy.bucket_for(7), AgeBucket::Aging);
    assert_eq!(policy.bucket_for(6), AgeBucket::Fresh);
    assert_eq!(policy.bucket_for(0), AgeBucket::Fresh);
    assert_eq!(policy.bucket_for(-2), AgeBucket::Fresh);
}

#[test]
fn default_budgets_shrink_with_age() {
    let policy = BudgetPolicy::default();

    let stale = policy.budget_for(100);
    assert_eq!((stale.max_attempts, stale.wait, stale.ceiling), (4, Duration::from_secs(10), Duration::from_secs(60)));

    let aging = policy.budget_for(10);
    assert_eq!((aging.max_attempts, aging.wait, aging.ceiling), (5, Duration::from_secs(15), Duration::from_secs(90)));

    let fresh = policy.budget_for(1);
    assert_eq!((fresh.max_attempts, fresh.wait, fresh.ceiling), (6, Duration::from_secs(20), Duration::from_secs(120)));
}

#[test]
fn zero_attempts_are_raised_to_one() {
    let mut cfg = PollingConfig::default();
    cfg.fresh.max_attempts = 0;
    let policy = BudgetPolicy::from_config(&cfg);
    assert_eq!(policy.budget_for(0).max_attempts, 1);
}
