//! Coatbay Settlement Windows - pure calendar math
//!
//! Computes offer expiry and the auto-release/auto-refund deadlines. All
//! calendar-day decisions (business days, local midnight) are evaluated in
//! the platform's configured local zone and then converted back to absolute
//! UTC instants, with the zone offset re-derived whenever it changes across
//! a daylight-saving boundary.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use coatbay_types::{CoatbayError, Hold, HoldKind, Result};

/// Grace period before the platform force-releases or force-refunds a hold.
pub const GRACE_PERIOD_DAYS: i64 = 28;

/// How long an offer stays acceptable after submission.
pub const OFFER_TTL_HOURS: i64 = 72;

/// Fallback age for holds created before the deadline column existed.
pub const LEGACY_FALLBACK_DAYS: i64 = 7;

/// The local zone used for calendar-day evaluation
///
/// The platform operates on central-European calendar days (Vienna/Berlin):
/// UTC+1 in winter, UTC+2 between the last Sundays of March and October,
/// switching at 01:00 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarZone {
    CentralEuropean,
}

impl CalendarZone {
    /// Zone offset from UTC, in hours, at the given instant.
    pub fn offset_hours(&self, instant: DateTime<Utc>) -> i64 {
        match self {
            CalendarZone::CentralEuropean => {
                if in_eu_summer_time(instant) {
                    2
                } else {
                    1
                }
            }
        }
    }

    /// The local calendar date at the given instant.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        (instant + Duration::hours(self.offset_hours(instant))).date_naive()
    }
}

fn last_sunday(year: i32, month: u32) -> NaiveDate {
    // Last day of the month, walked back to Sunday.
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid month boundary");
    let mut day = first_of_next.pred_opt().expect("month has a last day");
    while day.weekday() != Weekday::Sun {
        day = day.pred_opt().expect("walking back within the month");
    }
    day
}

/// EU summer time: last Sunday of March 01:00 UTC until last Sunday of
/// October 01:00 UTC.
fn in_eu_summer_time(instant: DateTime<Utc>) -> bool {
    let year = instant.year();
    let start = Utc
        .from_utc_datetime(&last_sunday(year, 3).and_hms_opt(1, 0, 0).unwrap());
    let end = Utc
        .from_utc_datetime(&last_sunday(year, 10).and_hms_opt(1, 0, 0).unwrap());
    instant >= start && instant < end
}

/// The UTC instant at which the given local calendar date begins.
///
/// Derives the offset from a candidate instant and re-derives it once if the
/// offset changed across the boundary, which settles the two instants around
/// a DST switch.
pub fn local_midnight(date: NaiveDate, zone: CalendarZone) -> DateTime<Utc> {
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight exists");
    let naive_utc = Utc.from_utc_datetime(&midnight);
    let first_offset = zone.offset_hours(naive_utc);
    let candidate = naive_utc - Duration::hours(first_offset);
    let second_offset = zone.offset_hours(candidate);
    if second_offset == first_offset {
        candidate
    } else {
        naive_utc - Duration::hours(second_offset)
    }
}

/// The UTC instant at which the local day containing `instant` begins.
pub fn start_of_local_day(instant: DateTime<Utc>, zone: CalendarZone) -> DateTime<Utc> {
    local_midnight(zone.local_date(instant), zone)
}

/// Walk forward `n` business days from `start`, skipping Saturdays, Sundays
/// and dates in `holidays`. Calendar days are evaluated in the local zone.
pub fn add_business_days(
    start: DateTime<Utc>,
    n: u32,
    holidays: &HashSet<NaiveDate>,
    zone: CalendarZone,
) -> NaiveDate {
    let mut date = zone.local_date(start);
    let mut remaining = n;
    while remaining > 0 {
        date = date.succ_opt().expect("date range");
        let is_weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        if is_weekend || holidays.contains(&date) {
            continue;
        }
        remaining -= 1;
    }
    date
}

/// Expiry instant for a newly submitted offer:
/// `min(now + 72h, start of the delivery date's local day − 1ms)`.
///
/// Fails when the computed expiry is not in the future; such an offer would
/// expire immediately and must not be submittable.
pub fn offer_expiry(
    now: DateTime<Utc>,
    delivery_date: NaiveDate,
    zone: CalendarZone,
) -> Result<DateTime<Utc>> {
    let ttl_cap = now + Duration::hours(OFFER_TTL_HOURS);
    let delivery_cap = local_midnight(delivery_date, zone) - Duration::milliseconds(1);
    let expires_at = ttl_cap.min(delivery_cap);
    if expires_at <= now {
        return Err(CoatbayError::WouldExpireImmediately);
    }
    Ok(expires_at)
}

/// The per-kind reference timestamp anchoring a hold's settlement windows.
///
/// Canonical rule: direct offers anchor on the report timestamp, job bids on
/// the ship timestamp, shop purchases on hold creation.
pub fn deadline_anchor(hold: &Hold) -> Option<DateTime<Utc>> {
    match hold.kind {
        HoldKind::DirectOffer => hold.reported_at,
        HoldKind::JobBid => hold.shipped_at,
        HoldKind::ShopPurchase => Some(hold.created_at),
    }
}

/// Deadline after which the platform force-releases: anchor + 28 days,
/// falling back to creation + 28 days while the anchor is missing.
pub fn auto_release_deadline(hold: &Hold) -> DateTime<Utc> {
    deadline_anchor(hold).unwrap_or(hold.created_at) + Duration::days(GRACE_PERIOD_DAYS)
}

/// Deadline after which an unshipped hold is force-refunded. `None` while
/// the anchor is missing; the scheduler backfills it once the anchor
/// timestamp becomes available.
pub fn auto_refund_deadline(hold: &Hold) -> Option<DateTime<Utc>> {
    deadline_anchor(hold).map(|anchor| anchor + Duration::days(GRACE_PERIOD_DAYS))
}

/// The instant at which manual-action permissions flip: before it the buyer
/// controls refund and release, from it onward only the seller may release.
/// `None` when the reference date is missing or invalid.
pub fn refund_unlock_instant(reference: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    reference.map(|r| r + Duration::days(GRACE_PERIOD_DAYS))
}
