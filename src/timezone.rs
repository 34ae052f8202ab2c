/// Timezone normalization
///
/// Everything persisted is UTC. User input arrives as naive local wall-clock
/// time in the acting user's timezone and is converted here; rendering goes
/// the other way. Comparisons never happen in local time.
use crate::error::{DeskError, DeskResult};
use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc,
};
use chrono_tz::Tz;

/// Resolve a stored timezone name, falling back to `default` when unknown
pub fn resolve(name: &str, default: Tz) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!("Unknown timezone {:?}, falling back to {}", name, default);
            default
        }
    }
}

/// Check that a timezone name is a known IANA identifier
pub fn validate_name(name: &str) -> DeskResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| DeskError::Validation(format!("Invalid timezone: {}", name)))
}

/// Convert a naive local time in `tz` to a UTC instant.
///
/// Ambiguous wall-clock times (autumn fall-back) resolve to the later,
/// standard-time instant. Times inside a spring-forward gap are read with the
/// offset that was in effect just before the gap, so 02:30 on a skipped hour
/// lands at what the clock calls 03:30.
pub fn local_to_utc(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(_, later) => later.with_timezone(&Utc),
        LocalResult::None => {
            let before_gap = local - Duration::hours(3);
            let offset = tz
                .offset_from_local_datetime(&before_gap)
                .earliest()
                .map(|o| o.fix())
                .unwrap_or_else(|| tz.offset_from_utc_datetime(&local).fix());
            let shifted = local - Duration::seconds(i64::from(offset.local_minus_utc()));
            Utc.from_utc_datetime(&shifted)
        }
    }
}

/// Render a UTC instant in the viewer's timezone
pub fn utc_to_local(instant: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    instant.with_timezone(&tz)
}

/// Local midnight at the start of `date`, as a UTC instant
pub fn local_midnight_utc(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    local_to_utc(date.and_time(NaiveTime::MIN), tz)
}

/// Monday of the week containing `now`, in the viewer's local calendar
pub fn current_week_start(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    let today = utc_to_local(now, tz).date_naive();
    today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
}

/// UTC range `[start, end)` covering seven local days starting at `week_start`.
///
/// Both ends are local midnights converted independently, so a week that
/// crosses a DST change is 167 or 169 hours long.
pub fn week_range_utc(week_start: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight_utc(week_start, tz);
    let end = local_midnight_utc(week_start + Duration::days(7), tz);
    (start, end)
}

/// Convert a user-entered start/end pair to a UTC window.
///
/// An end of exactly local midnight that does not already fall after the
/// start is read as midnight of the following day.
pub fn normalize_window(
    start_local: NaiveDateTime,
    end_local: NaiveDateTime,
    tz: Tz,
) -> DeskResult<(DateTime<Utc>, DateTime<Utc>)> {
    let mut end_local = end_local;
    if end_local.time() == NaiveTime::MIN && end_local <= start_local {
        end_local += Duration::days(1);
    }

    let start_utc = local_to_utc(start_local, tz);
    let end_utc = local_to_utc(end_local, tz);

    if end_utc <= start_utc {
        return Err(DeskError::Validation(
            "End time must be after start time".to_string(),
        ));
    }

    Ok((start_utc, end_utc))
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(raw: &str) -> DeskResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| DeskError::Validation(format!("Invalid date: {}", raw)))
}

/// Parse a local wall-clock timestamp as entered in forms.
///
/// Accepts `YYYY-MM-DDTHH:MM`, `YYYY-MM-DD HH:MM` and either with seconds.
pub fn parse_local_datetime(raw: &str) -> DeskResult<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S",
    ];
    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| DeskError::Validation(format!("Invalid date/time: {}", raw)))
}

/// Parse an `HH:MM` time of day
pub fn parse_time(raw: &str) -> DeskResult<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| DeskError::Validation(format!("Invalid time: {}", raw)))
}
