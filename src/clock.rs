use std::sync::{Arc, Mutex};

use time::{Date, OffsetDateTime, UtcOffset};

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    fn today(&self) -> Date {
        self.now().date()
    }

    /// Calendar date of `ts` as seen from the current local offset.
    fn local_date(&self, ts: OffsetDateTime) -> Date {
        ts.to_offset(self.now().offset()).date()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Uses the host offset, falling back to UTC when it can't be determined
    /// (the `time` crate refuses once other threads exist).
    pub fn detect() -> Self {
        let offset = UtcOffset::current_local_offset().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "local offset unavailable; using UTC");
            UtcOffset::UTC
        });
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Settable clock for tests and replay.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl FixedClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: time::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Parses `+HH:MM` / `-HH:MM` / `Z`.
pub fn parse_offset(s: &str) -> Option<UtcOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Some(UtcOffset::UTC);
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1i8, &s[1..]),
        b'-' => (-1i8, &s[1..]),
        _ => (1i8, s),
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let h: i8 = h.parse().ok()?;
    let m: i8 = m.parse().ok()?;
    UtcOffset::from_hms(sign * h, sign * m, 0).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn local_date_uses_current_offset() {
        let clock = FixedClock::new(datetime!(2026-03-10 00:30 +02:00));
        // 23:00 UTC the previous day is 01:00 local.
        let ts = datetime!(2026-03-09 23:00 UTC);
        assert_eq!(clock.local_date(ts), date!(2026 - 03 - 10));
        assert_eq!(clock.today(), date!(2026 - 03 - 10));
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(datetime!(2026-03-10 23:59 UTC));
        clock.advance(time::Duration::minutes(2));
        assert_eq!(clock.today(), date!(2026 - 03 - 11));
    }

    #[test]
    fn parse_offset_variants() {
        assert_eq!(parse_offset("+02:00"), UtcOffset::from_hms(2, 0, 0).ok());
        assert_eq!(parse_offset("-05:30"), UtcOffset::from_hms(-5, -30, 0).ok());
        assert_eq!(parse_offset("Z"), Some(UtcOffset::UTC));
        assert_eq!(parse_offset("3"), UtcOffset::from_hms(3, 0, 0).ok());
        assert_eq!(parse_offset("nope"), None);
    }
}
