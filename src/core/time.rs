use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub(crate) fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

pub(crate) fn parse_offset(value: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(value, &Rfc3339)
}

/// Milliseconds since the Unix epoch, used as Redis sorted-set scores.
pub(crate) fn unix_millis(value: OffsetDateTime) -> i64 {
    (value.unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, PrimitiveDateTime, Time, UtcOffset};

    #[test]
    fn format_offset_preserves_offset() {
        let date = Date::from_calendar_date(2025, time::Month::January, 2).unwrap();
        let time = Time::from_hms(10, 20, 30).unwrap();
        let utc = PrimitiveDateTime::new(date, time).assume_utc();
        let offset = UtcOffset::from_hms(3, 0, 0).unwrap();
        let shifted = utc.to_offset(offset);
        assert_eq!(format_offset(shifted), "2025-01-02T13:20:30+03:00");
    }

    #[test]
    fn parse_offset_reads_formatted_value() {
        let date = Date::from_calendar_date(2025, time::Month::March, 9).unwrap();
        let time = Time::from_hms_milli(8, 0, 1, 250).unwrap();
        let value = PrimitiveDateTime::new(date, time).assume_utc();
        let parsed = parse_offset(&format_offset(value)).expect("parse");
        assert_eq!(parsed, value);
    }

    #[test]
    fn unix_millis_truncates_sub_millisecond_part() {
        let value = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap();
        assert_eq!(unix_millis(value), 1_700_000_000_123);
    }
}
