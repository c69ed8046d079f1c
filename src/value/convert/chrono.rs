// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! `chrono` temporal conversions.
//!
//! Time-of-day targets normalize interval hours modulo 24; negative
//! intervals wrap on the 24-hour ring.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use lexical::parse;

use super::{
    parse_micros, ConvIr, FromValueError, ParseIr, DATETIME_RE_YMD, DATETIME_RE_YMD_HMS,
    DATETIME_RE_YMD_HMS_NS, TIME_RE_HHH_MM_SS, TIME_RE_HHH_MM_SS_MS, TIME_RE_HH_MM_SS,
    TIME_RE_HH_MM_SS_MS,
};
use crate::value::Value;

fn naive_date_from_parts(year: u16, month: u8, day: u8) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
}

fn parse_bytes_to_naive_date(bytes: &[u8]) -> Option<NaiveDate> {
    if !DATETIME_RE_YMD.is_match(bytes) {
        return None;
    }
    let year = parse::<i32, _>(&bytes[..4]).ok()?;
    let month = parse::<u32, _>(&bytes[5..7]).ok()?;
    let day = parse::<u32, _>(&bytes[8..10]).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_bytes_to_naive_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    if !DATETIME_RE_YMD_HMS.is_match(bytes) && !DATETIME_RE_YMD_HMS_NS.is_match(bytes) {
        return None;
    }
    let year = parse::<i32, _>(&bytes[..4]).ok()?;
    let month = parse::<u32, _>(&bytes[5..7]).ok()?;
    let day = parse::<u32, _>(&bytes[8..10]).ok()?;
    let hour = parse::<u32, _>(&bytes[11..13]).ok()?;
    let minute = parse::<u32, _>(&bytes[14..16]).ok()?;
    let second = parse::<u32, _>(&bytes[17..19]).ok()?;
    let micros = if bytes.len() > 20 {
        parse_micros(&bytes[20..])
    } else {
        0
    };
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_micro_opt(hour, minute, second, micros))
}

fn parse_bytes_to_naive_time(bytes: &[u8]) -> Option<NaiveTime> {
    let negative = bytes.first() == Some(&b'-');
    let bytes = if negative { &bytes[1..] } else { bytes };

    if !TIME_RE_HH_MM_SS.is_match(bytes)
        && !TIME_RE_HH_MM_SS_MS.is_match(bytes)
        && !TIME_RE_HHH_MM_SS.is_match(bytes)
        && !TIME_RE_HHH_MM_SS_MS.is_match(bytes)
    {
        return None;
    }

    let colon = bytes.iter().position(|b| *b == b':')?;
    let hours = parse::<u32, _>(&bytes[..colon]).ok()?;
    let bytes = &bytes[colon + 1..];
    let minutes = parse::<u32, _>(&bytes[..2]).ok()?;
    let seconds = parse::<u32, _>(&bytes[3..5]).ok()?;
    let micros = if bytes.len() > 6 {
        parse_micros(&bytes[6..])
    } else {
        0
    };

    interval_to_naive_time(negative, 0, hours, minutes, seconds, micros)
}

/// Folds a (possibly negative, possibly longer-than-a-day) interval onto the
/// 24-hour ring.
fn interval_to_naive_time(
    negative: bool,
    days: u32,
    hours: u32,
    minutes: u32,
    seconds: u32,
    micros: u32,
) -> Option<NaiveTime> {
    if minutes > 59 || seconds > 59 || micros > 999_999 {
        return None;
    }

    let total_secs =
        i64::from(days) * 86_400 + i64::from(hours) * 3_600 + i64::from(minutes) * 60
            + i64::from(seconds);
    let signed = if negative { -total_secs } else { total_secs };
    let wrapped = signed.rem_euclid(86_400);

    // A negative fraction borrows one second from the wrapped value.
    let (wrapped, micros) = if negative && micros > 0 {
        ((wrapped + 86_399) % 86_400, 1_000_000 - micros)
    } else {
        (wrapped, micros)
    };

    NaiveTime::from_num_seconds_from_midnight_opt(wrapped as u32, micros * 1_000)
}

impl ConvIr<NaiveDate> for ParseIr<NaiveDate> {
    fn new(v: Value) -> Result<ParseIr<NaiveDate>, FromValueError> {
        let result = match v {
            Value::Date(y, m, d, 0, 0, 0, 0) => {
                let date = naive_date_from_parts(y, m, d);
                Ok((date, Value::Date(y, m, d, 0, 0, 0, 0)))
            }
            Value::Bytes(bytes) => {
                let date = parse_bytes_to_naive_date(&bytes);
                Ok((date, Value::Bytes(bytes)))
            }
            v => Err(FromValueError(v)),
        };

        let (date, value) = result?;

        match date {
            Some(output) => Ok(ParseIr { value, output }),
            None => Err(FromValueError(value)),
        }
    }
    fn commit(self) -> NaiveDate {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl ConvIr<NaiveDateTime> for ParseIr<NaiveDateTime> {
    fn new(v: Value) -> Result<ParseIr<NaiveDateTime>, FromValueError> {
        let result = match v {
            Value::Date(y, m, d, h, i, s, u) => {
                let datetime = naive_date_from_parts(y, m, d).and_then(|date| {
                    date.and_hms_micro_opt(u32::from(h), u32::from(i), u32::from(s), u)
                });
                Ok((datetime, Value::Date(y, m, d, h, i, s, u)))
            }
            Value::Bytes(bytes) => {
                let datetime = parse_bytes_to_naive_datetime(&bytes);
                Ok((datetime, Value::Bytes(bytes)))
            }
            v => Err(FromValueError(v)),
        };

        let (datetime, value) = result?;

        match datetime {
            Some(output) => Ok(ParseIr { value, output }),
            None => Err(FromValueError(value)),
        }
    }
    fn commit(self) -> NaiveDateTime {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl ConvIr<NaiveTime> for ParseIr<NaiveTime> {
    fn new(v: Value) -> Result<ParseIr<NaiveTime>, FromValueError> {
        let result = match v {
            Value::Time(neg, d, h, i, s, u) => {
                let time =
                    interval_to_naive_time(neg, d, u32::from(h), u32::from(i), u32::from(s), u);
                Ok((time, Value::Time(neg, d, h, i, s, u)))
            }
            Value::Bytes(bytes) => {
                let time = parse_bytes_to_naive_time(&bytes);
                Ok((time, Value::Bytes(bytes)))
            }
            v => Err(FromValueError(v)),
        };

        let (time, value) = result?;

        match time {
            Some(output) => Ok(ParseIr { value, output }),
            None => Err(FromValueError(value)),
        }
    }
    fn commit(self) -> NaiveTime {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl crate::value::convert::FromValue for NaiveDate {
    type Intermediate = ParseIr<NaiveDate>;
}

impl crate::value::convert::FromValue for NaiveDateTime {
    type Intermediate = ParseIr<NaiveDateTime>;
}

impl crate::value::convert::FromValue for NaiveTime {
    type Intermediate = ParseIr<NaiveTime>;
}

impl From<NaiveDate> for Value {
    fn from(x: NaiveDate) -> Value {
        if 1000 > x.year() || x.year() > 9999 {
            panic!("Year `{}` not in supported range 1000..=9999", x.year())
        }
        Value::Date(x.year() as u16, x.month() as u8, x.day() as u8, 0, 0, 0, 0)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(x: NaiveDateTime) -> Value {
        if 1000 > x.year() || x.year() > 9999 {
            panic!("Year `{}` not in supported range 1000..=9999", x.year())
        }
        Value::Date(
            x.year() as u16,
            x.month() as u8,
            x.day() as u8,
            x.hour() as u8,
            x.minute() as u8,
            x.second() as u8,
            x.and_utc().timestamp_subsec_micros(),
        )
    }
}

impl From<NaiveTime> for Value {
    fn from(x: NaiveTime) -> Value {
        Value::Time(
            false,
            0,
            x.hour() as u8,
            x.minute() as u8,
            x.second() as u8,
            x.nanosecond() / 1_000,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::convert::{from_value, from_value_opt};

    #[test]
    fn should_convert_binary_temporals() {
        assert_eq!(
            from_value::<NaiveDate>(Value::Date(2024, 2, 29, 0, 0, 0, 0)),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(
            from_value::<NaiveDateTime>(Value::Date(2024, 2, 29, 12, 30, 15, 123_456)),
            NaiveDate::from_ymd_opt(2024, 2, 29)
                .unwrap()
                .and_hms_micro_opt(12, 30, 15, 123_456)
                .unwrap()
        );
    }

    #[test]
    fn should_convert_textual_temporals() {
        assert_eq!(
            from_value::<NaiveDate>(Value::Bytes(b"2024-02-29".to_vec())),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(
            from_value::<NaiveDateTime>(Value::Bytes(b"2024-02-29 12:30:15.5".to_vec())),
            NaiveDate::from_ymd_opt(2024, 2, 29)
                .unwrap()
                .and_hms_micro_opt(12, 30, 15, 500_000)
                .unwrap()
        );
        assert_eq!(
            from_value::<NaiveTime>(Value::Bytes(b"12:30:15".to_vec())),
            NaiveTime::from_hms_opt(12, 30, 15).unwrap()
        );
    }

    #[test]
    fn interval_hours_should_wrap_on_the_24h_ring() {
        assert_eq!(
            from_value::<NaiveTime>(Value::Time(false, 1, 2, 0, 0, 0)),
            NaiveTime::from_hms_opt(2, 0, 0).unwrap()
        );
        assert_eq!(
            from_value::<NaiveTime>(Value::Bytes(b"026:30:00".to_vec())),
            NaiveTime::from_hms_opt(2, 30, 0).unwrap()
        );
        // negative intervals wrap backwards
        assert_eq!(
            from_value::<NaiveTime>(Value::Time(true, 0, 1, 0, 0, 0)),
            NaiveTime::from_hms_opt(23, 0, 0).unwrap()
        );
    }

    #[test]
    fn zero_dates_should_not_convert() {
        assert!(from_value_opt::<NaiveDate>(Value::Date(0, 0, 0, 0, 0, 0, 0)).is_err());
        assert!(from_value_opt::<NaiveDateTime>(Value::Date(2024, 0, 1, 0, 0, 0, 0)).is_err());
    }

    #[test]
    fn temporal_round_trip() {
        let datetime = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(23, 59, 59, 999_999)
            .unwrap();
        assert_eq!(from_value::<NaiveDateTime>(Value::from(datetime)), datetime);

        let time = NaiveTime::from_hms_micro_opt(1, 2, 3, 4).unwrap();
        assert_eq!(from_value::<NaiveTime>(Value::from(time)), time);
    }
}
