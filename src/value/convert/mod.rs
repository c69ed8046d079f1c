// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Conversions between `Value` and application types.
//!
//! The conversion registry has a fast path (the concrete `FromValue` /
//! `ToValue` impl for the requested type) and a fallback (textual `Bytes`
//! parsing), so numeric decoders accept any numeric MySql type and
//! widen/narrow as requested, and enum/set columns decode through their
//! bytes representation.

use lexical::parse;
use num_traits::FromPrimitive;
use regex::bytes::Regex;

use std::{any::type_name, error::Error, fmt, str::from_utf8, time::Duration};

use crate::value::Value;

mod bigint;
mod chrono;
mod decimal;

lazy_static::lazy_static! {
    pub(crate) static ref DATETIME_RE_YMD: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    pub(crate) static ref DATETIME_RE_YMD_HMS: Regex =
        Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}$").unwrap();
    pub(crate) static ref DATETIME_RE_YMD_HMS_NS: Regex =
        Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{1,6}$").unwrap();
    pub(crate) static ref TIME_RE_HH_MM_SS: Regex = Regex::new(r"^\d{2}:[0-5]\d:[0-5]\d$").unwrap();
    pub(crate) static ref TIME_RE_HH_MM_SS_MS: Regex =
        Regex::new(r"^\d{2}:[0-5]\d:[0-5]\d\.\d{1,6}$").unwrap();
    pub(crate) static ref TIME_RE_HHH_MM_SS: Regex =
        Regex::new(r"^[0-8]\d\d:[0-5]\d:[0-5]\d$").unwrap();
    pub(crate) static ref TIME_RE_HHH_MM_SS_MS: Regex =
        Regex::new(r"^[0-8]\d\d:[0-5]\d:[0-5]\d\.\d{1,6}$").unwrap();
}

/// Parses a `.fraction` suffix (1 to 6 digits) into microseconds.
pub(crate) fn parse_micros(micros_bytes: &[u8]) -> u32 {
    let mut micros = parse::<u32, _>(micros_bytes).unwrap_or(0);

    let mut pad_zero_cnt = 0;
    for b in micros_bytes.iter() {
        if *b == b'0' {
            pad_zero_cnt += 1;
        } else {
            break;
        }
    }

    for _ in 0..(6 - pad_zero_cnt - (micros_bytes.len() - pad_zero_cnt)) {
        micros *= 10;
    }
    micros
}

/// `FromValue` conversion error.
#[derive(Debug, Clone, PartialEq)]
pub struct FromValueError(pub Value);

impl fmt::Display for FromValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Couldn't convert the value `{:?}` to a desired type",
            self.0
        )
    }
}

impl Error for FromValueError {}

/// Basic operations on `FromValue` conversion intermediate result.
///
/// See [`FromValue`].
pub trait ConvIr<T>: Sized {
    fn new(v: Value) -> Result<Self, FromValueError>;
    fn commit(self) -> T;
    fn rollback(self) -> Value;
}

/// Implement this trait to convert a value to some type.
///
/// `FromRow` requires the ability to cheaply roll back a `FromValue`
/// conversion, provided via the `Intermediate` associated type.
pub trait FromValue: Sized {
    type Intermediate: ConvIr<Self>;

    /// Will panic if could not convert `v` to `Self`.
    fn from_value(v: Value) -> Self {
        match Self::from_value_opt(v) {
            Ok(this) => this,
            Err(_) => panic!("Could not retrieve {} from Value", type_name::<Self>()),
        }
    }

    /// Will return `Err(FromValueError(v))` if could not convert `v` to `Self`.
    fn from_value_opt(v: Value) -> Result<Self, FromValueError> {
        let ir = Self::Intermediate::new(v)?;
        Ok(ir.commit())
    }

    /// Will return `Err(FromValueError(v))` if `v` is not convertible to `Self`.
    fn get_intermediate(v: Value) -> Result<Self::Intermediate, FromValueError> {
        Self::Intermediate::new(v)
    }
}

/// Will panic if could not convert `v` to `T`.
#[inline]
pub fn from_value<T: FromValue>(v: Value) -> T {
    FromValue::from_value(v)
}

/// Will return `Err(FromValueError(v))` if could not convert `v` to `T`.
#[inline]
pub fn from_value_opt<T: FromValue>(v: Value) -> Result<T, FromValueError> {
    FromValue::from_value_opt(v)
}

/// Intermediate result of a Value-to-T conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseIr<T> {
    pub(crate) value: Value,
    pub(crate) output: T,
}

macro_rules! impl_from_value {
    ($ty:ty, $ir:ty) => {
        impl FromValue for $ty {
            type Intermediate = $ir;
        }
    };
}

macro_rules! impl_from_value_num {
    ($t:ident) => {
        impl ConvIr<$t> for ParseIr<$t> {
            fn new(v: Value) -> Result<ParseIr<$t>, FromValueError> {
                match v {
                    Value::Int(x) => {
                        if let Some(output) = $t::from_i64(x) {
                            Ok(ParseIr {
                                value: Value::Int(x),
                                output,
                            })
                        } else {
                            Err(FromValueError(Value::Int(x)))
                        }
                    }
                    Value::UInt(x) => {
                        if let Some(output) = $t::from_u64(x) {
                            Ok(ParseIr {
                                value: Value::UInt(x),
                                output,
                            })
                        } else {
                            Err(FromValueError(Value::UInt(x)))
                        }
                    }
                    Value::Bytes(bytes) => match parse(&*bytes) {
                        Ok(x) => Ok(ParseIr {
                            value: Value::Bytes(bytes),
                            output: x,
                        }),
                        _ => Err(FromValueError(Value::Bytes(bytes))),
                    },
                    v => Err(FromValueError(v)),
                }
            }
            fn commit(self) -> $t {
                self.output
            }
            fn rollback(self) -> Value {
                self.value
            }
        }

        impl_from_value!($t, ParseIr<$t>);
    };
}

impl_from_value_num!(i8);
impl_from_value_num!(u8);
impl_from_value_num!(i16);
impl_from_value_num!(u16);
impl_from_value_num!(i32);
impl_from_value_num!(u32);
impl_from_value_num!(isize);
impl_from_value_num!(usize);
impl_from_value_num!(i128);
impl_from_value_num!(u128);

impl ConvIr<i64> for ParseIr<i64> {
    fn new(v: Value) -> Result<ParseIr<i64>, FromValueError> {
        match v {
            Value::Int(x) => Ok(ParseIr {
                value: Value::Int(x),
                output: x,
            }),
            Value::UInt(x) if x <= i64::MAX as u64 => Ok(ParseIr {
                value: Value::UInt(x),
                output: x as i64,
            }),
            Value::Bytes(bytes) => match parse(&*bytes) {
                Ok(x) => Ok(ParseIr {
                    value: Value::Bytes(bytes),
                    output: x,
                }),
                _ => Err(FromValueError(Value::Bytes(bytes))),
            },
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> i64 {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl ConvIr<u64> for ParseIr<u64> {
    fn new(v: Value) -> Result<ParseIr<u64>, FromValueError> {
        match v {
            Value::Int(x) if x >= 0 => Ok(ParseIr {
                value: Value::Int(x),
                output: x as u64,
            }),
            Value::UInt(x) => Ok(ParseIr {
                value: Value::UInt(x),
                output: x,
            }),
            Value::Bytes(bytes) => match parse(&*bytes) {
                Ok(x) => Ok(ParseIr {
                    value: Value::Bytes(bytes),
                    output: x,
                }),
                _ => Err(FromValueError(Value::Bytes(bytes))),
            },
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> u64 {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl_from_value!(i64, ParseIr<i64>);
impl_from_value!(u64, ParseIr<u64>);

impl ConvIr<f32> for ParseIr<f32> {
    fn new(v: Value) -> Result<ParseIr<f32>, FromValueError> {
        match v {
            Value::Float(x) => Ok(ParseIr {
                value: Value::Float(x),
                output: x,
            }),
            // Doubles are not converted to f32 to avoid precision loss.
            Value::Bytes(bytes) => match parse(&*bytes) {
                Ok(x) => Ok(ParseIr {
                    value: Value::Bytes(bytes),
                    output: x,
                }),
                _ => Err(FromValueError(Value::Bytes(bytes))),
            },
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> f32 {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl ConvIr<f64> for ParseIr<f64> {
    fn new(v: Value) -> Result<ParseIr<f64>, FromValueError> {
        match v {
            Value::Double(x) => Ok(ParseIr {
                value: Value::Double(x),
                output: x,
            }),
            Value::Float(x) => Ok(ParseIr {
                value: Value::Float(x),
                output: x.into(),
            }),
            Value::Bytes(bytes) => match parse(&*bytes) {
                Ok(x) => Ok(ParseIr {
                    value: Value::Bytes(bytes),
                    output: x,
                }),
                _ => Err(FromValueError(Value::Bytes(bytes))),
            },
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> f64 {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl_from_value!(f32, ParseIr<f32>);
impl_from_value!(f64, ParseIr<f64>);

impl ConvIr<bool> for ParseIr<bool> {
    fn new(v: Value) -> Result<ParseIr<bool>, FromValueError> {
        match v {
            Value::Int(0) => Ok(ParseIr {
                value: Value::Int(0),
                output: false,
            }),
            Value::Int(1) => Ok(ParseIr {
                value: Value::Int(1),
                output: true,
            }),
            Value::Bytes(bytes) => {
                if bytes.len() == 1 {
                    match bytes[0] {
                        0x30 => Ok(ParseIr {
                            value: Value::Bytes(bytes),
                            output: false,
                        }),
                        0x31 => Ok(ParseIr {
                            value: Value::Bytes(bytes),
                            output: true,
                        }),
                        _ => Err(FromValueError(Value::Bytes(bytes))),
                    }
                } else {
                    Err(FromValueError(Value::Bytes(bytes)))
                }
            }
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> bool {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl_from_value!(bool, ParseIr<bool>);

/// Intermediate result of a Value-to-Vec<u8> conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct BytesIr {
    bytes: Vec<u8>,
}

impl ConvIr<Vec<u8>> for BytesIr {
    fn new(v: Value) -> Result<BytesIr, FromValueError> {
        match v {
            Value::Bytes(bytes) => Ok(BytesIr { bytes }),
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> Vec<u8> {
        self.bytes
    }
    fn rollback(self) -> Value {
        Value::Bytes(self.bytes)
    }
}

impl_from_value!(Vec<u8>, BytesIr);

/// Intermediate result of a Value-to-String conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct StringIr {
    bytes: Vec<u8>,
}

impl ConvIr<String> for StringIr {
    fn new(v: Value) -> Result<StringIr, FromValueError> {
        match v {
            Value::Bytes(bytes) => match from_utf8(&bytes) {
                Ok(_) => Ok(StringIr { bytes }),
                Err(_) => Err(FromValueError(Value::Bytes(bytes))),
            },
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> String {
        unsafe { String::from_utf8_unchecked(self.bytes) }
    }
    fn rollback(self) -> Value {
        Value::Bytes(self.bytes)
    }
}

impl_from_value!(String, StringIr);

/// Intermediate result of a Value-to-Duration conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationIr {
    value: Value,
    output: Duration,
}

impl ConvIr<Duration> for DurationIr {
    fn new(v: Value) -> Result<DurationIr, FromValueError> {
        match v {
            Value::Time(false, days, hours, minutes, seconds, micros) => {
                let output = Duration::new(
                    u64::from(days) * 86_400
                        + u64::from(hours) * 3_600
                        + u64::from(minutes) * 60
                        + u64::from(seconds),
                    micros * 1_000,
                );
                Ok(DurationIr {
                    value: Value::Time(false, days, hours, minutes, seconds, micros),
                    output,
                })
            }
            Value::Bytes(val_bytes) => {
                let duration = {
                    let mut bytes = &val_bytes[..];
                    if bytes.first() == Some(&b'-') {
                        return Err(FromValueError(Value::Bytes(val_bytes)));
                    }

                    let (hours, minutes, seconds, micros) = if TIME_RE_HHH_MM_SS.is_match(bytes)
                        || TIME_RE_HH_MM_SS.is_match(bytes)
                        || TIME_RE_HHH_MM_SS_MS.is_match(bytes)
                        || TIME_RE_HH_MM_SS_MS.is_match(bytes)
                    {
                        let colon = bytes.iter().position(|b| *b == b':').unwrap();
                        let hours = parse::<u64, _>(&bytes[..colon])
                            .map_err(|_| FromValueError(Value::Bytes(val_bytes.clone())))?;
                        bytes = &bytes[colon + 1..];
                        let minutes = parse::<u64, _>(&bytes[..2])
                            .map_err(|_| FromValueError(Value::Bytes(val_bytes.clone())))?;
                        let seconds = parse::<u64, _>(&bytes[3..5])
                            .map_err(|_| FromValueError(Value::Bytes(val_bytes.clone())))?;
                        let micros = if bytes.len() > 6 {
                            parse_micros(&bytes[6..])
                        } else {
                            0
                        };
                        (hours, minutes, seconds, micros)
                    } else {
                        return Err(FromValueError(Value::Bytes(val_bytes)));
                    };

                    Duration::new(
                        hours * 3_600 + minutes * 60 + seconds,
                        micros * 1_000,
                    )
                };
                Ok(DurationIr {
                    value: Value::Bytes(val_bytes),
                    output: duration,
                })
            }
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> Duration {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl_from_value!(Duration, DurationIr);

/// Intermediate result of a Value-to-Option<T> conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionIr<T> {
    value: Option<Value>,
    ir: Option<T>,
}

impl<T, Ir> ConvIr<Option<T>> for OptionIr<Ir>
where
    T: FromValue<Intermediate = Ir>,
    Ir: ConvIr<T>,
{
    fn new(v: Value) -> Result<OptionIr<Ir>, FromValueError> {
        match v {
            Value::NULL => Ok(OptionIr {
                value: Some(Value::NULL),
                ir: None,
            }),
            v => match T::get_intermediate(v) {
                Ok(ir) => Ok(OptionIr {
                    value: None,
                    ir: Some(ir),
                }),
                Err(err) => Err(err),
            },
        }
    }

    fn commit(self) -> Option<T> {
        self.ir.map(ConvIr::commit)
    }

    fn rollback(self) -> Value {
        let OptionIr { value, ir } = self;
        match value {
            Some(v) => v,
            None => match ir {
                Some(ir) => ir.rollback(),
                None => unreachable!(),
            },
        }
    }
}

impl<T> FromValue for Option<T>
where
    T: FromValue,
{
    type Intermediate = OptionIr<T::Intermediate>;
}

impl ConvIr<Value> for Value {
    fn new(v: Value) -> Result<Self, FromValueError> {
        Ok(v)
    }

    fn commit(self) -> Value {
        self
    }

    fn rollback(self) -> Value {
        self
    }
}

impl FromValue for Value {
    type Intermediate = Value;

    fn from_value(v: Value) -> Value {
        v
    }

    fn from_value_opt(v: Value) -> Result<Value, FromValueError> {
        Ok(v)
    }
}

/// Implement this trait if you want to convert something to `Value`.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

impl<T: Into<Value> + Clone> ToValue for T {
    fn to_value(&self) -> Value {
        self.clone().into()
    }
}

impl<'a, T: ToValue> From<&'a T> for Value {
    fn from(x: &'a T) -> Value {
        x.to_value()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(x: Option<T>) -> Value {
        match x {
            None => Value::NULL,
            Some(x) => x.into(),
        }
    }
}

macro_rules! into_value_impl {
    (signed $t:ty) => {
        impl From<$t> for Value {
            fn from(x: $t) -> Value {
                Value::Int(x as i64)
            }
        }
    };
    (unsigned $t:ty) => {
        impl From<$t> for Value {
            fn from(x: $t) -> Value {
                Value::UInt(x as u64)
            }
        }
    };
}

into_value_impl!(signed i8);
into_value_impl!(signed i16);
into_value_impl!(signed i32);
into_value_impl!(signed i64);
into_value_impl!(signed isize);
into_value_impl!(unsigned u8);
into_value_impl!(unsigned u16);
into_value_impl!(unsigned u32);
into_value_impl!(unsigned u64);
into_value_impl!(unsigned usize);

impl From<i128> for Value {
    fn from(x: i128) -> Value {
        if let Ok(x) = i64::try_from(x) {
            Value::Int(x)
        } else if let Ok(x) = u64::try_from(x) {
            Value::UInt(x)
        } else {
            Value::Bytes(x.to_string().into())
        }
    }
}

impl From<u128> for Value {
    fn from(x: u128) -> Value {
        if let Ok(x) = u64::try_from(x) {
            Value::UInt(x)
        } else {
            Value::Bytes(x.to_string().into())
        }
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Value {
        Value::Float(x)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Value {
        Value::Double(x)
    }
}

impl From<bool> for Value {
    fn from(x: bool) -> Value {
        Value::Int(if x { 1 } else { 0 })
    }
}

impl<'a> From<&'a [u8]> for Value {
    fn from(x: &'a [u8]) -> Value {
        Value::Bytes(x.into())
    }
}

impl From<Vec<u8>> for Value {
    fn from(x: Vec<u8>) -> Value {
        Value::Bytes(x)
    }
}

impl<'a> From<&'a str> for Value {
    fn from(x: &'a str) -> Value {
        let string: String = x.into();
        Value::Bytes(string.into_bytes())
    }
}

impl From<String> for Value {
    fn from(x: String) -> Value {
        Value::Bytes(x.into_bytes())
    }
}

impl From<Duration> for Value {
    fn from(x: Duration) -> Value {
        let mut secs_total = x.as_secs();
        let micros = (f64::from(x.subsec_nanos()) / 1000_f64).round() as u32;
        let seconds = (secs_total % 60) as u8;
        secs_total -= u64::from(seconds);
        let minutes = ((secs_total % (60 * 60)) / 60) as u8;
        secs_total -= u64::from(minutes) * 60;
        let hours = ((secs_total % (60 * 60 * 24)) / (60 * 60)) as u8;
        secs_total -= u64::from(hours) * 60 * 60;
        Value::Time(
            false,
            (secs_total / (60 * 60 * 24)) as u32,
            hours,
            minutes,
            seconds,
            micros,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_numbers_with_widening_and_narrowing() {
        assert_eq!(from_value::<u8>(Value::Int(42)), 42_u8);
        assert_eq!(from_value::<i64>(Value::Int(-1)), -1_i64);
        assert_eq!(from_value::<u64>(Value::UInt(u64::MAX)), u64::MAX);
        assert_eq!(from_value::<i32>(Value::Bytes(b"-123".to_vec())), -123);
        assert_eq!(from_value::<u128>(Value::UInt(42)), 42_u128);

        // narrowing failures roll back
        assert!(from_value_opt::<u8>(Value::Int(300)).is_err());
        assert!(from_value_opt::<u64>(Value::Int(-1)).is_err());
        assert!(from_value_opt::<i64>(Value::UInt(u64::MAX)).is_err());
    }

    #[test]
    fn should_not_convert_double_to_f32() {
        assert!(from_value_opt::<f32>(Value::Double(1.0)).is_err());
        assert_eq!(from_value::<f64>(Value::Float(1.5)), 1.5_f64);
    }

    #[test]
    fn should_convert_strings_and_bytes() {
        assert_eq!(
            from_value::<String>(Value::Bytes(b"hello".to_vec())),
            "hello"
        );
        assert!(from_value_opt::<String>(Value::Bytes(vec![0xff, 0xfe])).is_err());
        assert_eq!(
            from_value::<Vec<u8>>(Value::Bytes(vec![0xff, 0xfe])),
            vec![0xff, 0xfe]
        );
    }

    #[test]
    fn should_convert_options() {
        assert_eq!(from_value::<Option<u8>>(Value::NULL), None);
        assert_eq!(from_value::<Option<u8>>(Value::Int(1)), Some(1));
    }

    #[test]
    fn should_convert_durations() {
        assert_eq!(
            from_value::<Duration>(Value::Time(false, 1, 1, 1, 1, 500_000)),
            Duration::new(86_400 + 3_600 + 60 + 1, 500_000_000)
        );
        assert_eq!(
            from_value::<Duration>(Value::Bytes(b"828:30:00.100".to_vec())),
            Duration::new(828 * 3_600 + 30 * 60, 100_000_000)
        );
        assert!(from_value_opt::<Duration>(Value::Time(true, 0, 1, 0, 0, 0)).is_err());
    }

    #[test]
    fn duration_value_round_trip() {
        let d = Duration::new(2 * 86_400 + 3 * 3_600 + 4 * 60 + 5, 6_000);
        assert_eq!(from_value::<Duration>(Value::from(d)), d);
    }

    #[test]
    fn parse_micros_should_pad() {
        assert_eq!(parse_micros(b"1"), 100_000);
        assert_eq!(parse_micros(b"001"), 1_000);
        assert_eq!(parse_micros(b"123456"), 123_456);
    }
}
