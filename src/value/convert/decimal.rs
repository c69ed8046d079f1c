// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! `DECIMAL`/`NEWDECIMAL` conversions via `rust_decimal`.

use rust_decimal::Decimal;

use std::str::{from_utf8, FromStr};

use super::{ConvIr, FromValue, FromValueError, ParseIr};
use crate::value::Value;

impl ConvIr<Decimal> for ParseIr<Decimal> {
    fn new(v: Value) -> Result<ParseIr<Decimal>, FromValueError> {
        match v {
            Value::Int(x) => Ok(ParseIr {
                output: Decimal::from(x),
                value: Value::Int(x),
            }),
            Value::UInt(x) => Ok(ParseIr {
                output: Decimal::from(x),
                value: Value::UInt(x),
            }),
            Value::Bytes(bytes) => {
                let decimal = from_utf8(&bytes).ok().and_then(|s| Decimal::from_str(s).ok());
                match decimal {
                    Some(output) => Ok(ParseIr {
                        output,
                        value: Value::Bytes(bytes),
                    }),
                    None => Err(FromValueError(Value::Bytes(bytes))),
                }
            }
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> Decimal {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl FromValue for Decimal {
    type Intermediate = ParseIr<Decimal>;
}

impl From<Decimal> for Value {
    fn from(x: Decimal) -> Value {
        Value::Bytes(x.to_string().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::convert::{from_value, from_value_opt};

    #[test]
    fn should_parse_wire_decimals() {
        assert_eq!(
            from_value::<Decimal>(Value::Bytes(b"12.3456789".to_vec())),
            Decimal::from_str("12.3456789").unwrap()
        );
        assert_eq!(
            from_value::<Decimal>(Value::Int(-42)),
            Decimal::from(-42_i64)
        );
        assert!(from_value_opt::<Decimal>(Value::Bytes(b"not a number".to_vec())).is_err());
    }

    #[test]
    fn decimal_round_trip() {
        let decimal = Decimal::from_str("-0.010").unwrap();
        assert_eq!(from_value::<Decimal>(Value::from(decimal)), decimal);
    }
}
