// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Wide integer conversions.
//!
//! `BIGINT UNSIGNED` values outside of the `i64` range stay exact here:
//! `Value::UInt` carries the raw `u64` and `BigUint`/`BigInt` reinterpret it
//! as unsigned.

use num_bigint::{BigInt, BigUint};
use num_traits::{FromPrimitive, ToPrimitive};

use super::{ConvIr, FromValue, FromValueError, ParseIr};
use crate::value::Value;

impl ConvIr<BigInt> for ParseIr<BigInt> {
    fn new(v: Value) -> Result<ParseIr<BigInt>, FromValueError> {
        match v {
            Value::Int(x) => Ok(ParseIr {
                output: BigInt::from_i64(x).expect("infallible"),
                value: Value::Int(x),
            }),
            Value::UInt(x) => Ok(ParseIr {
                output: BigInt::from_u64(x).expect("infallible"),
                value: Value::UInt(x),
            }),
            Value::Bytes(bytes) => match BigInt::parse_bytes(&bytes, 10) {
                Some(output) => Ok(ParseIr {
                    output,
                    value: Value::Bytes(bytes),
                }),
                None => Err(FromValueError(Value::Bytes(bytes))),
            },
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> BigInt {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl FromValue for BigInt {
    type Intermediate = ParseIr<BigInt>;
}

impl ConvIr<BigUint> for ParseIr<BigUint> {
    fn new(v: Value) -> Result<ParseIr<BigUint>, FromValueError> {
        match v {
            Value::Int(x) if x >= 0 => Ok(ParseIr {
                output: BigUint::from_i64(x).expect("non-negative"),
                value: Value::Int(x),
            }),
            Value::UInt(x) => Ok(ParseIr {
                output: BigUint::from_u64(x).expect("infallible"),
                value: Value::UInt(x),
            }),
            Value::Bytes(bytes) => match BigUint::parse_bytes(&bytes, 10) {
                Some(output) => Ok(ParseIr {
                    output,
                    value: Value::Bytes(bytes),
                }),
                None => Err(FromValueError(Value::Bytes(bytes))),
            },
            v => Err(FromValueError(v)),
        }
    }
    fn commit(self) -> BigUint {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl FromValue for BigUint {
    type Intermediate = ParseIr<BigUint>;
}

impl From<BigInt> for Value {
    fn from(x: BigInt) -> Value {
        if let Some(x) = x.to_i64() {
            Value::Int(x)
        } else if let Some(x) = x.to_u64() {
            Value::UInt(x)
        } else {
            Value::Bytes(x.to_string().into())
        }
    }
}

impl From<BigUint> for Value {
    fn from(x: BigUint) -> Value {
        if let Some(x) = x.to_u64() {
            Value::UInt(x)
        } else {
            Value::Bytes(x.to_string().into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::convert::from_value;

    #[test]
    fn out_of_range_unsigned_bigint_stays_unsigned() {
        let raw = u64::MAX;
        let big = from_value::<BigUint>(Value::UInt(raw));
        assert_eq!(big, BigUint::from_u64(raw).unwrap());
        assert_eq!(Value::from(big), Value::UInt(raw));
    }

    #[test]
    fn oversized_decimal_strings_round_trip() {
        let huge = b"340282366920938463463374607431768211455".to_vec();
        let big = from_value::<BigUint>(Value::Bytes(huge.clone()));
        assert_eq!(Value::from(big), Value::Bytes(huge));
    }
}
