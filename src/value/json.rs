// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! `JSON` column support.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;

use std::str::from_utf8;

use crate::value::convert::{ConvIr, FromValue, FromValueError, ParseIr};
use crate::value::Value;

/// Use it to parse `T: DeserializeOwned` from the `JSON` column.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Deserialized<T>(pub T);

/// Use it to pass `T: Serialize` as a `JSON` parameter.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Serialized<T>(pub T);

impl<T: Serialize> From<Serialized<T>> for Value {
    fn from(x: Serialized<T>) -> Value {
        Value::Bytes(serde_json::to_string(&x.0).expect("serialization error").into_bytes())
    }
}

/// Intermediate result of a Value-to-Deserialized conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct DeserializedIr<T> {
    bytes: Vec<u8>,
    output: Deserialized<T>,
}

impl<T: DeserializeOwned> ConvIr<Deserialized<T>> for DeserializedIr<T> {
    fn new(v: Value) -> Result<DeserializedIr<T>, FromValueError> {
        let bytes = match v {
            Value::Bytes(bytes) => bytes,
            v => return Err(FromValueError(v)),
        };

        let output = match from_utf8(&bytes)
            .ok()
            .and_then(|x| serde_json::from_str::<T>(x).ok())
        {
            Some(output) => output,
            None => return Err(FromValueError(Value::Bytes(bytes))),
        };

        Ok(DeserializedIr {
            bytes,
            output: Deserialized(output),
        })
    }

    fn commit(self) -> Deserialized<T> {
        self.output
    }

    fn rollback(self) -> Value {
        Value::Bytes(self.bytes)
    }
}

impl<T: DeserializeOwned> FromValue for Deserialized<T> {
    type Intermediate = DeserializedIr<T>;
}

impl ConvIr<Json> for ParseIr<Json> {
    fn new(v: Value) -> Result<ParseIr<Json>, FromValueError> {
        match v {
            Value::Bytes(bytes) => {
                let json = from_utf8(&bytes)
                    .ok()
                    .and_then(|s| serde_json::from_str::<Json>(s).ok());
                match json {
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
    fn commit(self) -> Json {
        self.output
    }
    fn rollback(self) -> Value {
        self.value
    }
}

impl FromValue for Json {
    type Intermediate = ParseIr<Json>;
}

impl From<Json> for Value {
    fn from(x: Json) -> Value {
        Value::Bytes(x.to_string().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::convert::{from_value, from_value_opt};

    #[test]
    fn should_round_trip_json_values() {
        let json: Json = serde_json::from_str(r#"{"foo":"bar","baz":42}"#).unwrap();
        assert_eq!(from_value::<Json>(Value::from(json.clone())), json);
    }

    #[test]
    fn should_deserialize_typed_json() {
        let Deserialized(x) =
            from_value::<Deserialized<Vec<u32>>>(Value::Bytes(b"[1,2,3]".to_vec()));
        assert_eq!(x, vec![1, 2, 3]);
        assert!(from_value_opt::<Deserialized<Vec<u32>>>(Value::Bytes(b"oops".to_vec())).is_err());
    }
}
