// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::error::Error;
use std::fmt;

use crate::row::{new_row, Row};
use crate::value::convert::{ConvIr, FromValue, FromValueError};
use crate::value::Value;

/// `FromRow` conversion error.
#[derive(Debug, Clone, PartialEq)]
pub struct FromRowError(pub Row);

impl fmt::Display for FromRowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Couldn't convert the row `{:?}` to a desired type",
            self.0
        )
    }
}

impl Error for FromRowError {}

/// Will panic if could not convert `row` to `T`.
#[inline]
pub fn from_row<T: FromRow>(row: Row) -> T {
    FromRow::from_row(row)
}

/// Will return `Err(FromRowError(row))` if could not convert `row` to `T`.
#[inline]
pub fn from_row_opt<T: FromRow>(row: Row) -> Result<T, FromRowError> {
    FromRow::from_row_opt(row)
}

/// Trait to convert `Row` into a tuple of `FromValue` implementors up to
/// arity 8.
pub trait FromRow: Sized {
    fn from_row(row: Row) -> Self {
        match Self::from_row_opt(row) {
            Ok(x) => x,
            Err(FromRowError(row)) => panic!(
                "Couldn't convert {:?} to type {}. (see FromRow documentation)",
                row,
                std::any::type_name::<Self>(),
            ),
        }
    }

    fn from_row_opt(row: Row) -> Result<Self, FromRowError>;
}

impl FromRow for Row {
    fn from_row_opt(row: Row) -> Result<Self, FromRowError> {
        Ok(row)
    }
}

macro_rules! from_row_impl {
    ($count:expr => $($A:ident: $a:ident,)+) => {
        impl<$($A: FromValue),+> FromRow for ($($A,)+) {
            fn from_row_opt(row: Row) -> Result<($($A,)+), FromRowError> {
                if row.len() != $count {
                    return Err(FromRowError(row));
                }
                let columns = row.columns();
                let values = row.unwrap();
                let mut values_iter = values.into_iter();

                $(let mut $a: Option<$A::Intermediate> = None;)+
                let mut failed: Option<Value> = None;

                'conversion: {
                    $(
                        match $A::get_intermediate(
                            values_iter.next().expect("length checked above"),
                        ) {
                            Ok(ir) => $a = Some(ir),
                            Err(FromValueError(value)) => {
                                failed = Some(value);
                                break 'conversion;
                            }
                        }
                    )+
                }

                if let Some(value) = failed {
                    let mut rolled_back = Vec::with_capacity($count);
                    $(
                        if let Some(ir) = $a.take() {
                            rolled_back.push(ir.rollback());
                        }
                    )+
                    rolled_back.push(value);
                    rolled_back.extend(values_iter);
                    return Err(FromRowError(new_row(rolled_back, columns)));
                }

                Ok(($($a.take().expect("checked above").commit(),)+))
            }
        }
    };
}

impl<T, Ir> FromRow for T
where
    Ir: ConvIr<T>,
    T: FromValue<Intermediate = Ir>,
{
    fn from_row_opt(mut row: Row) -> Result<T, FromRowError> {
        if row.len() == 1 {
            match row.take_opt::<T, _>(0) {
                Some(Ok(x)) => Ok(x),
                Some(Err(_)) | None => Err(FromRowError(row)),
            }
        } else {
            Err(FromRowError(row))
        }
    }
}

from_row_impl!(1 => A: a,);
from_row_impl!(2 => A: a, B: b,);
from_row_impl!(3 => A: a, B: b, C: c,);
from_row_impl!(4 => A: a, B: b, C: c, D: d,);
from_row_impl!(5 => A: a, B: b, C: c, D: d, E: e,);
from_row_impl!(6 => A: a, B: b, C: c, D: d, E: e, F: f,);
from_row_impl!(7 => A: a, B: b, C: c, D: d, E: e, F: f, G: g,);
from_row_impl!(8 => A: a, B: b, C: c, D: d, E: e, F: f, G: g, H: h,);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ColumnFlags, ColumnType};
    use crate::packets::Column;
    use std::sync::Arc;

    fn row_of(values: Vec<Value>) -> Row {
        let columns: Arc<[Column]> = values
            .iter()
            .enumerate()
            .map(|(i, _)| {
                Column::synthesize(
                    &format!("col{}", i),
                    ColumnType::MYSQL_TYPE_VAR_STRING,
                    ColumnFlags::empty(),
                )
            })
            .collect::<Vec<_>>()
            .into();
        new_row(values, columns)
    }

    #[test]
    fn should_convert_tuples() {
        let row = row_of(vec![
            Value::Int(1),
            Value::Bytes(b"foo".to_vec()),
            Value::NULL,
        ]);
        let (a, b, c): (u8, String, Option<u8>) = from_row(row);
        assert_eq!((a, b, c), (1, "foo".into(), None));
    }

    #[test]
    fn should_convert_single_value_rows() {
        let row = row_of(vec![Value::Bytes(b"42".to_vec())]);
        assert_eq!(from_row::<u8>(row), 42);
    }

    #[test]
    fn arity_mismatch_should_return_row() {
        let row = row_of(vec![Value::Int(1)]);
        let err = from_row_opt::<(u8, u8)>(row).unwrap_err();
        assert_eq!(err.0.len(), 1);
    }

    #[test]
    fn failed_conversion_should_return_original_row() {
        let row = row_of(vec![Value::Int(1), Value::Bytes(vec![0xff])]);
        let err = from_row_opt::<(u8, String)>(row).unwrap_err();
        assert_eq!(err.0.as_ref(0), Some(&Value::Int(1)));
        assert_eq!(err.0.as_ref(1), Some(&Value::Bytes(vec![0xff])));
    }
}
