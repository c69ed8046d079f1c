// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use crate::packets::Column;
use crate::value::convert::{ConvIr, FromValue, FromValueError};
use crate::value::Value;

pub mod convert;

/// Client side representation of a MySql row.
///
/// It allows you to move column values out of a row with `Row::take` method
/// but note that it makes the row incomplete. Calls to `from_row_opt` on
/// incomplete row will return `Err(FromRowError(..))`.
#[derive(Clone, PartialEq)]
pub struct Row {
    values: Vec<Option<Value>>,
    columns: Arc<[Column]>,
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Row");
        for (val, column) in self.values.iter().zip(self.columns.iter()) {
            match *val {
                Some(ref val) => {
                    debug.field(column.name_str().as_ref(), val);
                }
                None => {
                    debug.field(column.name_str().as_ref(), &"<taken>");
                }
            }
        }
        debug.finish()
    }
}

/// Creates `Row` from values and columns.
pub fn new_row(values: Vec<Value>, columns: Arc<[Column]>) -> Row {
    assert_eq!(values.len(), columns.len());
    Row {
        values: values.into_iter().map(Some).collect(),
        columns,
    }
}

impl Row {
    /// Returns length of a row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has a length of 0.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns columns of this row.
    pub fn columns_ref(&self) -> &[Column] {
        &self.columns
    }

    /// Returns columns of this row.
    pub fn columns(&self) -> Arc<[Column]> {
        self.columns.clone()
    }

    /// Returns reference to the value of a column with index `index` if it
    /// exists and wasn't taken by `Row::take` method.
    pub fn as_ref(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(|x| x.as_ref())
    }

    /// Will copy value at index `index` if it was not taken by `Row::take`
    /// earlier, then will convert it to `T`.
    pub fn get<T, I>(&self, index: I) -> Option<T>
    where
        T: FromValue,
        I: ColumnIndex,
    {
        index.idx(&self.columns).and_then(|idx| {
            self.values
                .get(idx)
                .and_then(|x| x.as_ref())
                .map(|x| crate::value::convert::from_value::<T>(x.clone()))
        })
    }

    /// Will copy value at index `index` if it was not taken by `Row::take`
    /// earlier, then will attempt convert it to `T`.
    pub fn get_opt<T, I>(&self, index: I) -> Option<Result<T, FromValueError>>
    where
        T: FromValue,
        I: ColumnIndex,
    {
        index
            .idx(&self.columns)
            .and_then(|idx| self.values.get(idx))
            .and_then(|x| x.as_ref())
            .map(|x| crate::value::convert::from_value_opt::<T>(x.clone()))
    }

    /// Will take value of a column with index `index` if it exists and
    /// wasn't taken earlier, then will convert it to `T`.
    pub fn take<T, I>(&mut self, index: I) -> Option<T>
    where
        T: FromValue,
        I: ColumnIndex,
    {
        index.idx(&self.columns).and_then(|idx| {
            self.values
                .get_mut(idx)
                .and_then(|x| x.take())
                .map(crate::value::convert::from_value::<T>)
        })
    }

    /// Will take value of a column with index `index` if it exists and
    /// wasn't taken earlier, then will attempt convert it to `T`.
    ///
    /// On a conversion error the value is returned to the row.
    pub fn take_opt<T, I>(&mut self, index: I) -> Option<Result<T, FromValueError>>
    where
        T: FromValue,
        I: ColumnIndex,
    {
        let idx = index.idx(&self.columns)?;
        let value = self.values.get_mut(idx)?.take()?;
        match T::get_intermediate(value) {
            Ok(ir) => Some(Ok(ir.commit())),
            Err(FromValueError(value)) => {
                self.values[idx] = Some(value.clone());
                Some(Err(FromValueError(value)))
            }
        }
    }

    /// Unwraps values of a row.
    ///
    /// # Panics
    ///
    /// Panics if any of the values was taken by a take method.
    pub fn unwrap(self) -> Vec<Value> {
        self.values
            .into_iter()
            .map(|x| x.expect("Can't unwrap row if some of its values is taken"))
            .collect()
    }

    #[doc(hidden)]
    pub fn place(&mut self, index: usize, value: Value) {
        self.values[index] = Some(value);
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        self.values[index].as_ref().unwrap()
    }
}

impl<'a> Index<&'a str> for Row {
    type Output = Value;

    fn index<'r>(&'r self, index: &'a str) -> &'r Value {
        for (i, column) in self.columns.iter().enumerate() {
            if column.name_ref() == index.as_bytes() {
                return self.values[i].as_ref().unwrap();
            }
        }
        panic!("No such column: `{}` in row {:?}", index, self);
    }
}

/// Things that may be used as an index of a row column.
pub trait ColumnIndex {
    fn idx(&self, columns: &[Column]) -> Option<usize>;
}

impl ColumnIndex for usize {
    fn idx(&self, columns: &[Column]) -> Option<usize> {
        if *self >= columns.len() {
            None
        } else {
            Some(*self)
        }
    }
}

impl<'a> ColumnIndex for &'a str {
    fn idx(&self, columns: &[Column]) -> Option<usize> {
        for (i, c) in columns.iter().enumerate() {
            if c.name_ref() == self.as_bytes() {
                return Some(i);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ColumnFlags, ColumnType};

    fn columns(names: &[&str]) -> Arc<[Column]> {
        names
            .iter()
            .map(|name| {
                Column::synthesize(name, ColumnType::MYSQL_TYPE_LONGLONG, ColumnFlags::empty())
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn should_index_by_name_and_position() {
        let row = new_row(vec![Value::Int(1), Value::Int(2)], columns(&["a", "b"]));
        assert_eq!(row[0], Value::Int(1));
        assert_eq!(row["b"], Value::Int(2));
        assert_eq!(row.get::<i64, _>("a"), Some(1));
        assert_eq!(row.get::<i64, _>(5), None);
    }

    #[test]
    fn take_should_leave_a_hole() {
        let mut row = new_row(vec![Value::Int(1)], columns(&["a"]));
        assert_eq!(row.take::<i64, _>(0), Some(1));
        assert_eq!(row.take::<i64, _>(0), None);
    }

    #[test]
    fn take_opt_should_return_value_on_conversion_error() {
        let mut row = new_row(vec![Value::Bytes(vec![0xff])], columns(&["a"]));
        assert!(matches!(row.take_opt::<String, _>(0), Some(Err(_))));
        // the value is back in the row
        assert_eq!(row.as_ref(0), Some(&Value::Bytes(vec![0xff])));
    }
}
