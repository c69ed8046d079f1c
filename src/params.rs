// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use smallvec::SmallVec;
use twox_hash::XxHash64;

use std::collections::hash_map::Entry::Occupied;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use crate::error::DriverError;
use crate::value::convert::ToValue;
use crate::value::Value;

/// Representations of parameters of a prepared statement.
#[derive(PartialEq, Clone, Debug)]
pub enum Params {
    Empty,
    Named(HashMap<String, Value, BuildHasherDefault<XxHash64>>),
    Positional(SmallVec<[Value; 12]>),
}

impl Params {
    /// Will convert named parameters into positional assuming order passed in
    /// `named_params` attribute.
    pub fn into_positional(self, named_params: &[String]) -> Result<Params, DriverError> {
        match self {
            Params::Named(mut map) => {
                let mut params: SmallVec<[Value; 12]> = SmallVec::new();
                'params: for (i, name) in named_params.iter().enumerate() {
                    match map.entry(name.clone()) {
                        Occupied(entry) => {
                            let mut x = named_params.len() - 1;
                            while x > i {
                                if *name == named_params[x] {
                                    params.push(entry.get().clone());
                                    continue 'params;
                                }
                                x -= 1;
                            }
                            params.push(entry.remove());
                        }
                        _ => {
                            return Err(DriverError::MissingNamedParameter { name: name.clone() })
                        }
                    }
                }
                Ok(Params::Positional(params))
            }
            params => Ok(params),
        }
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        match self {
            Params::Empty => 0,
            Params::Named(map) => map.len(),
            Params::Positional(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a, T: Into<Params> + Clone> From<&'a T> for Params {
    fn from(x: &'a T) -> Params {
        x.clone().into()
    }
}

impl<T> From<Vec<T>> for Params
where
    Value: From<T>,
{
    fn from(x: Vec<T>) -> Params {
        let mut raw_params: SmallVec<[Value; 12]> = SmallVec::new();
        for v in x.into_iter() {
            raw_params.push(Value::from(v));
        }
        if raw_params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(raw_params)
        }
    }
}

impl<N, V> From<Vec<(N, V)>> for Params
where
    String: From<N>,
    Value: From<V>,
{
    fn from(x: Vec<(N, V)>) -> Params {
        let mut map = HashMap::default();
        for (name, value) in x.into_iter() {
            let name = String::from(name);
            if map.contains_key(&name) {
                panic!("Redefinition of named parameter `{}'", name);
            } else {
                map.insert(name, Value::from(value));
            }
        }
        Params::Named(map)
    }
}

impl<'a> From<&'a [&'a dyn ToValue]> for Params {
    fn from(x: &'a [&'a dyn ToValue]) -> Params {
        let mut raw_params: SmallVec<[Value; 12]> = SmallVec::new();
        for v in x.iter() {
            raw_params.push(v.to_value());
        }
        if raw_params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(raw_params)
        }
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Params {
        Params::Empty
    }
}

macro_rules! into_params_impl {
    ($([$A:ident,$a:ident]),*) => (
        impl<$($A: Into<Value>,)*> From<($($A,)*)> for Params {
            fn from(x: ($($A,)*)) -> Params {
                let ($($a,)*) = x;
                let mut params = SmallVec::<[Value; 12]>::new();
                $(params.push($a.into());)*
                Params::Positional(params)
            }
        }
    );
}

into_params_impl!([A, a]);
into_params_impl!([A, a], [B, b]);
into_params_impl!([A, a], [B, b], [C, c]);
into_params_impl!([A, a], [B, b], [C, c], [D, d]);
into_params_impl!([A, a], [B, b], [C, c], [D, d], [E, e]);
into_params_impl!([A, a], [B, b], [C, c], [D, d], [E, e], [F, f]);
into_params_impl!([A, a], [B, b], [C, c], [D, d], [E, e], [F, f], [G, g]);
into_params_impl!(
    [A, a],
    [B, b],
    [C, c],
    [D, d],
    [E, e],
    [F, f],
    [G, g],
    [H, h]
);
into_params_impl!(
    [A, a],
    [B, b],
    [C, c],
    [D, d],
    [E, e],
    [F, f],
    [G, g],
    [H, h],
    [I, i]
);
into_params_impl!(
    [A, a],
    [B, b],
    [C, c],
    [D, d],
    [E, e],
    [F, f],
    [G, g],
    [H, h],
    [I, i],
    [J, j]
);
into_params_impl!(
    [A, a],
    [B, b],
    [C, c],
    [D, d],
    [E, e],
    [F, f],
    [G, g],
    [H, h],
    [I, i],
    [J, j],
    [K, k]
);
into_params_impl!(
    [A, a],
    [B, b],
    [C, c],
    [D, d],
    [E, e],
    [F, f],
    [G, g],
    [H, h],
    [I, i],
    [J, j],
    [K, k],
    [L, l]
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_tuples_and_vectors() {
        assert_eq!(Params::from(()), Params::Empty);
        match Params::from((42, "foo")) {
            Params::Positional(values) => {
                assert_eq!(
                    &values[..],
                    &[Value::Int(42), Value::Bytes(b"foo".to_vec())]
                );
            }
            other => panic!("unexpected params: {:?}", other),
        }
        assert_eq!(Params::from(Vec::<u8>::new()), Params::Empty);
    }

    #[test]
    fn should_order_named_params() {
        let params = Params::from(vec![("a", 1), ("b", 2)]);
        let positional = params
            .into_positional(&["a".into(), "b".into(), "a".into()])
            .unwrap();
        match positional {
            Params::Positional(values) => {
                assert_eq!(
                    &values[..],
                    &[Value::Int(1), Value::Int(2), Value::Int(1)]
                );
            }
            other => panic!("unexpected params: {:?}", other),
        }
    }

    #[test]
    fn missing_named_param_should_error() {
        let params = Params::from(vec![("a", 1)]);
        assert!(matches!(
            params.into_positional(&["b".into()]),
            Err(DriverError::MissingNamedParameter { .. })
        ));
    }
}
