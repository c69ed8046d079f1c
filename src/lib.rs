// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Reactive, non-blocking MySql/MariaDB client protocol engine.
//!
//! This crate owns the full connection lifecycle over a single TCP or Unix
//! domain connection:
//!
//! * envelope framing with optional zlib/zstd compression;
//! * the handshake and authentication state machine (`mysql_native_password`,
//!   `caching_sha2_password` fast and full paths, `sha256_password`,
//!   clear-text and legacy plugins), including the TLS upgrade;
//! * text and server-prepared statement pipelines with multi-results,
//!   read-only fetch cursors and LOCAL INFILE uploads;
//! * conversion between MySql values and rust types, between MySql rows and
//!   tuples of rust types;
//! * client-side query-parse and prepared-statement caches;
//! * a FIFO request queue for sharing one connection between tasks.
//!
//! # Example
//!
//! ```no_run
//! use mysql_reactor::{Conn, Opts};
//!
//! # async fn run() -> mysql_reactor::Result<()> {
//! let opts = Opts::from_url("mysql://root@localhost:3306/test")?;
//! let mut conn = Conn::new(opts).await?;
//!
//! let answer: Option<u8> = conn.query_first("SELECT 1").await?;
//! assert_eq!(answer, Some(1));
//!
//! conn.exec_drop("INSERT INTO t (a, b) VALUES (?, ?)", (42, "hi"))
//!     .await?;
//! conn.disconnect().await
//! # }
//! ```

// Splits `$reader` at `$at`, or produces an UnexpectedEof error.
macro_rules! split_at_or_err {
    ($reader:expr, $at:expr, $msg:expr) => {
        if $reader.len() >= $at {
            Ok($reader.split_at($at))
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                $msg,
            ))
        }
    };
}

// Reads a length-encoded string out of a `&mut &[u8]`, advancing it.
macro_rules! read_lenenc_str {
    ($reader:expr) => {{
        let reader: &mut &[u8] = $reader;
        match $crate::io::ReadMysqlExt::read_lenenc_int(reader) {
            Ok(len) => split_at_or_err!(
                *reader,
                len as usize,
                "EOF while reading length-encoded string"
            )
            .map(|(value, rest)| {
                *reader = rest;
                value
            }),
            Err(err) => Err(err),
        }
    }};
}

#[macro_use]
pub mod bitflags_ext;

pub mod collation;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod io;
pub mod misc;
pub mod opts;
pub mod packets;
pub mod params;
pub mod proto;
pub mod queries;
pub mod row;
pub mod scramble;
pub mod value;

mod local_infile;

pub mod conn;

pub use crate::conn::result::QueryResult;
pub use crate::conn::stmt::Statement;
pub use crate::conn::{Conn, SharedConn};
pub use crate::error::{Error, ErrorKind, Result, ServerError};
pub use crate::opts::{Opts, OptsBuilder, SslMode};
pub use crate::params::Params;
pub use crate::row::convert::{from_row, from_row_opt, FromRowError};
pub use crate::row::Row;
pub use crate::value::convert::{from_value, from_value_opt, FromValueError};
pub use crate::value::json::{Deserialized, Serialized};
pub use crate::value::Value;

pub mod prelude {
    pub use crate::row::convert::FromRow;
    pub use crate::row::ColumnIndex;
    pub use crate::value::convert::{FromValue, ToValue};
}

/// This macro is a convenient way to pass named parameters to a statement.
///
/// ```ignore
/// let foo = 42;
/// conn.exec_drop("SELECT :foo, :foo2x", params! {
///     foo,
///     "foo2x" => foo * 2,
/// }).await?;
/// ```
#[macro_export]
macro_rules! params {
    () => {};
    (@to_pair $map:expr, $name:expr => $value:expr) => (
        let entry = $map.entry(std::string::String::from($name));
        if let std::collections::hash_map::Entry::Occupied(_) = entry {
            panic!("Redefinition of named parameter `{}'", entry.key());
        } else {
            entry.or_insert($crate::Value::from($value));
        }
    );
    (@to_pair $map:expr, $name:ident) => (
        let entry = $map.entry(std::string::String::from(stringify!($name)));
        if let std::collections::hash_map::Entry::Occupied(_) = entry {
            panic!("Redefinition of named parameter `{}'", entry.key());
        } else {
            entry.or_insert($crate::Value::from($name));
        }
    );
    (@expand $map:expr;) => {};
    (@expand $map:expr; $name:expr => $value:expr, $($tail:tt)*) => {
        params!(@to_pair $map, $name => $value);
        params!(@expand $map; $($tail)*);
    };
    (@expand $map:expr; $name:expr => $value:expr $(, $tail:tt)*) => {
        params!(@to_pair $map, $name => $value);
        params!(@expand $map; $($tail)*);
    };
    (@expand $map:expr; $name:ident, $($tail:tt)*) => {
        params!(@to_pair $map, $name);
        params!(@expand $map; $($tail)*);
    };
    (@expand $map:expr; $name:ident $(, $tail:tt)*) => {
        params!(@to_pair $map, $name);
        params!(@expand $map; $($tail)*);
    };
    ($i:ident, $($tail:tt)*) => {
        {
            let mut map: std::collections::HashMap<std::string::String, $crate::Value, _> =
                std::default::Default::default();
            params!(@expand (&mut map); $i, $($tail)*);
            $crate::Params::Named(map)
        }
    };
    ($i:expr => $($tail:tt)*) => {
        {
            let mut map: std::collections::HashMap<std::string::String, $crate::Value, _> =
                std::default::Default::default();
            params!(@expand (&mut map); $i => $($tail)*);
            $crate::Params::Named(map)
        }
    };
    ($i:ident) => {
        {
            let mut map: std::collections::HashMap<std::string::String, $crate::Value, _> =
                std::default::Default::default();
            params!(@expand (&mut map); $i);
            $crate::Params::Named(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{params::Params, value::Value};

    #[test]
    fn params_macro_test() {
        let foo = 42;
        let bar = "bar";

        assert_eq!(
            Params::from(vec![(String::from("foo"), Value::Int(42))]),
            params! { foo }
        );
        assert_eq!(
            Params::from(vec![
                (String::from("foo"), Value::Int(42)),
                (String::from("bar"), Value::Bytes((&b"bar"[..]).into())),
            ]),
            params! { foo, bar }
        );
        assert_eq!(
            Params::from(vec![
                (String::from("foo"), Value::Int(42)),
                (String::from("bar"), Value::Bytes((&b"bar"[..]).into())),
            ]),
            params! { "foo" => foo, "bar" => bar }
        );
        assert_eq!(
            Params::from(vec![
                (String::from("foo"), Value::Int(42)),
                (String::from("bar"), Value::Bytes((&b"bar"[..]).into())),
            ]),
            params! { foo, "bar" => bar, }
        );
    }

    #[test]
    #[should_panic(expected = "Redefinition of named parameter `a'")]
    fn params_macro_should_panic_on_named_param_redefinition() {
        params! {"a" => 1, "b" => 2, "a" => 3};
    }
}
