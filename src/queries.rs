// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Query tokenization: placeholder discovery, named parameters and the
//! parse cache.
//!
//! Parameters may be named according to the following convention:
//!
//! * parameter name must start with either `_` or `a..z`
//! * parameter name may continue with `_`, `a..z` and `0..9`

use twox_hash::XxHash64;

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use crate::error::DriverError;
use crate::opts::CacheBound;
use crate::params::Params;
use crate::value::Value;

enum ParserState {
    TopLevel,
    // (string_delimiter, last_char)
    InStringLiteral(u8, u8),
    MaybeInNamedParam,
    InNamedParam,
    InSharpComment,
    MaybeInDoubleDashComment1,
    MaybeInDoubleDashComment2,
    InDoubleDashComment,
    MaybeInCComment1,
    MaybeInCComment2,
    InCComment,
    MaybeExitCComment,
}

use self::ParserState::*;

/// SQL text split into literal parts and ordered parameter markers.
///
/// `sql` is the rewritten statement where every named parameter was replaced
/// with a positional `?`. Named statements keep the names in order of
/// appearance so that bindings can be positionalized.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParsedQuery {
    sql: Arc<str>,
    /// Byte offsets of the `?` markers within `sql`.
    marker_offsets: Vec<usize>,
    names: Option<Vec<String>>,
}

impl ParsedQuery {
    /// The SQL to send to the server (named markers rewritten to `?`).
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of `?` markers.
    pub fn param_count(&self) -> usize {
        self.marker_offsets.len()
    }

    /// Substitutes every marker with the escaped SQL literal of its value.
    ///
    /// This is the client-side prepare path: the statement is sent through
    /// the text protocol with parameters inlined under the session's escape
    /// rules.
    pub fn interpolate(&self, values: &[Value], no_backslash_escape: bool) -> String {
        debug_assert_eq!(values.len(), self.marker_offsets.len());
        let sql = self.sql.as_bytes();
        let mut out = String::with_capacity(self.sql.len() + values.len() * 8);
        let mut last = 0;
        for (&offset, value) in self.marker_offsets.iter().zip(values.iter()) {
            out.push_str(std::str::from_utf8(&sql[last..offset]).expect("utf8 boundaries"));
            out.push_str(&value.as_sql(no_backslash_escape));
            last = offset + 1;
        }
        out.push_str(std::str::from_utf8(&sql[last..]).expect("utf8 boundaries"));
        out
    }

    /// Names in order of appearance (one entry per marker), if any.
    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    /// Mapping from a parameter name to the set of marker indexes it binds.
    pub fn name_indexes(&self) -> HashMap<&str, Vec<usize>> {
        let mut out: HashMap<&str, Vec<usize>> = HashMap::new();
        if let Some(ref names) = self.names {
            for (i, name) in names.iter().enumerate() {
                out.entry(name.as_str()).or_default().push(i);
            }
        }
        out
    }

    /// Converts the given params into positional form for this query.
    pub fn positionalize(&self, params: Params) -> Result<Params, DriverError> {
        match params {
            Params::Named(_) => match self.names {
                Some(ref names) => params.into_positional(names),
                None => Err(DriverError::NamedParamsForPositionalQuery),
            },
            other => Ok(other),
        }
    }
}

/// Parses placeholders in the given query.
///
/// Returns an error if the statement mixes named and positional parameters.
pub fn parse_query(query: &str) -> Result<ParsedQuery, DriverError> {
    let query_bytes = query.as_bytes();
    let mut state = TopLevel;
    let mut have_positional = false;
    let mut positional_offsets = Vec::new();
    let mut cur_param = 0;
    // Vec<(start_offset, end_offset, name)>
    let mut params = Vec::new();
    for (i, c) in query_bytes.iter().enumerate() {
        let mut rematch = false;
        match state {
            TopLevel => match c {
                b':' => state = MaybeInNamedParam,
                b'/' => state = MaybeInCComment1,
                b'-' => state = MaybeInDoubleDashComment1,
                b'#' => state = InSharpComment,
                b'\'' => state = InStringLiteral(b'\'', b'\''),
                b'"' => state = InStringLiteral(b'"', b'"'),
                b'?' => {
                    have_positional = true;
                    positional_offsets.push(i);
                }
                _ => (),
            },
            InStringLiteral(separator, prev_char) => match c {
                x if *x == separator && prev_char != b'\\' => state = TopLevel,
                x => state = InStringLiteral(separator, *x),
            },
            MaybeInNamedParam => match c {
                b'a'..=b'z' | b'_' => {
                    params.push((i - 1, 0, Vec::with_capacity(16)));
                    params[cur_param].2.push(*c);
                    state = InNamedParam;
                }
                _ => rematch = true,
            },
            InNamedParam => match c {
                b'a'..=b'z' | b'0'..=b'9' | b'_' => params[cur_param].2.push(*c),
                _ => {
                    params[cur_param].1 = i;
                    cur_param += 1;
                    rematch = true;
                }
            },
            InSharpComment => {
                if *c == b'\n' {
                    state = TopLevel
                }
            }
            MaybeInDoubleDashComment1 => match c {
                b'-' => state = MaybeInDoubleDashComment2,
                _ => state = TopLevel,
            },
            MaybeInDoubleDashComment2 => {
                if c.is_ascii_whitespace() && *c != b'\n' {
                    state = InDoubleDashComment
                } else {
                    state = TopLevel
                }
            }
            InDoubleDashComment => {
                if *c == b'\n' {
                    state = TopLevel
                }
            }
            MaybeInCComment1 => match c {
                b'*' => state = MaybeInCComment2,
                _ => state = TopLevel,
            },
            MaybeInCComment2 => match c {
                b'!' | b'+' => state = TopLevel, // extensions and optimizer hints
                _ => state = InCComment,
            },
            InCComment => {
                if *c == b'*' {
                    state = MaybeExitCComment
                }
            }
            MaybeExitCComment => match c {
                b'/' => state = TopLevel,
                _ => state = InCComment,
            },
        }
        if rematch {
            match c {
                b':' => state = MaybeInNamedParam,
                b'\'' => state = InStringLiteral(b'\'', b'\''),
                b'"' => state = InStringLiteral(b'"', b'"'),
                b'?' => {
                    have_positional = true;
                    positional_offsets.push(i);
                }
                _ => state = TopLevel,
            }
        }
    }
    if let InNamedParam = state {
        params[cur_param].1 = query_bytes.len();
    }

    if !params.is_empty() {
        if have_positional {
            return Err(DriverError::MixedParams);
        }
        let mut real_query = Vec::with_capacity(query_bytes.len());
        let mut last = 0;
        let mut names = Vec::with_capacity(params.len());
        let mut marker_offsets = Vec::with_capacity(params.len());
        for (start, end, name) in params.into_iter() {
            real_query.extend(&query_bytes[last..start]);
            marker_offsets.push(real_query.len());
            real_query.push(b'?');
            last = end;
            // Names are built from ascii subsets of the input.
            names.push(String::from_utf8(name).expect("ascii"));
        }
        real_query.extend(&query_bytes[last..]);
        Ok(ParsedQuery {
            sql: String::from_utf8(real_query).expect("utf8 in, utf8 out").into(),
            marker_offsets,
            names: Some(names),
        })
    } else {
        Ok(ParsedQuery {
            sql: query.into(),
            marker_offsets: positional_offsets,
            names: None,
        })
    }
}

/// Parse cache, keyed by the original SQL text.
///
/// Elastic: an insert over capacity evicts an arbitrary entry, so the bound
/// holds eventually rather than strictly.
#[derive(Debug)]
pub struct QueryCache {
    bound: CacheBound,
    map: HashMap<Arc<str>, Arc<ParsedQuery>, BuildHasherDefault<XxHash64>>,
}

impl QueryCache {
    pub fn new(bound: CacheBound) -> Self {
        Self {
            bound,
            map: HashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the parsed form of `query`, parsing and caching on miss.
    pub fn parse(&mut self, query: &str) -> Result<Arc<ParsedQuery>, DriverError> {
        let capacity = match self.bound {
            CacheBound::Disabled => return parse_query(query).map(Arc::new),
            CacheBound::Unbounded => usize::MAX,
            CacheBound::Bounded(x) => x,
        };

        if let Some(parsed) = self.map.get(query) {
            return Ok(parsed.clone());
        }

        let parsed = Arc::new(parse_query(query)?);
        if self.map.len() >= capacity {
            if let Some(key) = self.map.keys().next().cloned() {
                self.map.remove(&key);
            }
        }
        self.map.insert(Arc::from(query), parsed.clone());
        Ok(parsed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn names_of(parsed: &ParsedQuery) -> Vec<&str> {
        parsed
            .names()
            .unwrap_or(&[])
            .iter()
            .map(|s| s.as_str())
            .collect()
    }

    #[test]
    fn should_parse_named_params() {
        let result = parse_query(":a :b").unwrap();
        assert_eq!(names_of(&result), vec!["a", "b"]);
        assert_eq!(result.sql(), "? ?");
        assert_eq!(result.param_count(), 2);

        let result = parse_query("SELECT (:a-10)").unwrap();
        assert_eq!(names_of(&result), vec!["a"]);
        assert_eq!(result.sql(), "SELECT (?-10)");

        let result = parse_query(r#"SELECT '"\':a' "'\"':c" :b"#).unwrap();
        assert_eq!(names_of(&result), vec!["b"]);
        assert_eq!(result.sql(), r#"SELECT '"\':a' "'\"':c" ?"#);

        let result = parse_query(r":a_Aa:b").unwrap();
        assert_eq!(names_of(&result), vec!["a_", "b"]);
        assert_eq!(result.sql(), r"?Aa?");

        let result = parse_query(r"::b").unwrap();
        assert_eq!(names_of(&result), vec!["b"]);
        assert_eq!(result.sql(), r":?");

        assert!(matches!(
            parse_query(r":a ?"),
            Err(DriverError::MixedParams)
        ));
    }

    #[test]
    fn should_count_positional_params() {
        let result = parse_query("SELECT ?, ?, '?'").unwrap();
        assert_eq!(result.names(), None);
        assert_eq!(result.param_count(), 2);
        assert_eq!(result.sql(), "SELECT ?, ?, '?'");
    }

    #[test]
    fn should_allow_numbers_in_param_name() {
        let result = parse_query(":a1 :a2").unwrap();
        assert_eq!(names_of(&result), vec!["a1", "a2"]);
        assert_eq!(result.sql(), "? ?");

        let result = parse_query(":1a :2a").unwrap();
        assert_eq!(result.names(), None);
        assert_eq!(result.sql(), ":1a :2a");
    }

    #[test]
    fn special_characters_in_query() {
        let result = parse_query(r"SELECT 1 FROM été WHERE thing = :param;").unwrap();
        assert_eq!(names_of(&result), vec!["param"]);
        assert_eq!(result.sql(), "SELECT 1 FROM été WHERE thing = ?;");
    }

    #[test]
    fn comments_with_question_marks() {
        let result = parse_query(
            "SELECT 1 FROM my_table WHERE thing = :param;/* question\n  mark '?' in multiline\n\
            comment? */\n# ??- sharp comment -??\n-- dash-dash?\n/*! extention param :param2 */\n\
            /*+ optimizer hint :param3 */; select :foo; # another comment?",
        )
        .unwrap();
        assert_eq!(names_of(&result), vec!["param", "param2", "param3", "foo"]);
    }

    #[test]
    fn interpolation_should_respect_escape_rules() {
        let parsed = parse_query("SELECT ?, ? FROM t WHERE s = '?'").unwrap();
        let values = [Value::Int(42), Value::Bytes(b"it's".to_vec())];
        assert_eq!(
            parsed.interpolate(&values, false),
            r"SELECT 42, 'it\'s' FROM t WHERE s = '?'"
        );
        assert_eq!(
            parsed.interpolate(&values, true),
            "SELECT 42, 'it''s' FROM t WHERE s = '?'"
        );
    }

    #[test]
    fn named_markers_interpolate_in_appearance_order() {
        let parsed = parse_query("SELECT :a, :b").unwrap();
        let values = [Value::Int(1), Value::Int(2)];
        assert_eq!(parsed.interpolate(&values, false), "SELECT 1, 2");
    }

    #[test]
    fn name_indexes_should_group_repeats() {
        let result = parse_query("SELECT :foo, :bar, :foo").unwrap();
        let indexes = result.name_indexes();
        assert_eq!(indexes["foo"], vec![0, 2]);
        assert_eq!(indexes["bar"], vec![1]);
    }

    #[test]
    fn cache_should_hit_and_stay_bounded() {
        let mut cache = QueryCache::new(CacheBound::Bounded(2));
        let first = cache.parse("SELECT 1").unwrap();
        let second = cache.parse("SELECT 1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        cache.parse("SELECT 2").unwrap();
        cache.parse("SELECT 3").unwrap();
        assert!(cache.len() <= 2);
    }

    #[test]
    fn disabled_cache_should_not_store() {
        let mut cache = QueryCache::new(CacheBound::Disabled);
        cache.parse("SELECT 1").unwrap();
        assert!(cache.is_empty());
    }
}
