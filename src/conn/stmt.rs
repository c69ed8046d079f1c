// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Server-prepared statements and their cache.
//!
//! The cache is strictly bounded to respect the server's
//! `max_prepared_stmt_count`: an insert over capacity evicts the least
//! recently used entry first and reports it to the caller, which schedules
//! a COM_STMT_CLOSE for the evicted statement id before the slot is reused.

use twox_hash::XxHash64;

use std::collections::{HashMap, VecDeque};
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use crate::opts::CacheBound;
use crate::packets::Column;

/// A server-prepared statement: the server-assigned handle plus its
/// parameter and column metadata.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Statement {
    id: u32,
    num_params: u16,
    num_columns: u16,
    params: Option<Arc<[Column]>>,
    columns: Option<Arc<[Column]>>,
}

impl Statement {
    pub(crate) fn new(
        id: u32,
        num_params: u16,
        num_columns: u16,
        params: Option<Arc<[Column]>>,
        columns: Option<Arc<[Column]>>,
    ) -> Statement {
        Statement {
            id,
            num_params,
            num_columns,
            params,
            columns,
        }
    }

    /// Server-assigned statement id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of `?` parameters.
    pub fn num_params(&self) -> u16 {
        self.num_params
    }

    /// Number of result columns (0 for statements without a result set).
    pub fn num_columns(&self) -> u16 {
        self.num_columns
    }

    /// Parameter metadata, when the server sent it.
    pub fn params(&self) -> Option<&[Column]> {
        self.params.as_deref()
    }

    /// Column metadata, when the server sent it.
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }
}

/// Strictly bounded LRU cache of prepared statements, keyed by SQL text.
#[derive(Debug)]
pub(crate) struct StmtCache {
    bound: CacheBound,
    map: HashMap<Arc<str>, Arc<Statement>, BuildHasherDefault<XxHash64>>,
    order: VecDeque<Arc<str>>,
}

impl StmtCache {
    pub(crate) fn new(bound: CacheBound) -> StmtCache {
        StmtCache {
            bound,
            map: HashMap::default(),
            order: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Cache lookup; a hit refreshes the entry's recency.
    pub(crate) fn get_if_present(&mut self, sql: &str) -> Option<Arc<Statement>> {
        let stmt = self.map.get(sql)?.clone();
        if let Some(pos) = self.order.iter().position(|key| key.as_ref() == sql) {
            let key = self.order.remove(pos).expect("position is valid");
            self.order.push_back(key);
        }
        Some(stmt)
    }

    /// Stores `stmt` unless the slot is taken or the cache is disabled.
    ///
    /// Returns `false` if the statement was rejected so the caller can close
    /// it itself. Statements evicted to make room are passed to `on_evict`
    /// (the caller schedules a COM_STMT_CLOSE for each).
    pub(crate) fn put_if_absent<F>(
        &mut self,
        sql: &str,
        stmt: Arc<Statement>,
        mut on_evict: F,
    ) -> bool
    where
        F: FnMut(Arc<Statement>),
    {
        let capacity = match self.bound {
            CacheBound::Disabled => return false,
            CacheBound::Unbounded => usize::MAX,
            CacheBound::Bounded(x) => x,
        };

        if self.map.contains_key(sql) {
            return false;
        }

        while self.map.len() >= capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    if let Some(evicted) = self.map.remove(&oldest) {
                        on_evict(evicted);
                    }
                }
                None => return false,
            }
        }

        let key: Arc<str> = Arc::from(sql);
        self.map.insert(key.clone(), stmt);
        self.order.push_back(key);
        true
    }

    /// Removes a single entry (e.g. when the server invalidated the id).
    pub(crate) fn remove(&mut self, sql: &str) -> Option<Arc<Statement>> {
        if let Some(pos) = self.order.iter().position(|key| key.as_ref() == sql) {
            self.order.remove(pos);
        }
        self.map.remove(sql)
    }

    /// Drains the cache; the returned statements must be closed.
    pub(crate) fn clear(&mut self) -> Vec<Arc<Statement>> {
        self.order.clear();
        self.map.drain().map(|(_, stmt)| stmt).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(id: u32) -> Arc<Statement> {
        Arc::new(Statement::new(id, 0, 0, None, None))
    }

    #[test]
    fn present_after_successful_put() {
        let mut cache = StmtCache::new(CacheBound::Bounded(2));
        assert!(cache.put_if_absent("SELECT 1", stmt(1), |_| ()));
        assert_eq!(cache.get_if_present("SELECT 1").unwrap().id(), 1);
    }

    #[test]
    fn duplicate_put_is_rejected() {
        let mut cache = StmtCache::new(CacheBound::Bounded(2));
        assert!(cache.put_if_absent("SELECT 1", stmt(1), |_| ()));
        assert!(!cache.put_if_absent("SELECT 1", stmt(2), |_| ()));
        assert_eq!(cache.get_if_present("SELECT 1").unwrap().id(), 1);
    }

    #[test]
    fn disabled_cache_rejects_everything() {
        let mut cache = StmtCache::new(CacheBound::Disabled);
        assert!(!cache.put_if_absent("SELECT 1", stmt(1), |_| ()));
        assert!(cache.get_if_present("SELECT 1").is_none());
    }

    #[test]
    fn capacity_eviction_reports_the_least_recently_used() {
        let mut cache = StmtCache::new(CacheBound::Bounded(2));
        let mut evicted = Vec::new();
        cache.put_if_absent("a", stmt(1), |s| evicted.push(s.id()));
        cache.put_if_absent("b", stmt(2), |s| evicted.push(s.id()));

        // a gets refreshed, so b is now the oldest
        cache.get_if_present("a");
        cache.put_if_absent("c", stmt(3), |s| evicted.push(s.id()));

        assert_eq!(evicted, vec![2]);
        assert!(cache.get_if_present("b").is_none());
        assert!(cache.get_if_present("a").is_some());
        assert!(cache.get_if_present("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_returns_everything_for_closing() {
        let mut cache = StmtCache::new(CacheBound::Unbounded);
        cache.put_if_absent("a", stmt(1), |_| ());
        cache.put_if_absent("b", stmt(2), |_| ());
        let mut ids: Vec<u32> = cache.clear().iter().map(|s| s.id()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(cache.len(), 0);
    }
}
