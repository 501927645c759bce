//! Statement profiling.
//!
//! Keeps the most recent statements in a bounded ring buffer and warns about
//! slow ones.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::config::ProfilerConfig;
use crate::db::params::interpolate;
use crate::models::Params;

/// One executed statement.
#[derive(Debug, Clone, Serialize)]
pub struct ProfiledQuery {
    pub group: String,
    /// SQL with named placeholders, as compiled
    pub sql: String,
    pub params: Params,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Rows returned or affected
    pub rows: u64,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProfiledQuery {
    /// SQL with values substituted, for display.
    pub fn interpolated(&self) -> String {
        interpolate(&self.sql, &self.params)
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

#[derive(Debug)]
pub struct QueryProfiler {
    enabled: bool,
    capacity: usize,
    slow_threshold: Duration,
    entries: Mutex<VecDeque<ProfiledQuery>>,
}

impl QueryProfiler {
    pub fn new(config: &ProfilerConfig) -> Self {
        Self {
            enabled: config.enabled && config.capacity > 0,
            capacity: config.capacity,
            slow_threshold: Duration::from_millis(config.slow_query_ms),
            entries: Mutex::new(VecDeque::with_capacity(config.capacity.min(1024))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, query: ProfiledQuery) {
        if !self.enabled {
            return;
        }
        if query.duration >= self.slow_threshold {
            warn!(
                group = %query.group,
                elapsed_ms = query.duration.as_millis() as u64,
                sql = %query.sql,
                "Slow query"
            );
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(query);
    }

    /// Recorded statements, oldest first.
    pub fn queries(&self) -> Vec<ProfiledQuery> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<ProfiledQuery> {
        self.entries.lock().back().cloned()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn total_time(&self) -> Duration {
        self.entries.lock().iter().map(|q| q.duration).sum()
    }

    pub fn slow_queries(&self) -> Vec<ProfiledQuery> {
        self.entries
            .lock()
            .iter()
            .filter(|q| q.duration >= self.slow_threshold)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(sql: &str, millis: u64) -> ProfiledQuery {
        ProfiledQuery {
            group: "default".to_string(),
            sql: sql.to_string(),
            params: Params::new(),
            duration: Duration::from_millis(millis),
            rows: 0,
            at: Utc::now(),
            error: None,
        }
    }

    fn profiler(capacity: usize) -> QueryProfiler {
        QueryProfiler::new(&ProfilerConfig {
            enabled: true,
            capacity,
            slow_query_ms: 100,
        })
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let p = profiler(2);
        p.record(query("a", 1));
        p.record(query("b", 1));
        p.record(query("c", 1));
        let sqls: Vec<_> = p.queries().into_iter().map(|q| q.sql).collect();
        assert_eq!(sqls, vec!["b", "c"]);
        assert_eq!(p.last().unwrap().sql, "c");
    }

    #[test]
    fn test_totals_and_slow() {
        let p = profiler(10);
        p.record(query("fast", 5));
        p.record(query("slow", 250));
        assert_eq!(p.count(), 2);
        assert_eq!(p.total_time(), Duration::from_millis(255));
        let slow = p.slow_queries();
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].sql, "slow");
        p.clear();
        assert_eq!(p.count(), 0);
    }

    #[test]
    fn test_disabled_records_nothing() {
        let p = QueryProfiler::new(&ProfilerConfig {
            enabled: false,
            ..ProfilerConfig::default()
        });
        p.record(query("x", 1));
        assert_eq!(p.count(), 0);
    }

    #[test]
    fn test_interpolated() {
        let mut q = query("SELECT * FROM t WHERE id = :id", 1);
        q.params = Params::new().with("id", 3).unwrap();
        assert_eq!(q.interpolated(), "SELECT * FROM t WHERE id = 3");
    }
}
