//! Paginated collection through a resilient caller.
//!
//! Each page fetch is one protected call: it is throttled, guarded by the
//! breaker and retried on its own. Pages already collected are kept when a
//! later page is retried, so a flaky page never restarts the whole query.

use std::sync::Arc;

use biograph_common::Result;
use biograph_resilience::{CallStats, ResilientCaller};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::dedup::{DedupKey, DedupResult, SeenRecords};
use crate::sources::RecordSource;

/// Counters for one `collect_into` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectOutcome {
    pub pages: usize,
    pub added: usize,
    pub duplicates: usize,
    /// Stopped at `max_results` with more pages available.
    pub truncated: bool,
}

pub struct Collector<R> {
    source: Arc<dyn RecordSource<R>>,
    caller: Arc<ResilientCaller>,
}

impl<R> Clone for Collector<R> {
    fn clone(&self) -> Self {
        Self { source: Arc::clone(&self.source), caller: Arc::clone(&self.caller) }
    }
}

impl<R: DedupKey + Send> Collector<R> {
    pub fn new(source: Arc<dyn RecordSource<R>>, caller: Arc<ResilientCaller>) -> Self {
        Self { source, caller }
    }

    pub fn caller(&self) -> &Arc<ResilientCaller> {
        &self.caller
    }

    /// Collect up to `max_results` new records for `query`.
    pub async fn collect(
        &self,
        query: &str,
        max_results: usize,
        local: Option<&CallStats>,
    ) -> Result<(Vec<R>, CollectOutcome)> {
        let mut seen = SeenRecords::new();
        let outcome = self.collect_into(&mut seen, query, max_results, local).await?;
        Ok((seen.into_records(), outcome))
    }

    /// Like [`collect`](Self::collect) but de-duplicating against records
    /// already in `seen`, e.g. from earlier search terms in the same run.
    #[instrument(skip(self, seen, local), fields(source = %self.source.name(), api = %self.caller.name()))]
    pub async fn collect_into(
        &self,
        seen: &mut SeenRecords<R>,
        query: &str,
        max_results: usize,
        local: Option<&CallStats>,
    ) -> Result<CollectOutcome> {
        let mut outcome = CollectOutcome::default();
        let mut cursor: Option<String> = None;

        while outcome.added < max_results {
            let page = self
                .caller
                .call_tracked(local, || self.source.fetch(query, cursor.as_deref()))
                .await?;
            outcome.pages += 1;
            let received = page.records.len();

            let mut records = page.records.into_iter();
            for record in records.by_ref() {
                match seen.insert(record) {
                    DedupResult::New => outcome.added += 1,
                    DedupResult::DuplicateKey(_) | DedupResult::DuplicateDoi(_) => outcome.duplicates += 1,
                }
                if outcome.added >= max_results {
                    break;
                }
            }
            let leftover = records.next().is_some();
            debug!(page = outcome.pages, received, added = outcome.added, "collected page");

            match page.next_cursor {
                Some(next) if received > 0 => {
                    if outcome.added >= max_results {
                        outcome.truncated = true;
                        break;
                    }
                    cursor = Some(next);
                }
                _ => {
                    outcome.truncated = leftover;
                    break;
                }
            }
        }

        info!(
            query,
            pages = outcome.pages,
            added = outcome.added,
            duplicates = outcome.duplicates,
            truncated = outcome.truncated,
            "collection finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use biograph_common::{BiographError, Paper};
    use biograph_resilience::RateLimitConfig;

    use super::*;
    use crate::sources::Page;

    /// Serves `pages` in order; a `None` entry fails once with a transient error.
    struct ScriptedSource {
        pages: Vec<Option<Vec<&'static str>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordSource<Paper> for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self, _query: &str, _cursor: Option<&str>) -> Result<Page<Paper>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let Some(entry) = self.pages.get(call) else {
                return Ok(Page::last(vec![]));
            };
            let Some(ids) = entry else {
                return Err(BiographError::transient("503"));
            };
            let records = ids.iter().map(|id| Paper::new(*id, "t")).collect();
            if call + 1 < self.pages.len() {
                Ok(Page::with_next(records, (call + 1).to_string()))
            } else {
                Ok(Page::last(records))
            }
        }
    }

    fn collector(pages: Vec<Option<Vec<&'static str>>>) -> Collector<Paper> {
        let cfg = RateLimitConfig {
            burst_size: 100,
            requests_per_second: 100.0,
            ..RateLimitConfig::default().with_retry_attempts(3)
        };
        Collector::new(
            Arc::new(ScriptedSource { pages, calls: AtomicUsize::new(0) }),
            Arc::new(ResilientCaller::new("scripted", cfg).unwrap()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_until_cursor_runs_out() {
        let c = collector(vec![Some(vec!["1", "2"]), Some(vec!["2", "3"])]);
        let (papers, outcome) = c.collect("kras", 100, None).await.unwrap();
        assert_eq!(papers.len(), 3);
        assert_eq!(outcome, CollectOutcome { pages: 2, added: 3, duplicates: 1, truncated: false });
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_max_results() {
        let c = collector(vec![Some(vec!["1", "2", "3"]), Some(vec!["4"])]);
        let (papers, outcome) = c.collect("kras", 2, None).await.unwrap();
        assert_eq!(papers.len(), 2);
        assert_eq!(outcome.pages, 1);
        assert!(outcome.truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_page_is_retried_in_place() {
        let c = collector(vec![
            Some(vec!["1", "2", "3", "4", "5"]),
            Some(vec!["6", "7", "8", "9", "10"]),
            None,
            Some(vec!["11", "12", "13", "14", "15"]),
        ]);
        let local = CallStats::new();
        let (papers, outcome) = c.collect("tp53", 100, Some(&local)).await.unwrap();
        assert_eq!(papers.len(), 15);
        assert_eq!(outcome.pages, 3);
        assert_eq!(local.counts().retries, 1);
        assert_eq!(local.counts().attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_results_makes_no_calls() {
        let c = collector(vec![Some(vec!["1"])]);
        let (papers, outcome) = c.collect("x", 0, None).await.unwrap();
        assert!(papers.is_empty());
        assert_eq!(outcome.pages, 0);
        assert_eq!(c.caller().counts().attempts, 0);
    }
}
