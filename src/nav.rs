use std::time::{Duration, Instant};

use crate::cache::TreeCache;
use crate::error::FetchError;
use crate::inventory::{FetchQuery, NodeRecord};

pub type Ticket = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum NavPhase {
    Idle,
    /// A fetch is in flight; navigation is locked until it resolves.
    Loading { ticket: Ticket, target: String },
    /// The last navigation failed and was rolled back.
    Error { target: String, error: FetchError },
}

/// Work the host must perform and report back through [`Navigator::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticket: Ticket,
    pub query: FetchQuery,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavOutcome {
    /// The request was dropped (locked, stale or a no-op).
    Ignored,
    /// The view can be shown from cache.
    Ready,
    Fetch(FetchRequest),
    Failed(FetchError),
}

#[derive(Debug, Clone)]
struct Rollback {
    effective_path: String,
    history: Vec<String>,
}

#[derive(Debug, Clone)]
struct InFlight {
    ticket: Ticket,
    started: Instant,
    query: FetchQuery,
    rollback: Option<Rollback>,
}

/// Drill-down state machine. All transitions go through `&mut self`, so the
/// lock read by a request is always the one left by the previous transition.
#[derive(Debug)]
pub struct Navigator {
    base_root: String,
    effective_path: String,
    history: Vec<String>,
    phase: NavPhase,
    in_flight: Option<InFlight>,
    /// Path and history the last failed navigation was heading for.
    retry_plan: Option<Rollback>,
    next_ticket: Ticket,
    preview_depth: u8,
    timeout: Duration,
}

impl Navigator {
    pub fn new(base_root: impl Into<String>, preview_depth: u8, timeout: Duration) -> Self {
        let base_root = base_root.into();
        Self {
            effective_path: base_root.clone(),
            base_root,
            history: Vec::new(),
            phase: NavPhase::Idle,
            in_flight: None,
            retry_plan: None,
            next_ticket: 1,
            preview_depth,
            timeout,
        }
    }

    pub fn base_root(&self) -> &str {
        &self.base_root
    }

    pub fn effective_path(&self) -> &str {
        &self.effective_path
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn phase(&self) -> &NavPhase {
        &self.phase
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.phase, NavPhase::Loading { .. })
    }

    /// History followed by the current path.
    pub fn breadcrumbs(&self) -> Vec<String> {
        let mut crumbs = self.history.clone();
        crumbs.push(self.effective_path.clone());
        crumbs
    }

    /// Load the current view (used on mount and after a reset).
    pub fn start(&mut self, cache: &TreeCache, now: Instant) -> NavOutcome {
        if self.is_locked() {
            return NavOutcome::Ignored;
        }
        self.begin_load(cache, now, None)
    }

    pub fn drill_down(&mut self, target: &str, cache: &TreeCache, now: Instant) -> NavOutcome {
        if self.is_locked() {
            tracing::debug!(path = target, "navigation locked, drill-down dropped");
            return NavOutcome::Ignored;
        }
        if target == self.effective_path {
            return NavOutcome::Ignored;
        }
        let rollback = self.snapshot();
        self.history.push(std::mem::replace(&mut self.effective_path, target.to_string()));
        tracing::info!(path = target, depth = self.history.len(), "drill down");
        self.begin_load(cache, now, Some(rollback))
    }

    pub fn go_back(&mut self, cache: &TreeCache, now: Instant) -> NavOutcome {
        if self.is_locked() {
            return NavOutcome::Ignored;
        }
        let rollback = self.snapshot();
        let Some(previous) = self.history.pop() else {
            return NavOutcome::Ignored;
        };
        if previous == self.base_root {
            self.history.clear();
        }
        tracing::info!(path = %previous, "go back");
        self.effective_path = previous;
        self.begin_load(cache, now, Some(rollback))
    }

    /// Jump to an ancestor shown in the breadcrumbs, truncating history there.
    pub fn go_to_breadcrumb(&mut self, path: &str, cache: &TreeCache, now: Instant) -> NavOutcome {
        if self.is_locked() || path == self.effective_path {
            return NavOutcome::Ignored;
        }
        let Some(index) = self.history.iter().position(|entry| entry == path) else {
            return NavOutcome::Ignored;
        };
        let rollback = self.snapshot();
        self.history.truncate(index);
        self.effective_path = path.to_string();
        tracing::info!(path, "breadcrumb jump");
        self.begin_load(cache, now, Some(rollback))
    }

    /// Re-issue the navigation that last failed, heading for the same path
    /// and history it planned.
    pub fn retry(&mut self, cache: &TreeCache, now: Instant) -> NavOutcome {
        if !matches!(self.phase, NavPhase::Error { .. }) {
            return NavOutcome::Ignored;
        }
        let Some(plan) = self.retry_plan.take() else {
            return self.begin_load(cache, now, None);
        };
        if plan.effective_path == self.effective_path && plan.history == self.history {
            return self.begin_load(cache, now, None);
        }
        let rollback = Rollback {
            effective_path: std::mem::replace(&mut self.effective_path, plan.effective_path),
            history: std::mem::replace(&mut self.history, plan.history),
        };
        tracing::info!(path = %self.effective_path, "retry navigation");
        self.begin_load(cache, now, Some(rollback))
    }

    fn snapshot(&self) -> Rollback {
        Rollback {
            effective_path: self.effective_path.clone(),
            history: self.history.clone(),
        }
    }

    fn begin_load(&mut self, cache: &TreeCache, now: Instant, rollback: Option<Rollback>) -> NavOutcome {
        match cache.next_missing(&self.effective_path, self.preview_depth) {
            None => {
                self.phase = NavPhase::Idle;
                self.in_flight = None;
                NavOutcome::Ready
            }
            Some(query) => {
                let ticket = self.next_ticket;
                self.next_ticket += 1;
                self.phase = NavPhase::Loading {
                    ticket,
                    target: self.effective_path.clone(),
                };
                self.in_flight = Some(InFlight {
                    ticket,
                    started: now,
                    query: query.clone(),
                    rollback,
                });
                tracing::debug!(ticket, ?query, "fetch issued");
                NavOutcome::Fetch(FetchRequest { ticket, query })
            }
        }
    }

    fn take_in_flight(&mut self, ticket: Ticket) -> Option<InFlight> {
        if self.in_flight.as_ref().is_some_and(|in_flight| in_flight.ticket == ticket) {
            self.in_flight.take()
        } else {
            None
        }
    }

    /// Apply the result of a fetch. Results for any ticket other than the one
    /// in flight are ignored.
    pub fn complete(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<NodeRecord>, FetchError>,
        cache: &mut TreeCache,
        now: Instant,
    ) -> NavOutcome {
        let Some(in_flight) = self.take_in_flight(ticket) else {
            tracing::debug!(ticket, "stale fetch result ignored");
            return NavOutcome::Ignored;
        };

        let records = match result {
            Ok(records) => records,
            Err(error) => return self.fail(in_flight, error),
        };
        cache.extend(records);

        match &in_flight.query {
            FetchQuery::Path(path) => {
                if !cache.contains(path) {
                    return self.fail(in_flight.clone(), FetchError::NotFound(path.clone()));
                }
            }
            FetchQuery::Ids(ids) => {
                for id in ids {
                    if cache.resolve(id).is_none() {
                        tracing::warn!(id = %id, "child reference not served, marking unavailable");
                        cache.mark_unavailable(id.clone());
                    }
                }
            }
        }

        // Keep expanding toward the preview depth under the same rollback.
        self.begin_load(cache, now, in_flight.rollback)
    }

    /// Fail a fetch that has been in flight longer than the timeout.
    pub fn check_timeout(&mut self, now: Instant) -> NavOutcome {
        let expired = self
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| now.saturating_duration_since(in_flight.started) >= self.timeout);
        if !expired {
            return NavOutcome::Ignored;
        }
        match self.in_flight.take() {
            Some(in_flight) => self.fail(in_flight, FetchError::Timeout(self.timeout.as_millis() as u64)),
            None => NavOutcome::Ignored,
        }
    }

    fn fail(&mut self, in_flight: InFlight, error: FetchError) -> NavOutcome {
        let target = self.effective_path.clone();
        self.retry_plan = Some(self.snapshot());
        if let Some(rollback) = in_flight.rollback {
            self.effective_path = rollback.effective_path;
            self.history = rollback.history;
        }
        tracing::warn!(path = %target, %error, "navigation failed");
        self.in_flight = None;
        self.phase = NavPhase::Error {
            target,
            error: error.clone(),
        };
        NavOutcome::Failed(error)
    }

    /// Back to a fresh state for a new snapshot.
    pub fn reset(&mut self, base_root: impl Into<String>) {
        self.base_root = base_root.into();
        self.effective_path = self.base_root.clone();
        self.history.clear();
        self.in_flight = None;
        self.retry_plan = None;
        self.phase = NavPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn full_cache() -> TreeCache {
        let mut cache = TreeCache::new();
        cache.insert(NodeRecord::directory("/r", 30, &["/r/a", "/r/b"]));
        cache.insert(NodeRecord::directory("/r/a", 20, &["/r/a/x"]));
        cache.insert(NodeRecord::directory("/r/b", 10, &[]));
        cache.insert(NodeRecord::directory("/r/a/x", 20, &[]));
        cache
    }

    fn navigator() -> Navigator {
        Navigator::new("/r", 2, Duration::from_secs(15))
    }

    fn expect_fetch(outcome: NavOutcome) -> FetchRequest {
        match outcome {
            NavOutcome::Fetch(request) => request,
            other => panic!("expected fetch, got {other:?}"),
        }
    }

    #[test]
    fn test_drill_down_then_back() {
        let cache = full_cache();
        let mut nav = navigator();
        let now = Instant::now();
        assert_eq!(nav.start(&cache, now), NavOutcome::Ready);

        assert_eq!(nav.drill_down("/r/a", &cache, now), NavOutcome::Ready);
        assert_eq!(nav.effective_path(), "/r/a");
        assert_eq!(nav.history(), ["/r".to_string()]);
        assert!(!nav.is_locked());

        assert_eq!(nav.go_back(&cache, now), NavOutcome::Ready);
        assert_eq!(nav.effective_path(), "/r");
        assert!(nav.history().is_empty());
        assert_eq!(nav.go_back(&cache, now), NavOutcome::Ignored);
    }

    #[test]
    fn test_locked_drill_down_is_noop() {
        let mut cache = TreeCache::new();
        let mut nav = navigator();
        let now = Instant::now();
        let request = expect_fetch(nav.start(&cache, now));
        assert_eq!(request.query, FetchQuery::Path("/r".to_string()));
        assert!(nav.is_locked());

        assert_eq!(nav.drill_down("/r/a", &cache, now), NavOutcome::Ignored);
        assert_eq!(nav.effective_path(), "/r");
        assert!(nav.history().is_empty());

        // Root arrives, then its children; the lock holds until the window is full.
        let next = expect_fetch(nav.complete(
            request.ticket,
            Ok(vec![NodeRecord::directory("/r", 10, &["/r/f"])]),
            &mut cache,
            now,
        ));
        assert!(nav.is_locked());
        assert_eq!(
            nav.complete(next.ticket, Ok(vec![NodeRecord::file("/r/f", 10)]), &mut cache, now),
            NavOutcome::Ready
        );
        assert!(!nav.is_locked());
    }

    #[test]
    fn test_failure_rolls_back_and_unlocks() {
        let mut cache = full_cache();
        let mut nav = navigator();
        let now = Instant::now();
        nav.start(&cache, now);
        let request = expect_fetch(nav.drill_down("/r/zzz", &cache, now));

        let outcome = nav.complete(
            request.ticket,
            Err(FetchError::NotFound("/r/zzz".to_string())),
            &mut cache,
            now,
        );
        assert_eq!(outcome, NavOutcome::Failed(FetchError::NotFound("/r/zzz".to_string())));
        assert_eq!(nav.effective_path(), "/r");
        assert!(nav.history().is_empty());
        assert!(!nav.is_locked());
        assert!(matches!(nav.phase(), NavPhase::Error { target, .. } if target == "/r/zzz"));
        // Unrelated cache entries survive.
        assert!(cache.contains("/r/a"));

        assert!(matches!(nav.retry(&cache, now), NavOutcome::Fetch(_)));
        assert!(nav.is_locked());
    }

    #[test]
    fn test_retry_after_failed_back_replays_back() {
        let mut cache = TreeCache::new();
        cache.insert(NodeRecord::directory("/r", 30, &["/r/a", "/r/b"]));
        cache.insert(NodeRecord::directory("/r/a", 20, &["/r/a/x"]));
        cache.insert(NodeRecord::directory("/r/a/x", 20, &[]));
        let mut nav = navigator();
        let now = Instant::now();
        assert_eq!(nav.drill_down("/r/a", &cache, now), NavOutcome::Ready);

        // Going back needs /r/b, which the backend fails to serve.
        let request = expect_fetch(nav.go_back(&cache, now));
        let error = FetchError::Backend("connection reset".to_string());
        assert_eq!(
            nav.complete(request.ticket, Err(error.clone()), &mut cache, now),
            NavOutcome::Failed(error)
        );
        assert_eq!(nav.effective_path(), "/r/a");
        assert_eq!(nav.history(), ["/r".to_string()]);

        let request = expect_fetch(nav.retry(&cache, now));
        assert_eq!(nav.effective_path(), "/r");
        assert!(nav.history().is_empty());
        assert_eq!(
            nav.complete(request.ticket, Ok(vec![NodeRecord::directory("/r/b", 10, &[])]), &mut cache, now),
            NavOutcome::Ready
        );
        assert_eq!(nav.breadcrumbs(), vec!["/r"]);
    }

    #[test]
    fn test_failed_retry_rolls_back_again() {
        let mut cache = full_cache();
        cache.insert(NodeRecord::directory("/r/a/x", 20, &["/r/a/x/y"]));
        cache.insert(NodeRecord::directory("/r/a/x/y", 5, &["/r/a/x/y/z"]));
        let mut nav = navigator();
        let now = Instant::now();
        nav.drill_down("/r/a", &cache, now);
        let request = expect_fetch(nav.drill_down("/r/a/x", &cache, now));
        let error = FetchError::Timeout(15_000);
        nav.complete(request.ticket, Err(error.clone()), &mut cache, now);
        assert_eq!(nav.breadcrumbs(), vec!["/r", "/r/a"]);

        let request = expect_fetch(nav.retry(&cache, now));
        assert_eq!(nav.breadcrumbs(), vec!["/r", "/r/a", "/r/a/x"]);
        nav.complete(request.ticket, Err(error), &mut cache, now);
        assert_eq!(nav.breadcrumbs(), vec!["/r", "/r/a"]);
        assert!(matches!(nav.phase(), NavPhase::Error { target, .. } if target == "/r/a/x"));
    }

    #[test]
    fn test_stale_ticket_ignored() {
        let mut cache = TreeCache::new();
        let mut nav = navigator();
        let now = Instant::now();
        let request = expect_fetch(nav.start(&cache, now));
        assert_eq!(
            nav.complete(request.ticket + 7, Ok(Vec::new()), &mut cache, now),
            NavOutcome::Ignored
        );
        assert!(nav.is_locked());
    }

    #[test]
    fn test_timeout_unlocks() {
        let cache = TreeCache::new();
        let mut nav = navigator();
        let start = Instant::now();
        let request = expect_fetch(nav.start(&cache, start));

        assert_eq!(nav.check_timeout(start + Duration::from_secs(1)), NavOutcome::Ignored);
        assert_eq!(
            nav.check_timeout(start + Duration::from_secs(16)),
            NavOutcome::Failed(FetchError::Timeout(15_000))
        );
        assert!(!nav.is_locked());

        // The late answer is stale now.
        let mut cache = cache;
        assert_eq!(
            nav.complete(request.ticket, Ok(Vec::new()), &mut cache, start),
            NavOutcome::Ignored
        );
    }

    #[test]
    fn test_missing_children_marked_unavailable() {
        let mut cache = TreeCache::new();
        cache.insert(NodeRecord::directory("/r", 10, &["/r/gone", "/r/f"]));
        let mut nav = navigator();
        let now = Instant::now();
        let request = expect_fetch(nav.start(&cache, now));
        let outcome = nav.complete(request.ticket, Ok(vec![NodeRecord::file("/r/f", 10)]), &mut cache, now);
        assert_eq!(outcome, NavOutcome::Ready);
        assert!(cache.is_unavailable("/r/gone"));
    }

    #[test]
    fn test_breadcrumb_truncates_history() {
        let mut cache = full_cache();
        cache.insert(NodeRecord::directory("/r/a/x/y", 1, &[]));
        cache.insert(NodeRecord::directory("/r/a/x", 20, &["/r/a/x/y"]));
        let mut nav = navigator();
        let now = Instant::now();
        nav.drill_down("/r/a", &cache, now);
        nav.drill_down("/r/a/x", &cache, now);
        assert_eq!(nav.breadcrumbs(), vec!["/r", "/r/a", "/r/a/x"]);

        assert_eq!(nav.go_to_breadcrumb("/r/a", &cache, now), NavOutcome::Ready);
        assert_eq!(nav.effective_path(), "/r/a");
        assert_eq!(nav.history(), ["/r".to_string()]);
        assert_eq!(nav.go_to_breadcrumb("/elsewhere", &cache, now), NavOutcome::Ignored);
    }

    #[test]
    fn test_reset_clears_state() {
        let cache = full_cache();
        let mut nav = navigator();
        let now = Instant::now();
        nav.drill_down("/r/a", &cache, now);
        nav.reset("/s");
        assert_eq!(nav.effective_path(), "/s");
        assert!(nav.history().is_empty());
        assert_eq!(nav.phase(), &NavPhase::Idle);
    }
}
