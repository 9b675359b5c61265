//! Total and per-route connection caps.
//!
//! reqwest pools idle connections per host but never bounds how many requests
//! are in flight to a route. [`RouteLimiter`] hands out a [`Lease`] per
//! request, holding one per-route slot and one slot of the process-wide cap.
//! Both are released when the lease is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};

use super::route::Route;
use crate::error::ClientError;

#[derive(Debug)]
pub(crate) struct RouteLimiter {
    default_limit: usize,
    max_total: usize,
    total: Arc<Semaphore>,
    /// Arc so the state can be cloned out and the shard lock released before awaiting.
    routes: DashMap<Route, Arc<RouteState>>,
}

#[derive(Debug)]
struct RouteState {
    limit: AtomicUsize,
    leased: AtomicUsize,
    released: Notify,
}

impl RouteState {
    fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            leased: AtomicUsize::new(0),
            released: Notify::new(),
        }
    }

    fn try_take(&self) -> bool {
        self.leased
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |leased| {
                (leased < self.limit.load(Ordering::SeqCst)).then_some(leased + 1)
            })
            .is_ok()
    }
}

/// A per-route slot, returned on drop.
#[derive(Debug)]
struct RouteSlot {
    state: Arc<RouteState>,
}

impl Drop for RouteSlot {
    fn drop(&mut self) {
        self.state.leased.fetch_sub(1, Ordering::SeqCst);
        self.state.released.notify_waiters();
    }
}

/// Permission to use one pooled connection on one route.
///
/// Holds a per-route slot and a slot of the total cap; dropping the lease
/// returns both.
#[derive(Debug)]
pub struct Lease {
    route: Route,
    _slot: RouteSlot,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    /// The route this lease was granted for.
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }
}

impl RouteLimiter {
    pub(crate) fn new(max_total: usize, default_limit: usize) -> Self {
        Self {
            default_limit,
            max_total,
            total: Arc::new(Semaphore::new(max_total)),
            routes: DashMap::new(),
        }
    }

    fn state(&self, route: &Route) -> Arc<RouteState> {
        let entry = self
            .routes
            .entry(route.clone())
            .or_insert_with(|| Arc::new(RouteState::new(self.default_limit)));
        Arc::clone(&entry)
    }

    pub(crate) fn set_limit(&self, route: &Route, limit: usize) {
        let state = self.state(route);
        let previous = state.limit.swap(limit, Ordering::SeqCst);
        debug!(%route, previous, limit, "per-route limit updated");
        // A raised cap may admit waiters right away.
        state.released.notify_waiters();
    }

    pub(crate) fn limit(&self, route: &Route) -> usize {
        self.routes
            .get(route)
            .map_or(self.default_limit, |state| state.limit.load(Ordering::SeqCst))
    }

    pub(crate) fn leased(&self, route: &Route) -> usize {
        self.routes
            .get(route)
            .map_or(0, |state| state.leased.load(Ordering::SeqCst))
    }

    pub(crate) fn available_total(&self) -> usize {
        self.total.available_permits()
    }

    pub(crate) fn max_total(&self) -> usize {
        self.max_total
    }

    /// Waits up to `timeout` for a route slot and then a total slot.
    #[instrument(skip(self), fields(route = %route))]
    pub(crate) async fn acquire(&self, route: &Route, timeout: Duration) -> Result<Lease, ClientError> {
        if self.total.is_closed() {
            return Err(ClientError::Shutdown);
        }
        let state = self.state(route);
        let wait = async {
            let slot = self.take_route_slot(state).await?;
            let permit = Arc::clone(&self.total)
                .acquire_owned()
                .await
                .map_err(|_| ClientError::Shutdown)?;
            Ok::<_, ClientError>(Lease {
                route: route.clone(),
                _slot: slot,
                _permit: permit,
            })
        };

        if let Ok(result) = tokio::time::timeout(timeout, wait).await {
            result
        } else {
            warn!(
                leased = self.leased(route),
                limit = self.limit(route),
                available_total = self.available_total(),
                "timed out waiting for a pooled connection"
            );
            Err(ClientError::pool_timeout(route.to_string(), timeout))
        }
    }

    async fn take_route_slot(&self, state: Arc<RouteState>) -> Result<RouteSlot, ClientError> {
        loop {
            // Registered before the check so a release in between is not missed.
            let released = state.released.notified();
            if self.total.is_closed() {
                return Err(ClientError::Shutdown);
            }
            if state.try_take() {
                drop(released);
                return Ok(RouteSlot { state });
            }
            released.await;
        }
    }

    /// Fails every pending and future acquisition with [`ClientError::Shutdown`].
    pub(crate) fn close(&self) {
        self.total.close();
        for entry in self.routes.iter() {
            entry.value().released.notify_waiters();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn route() -> Route {
        Route::new("http", "example.com", 80)
    }

    #[tokio::test]
    async fn test_eleventh_acquisition_times_out() {
        let limiter = RouteLimiter::new(200, 10);
        let mut leases = Vec::new();
        for _ in 0..10 {
            leases.push(limiter.acquire(&route(), Duration::from_millis(50)).await.unwrap());
        }
        assert_eq!(limiter.leased(&route()), 10);

        let error = limiter
            .acquire(&route(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(
            matches!(error, ClientError::PoolTimeout { .. }),
            "Expected PoolTimeout, got: {error:?}"
        );
        assert_eq!(limiter.leased(&route()), 10);
    }

    #[tokio::test]
    async fn test_dropped_lease_admits_waiter() {
        let limiter = Arc::new(RouteLimiter::new(200, 1));
        let first = limiter.acquire(&route(), Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire(&route(), Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);

        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second.route(), &route());
        assert_eq!(limiter.leased(&route()), 1);
    }

    #[tokio::test]
    async fn test_total_cap_spans_routes() {
        let limiter = RouteLimiter::new(2, 10);
        let a = Route::new("http", "a.example", 80);
        let b = Route::new("http", "b.example", 80);
        let _one = limiter.acquire(&a, Duration::from_millis(50)).await.unwrap();
        let _two = limiter.acquire(&b, Duration::from_millis(50)).await.unwrap();
        assert_eq!(limiter.available_total(), 0);

        let error = limiter.acquire(&a, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(error, ClientError::PoolTimeout { .. }));
        // The failed attempt must hand its route slot back.
        assert_eq!(limiter.leased(&a), 1);
    }

    #[tokio::test]
    async fn test_raised_limit_applies_to_new_acquisitions() {
        let limiter = RouteLimiter::new(200, 1);
        let _held = limiter.acquire(&route(), Duration::from_millis(50)).await.unwrap();
        limiter.set_limit(&route(), 2);
        assert_eq!(limiter.limit(&route()), 2);
        let _second = limiter.acquire(&route(), Duration::from_millis(50)).await.unwrap();
        assert_eq!(limiter.leased(&route()), 2);
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_future_acquisitions() {
        let limiter = Arc::new(RouteLimiter::new(200, 1));
        let _held = limiter.acquire(&route(), Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire(&route(), Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        limiter.close();

        assert!(matches!(waiter.await.unwrap(), Err(ClientError::Shutdown)));
        assert!(matches!(
            limiter.acquire(&route(), Duration::from_millis(10)).await,
            Err(ClientError::Shutdown)
        ));
    }

    #[test]
    fn test_unknown_route_reports_defaults() {
        let limiter = RouteLimiter::new(200, 10);
        assert_eq!(limiter.limit(&route()), 10);
        assert_eq!(limiter.leased(&route()), 0);
        assert_eq!(limiter.available_total(), 200);
        assert_eq!(limiter.max_total(), 200);
    }
}
