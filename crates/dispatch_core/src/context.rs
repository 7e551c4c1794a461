//! Shared handles passed explicitly to every dispatch system.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::broadcast::{Broadcaster, LoggingBroadcaster};
use crate::clock::{Clock, SystemClock};
use crate::config::DispatchConfig;
use crate::distributions::{UniformWorkDuration, WorkDuration};
use crate::error::DispatchError;
use crate::location::{InMemoryLocationStore, LocationStore};
use crate::matching::{MatchingAlgorithm, NearestUnitMatching};
use crate::route_tracker::RouteTracker;
use crate::routing::{build_route_provider, RouteProvider};
use crate::store::DispatchStore;
use crate::telemetry::DispatchTelemetry;

/// Everything the dispatch loop and its async follow-ups operate on.
///
/// Arrival, completion and route-fetch tasks are spawned on [`Self::tasks`]
/// so a caller can wait for them to drain; stopping the loop does not cancel
/// them.
pub struct DispatchContext {
    pub config: DispatchConfig,
    pub store: Arc<dyn DispatchStore>,
    pub locations: Arc<dyn LocationStore>,
    pub routes: RouteTracker,
    pub router: Arc<dyn RouteProvider>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub clock: Arc<dyn Clock>,
    pub matching: Arc<dyn MatchingAlgorithm>,
    pub work: Arc<dyn WorkDuration>,
    pub telemetry: DispatchTelemetry,
    pub tasks: TaskTracker,
    /// Bounds concurrent per-type matching passes.
    pub match_permits: Arc<Semaphore>,
}

impl DispatchContext {
    pub fn builder(store: Arc<dyn DispatchStore>) -> DispatchContextBuilder {
        DispatchContextBuilder::new(store)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Spawn follow-up work that outlives the tick that triggered it.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(future)
    }

    /// Run store work on the blocking pool; row-lock waits never stall a
    /// runtime worker.
    pub async fn blocking<T, F>(self: &Arc<Self>, work: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&DispatchContext) -> Result<T, DispatchError> + Send + 'static,
        T: Send + 'static,
    {
        let ctx = Arc::clone(self);
        tokio::task::spawn_blocking(move || work(&ctx)).await?
    }
}

pub struct DispatchContextBuilder {
    config: DispatchConfig,
    store: Arc<dyn DispatchStore>,
    locations: Option<Arc<dyn LocationStore>>,
    router: Option<Arc<dyn RouteProvider>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    clock: Option<Arc<dyn Clock>>,
    matching: Option<Arc<dyn MatchingAlgorithm>>,
    work: Option<Arc<dyn WorkDuration>>,
}

impl DispatchContextBuilder {
    fn new(store: Arc<dyn DispatchStore>) -> Self {
        Self {
            config: DispatchConfig::default(),
            store,
            locations: None,
            router: None,
            broadcaster: None,
            clock: None,
            matching: None,
            work: None,
        }
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn locations(mut self, locations: Arc<dyn LocationStore>) -> Self {
        self.locations = Some(locations);
        self
    }

    pub fn router(mut self, router: Arc<dyn RouteProvider>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn matching(mut self, matching: Arc<dyn MatchingAlgorithm>) -> Self {
        self.matching = Some(matching);
        self
    }

    pub fn work(mut self, work: Arc<dyn WorkDuration>) -> Self {
        self.work = Some(work);
        self
    }

    /// Validates the config and fills unset collaborators with defaults: an
    /// in-memory location store, the configured route provider, a logging
    /// broadcaster, the system clock, nearest-unit matching and a uniform
    /// work duration drawn from the configured window.
    pub fn build(self) -> Result<Arc<DispatchContext>, DispatchError> {
        let config = self.config;
        config.validate()?;

        let router = match self.router {
            Some(router) => router,
            None => Arc::from(build_route_provider(&config.route_provider)?),
        };
        let work = self.work.unwrap_or_else(|| {
            Arc::new(UniformWorkDuration::new(
                config.work_min_ms,
                config.work_max_ms,
                config.seed,
            ))
        });
        let match_permits = Arc::new(Semaphore::new(config.match_workers));

        Ok(Arc::new(DispatchContext {
            store: self.store,
            locations: self
                .locations
                .unwrap_or_else(|| Arc::new(InMemoryLocationStore::new())),
            routes: RouteTracker::new(),
            router,
            broadcaster: self
                .broadcaster
                .unwrap_or_else(|| Arc::new(LoggingBroadcaster)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            matching: self
                .matching
                .unwrap_or_else(|| Arc::new(NearestUnitMatching)),
            work,
            telemetry: DispatchTelemetry::new(),
            tasks: TaskTracker::new(),
            match_permits,
            config,
        }))
    }
}
