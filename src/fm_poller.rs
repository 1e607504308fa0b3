// Periodic vehicle refresh. One background task per filter configuration:
// the first fetch toggles the loading flag, later ticks refresh silently.

use crate::fm_api::{self, Result, TransitApi};
use crate::fm_models::{
    IncludedIndex, NO_TRIP_SENTINEL, NONREV_SENTINEL, Vehicle, VehicleDocument,
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const POLL_INTERVAL: Duration = Duration::from_secs(20);
/// Page size for the unfiltered dashboard view.
pub const DEFAULT_VEHICLE_LIMIT: usize = 30;

/// What the user has selected, as far as vehicle fetching is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleFilter {
    pub route_ids: Vec<String>,
    pub trip_ids: Vec<String>,
    /// When false the trip selection is ignored and only routes scope the
    /// fetch. Used for the count feed behind the pattern picker.
    pub apply_trip_filter: bool,
    pub limit: usize,
}

impl Default for VehicleFilter {
    fn default() -> Self {
        VehicleFilter {
            route_ids: Vec::new(),
            trip_ids: Vec::new(),
            apply_trip_filter: true,
            limit: DEFAULT_VEHICLE_LIMIT,
        }
    }
}

impl VehicleFilter {
    pub fn new(route_ids: &[String], trip_ids: &[String]) -> Self {
        VehicleFilter {
            route_ids: route_ids.to_vec(),
            trip_ids: trip_ids.to_vec(),
            ..VehicleFilter::default()
        }
    }

    /// Route scope only, trip selection ignored.
    pub fn routes_only(route_ids: &[String]) -> Self {
        VehicleFilter {
            route_ids: route_ids.to_vec(),
            apply_trip_filter: false,
            ..VehicleFilter::default()
        }
    }
}

/// The request shape a filter maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VehicleQuery {
    /// Fetch by route, keep vehicles without a trip.
    NoTrip { route_ids: Vec<String> },
    /// Fetch by route, keep vehicles on deadheading trips.
    NonRevenue { route_ids: Vec<String> },
    ByTrip { trip_ids: Vec<String> },
    ByRoute { route_ids: Vec<String> },
    Unfiltered { limit: usize },
}

impl VehicleQuery {
    /// Rules are evaluated in order: no-trip sentinel, non-revenue sentinel,
    /// concrete trips, routes, nothing. Sentinels select a mode and never end
    /// up in a trip filter.
    pub fn from_filter(filter: &VehicleFilter) -> Self {
        if filter.apply_trip_filter {
            let has = |sentinel: &str| filter.trip_ids.iter().any(|id| id == sentinel);

            if has(NO_TRIP_SENTINEL) {
                return VehicleQuery::NoTrip {
                    route_ids: filter.route_ids.clone(),
                };
            }
            if has(NONREV_SENTINEL) {
                return VehicleQuery::NonRevenue {
                    route_ids: filter.route_ids.clone(),
                };
            }

            let trip_ids: Vec<String> = filter
                .trip_ids
                .iter()
                .filter(|id| id.as_str() != NO_TRIP_SENTINEL && id.as_str() != NONREV_SENTINEL)
                .cloned()
                .collect();
            if !trip_ids.is_empty() {
                return VehicleQuery::ByTrip { trip_ids };
            }
        }

        if !filter.route_ids.is_empty() {
            VehicleQuery::ByRoute {
                route_ids: filter.route_ids.clone(),
            }
        } else {
            VehicleQuery::Unfiltered {
                limit: filter.limit,
            }
        }
    }
}

/// Run one vehicle fetch for `query`, applying the client-side narrowing the
/// sentinel modes need.
pub async fn fetch_vehicles<A: TransitApi>(api: &A, query: &VehicleQuery) -> Result<VehicleDocument> {
    match query {
        VehicleQuery::NoTrip { route_ids } => {
            let mut document = fm_api::vehicles_by_route(api, route_ids).await?;
            document.data.retain(|v| !v.has_trip());
            Ok(document)
        }
        VehicleQuery::NonRevenue { route_ids } => {
            let mut document = fm_api::vehicles_by_route(api, route_ids).await?;
            document.data.retain(|v| v.is_non_revenue());
            Ok(document)
        }
        VehicleQuery::ByTrip { trip_ids } => fm_api::vehicles_by_trip(api, trip_ids).await,
        VehicleQuery::ByRoute { route_ids } => fm_api::vehicles_by_route(api, route_ids).await,
        VehicleQuery::Unfiltered { limit } => fm_api::vehicles_page(api, *limit, 0).await,
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// Latest poll result as seen by the views.
#[derive(Debug, Clone, Default)]
pub struct VehicleSnapshot {
    pub vehicles: Vec<Vehicle>,
    pub included: IncludedIndex,
    pub loading: bool,
    pub error: Option<String>,
    pub last_synced: Option<DateTime<Utc>>,
    /// Filter configuration this snapshot is accepting results for.
    pub generation: u64,
}

impl VehicleSnapshot {
    /// Store the outcome of a fetch issued under `generation`. Results from a
    /// superseded configuration are dropped; failures keep the last vehicles.
    pub fn apply(&mut self, generation: u64, result: Result<VehicleDocument>, now: DateTime<Utc>) -> bool {
        if generation != self.generation {
            debug!(
                "Dropping vehicle result from generation {} (current {})",
                generation, self.generation
            );
            return false;
        }

        match result {
            Ok(document) => {
                self.vehicles = document.data;
                self.included = IncludedIndex::from_included(document.included);
                self.last_synced = Some(now);
                self.error = None;
            }
            Err(e) => {
                warn!("Vehicle refresh failed: {}", e);
                self.error = Some(e.to_string());
            }
        }
        true
    }
}

fn lock(shared: &Mutex<VehicleSnapshot>) -> MutexGuard<'_, VehicleSnapshot> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn poll_once<A: TransitApi>(
    api: &A,
    query: &VehicleQuery,
    shared: &Mutex<VehicleSnapshot>,
    generation: u64,
    initial: bool,
) {
    if initial {
        let mut snapshot = lock(shared);
        if snapshot.generation == generation {
            snapshot.loading = true;
        }
    }

    let result = fetch_vehicles(api, query).await;

    let mut snapshot = lock(shared);
    if snapshot.apply(generation, result, Utc::now()) && initial {
        snapshot.loading = false;
    }
}

// ============================================================================
// Poller
// ============================================================================

/// Owns the periodic refresh task. At most one task exists at a time; it is
/// replaced on every `start` and aborted on `stop` or drop.
pub struct VehiclePoller<A: TransitApi> {
    api: Arc<A>,
    shared: Arc<Mutex<VehicleSnapshot>>,
    task: Option<JoinHandle<()>>,
    filter: Option<VehicleFilter>,
    interval: Duration,
}

impl<A: TransitApi> VehiclePoller<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self::with_interval(api, POLL_INTERVAL)
    }

    pub fn with_interval(api: Arc<A>, interval: Duration) -> Self {
        VehiclePoller {
            api,
            shared: Arc::new(Mutex::new(VehicleSnapshot::default())),
            task: None,
            filter: None,
            interval,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        lock(&self.shared).clone()
    }

    /// Tear down the current task and start polling for `filter`.
    pub fn start(&mut self, filter: VehicleFilter) {
        self.stop();

        let generation = {
            let mut snapshot = lock(&self.shared);
            snapshot.generation += 1;
            snapshot.generation
        };

        let query = VehicleQuery::from_filter(&filter);
        info!(
            "Polling vehicles every {}s with {:?} (generation {})",
            self.interval.as_secs(),
            query,
            generation
        );

        let api = Arc::clone(&self.api);
        let shared = Arc::clone(&self.shared);
        let period = self.interval;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            ticker.tick().await;
            poll_once(api.as_ref(), &query, &shared, generation, true).await;

            loop {
                ticker.tick().await;
                poll_once(api.as_ref(), &query, &shared, generation, false).await;
            }
        }));
        self.filter = Some(filter);
    }

    /// Restart only when the filter differs from the running one.
    pub fn ensure(&mut self, filter: VehicleFilter) -> bool {
        if self.is_running() && self.filter.as_ref() == Some(&filter) {
            return false;
        }
        self.start(filter);
        true
    }

    /// Abort the task. A first fetch cut short here never clears the
    /// loading flag itself.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        lock(&self.shared).loading = false;
    }
}

impl<A: TransitApi> Drop for VehiclePoller<A> {
    fn drop(&mut self) {
        self.stop();
    }
}
