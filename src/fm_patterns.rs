// Groups the trips of the selected routes into (headsign, direction) patterns
// and annotates each with the number of vehicles currently running it.

use crate::fm_api::{self, Result, TransitApi};
use crate::fm_models::{
    Pattern, PatternKind, Trip, Vehicle, direction_label, merge_unique,
};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

pub const PATTERN_TRIP_PAGE_SIZE: usize = 100;
/// Upper bound on trips pulled for one route selection.
pub const MAX_PATTERN_TRIPS: usize = 1000;

pub const NON_REVENUE_LABEL: &str = "Non-revenue";
pub const NO_TRIP_LABEL: &str = "No active trip";

/// Page through every trip of `route_ids`, one request at a time, stopping at
/// the first short page or once `MAX_PATTERN_TRIPS` have been collected.
pub async fn fetch_all_trips<A: TransitApi>(api: &A, route_ids: &[String]) -> Result<Vec<Trip>> {
    let mut trips: Vec<Trip> = Vec::new();
    if route_ids.is_empty() {
        return Ok(trips);
    }

    let mut offset = 0;
    loop {
        let page = fm_api::trips_page(api, route_ids, PATTERN_TRIP_PAGE_SIZE, offset).await?;
        let received = page.data.len();
        if received == 0 {
            break;
        }

        merge_unique(&mut trips, page.data);
        offset += PATTERN_TRIP_PAGE_SIZE;

        if received < PATTERN_TRIP_PAGE_SIZE {
            break;
        }
        if trips.len() >= MAX_PATTERN_TRIPS {
            warn!(
                "Stopped loading trips for {:?} at {} records",
                route_ids,
                trips.len()
            );
            break;
        }
    }

    debug!("Loaded {} trips for {:?}", trips.len(), route_ids);
    Ok(trips)
}

/// Group trips by (headsign, direction). The first trip seen for a key seeds
/// the label; every trip with that key adds its id once.
pub fn group_trips(trips: &[Trip], fallback_route: &str) -> Vec<Pattern> {
    let mut patterns: Vec<Pattern> = Vec::new();
    let mut slots: HashMap<(&str, u8), usize> = HashMap::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for trip in trips {
        let headsign = trip.attributes.headsign.as_str();
        let direction_id = trip.attributes.direction_id;

        let slot = *slots.entry((headsign, direction_id)).or_insert_with(|| {
            patterns.push(Pattern {
                headsign: headsign.to_string(),
                direction_id: Some(direction_id),
                route_id: trip.route_id().unwrap_or(fallback_route).to_string(),
                display_name: format!("{}: {}", direction_label(direction_id), headsign),
                trip_ids: Vec::new(),
                active_count: 0,
                kind: PatternKind::Trips,
            });
            patterns.len() - 1
        });

        if seen.insert(trip.id.as_str()) {
            patterns[slot].trip_ids.push(trip.id.clone());
        }
    }

    patterns
}

/// Set `active_count` on every trip pattern. `vehicles` must be the
/// unfiltered set for the selected routes, otherwise a selected pattern would
/// hide the others' counts.
pub fn count_active(patterns: &mut [Pattern], vehicles: &[Vehicle]) {
    let mut per_trip: HashMap<&str, usize> = HashMap::new();
    for trip_id in vehicles.iter().filter_map(|v| v.trip_id()) {
        *per_trip.entry(trip_id).or_default() += 1;
    }

    for pattern in patterns.iter_mut().filter(|p| !p.is_synthetic()) {
        pattern.active_count = pattern
            .trip_ids
            .iter()
            .map(|id| per_trip.get(id.as_str()).copied().unwrap_or(0))
            .sum();
    }
}

/// Pseudo-patterns for deadheading and trip-less vehicles, present only when
/// at least one vehicle falls into them.
pub fn synthetic_patterns(vehicles: &[Vehicle], route_id: &str) -> Vec<Pattern> {
    let non_revenue = vehicles.iter().filter(|v| v.is_non_revenue()).count();
    let no_trip = vehicles.iter().filter(|v| !v.has_trip()).count();

    let synthetic = |kind: PatternKind, label: &str, count: usize| Pattern {
        headsign: label.to_string(),
        direction_id: None,
        route_id: route_id.to_string(),
        display_name: label.to_string(),
        trip_ids: Vec::new(),
        active_count: count,
        kind,
    };

    let mut patterns = Vec::new();
    if non_revenue > 0 {
        patterns.push(synthetic(PatternKind::NonRevenue, NON_REVENUE_LABEL, non_revenue));
    }
    if no_trip > 0 {
        patterns.push(synthetic(PatternKind::NoTrip, NO_TRIP_LABEL, no_trip));
    }
    patterns
}

pub fn build_patterns(trips: &[Trip], vehicles: &[Vehicle], route_ids: &[String]) -> Vec<Pattern> {
    let Some(first_route) = route_ids.first() else {
        return Vec::new();
    };

    let mut patterns = group_trips(trips, first_route);
    count_active(&mut patterns, vehicles);
    patterns.extend(synthetic_patterns(vehicles, first_route));
    patterns
}

/// Pattern list for the current route selection. Trips are reloaded in full
/// whenever the selection changes; patterns are rebuilt wholesale whenever
/// trips or vehicles change.
#[derive(Debug, Clone, Default)]
pub struct PatternAggregator {
    route_ids: Vec<String>,
    trips: Vec<Trip>,
    patterns: Vec<Pattern>,
    loading: bool,
    error: Option<String>,
}

impl PatternAggregator {
    pub fn new() -> Self {
        PatternAggregator::default()
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn find(&self, key: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.key() == key)
    }

    pub async fn set_routes<A: TransitApi>(
        &mut self,
        api: &A,
        route_ids: &[String],
        vehicles: &[Vehicle],
    ) {
        if self.route_ids == route_ids {
            self.recount(vehicles);
            return;
        }

        self.route_ids = route_ids.to_vec();
        self.trips.clear();
        self.patterns.clear();
        self.error = None;

        if self.route_ids.is_empty() {
            self.loading = false;
            return;
        }

        self.loading = true;
        match fetch_all_trips(api, &self.route_ids).await {
            Ok(trips) => self.trips = trips,
            Err(e) => {
                warn!("Loading patterns for {:?} failed: {}", self.route_ids, e);
                self.error = Some(e.to_string());
            }
        }
        self.loading = false;

        self.recount(vehicles);
    }

    pub fn recount(&mut self, vehicles: &[Vehicle]) {
        self.patterns = build_patterns(&self.trips, vehicles, &self.route_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fm_models::{NO_TRIP_SENTINEL, NONREV_SENTINEL};
    use crate::fm_testing::{FakeApi, ids, trip, vehicle};
    use std::collections::BTreeMap;

    fn pattern_sets(patterns: &[Pattern]) -> BTreeMap<String, Vec<String>> {
        patterns
            .iter()
            .map(|p| {
                let mut trip_ids = p.trip_ids.clone();
                trip_ids.sort();
                (p.key(), trip_ids)
            })
            .collect()
    }

    fn red_trips() -> Vec<Trip> {
        vec![
            trip("T1", "Alewife", 0, "Red"),
            trip("T2", "Braintree", 1, "Red"),
            trip("T3", "Alewife", 0, "Red"),
            trip("T4", "Ashmont", 1, "Red"),
            trip("T5", "Braintree", 1, "Red"),
            trip("T6", "Alewife", 1, "Red"),
            trip("T3", "Alewife", 0, "Red"),
        ]
    }

    #[test]
    fn test_grouping_by_headsign_and_direction() {
        let patterns = group_trips(&red_trips(), "Red");
        assert_eq!(patterns.len(), 4);

        let alewife = &patterns[0];
        assert_eq!(alewife.display_name, "Outbound: Alewife");
        assert_eq!(alewife.trip_ids, ids(&["T1", "T3"]));
        assert_eq!(patterns[1].display_name, "Inbound: Braintree");
        assert_eq!(patterns[3].display_name, "Inbound: Alewife");
        assert!(patterns.iter().all(|p| p.route_id == "Red"));
    }

    #[test]
    fn test_grouping_is_order_independent() {
        let trips = red_trips();
        let expected = pattern_sets(&group_trips(&trips, "Red"));

        let mut reversed = trips.clone();
        reversed.reverse();
        assert_eq!(pattern_sets(&group_trips(&reversed, "Red")), expected);

        let mut rotated = trips.clone();
        rotated.rotate_left(3);
        assert_eq!(pattern_sets(&group_trips(&rotated, "Red")), expected);

        // Running it twice changes nothing.
        assert_eq!(pattern_sets(&group_trips(&trips, "Red")), expected);
    }

    #[test]
    fn test_active_counts_match_vehicle_membership() {
        let vehicles = vec![
            vehicle("y1", Some("Red"), Some("T1")),
            vehicle("y2", Some("Red"), Some("T3")),
            vehicle("y3", Some("Red"), Some("T2")),
            vehicle("y4", Some("Red"), Some("T9")),
            vehicle("y5", Some("Red"), None),
        ];
        let mut patterns = group_trips(&red_trips(), "Red");
        count_active(&mut patterns, &vehicles);

        for pattern in &patterns {
            let expected = vehicles
                .iter()
                .filter(|v| v.trip_id().is_some_and(|t| pattern.trip_ids.iter().any(|id| id == t)))
                .count();
            assert_eq!(pattern.active_count, expected, "{}", pattern.display_name);
        }
        assert_eq!(patterns[0].active_count, 2);
    }

    #[test]
    fn test_example_scenario_yields_two_patterns() {
        let trips = vec![trip("T1", "Alewife", 0, "Red"), trip("T2", "Braintree", 1, "Red")];
        let vehicles = vec![
            vehicle("y1", Some("Red"), Some("T1")),
            vehicle("y2", Some("Red"), Some("T1")),
            vehicle("y3", Some("Red"), Some("T2")),
            vehicle("y4", Some("Red"), Some("T2")),
            vehicle("y5", Some("Red"), Some("T2")),
        ];

        let patterns = build_patterns(&trips, &vehicles, &ids(&["Red"]));
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].active_count, 2);
        assert_eq!(patterns[1].active_count, 3);
        assert!(patterns.iter().all(|p| !p.is_synthetic()));
    }

    #[test]
    fn test_synthetic_patterns_appear_only_with_vehicles() {
        let trips = vec![trip("T1", "Alewife", 0, "Red")];
        let vehicles = vec![
            vehicle("y1", Some("Red"), Some("T1")),
            vehicle("y2", Some("Red"), Some("NONREV-1001")),
            vehicle("y3", Some("Red"), Some("NONREV-1002")),
            vehicle("y4", Some("Red"), None),
        ];

        let patterns = build_patterns(&trips, &vehicles, &ids(&["Red"]));
        assert_eq!(patterns.len(), 3);

        let non_revenue = &patterns[1];
        assert_eq!(non_revenue.kind, PatternKind::NonRevenue);
        assert_eq!(non_revenue.active_count, 2);
        assert_eq!(non_revenue.selection_ids(), vec![NONREV_SENTINEL.to_string()]);

        let no_trip = &patterns[2];
        assert_eq!(no_trip.kind, PatternKind::NoTrip);
        assert_eq!(no_trip.active_count, 1);
        assert_eq!(no_trip.selection_ids(), vec![NO_TRIP_SENTINEL.to_string()]);

        let without = build_patterns(&trips, &vehicles[..1], &ids(&["Red"]));
        assert!(without.iter().all(|p| !p.is_synthetic()));
    }

    #[test]
    fn test_no_routes_means_no_patterns() {
        let vehicles = vec![vehicle("y1", None, None)];
        assert!(build_patterns(&red_trips(), &vehicles, &[]).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_trips_pages_to_completion() {
        let trips: Vec<Trip> = (0..250).map(|i| trip(&format!("T{}", i), "Alewife", 0, "Red")).collect();
        let api = FakeApi::new().with_trips(trips);

        let loaded = fetch_all_trips(&api, &ids(&["Red"])).await.unwrap();
        assert_eq!(loaded.len(), 250);
        let offsets: Vec<Option<usize>> = api.calls("trips").iter().map(|q| q.offset).collect();
        assert_eq!(offsets, vec![Some(0), Some(100), Some(200)]);
    }

    #[tokio::test]
    async fn test_fetch_all_trips_stops_at_ceiling() {
        let trips: Vec<Trip> = (0..1500).map(|i| trip(&format!("T{}", i), "Alewife", 0, "Red")).collect();
        let api = FakeApi::new().with_trips(trips);

        let loaded = fetch_all_trips(&api, &ids(&["Red"])).await.unwrap();
        assert_eq!(loaded.len(), MAX_PATTERN_TRIPS);
        assert_eq!(api.call_count("trips"), 10);
    }

    #[tokio::test]
    async fn test_aggregator_reloads_only_on_route_change() {
        let api = FakeApi::new().with_trips(red_trips());
        let vehicles = vec![vehicle("y1", Some("Red"), Some("T1"))];
        let mut aggregator = PatternAggregator::new();

        aggregator.set_routes(&api, &ids(&["Red"]), &vehicles).await;
        assert_eq!(aggregator.patterns().len(), 4);
        assert_eq!(aggregator.patterns()[0].active_count, 1);

        let more = vec![
            vehicle("y1", Some("Red"), Some("T1")),
            vehicle("y2", Some("Red"), Some("T3")),
        ];
        aggregator.set_routes(&api, &ids(&["Red"]), &more).await;
        assert_eq!(api.call_count("trips"), 1);
        assert_eq!(aggregator.patterns()[0].active_count, 2);

        aggregator.set_routes(&api, &[], &more).await;
        assert!(aggregator.patterns().is_empty());
        assert!(!aggregator.is_loading());
    }

    #[tokio::test]
    async fn test_aggregator_surfaces_errors() {
        let api = FakeApi::new();
        api.fail_trips(true);
        let mut aggregator = PatternAggregator::new();

        aggregator
            .set_routes(&api, &ids(&["Red"]), &[vehicle("y1", Some("Red"), None)])
            .await;
        assert_eq!(aggregator.error(), Some("500: Internal error"));
        assert!(!aggregator.is_loading());
        // The trip-less vehicle still shows up as a pseudo-pattern.
        assert_eq!(aggregator.patterns().len(), 1);
    }
}
