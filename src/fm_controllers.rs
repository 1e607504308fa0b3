// Controllers for the fleet monitor: menu loop and selection handling.
use crate::fm_api::TransitApi;
use crate::fm_models::{Pattern, Route, Vehicle};
use crate::fm_pagers::{RoutePager, TripPager};
use crate::fm_patterns::PatternAggregator;
use crate::fm_poller::{POLL_INTERVAL, VehiclePoller};
use crate::fm_state::{ErrorBanner, FilterState, PAGE_SIZE_CHOICES, Subsystem, ViewMode};
use crate::fm_views::{self, FMViews, MapView};
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Display refresh cadence in live view. Independent of the poll interval.
const RENDER_TICK: Duration = Duration::from_secs(1);

pub struct FMControllers<A: TransitApi> {
    api: Arc<A>,
    state: FilterState,
    routes: RoutePager,
    trips: TripPager,
    patterns: PatternAggregator,
    /// Feed for what is on screen.
    poller: VehiclePoller<A>,
    /// Route-scoped feed without the trip selection, for pattern counts.
    /// Only runs while a trip filter narrows the main feed.
    counts: VehiclePoller<A>,
    banner: ErrorBanner,
    map: MapView,
    input: Lines<BufReader<Stdin>>,
}

impl<A: TransitApi> FMControllers<A> {
    pub fn new(api: A) -> Self {
        let api = Arc::new(api);
        FMControllers {
            poller: VehiclePoller::new(Arc::clone(&api)),
            counts: VehiclePoller::new(Arc::clone(&api)),
            api,
            state: FilterState::new(),
            routes: RoutePager::new(),
            trips: TripPager::new(),
            patterns: PatternAggregator::new(),
            banner: ErrorBanner::new(),
            map: MapView::new(),
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Main application loop
    pub async fn run(&mut self) {
        FMViews::show_welcome();
        fm_views::init_marker_style();

        println!("\n🔄 Loading routes and vehicles...");
        self.sync_pollers();
        self.routes.load_initial(self.api.as_ref()).await;

        loop {
            self.render_once();
            FMViews::show_menu(&self.state);

            let Some(choice) = self.read_input().await else {
                break;
            };

            match choice.as_str() {
                "1" => self.handle_route_selection().await,
                "2" => self.handle_pattern_selection().await,
                "3" => self.handle_trip_selection().await,
                "4" => {
                    self.state.clear_trip_filter();
                    self.sync_pollers();
                }
                "5" => self.live_view().await,
                "6" => {
                    let total = self.visible_count();
                    self.state.next_page(total);
                }
                "7" => {
                    let total = self.visible_count();
                    self.state.prev_page(total);
                }
                "8" => self.handle_page_size().await,
                "9" => self.state.toggle_view(),
                "r" | "R" => {
                    let snapshot = self.poller.snapshot();
                    let visible = self.state.visible_vehicles(&snapshot.vehicles);
                    self.map.recenter(&visible);
                }
                "d" | "D" => self.banner.dismiss(),
                "0" | "q" => break,
                "" => {}
                other => FMViews::invalid_choice(other),
            }
        }

        self.poller.stop();
        self.counts.stop();
        FMViews::goodbye_message();
    }

    async fn handle_route_selection(&mut self) {
        loop {
            FMViews::show_route_picker(
                self.routes.routes(),
                self.routes.has_more(),
                self.routes.pager().is_loading(),
                self.routes.error(),
            );
            FMViews::prompt("Routes");

            let Some(input) = self.read_input().await else {
                return;
            };
            match input.as_str() {
                "" => return,
                "m" | "M" => self.routes.load_more(self.api.as_ref()).await,
                "0" => {
                    self.change_routes(Vec::new()).await;
                    return;
                }
                _ => match parse_selection(&input, self.routes.routes().len()) {
                    Some(indices) => {
                        let ids = indices
                            .into_iter()
                            .map(|i| self.routes.routes()[i].id.clone())
                            .collect();
                        self.change_routes(ids).await;
                        return;
                    }
                    None => FMViews::invalid_choice(&input),
                },
            }
        }
    }

    /// New route scope: restart the feeds, then reload trips and patterns.
    async fn change_routes(&mut self, route_ids: Vec<String>) {
        info!("Route selection changed to {:?}", route_ids);
        self.state.set_routes(route_ids);
        self.sync_pollers();

        let route_ids = self.state.selected_routes().to_vec();
        let vehicles = self.count_vehicles();
        self.trips.set_routes(self.api.as_ref(), &route_ids).await;
        self.patterns
            .set_routes(self.api.as_ref(), &route_ids, &vehicles)
            .await;
    }

    async fn handle_pattern_selection(&mut self) {
        if self.state.selected_routes().is_empty() {
            FMViews::no_route_selected();
            return;
        }

        self.recount_patterns();
        FMViews::show_pattern_picker(
            self.patterns.patterns(),
            self.patterns.is_loading(),
            self.patterns.error(),
        );
        FMViews::prompt("Pattern");

        let Some(input) = self.read_input().await else {
            return;
        };
        match input.as_str() {
            "" => {}
            "0" => {
                self.state.clear_trip_filter();
                self.sync_pollers();
            }
            _ => match parse_selection(&input, self.patterns.patterns().len()).as_deref() {
                Some([index]) => {
                    let pattern = self.patterns.patterns()[*index].clone();
                    self.select_pattern(&pattern);
                }
                _ => FMViews::invalid_choice(&input),
            },
        }
    }

    /// Unfiltered vehicles of the selected routes. Vehicles a feed still
    /// holds from an earlier route scope are dropped.
    fn count_vehicles(&self) -> Vec<Vehicle> {
        let snapshot = if self.state.selected_trips().is_empty() {
            self.poller.snapshot()
        } else {
            self.counts.snapshot()
        };
        self.state
            .visible_vehicles(&snapshot.vehicles)
            .into_iter()
            .cloned()
            .collect()
    }

    fn recount_patterns(&mut self) {
        let vehicles = self.count_vehicles();
        self.patterns.recount(&vehicles);
    }

    fn select_pattern(&mut self, pattern: &Pattern) {
        info!("Pattern selected: {}", pattern.display_name);
        self.state.select_pattern(pattern);
        self.sync_pollers();
    }

    async fn handle_trip_selection(&mut self) {
        if self.state.selected_routes().is_empty() {
            FMViews::no_route_selected();
            return;
        }

        loop {
            FMViews::show_trip_picker(
                self.trips.trips(),
                self.trips.has_more(),
                self.trips.pager().is_loading(),
                self.trips.error(),
            );
            FMViews::prompt("Trip");

            let Some(input) = self.read_input().await else {
                return;
            };
            match input.as_str() {
                "" => return,
                "m" | "M" => self.trips.load_more(self.api.as_ref()).await,
                "0" => {
                    self.state.clear_trip_filter();
                    self.sync_pollers();
                    return;
                }
                _ => match parse_selection(&input, self.trips.trips().len()) {
                    Some(indices) => {
                        let ids = indices
                            .into_iter()
                            .map(|i| self.trips.trips()[i].id.clone())
                            .collect();
                        self.state.set_trips(ids);
                        self.sync_pollers();
                        return;
                    }
                    None => FMViews::invalid_choice(&input),
                },
            }
        }
    }

    async fn handle_page_size(&mut self) {
        let choices: Vec<String> = PAGE_SIZE_CHOICES.iter().map(|n| n.to_string()).collect();
        FMViews::prompt(&format!("Page size ({})", choices.join("/")));

        let Some(input) = self.read_input().await else {
            return;
        };
        match input.parse::<usize>() {
            Ok(size) if PAGE_SIZE_CHOICES.contains(&size) => self.state.set_page_size(size),
            _ => FMViews::invalid_choice(&input),
        }
    }

    /// Re-render every second until Enter is pressed. Vehicles keep refreshing
    /// in the background at their own cadence.
    async fn live_view(&mut self) {
        let mut ticker = tokio::time::interval(RENDER_TICK);
        let hint = format!(
            "Vehicles refresh every {} seconds, display every second",
            POLL_INTERVAL.as_secs()
        );

        loop {
            tokio::select! {
                line = self.input.next_line() => {
                    if let Err(e) = line {
                        warn!("Error reading input: {}", e);
                    }
                    println!("\n👋 Exiting live view...");
                    return;
                }
                _ = ticker.tick() => {
                    FMViews::show_live_header(&hint);
                    self.render_once();
                }
            }
        }
    }

    fn render_once(&mut self) {
        let snapshot = self.poller.snapshot();
        self.refresh_banner(snapshot.error.as_deref());

        if self.state.view_mode == ViewMode::Map {
            let visible = self.state.visible_vehicles(&snapshot.vehicles);
            self.map.follow(&visible, self.state.selected_routes());
        }

        let routes: Vec<&Route> = self
            .state
            .selected_routes()
            .iter()
            .filter_map(|id| self.routes.find(id))
            .collect();
        let pattern = self
            .state
            .selected_pattern()
            .and_then(|key| self.patterns.find(key));

        FMViews::show_selection(&self.state, &routes, pattern);
        FMViews::show_dashboard(&snapshot, &self.state, &self.banner, &self.map, Utc::now());
    }

    fn refresh_banner(&mut self, vehicle_error: Option<&str>) {
        let counts_error = if self.counts.is_running() {
            self.counts.snapshot().error
        } else {
            None
        };
        self.banner.update(&[
            (Subsystem::Vehicles, vehicle_error.or(counts_error.as_deref())),
            (Subsystem::Routes, self.routes.error()),
            (Subsystem::Trips, self.trips.error()),
            (Subsystem::Patterns, self.patterns.error()),
        ]);
    }

    /// Point both vehicle feeds at the current selection. A feed is only
    /// restarted when its filter actually changed. Without a trip filter the
    /// counts feed stays stopped and the main feed serves both.
    fn sync_pollers(&mut self) {
        self.poller.ensure(self.state.vehicle_filter());
        match self.state.counts_filter() {
            Some(filter) => {
                self.counts.ensure(filter);
            }
            None => self.counts.stop(),
        }
    }

    fn visible_count(&self) -> usize {
        let snapshot = self.poller.snapshot();
        self.state.visible_vehicles(&snapshot.vehicles).len()
    }

    /// Next trimmed line from stdin; `None` once input is closed.
    async fn read_input(&mut self) -> Option<String> {
        match self.input.next_line().await {
            Ok(Some(line)) => Some(line.trim().to_string()),
            Ok(None) => None,
            Err(e) => {
                warn!("Error reading input: {}", e);
                None
            }
        }
    }
}

/// Parse `"1, 3"` into zero-based indices, all of which must be in
/// `1..=len`. Duplicates are dropped, order kept.
pub fn parse_selection(input: &str, len: usize) -> Option<Vec<usize>> {
    let mut indices = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let n = part.parse::<usize>().ok()?;
        if n == 0 || n > len {
            return None;
        }
        if !indices.contains(&(n - 1)) {
            indices.push(n - 1);
        }
    }
    if indices.is_empty() { None } else { Some(indices) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fm_models::{NO_TRIP_SENTINEL, PatternKind};
    use crate::fm_testing::{FakeApi, ids, route, trip, vehicle};

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("2", 3), Some(vec![1]));
        assert_eq!(parse_selection("1, 3,1", 3), Some(vec![0, 2]));
        assert_eq!(parse_selection("4", 3), None);
        assert_eq!(parse_selection("0", 3), None);
        assert_eq!(parse_selection("a", 3), None);
        assert_eq!(parse_selection(" , ", 3), None);
    }

    fn fake() -> FakeApi {
        FakeApi::new()
            .with_routes(vec![route("Red"), route("Orange")])
            .with_trips(vec![
                trip("T1", "Alewife", 0, "Red"),
                trip("T2", "Braintree", 1, "Red"),
                trip("O1", "Oak Grove", 0, "Orange"),
            ])
            .with_vehicles(vec![
                vehicle("y1", Some("Red"), Some("T1")),
                vehicle("y2", Some("Red"), Some("T1")),
                vehicle("y3", Some("Red"), Some("T2")),
                vehicle("y4", Some("Red"), None),
                vehicle("y5", Some("Orange"), Some("O1")),
            ])
    }

    fn settle() -> tokio::time::Sleep {
        tokio::time::sleep(Duration::from_millis(10))
    }

    fn pattern_counts<A: TransitApi>(controller: &FMControllers<A>) -> Vec<(String, usize)> {
        controller
            .patterns
            .patterns()
            .iter()
            .map(|p| (p.key(), p.active_count))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_change_scopes_every_feed() {
        let mut controller = FMControllers::new(fake());
        controller.sync_pollers();
        assert!(controller.poller.is_running());
        assert!(!controller.counts.is_running());

        controller.change_routes(ids(&["Red"])).await;
        settle().await;

        assert_eq!(controller.trips.trips().len(), 2);
        assert_eq!(controller.patterns.patterns().len(), 2);
        assert!(!controller.counts.is_running());
        assert_eq!(controller.poller.snapshot().vehicles.len(), 4);

        controller.recount_patterns();
        assert_eq!(
            pattern_counts(&controller),
            vec![
                ("Alewife-0".to_string(), 2),
                ("Braintree-1".to_string(), 1),
                (NO_TRIP_SENTINEL.to_string(), 1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfiltered_routes_share_one_vehicle_request() {
        let mut controller = FMControllers::new(fake());
        controller.change_routes(ids(&["Red"])).await;
        settle().await;
        let before = controller.api.call_count("vehicles");

        tokio::time::sleep(POLL_INTERVAL).await;
        settle().await;
        assert_eq!(controller.api.call_count("vehicles"), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_ignore_previous_route_after_failed_fetch() {
        let api = FakeApi::new()
            .with_routes(vec![route("Red"), route("Orange")])
            .with_trips(vec![trip("T1", "Alewife", 0, "Red")])
            .with_vehicles(vec![
                vehicle("y1", Some("Orange"), None),
                vehicle("y2", Some("Orange"), None),
                vehicle("y3", Some("Red"), Some("T1")),
            ]);
        let mut controller = FMControllers::new(api);
        controller.change_routes(ids(&["Orange"])).await;
        settle().await;

        controller.api.fail_vehicles(true);
        controller.change_routes(ids(&["Red"])).await;
        settle().await;
        controller.recount_patterns();

        assert_eq!(pattern_counts(&controller), vec![("Alewife-0".to_string(), 0)]);
        assert!(
            controller
                .patterns
                .patterns()
                .iter()
                .all(|p| p.kind != PatternKind::NoTrip)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_selection_keeps_counts_feed_unfiltered() {
        let mut controller = FMControllers::new(fake());
        controller.change_routes(ids(&["Red"])).await;
        settle().await;
        controller.recount_patterns();
        assert!(!controller.counts.is_running());

        let no_trip = controller
            .patterns
            .patterns()
            .iter()
            .find(|p| p.kind == PatternKind::NoTrip)
            .cloned()
            .unwrap();
        controller.select_pattern(&no_trip);
        assert!(controller.counts.is_running());
        settle().await;

        let shown = controller.poller.snapshot().vehicles;
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].id, "y4");
        assert_eq!(controller.counts.snapshot().vehicles.len(), 4);
        assert_eq!(controller.state.selected_pattern(), Some(NO_TRIP_SENTINEL));

        controller.recount_patterns();
        assert_eq!(
            pattern_counts(&controller),
            vec![
                ("Alewife-0".to_string(), 2),
                ("Braintree-1".to_string(), 1),
                (NO_TRIP_SENTINEL.to_string(), 1),
            ]
        );

        controller.state.clear_trip_filter();
        controller.sync_pollers();
        assert!(!controller.counts.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_routes_stops_counts_feed() {
        let mut controller = FMControllers::new(fake());
        controller.change_routes(ids(&["Red"])).await;
        controller.change_routes(Vec::new()).await;

        assert!(!controller.counts.is_running());
        assert!(controller.trips.trips().is_empty());
        assert!(controller.patterns.patterns().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_banner_attributes_failures() {
        let api = fake();
        api.fail_routes(true);
        let mut controller = FMControllers::new(api);
        controller.routes.load_initial(controller.api.as_ref()).await;

        controller.refresh_banner(Some("HTTP 503"));
        assert_eq!(
            controller.banner.lines(),
            &["Vehicles: HTTP 503".to_string(), "Routes: 500: Internal error".to_string()][..]
        );
    }
}
