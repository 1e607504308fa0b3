// User selection, list pagination and the aggregated error banner.
// Nothing here touches the network.

use crate::fm_models::{Pattern, Vehicle};
use crate::fm_poller::VehicleFilter;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const PAGE_SIZE_CHOICES: [usize; 4] = [10, 20, 50, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    List,
    Map,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterState {
    selected_routes: Vec<String>,
    selected_trips: Vec<String>,
    /// Key of the pattern the trip selection came from, if any.
    selected_pattern: Option<String>,
    page: usize,
    page_size: usize,
    pub view_mode: ViewMode,
}

impl Default for FilterState {
    fn default() -> Self {
        FilterState {
            selected_routes: Vec::new(),
            selected_trips: Vec::new(),
            selected_pattern: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            view_mode: ViewMode::List,
        }
    }
}

impl FilterState {
    pub fn new() -> Self {
        FilterState::default()
    }

    pub fn selected_routes(&self) -> &[String] {
        &self.selected_routes
    }

    pub fn selected_trips(&self) -> &[String] {
        &self.selected_trips
    }

    pub fn selected_pattern(&self) -> Option<&str> {
        self.selected_pattern.as_deref()
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// A new route selection invalidates any trip or pattern picked under the
    /// previous one.
    pub fn set_routes(&mut self, route_ids: Vec<String>) {
        if route_ids != self.selected_routes {
            self.selected_trips.clear();
            self.selected_pattern = None;
        }
        self.selected_routes = route_ids;
        self.page = 1;
    }

    pub fn set_trips(&mut self, trip_ids: Vec<String>) {
        self.selected_trips = trip_ids;
        self.selected_pattern = None;
        self.page = 1;
    }

    pub fn select_pattern(&mut self, pattern: &Pattern) {
        self.selected_trips = pattern.selection_ids();
        self.selected_pattern = Some(pattern.key());
        self.page = 1;
    }

    pub fn clear_trip_filter(&mut self) {
        self.set_trips(Vec::new());
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.page = 1;
    }

    /// Pages are 1-based and clamped to what `total` items can fill.
    pub fn set_page(&mut self, page: usize, total: usize) {
        let last = total_pages(total, self.page_size);
        self.page = page.clamp(1, last);
    }

    pub fn next_page(&mut self, total: usize) {
        self.set_page(self.page + 1, total);
    }

    pub fn prev_page(&mut self, total: usize) {
        self.set_page(self.page.saturating_sub(1), total);
    }

    pub fn toggle_view(&mut self) {
        self.view_mode = match self.view_mode {
            ViewMode::List => ViewMode::Map,
            ViewMode::Map => ViewMode::List,
        };
    }

    /// Filter for the main vehicle feed.
    pub fn vehicle_filter(&self) -> VehicleFilter {
        VehicleFilter::new(&self.selected_routes, &self.selected_trips)
    }

    /// Route-scoped feed that ignores the trip selection, used for pattern
    /// counts. `None` when no route is selected, and when no trip is
    /// selected either, since the main feed already carries those vehicles.
    pub fn counts_filter(&self) -> Option<VehicleFilter> {
        if self.selected_routes.is_empty() || self.selected_trips.is_empty() {
            None
        } else {
            Some(VehicleFilter::routes_only(&self.selected_routes))
        }
    }

    /// Vehicles to show: the poller's set narrowed to the selected routes,
    /// in case the upstream answered with more than was asked for.
    pub fn visible_vehicles<'a>(&self, vehicles: &'a [Vehicle]) -> Vec<&'a Vehicle> {
        if self.selected_routes.is_empty() {
            return vehicles.iter().collect();
        }
        vehicles
            .iter()
            .filter(|v| {
                v.route_id()
                    .map(|route| self.selected_routes.iter().any(|r| r == route))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn page_slice(&self, total: usize) -> PageSlice {
        paginate(total, self.page, self.page_size)
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Half-open index range `[start, end)` of one list page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSlice {
    pub start: usize,
    pub end: usize,
    pub total: usize,
    pub total_pages: usize,
}

impl PageSlice {
    pub fn apply<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let end = self.end.min(items.len());
        let start = self.start.min(end);
        &items[start..end]
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

pub fn total_pages(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1)).max(1)
}

pub fn paginate(total: usize, page: usize, page_size: usize) -> PageSlice {
    let page_size = page_size.max(1);
    let start = (page.max(1) - 1) * page_size;
    PageSlice {
        start: start.min(total),
        end: (start + page_size).min(total),
        total,
        total_pages: total_pages(total, page_size),
    }
}

// ============================================================================
// Error banner
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Vehicles,
    Routes,
    Trips,
    Patterns,
}

impl Subsystem {
    pub fn name(&self) -> &'static str {
        match self {
            Subsystem::Vehicles => "Vehicles",
            Subsystem::Routes => "Routes",
            Subsystem::Trips => "Trips",
            Subsystem::Patterns => "Patterns",
        }
    }
}

/// Collects the currently failing subsystems. Dismissing hides the banner
/// until the set of messages changes.
#[derive(Debug, Clone, Default)]
pub struct ErrorBanner {
    lines: Vec<String>,
    dismissed: Option<Vec<String>>,
}

impl ErrorBanner {
    pub fn new() -> Self {
        ErrorBanner::default()
    }

    pub fn update(&mut self, errors: &[(Subsystem, Option<&str>)]) {
        self.lines = errors
            .iter()
            .filter_map(|(subsystem, error)| {
                error.map(|message| format!("{}: {}", subsystem.name(), message))
            })
            .collect();

        if self.dismissed.as_ref().is_some_and(|d| *d != self.lines) {
            self.dismissed = None;
        }
    }

    pub fn dismiss(&mut self) {
        self.dismissed = Some(self.lines.clone());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_visible(&self) -> bool {
        !self.lines.is_empty() && self.dismissed.is_none()
    }
}
