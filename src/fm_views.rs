// Terminal views for the fleet monitor: vehicle cards, ASCII map, pickers.
use crate::fm_models::{
    self, IncludedIndex, Pattern, Route, Trip, Vehicle, VehicleStatus, direction_label,
};
use crate::fm_poller::VehicleSnapshot;
use crate::fm_state::{ErrorBanner, FilterState, PageSlice, ViewMode};
use chrono::{DateTime, Local, Utc};
use geo::{BoundingRect, Coord, MultiPoint, Point, Rect};
use std::io::{self, Write};
use std::sync::OnceLock;

const FALLBACK_ROUTE_COLOR: &str = "003366";
const FALLBACK_TEXT_COLOR: &str = "FFFFFF";

/// Downtown Boston.
pub const DEFAULT_CENTER: (f64, f64) = (42.3601, -71.0589);
/// Degrees shown around the default center (roughly a city-wide view).
const DEFAULT_SPAN: f64 = 0.12;
/// Smallest window a fit may zoom into.
const MIN_FIT_SPAN: f64 = 0.01;
/// Share of the fitted span added on each side.
const FIT_PADDING: f64 = 0.1;

pub const MAP_WIDTH: usize = 64;
pub const MAP_HEIGHT: usize = 22;

pub struct FMViews;

// ============================================================================
// Marker style
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerStyle {
    pub glyph: char,
    pub empty: char,
    pub color: (u8, u8, u8),
}

static MARKER_STYLE: OnceLock<MarkerStyle> = OnceLock::new();

/// Install the default marker style. Only the first call has an effect;
/// returns whether this call was the one that installed it.
pub fn init_marker_style() -> bool {
    let mut installed = false;
    MARKER_STYLE.get_or_init(|| {
        installed = true;
        MarkerStyle {
            glyph: '●',
            empty: '·',
            color: FMViews::parse_hex_color(FALLBACK_ROUTE_COLOR),
        }
    });
    installed
}

pub fn marker_style() -> MarkerStyle {
    init_marker_style();
    MARKER_STYLE.get().copied().unwrap_or(MarkerStyle {
        glyph: '●',
        empty: '·',
        color: (0, 51, 102),
    })
}

// ============================================================================
// Map model
// ============================================================================

/// Visible window of the map. Refits to the vehicles when the route
/// selection changes (once vehicles are available) or on recenter.
#[derive(Debug, Clone)]
pub struct MapView {
    viewport: Rect<f64>,
    fitted_for: Option<Vec<String>>,
}

impl Default for MapView {
    fn default() -> Self {
        MapView {
            viewport: Self::default_viewport(),
            fitted_for: None,
        }
    }
}

impl MapView {
    pub fn new() -> Self {
        MapView::default()
    }

    pub fn viewport(&self) -> Rect<f64> {
        self.viewport
    }

    pub fn default_viewport() -> Rect<f64> {
        let (lat, lon) = DEFAULT_CENTER;
        let half = DEFAULT_SPAN / 2.0;
        Rect::new(
            Coord { x: lon - half, y: lat - half },
            Coord { x: lon + half, y: lat + half },
        )
    }

    /// Bounding window around `vehicles`, padded and never narrower than
    /// the closest zoom. `None` for an empty set.
    pub fn fit(vehicles: &[&Vehicle]) -> Option<Rect<f64>> {
        let points: MultiPoint<f64> = vehicles
            .iter()
            .map(|v| Point::new(v.attributes.longitude, v.attributes.latitude))
            .collect();
        let bounds = points.bounding_rect()?;

        let center = bounds.center();
        let half_w = (bounds.width() * (1.0 + 2.0 * FIT_PADDING)).max(MIN_FIT_SPAN) / 2.0;
        let half_h = (bounds.height() * (1.0 + 2.0 * FIT_PADDING)).max(MIN_FIT_SPAN) / 2.0;
        Some(Rect::new(
            Coord { x: center.x - half_w, y: center.y - half_h },
            Coord { x: center.x + half_w, y: center.y + half_h },
        ))
    }

    /// Follow the route selection. A pending refit waits until vehicles
    /// arrive; with a route selected and nothing to show, the map returns
    /// to the default center.
    pub fn follow(&mut self, vehicles: &[&Vehicle], route_ids: &[String]) {
        if self.fitted_for.as_deref() == Some(route_ids) {
            return;
        }
        match Self::fit(vehicles) {
            Some(rect) => {
                self.viewport = rect;
                self.fitted_for = Some(route_ids.to_vec());
            }
            None if !route_ids.is_empty() => self.viewport = Self::default_viewport(),
            None => {}
        }
    }

    pub fn recenter(&mut self, vehicles: &[&Vehicle]) {
        self.viewport = Self::fit(vehicles).unwrap_or_else(Self::default_viewport);
    }

    /// Grid cell for a position, or `None` when it falls outside the window.
    pub fn project(&self, latitude: f64, longitude: f64, width: usize, height: usize) -> Option<(usize, usize)> {
        let rect = self.viewport;
        if longitude < rect.min().x
            || longitude > rect.max().x
            || latitude < rect.min().y
            || latitude > rect.max().y
        {
            return None;
        }

        let col = (longitude - rect.min().x) / rect.width() * (width.saturating_sub(1)) as f64;
        let row = (rect.max().y - latitude) / rect.height() * (height.saturating_sub(1)) as f64;
        Some((col.round() as usize, row.round() as usize))
    }

    pub fn grid(&self, vehicles: &[&Vehicle], included: &IncludedIndex, width: usize, height: usize) -> MapGrid {
        let style = marker_style();
        let mut grid = MapGrid {
            width,
            cells: vec![None; width * height],
            hidden: 0,
        };

        for vehicle in vehicles {
            let Some((col, row)) = self.project(
                vehicle.attributes.latitude,
                vehicle.attributes.longitude,
                width,
                height,
            ) else {
                grid.hidden += 1;
                continue;
            };

            let color = included
                .route(vehicle.route_id())
                .map(|route| FMViews::parse_hex_color(&route.attributes.color))
                .unwrap_or(style.color);
            let cell = &mut grid.cells[row * width + col];
            match cell {
                Some(existing) => existing.count += 1,
                None => *cell = Some(MapCell { count: 1, color }),
            }
        }
        grid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapCell {
    pub count: usize,
    pub color: (u8, u8, u8),
}

#[derive(Debug, Clone)]
pub struct MapGrid {
    pub width: usize,
    pub cells: Vec<Option<MapCell>>,
    /// Vehicles outside the current window.
    pub hidden: usize,
}

impl MapGrid {
    #[cfg(test)]
    pub fn cell(&self, col: usize, row: usize) -> Option<MapCell> {
        self.cells.get(row * self.width + col).copied().flatten()
    }

    pub fn render(&self) -> Vec<String> {
        let style = marker_style();
        self.cells
            .chunks(self.width.max(1))
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        None => style.empty.to_string(),
                        Some(cell) => {
                            let glyph = match cell.count {
                                1 => style.glyph,
                                2..=9 => char::from_digit(cell.count as u32, 10).unwrap_or('+'),
                                _ => '+',
                            };
                            let (r, g, b) = cell.color;
                            format!("\x1b[38;2;{};{};{}m{}\x1b[0m", r, g, b, glyph)
                        }
                    })
                    .collect::<String>()
            })
            .collect()
    }
}

// ============================================================================
// Views
// ============================================================================

impl FMViews {
    pub fn show_welcome() {
        println!("\n{}", "═".repeat(70));
        println!("  ╔═══════════════════════════════════════════════════════════╗");
        println!("  ║                🚍 FLEET MONITOR - LIVE VEHICLES            ║");
        println!("  ╚═══════════════════════════════════════════════════════════╝");
        println!("{}", "═".repeat(70));
        println!("\n  📡 Vehicle positions refresh every 20 seconds");
        println!("  🗺️  Filter by route, trip or pattern; list or map view");
        println!("\n{}", "═".repeat(70));
    }

    pub fn show_menu(state: &FilterState) {
        let view = match state.view_mode {
            ViewMode::List => "list",
            ViewMode::Map => "map",
        };
        println!("\n{}", "═".repeat(60));
        println!("     🚍 FLEET MONITOR");
        println!("{}", "═".repeat(60));
        println!("\n📋 MENU OPTIONS");
        println!("  1️⃣  Select routes");
        println!("  2️⃣  Select a pattern");
        println!("  3️⃣  Select a trip");
        println!("  4️⃣  Clear trip filter");
        println!("  5️⃣  Live view 🔄");
        println!("  6️⃣  Next page / 7️⃣  Previous page");
        println!("  8️⃣  Page size (now {})", state.page_size());
        println!("  9️⃣  Toggle list/map (now {})", view);
        println!("  r   Recenter map");
        println!("  d   Dismiss errors");
        println!("  0️⃣  Quit application");
        println!("\n{}", "─".repeat(60));
        print!("➜ Your choice: ");
        let _ = io::stdout().flush();
    }

    pub fn prompt(label: &str) {
        print!("➜ {}: ", label);
        let _ = io::stdout().flush();
    }

    pub fn show_banner(banner: &ErrorBanner) {
        if !banner.is_visible() {
            return;
        }
        println!("\n{}", "!".repeat(60));
        println!("❌ Some data could not be loaded (press 'd' to dismiss)");
        for line in banner.lines() {
            println!("  • {}", line);
        }
        println!("{}", "!".repeat(60));
    }

    pub fn show_selection(state: &FilterState, routes: &[&Route], pattern: Option<&Pattern>) {
        let route_names: Vec<String> = if routes.is_empty() {
            state.selected_routes().to_vec()
        } else {
            routes
                .iter()
                .map(|r| Self::colorize(r.display_name(), &r.attributes.color, &r.attributes.text_color))
                .collect()
        };

        print!("  🚏 Routes: ");
        if route_names.is_empty() {
            println!("all");
        } else {
            println!("{}", route_names.join(" "));
        }

        match (pattern, state.selected_trips().len()) {
            (Some(pattern), _) => println!("  🎯 Pattern: {}", pattern.display_name),
            (None, 0) => println!("  🎯 Trips: all"),
            (None, 1) => println!("  🎯 Trip: {}", state.selected_trips()[0]),
            (None, n) => println!("  🎯 Trips: {} selected", n),
        }
    }

    /// Header, banner, then the list page or map, whichever is active.
    pub fn show_dashboard(
        snapshot: &VehicleSnapshot,
        state: &FilterState,
        banner: &ErrorBanner,
        map: &MapView,
        now: DateTime<Utc>,
    ) {
        let visible = state.visible_vehicles(&snapshot.vehicles);

        println!("\n{}", "═".repeat(70));
        print!("🚍 {} vehicles", visible.len());
        match snapshot.last_synced {
            Some(at) => println!(" | last sync {}", Self::local_time(at, "%H:%M:%S")),
            None => println!(),
        }
        println!("{}", "═".repeat(70));
        Self::show_banner(banner);

        if snapshot.loading && snapshot.vehicles.is_empty() {
            println!("\n🔄 Loading vehicles...");
            return;
        }
        if visible.is_empty() {
            println!("\n⚠️  No vehicles match the current selection");
            return;
        }

        match state.view_mode {
            ViewMode::List => {
                let slice = state.page_slice(visible.len());
                Self::show_vehicle_page(&visible, &snapshot.included, state.page(), slice, now);
            }
            ViewMode::Map => Self::show_map(map, &visible, &snapshot.included),
        }
    }

    pub fn show_vehicle_page(
        vehicles: &[&Vehicle],
        included: &IncludedIndex,
        page_number: usize,
        slice: PageSlice,
        now: DateTime<Utc>,
    ) {
        let page = slice.apply(vehicles);
        for (i, vehicle) in page.iter().enumerate() {
            Self::show_vehicle_card(slice.start + i + 1, vehicle, included, now);
            if i + 1 < page.len() {
                println!("{}", "  ┄".repeat(23));
            }
        }

        println!("\n{}", "─".repeat(70));
        println!(
            "📄 Page {} of {} (vehicles {} - {} of {})",
            page_number,
            slice.total_pages,
            slice.start + 1,
            slice.end,
            slice.total
        );
    }

    fn show_vehicle_card(index: usize, vehicle: &Vehicle, included: &IncludedIndex, now: DateTime<Utc>) {
        let route = included.route(vehicle.route_id());
        let trip = included.trip(vehicle.trip_id());
        let stop_name = included
            .stop(vehicle.stop_id())
            .map(|s| s.attributes.name.as_str())
            .filter(|name| !name.is_empty());
        let attrs = &vehicle.attributes;

        let (description, route_name, color, text_color) = match route {
            Some(r) => (
                if r.attributes.description.is_empty() { "Service" } else { r.attributes.description.as_str() },
                r.display_name(),
                r.attributes.color.as_str(),
                r.attributes.text_color.as_str(),
            ),
            None => ("Service", "Unknown route", "", ""),
        };

        println!(
            "\n  {}. {} {}  🚌 {}",
            index,
            Self::colorize(description, color, text_color),
            route_name,
            if attrs.label.is_empty() { vehicle.id.as_str() } else { attrs.label.as_str() }
        );
        println!("     📍 {}", Self::status_text(attrs.current_status, stop_name));
        println!(
            "     🎯 {}",
            Self::destination_text(trip, route, attrs.direction_id)
        );
        println!("     🧭 {:.4}, {:.4}", attrs.latitude, attrs.longitude);
        println!("     👥 {}", attrs.occupancy_status.label());
        println!(
            "     {} | {}",
            Self::freshness_text(vehicle, now),
            Self::local_time(attrs.updated_at, "%H:%M")
        );
    }

    pub fn show_map(map: &MapView, vehicles: &[&Vehicle], included: &IncludedIndex) {
        let grid = map.grid(vehicles, included, MAP_WIDTH, MAP_HEIGHT);
        let rect = map.viewport();

        println!("\n  ┌{}┐", "─".repeat(MAP_WIDTH));
        for line in grid.render() {
            println!("  │{}│", line);
        }
        println!("  └{}┘", "─".repeat(MAP_WIDTH));
        println!(
            "  🗺️  lat {:.4}..{:.4}  lon {:.4}..{:.4}",
            rect.min().y,
            rect.max().y,
            rect.min().x,
            rect.max().x
        );
        if grid.hidden > 0 {
            println!("  ({} vehicles outside the view, press 'r' to recenter)", grid.hidden);
        }
    }

    pub fn show_route_picker(routes: &[Route], has_more: bool, loading: bool, error: Option<&str>) {
        println!("\n🚏 ROUTES ({} loaded)", routes.len());
        println!("{}", "─".repeat(60));
        for (i, route) in routes.iter().enumerate() {
            let badge = if route.attributes.short_name.is_empty() {
                route.id.as_str()
            } else {
                route.attributes.short_name.as_str()
            };
            println!(
                "  {:>3}. {} {}",
                i + 1,
                Self::colorize(badge, &route.attributes.color, &route.attributes.text_color),
                route.attributes.long_name
            );
        }
        if loading {
            println!("  🔄 Loading...");
        }
        if let Some(error) = error {
            println!("  ⚠️  {}", error);
        }
        if has_more {
            println!("    m. Load more routes");
        }
        println!("    0. All routes");
        println!("{}", "─".repeat(60));
        println!("   Enter numbers separated by commas (e.g. 1,3)");
    }

    pub fn show_pattern_picker(patterns: &[Pattern], loading: bool, error: Option<&str>) {
        println!("\n🎯 PATTERNS");
        println!("{}", "─".repeat(60));
        if loading {
            println!("  🔄 Loading trips...");
        }
        if let Some(error) = error {
            println!("  ⚠️  {}", error);
        }
        if patterns.is_empty() && !loading {
            println!("  No patterns for the current selection");
        }
        for (i, pattern) in patterns.iter().enumerate() {
            println!(
                "  {:>3}. {} ({} active, {} trips)",
                i + 1,
                pattern.display_name,
                pattern.active_count,
                pattern.trip_ids.len()
            );
        }
        println!("    0. Clear trip filter");
        println!("{}", "─".repeat(60));
    }

    pub fn show_trip_picker(trips: &[Trip], has_more: bool, loading: bool, error: Option<&str>) {
        println!("\n🧾 TRIPS ({} loaded)", trips.len());
        println!("{}", "─".repeat(60));
        for (i, trip) in trips.iter().enumerate() {
            let headsign = if trip.attributes.headsign.is_empty() {
                "Unknown destination"
            } else {
                trip.attributes.headsign.as_str()
            };
            println!(
                "  {:>3}. {}: {} ({})",
                i + 1,
                direction_label(trip.attributes.direction_id),
                headsign,
                trip.id
            );
        }
        if loading {
            println!("  🔄 Loading...");
        }
        if let Some(error) = error {
            println!("  ⚠️  {}", error);
        }
        if has_more {
            println!("    m. Load more trips");
        }
        println!("    0. Clear trip filter");
        println!("{}", "─".repeat(60));
    }

    pub fn no_route_selected() {
        println!("\n{}", "─".repeat(60));
        println!("✗ No route selected");
        println!("\n💡 Select one or more routes first (option 1)");
        println!("{}", "─".repeat(60));
    }

    pub fn invalid_choice(input: &str) {
        println!("\n✗ Invalid option '{}'", input);
    }

    pub fn show_live_header(refresh_hint: &str) {
        Self::clear_screen();
        println!("{}", "═".repeat(70));
        println!("🔄 LIVE VIEW - {}", Self::local_time(Utc::now(), "%A, %B %d, %Y at %H:%M:%S"));
        println!("   {}", refresh_hint);
        println!("   Press ENTER at any time to return to menu");
        println!("{}", "═".repeat(70));
    }

    pub fn goodbye_message() {
        println!("\n{}", "═".repeat(60));
        println!("       👋 Fleet monitor stopped");
        println!("{}", "═".repeat(60));
        println!();
    }

    pub fn clear_screen() {
        print!("\x1B[2J\x1B[1;1H");
        let _ = io::stdout().flush();
    }

    // ========================================================================
    // Formatting helpers
    // ========================================================================

    /// `"In Transit To: Park Street"`; unknown status carries no stop.
    pub fn status_text(status: VehicleStatus, stop_name: Option<&str>) -> String {
        match status {
            VehicleStatus::Unknown => status.label().to_string(),
            _ => format!("{}: {}", status.label(), stop_name.unwrap_or("Unknown location")),
        }
    }

    /// Trip headsign, else the route's terminus for the vehicle's direction.
    pub fn destination_text(trip: Option<&Trip>, route: Option<&Route>, direction_id: Option<u8>) -> String {
        trip.map(|t| t.attributes.headsign.as_str())
            .filter(|h| !h.is_empty())
            .or_else(|| {
                let direction_id = trip.map(|t| t.attributes.direction_id).or(direction_id)?;
                route?.destination(direction_id)
            })
            .filter(|d| !d.is_empty())
            .unwrap_or("Unknown destination")
            .to_string()
    }

    /// Recomputed from `now` on every render.
    pub fn freshness_text(vehicle: &Vehicle, now: DateTime<Utc>) -> String {
        if vehicle.is_stale(now) {
            format!("🟡 {}m ago", fm_models::minutes_since(vehicle.attributes.updated_at, now))
        } else {
            "🟢 Live".to_string()
        }
    }

    fn local_time(at: DateTime<Utc>, format: &str) -> String {
        at.with_timezone(&Local).format(format).to_string()
    }

    pub fn parse_hex_color(hex_color: &str) -> (u8, u8, u8) {
        let hex = hex_color.trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return (128, 128, 128);
        }
        let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(128);
        let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(128);
        let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(128);
        (r, g, b)
    }

    /// Route colors with the dashboard fallbacks for missing values.
    pub fn route_colors(color: &str, text_color: &str) -> ((u8, u8, u8), (u8, u8, u8)) {
        let pick = |value: &str, fallback: &str| {
            Self::parse_hex_color(if value.is_empty() { fallback } else { value })
        };
        (pick(color, FALLBACK_ROUTE_COLOR), pick(text_color, FALLBACK_TEXT_COLOR))
    }

    fn colorize(text: &str, color: &str, text_color: &str) -> String {
        let ((r, g, b), (fr, fg, fb)) = Self::route_colors(color, text_color);
        format!(
            "\x1b[48;2;{};{};{}m\x1b[38;2;{};{};{}m {} \x1b[0m",
            r, g, b, fr, fg, fb, text
        )
    }
}
