//! Application module
//!
//! Full-screen map with the action pad, count alert and detail panel overlaid.
//! Map clicks and pointer movement are captured by a plugin and turned into
//! workflows by [`AppState`].

mod plugin;
pub(crate) mod settings;
pub(crate) mod state;
mod ui_panels;

use crate::app::plugin::{FeaturePlugin, GraphicsPlugin, InputPlugin};
use crate::app::settings::Settings;
use crate::app::state::{AppState, Services, TilesProvider};
use eframe::egui;
use geo::Rect;
use isochrone_lib::utils;
use walkers::{
    HttpTiles, Map, MapMemory, TileId,
    sources::{Attribution, OpenStreetMap, TileSource},
};

/// Custom OpenTopoMap tile source
pub struct OpenTopoMap;

impl TileSource for OpenTopoMap {
    fn tile_url(&self, tile_id: TileId) -> String {
        format!(
            "https://tile.opentopomap.org/{}/{}/{}.png",
            tile_id.zoom, tile_id.x, tile_id.y
        )
    }

    fn attribution(&self) -> Attribution {
        Attribution {
            text: "© OpenTopoMap (CC-BY-SA)",
            url: "https://opentopomap.org/",
            logo_light: None,
            logo_dark: None,
        }
    }

    fn max_zoom(&self) -> u8 {
        17
    }
}

/// Main application structure
pub struct IsochroneViewerApp {
    /// Services, session and workflow state
    state: AppState,

    /// Map tiles provider (OpenStreetMap)
    tiles_osm: HttpTiles,

    /// Map tiles provider (OpenTopoMap)
    tiles_otm: HttpTiles,

    /// Map state (camera position, zoom, etc.)
    map_memory: MapMemory,

    /// Initial map centre (lat, lon)
    home: (f64, f64),
}

impl IsochroneViewerApp {
    pub fn new(cc: &eframe::CreationContext<'_>, settings: &Settings, services: Services) -> Self {
        let tiles_osm = HttpTiles::new(OpenStreetMap, cc.egui_ctx.clone());
        let tiles_otm = HttpTiles::new(OpenTopoMap, cc.egui_ctx.clone());

        let mut map_memory = MapMemory::default();
        let home = (settings.center_lat, settings.center_lon);
        map_memory.center_at(walkers::lat_lon(home.0, home.1));
        if map_memory.set_zoom(settings.zoom).is_err() {
            tracing::warn!("Zoom {} out of range, keeping the default", settings.zoom);
        }

        tracing::info!(
            "Map centred on ({:.4}, {:.4}) at zoom {:.1}",
            home.0,
            home.1,
            settings.zoom
        );

        Self {
            state: AppState::new(services),
            tiles_osm,
            tiles_otm,
            map_memory,
            home,
        }
    }

    /// Move the view to a Web Mercator extent
    fn fit_to_extent(&mut self, extent: Rect<f64>) {
        let (min_lat, min_lon) = utils::mercator_to_wgs84(extent.min().x, extent.min().y);
        let (max_lat, max_lon) = utils::mercator_to_wgs84(extent.max().x, extent.max().y);

        let center_lat = (min_lat + max_lat) / 2.0;
        let center_lon = (min_lon + max_lon) / 2.0;

        let lat_span = (max_lat - min_lat).abs();
        let lon_span = (max_lon - min_lon).abs();
        let max_span = lat_span.max(lon_span);

        let zoom = if max_span > 0.0 {
            let zoom_estimate = (4.0 * 360.0 / max_span).log2();
            (zoom_estimate - 0.5).clamp(1.0, 18.0)
        } else {
            16.0
        };

        self.map_memory
            .center_at(walkers::lat_lon(center_lat, center_lon));
        let _ = self.map_memory.set_zoom(zoom);

        tracing::debug!(
            "Zoomed to extent: ({:.4}, {:.4}) - ({:.4}, {:.4}), zoom: {:.1}",
            min_lat,
            min_lon,
            max_lat,
            max_lon,
            zoom
        );
    }
}

#[profiling::all_functions]
impl eframe::App for IsochroneViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Zoom to the intersection once an overlap count completes
        if let Some(extent) = self.state.take_pending_extent() {
            self.fit_to_extent(extent);
        }

        ui_panels::action_pad(ctx, &mut self.state);
        ui_panels::detail_panel(ctx, &self.state);
        ui_panels::alert_banner(ctx, &self.state);

        let session = self.state.services.session.clone();
        let tree_layer = self.state.tree_layer.clone();
        let highlights = self.state.services.highlights.clone();
        let map_input = self.state.map_input.clone();
        let tolerance_px = self.state.services.config.hit_tolerance_px;
        let tiles_provider = self.state.ui_settings.tiles_provider;
        let home = self.home;

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                profiling::scope!("map_panel");

                let tiles: &mut HttpTiles = match tiles_provider {
                    TilesProvider::OpenStreetMap => &mut self.tiles_osm,
                    TilesProvider::OpenTopoMap => &mut self.tiles_otm,
                };

                let map = Map::new(
                    Some(tiles),
                    &mut self.map_memory,
                    walkers::lat_lon(home.0, home.1),
                )
                .with_plugin(GraphicsPlugin::new(session.clone()))
                .with_plugin(FeaturePlugin::new(session, tree_layer, highlights))
                .with_plugin(InputPlugin::new(map_input, tolerance_px));

                ui.add(map);

                ui_panels::attribution(ui, &self.state);
            });

        self.state.process_map_input(ctx);

        if self.state.is_busy() {
            ctx.request_repaint();
        }
    }
}
