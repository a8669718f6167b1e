//! Walkers plugins for drawing session graphics and features on the map view
//!
//! Each plugin reads shared state with `try_read`/`try_lock` so a busy workflow
//! never blocks a frame; a skipped frame just draws nothing for that layer.

use crate::app::state::{MapInput, TreeLayer};
use egui::{Color32, Mesh, Pos2, Shape, Stroke};
use geo::{Coord, Polygon, Rect, TriangulateEarcut};
use isochrone_lib::{
    AreaGraphic, AreaKind, FeatureRecord, HighlightSet, MapPoint, Session, SpatialReference, utils,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use walkers::{Plugin, Projector};

const SERVICE_AREA_FILL: Color32 = Color32::from_rgba_premultiplied(61, 40, 36, 64);
const SERVICE_AREA_OUTLINE: Color32 = Color32::from_rgb(220, 110, 90);
const OVERLAP_FILL: Color32 = Color32::from_rgba_premultiplied(26, 49, 41, 64);
const OVERLAP_OUTLINE: Color32 = Color32::from_rgb(40, 100, 220);
const TREE_COLOR: Color32 = Color32::from_rgb(46, 125, 50);
const HIGHLIGHT_COLOR: Color32 = Color32::from_rgb(0, 255, 255);

/// Web Mercator rectangle covered by the map widget
pub fn viewport_mercator(response: &egui::Response, projector: &Projector) -> Rect<f64> {
    let rect = response.rect;
    let top_left = projector.unproject(egui::Vec2::new(rect.min.x, rect.min.y));
    let bottom_right = projector.unproject(egui::Vec2::new(rect.max.x, rect.max.y));
    utils::wgs84_rect_to_mercator(
        top_left.y(),
        top_left.x(),
        bottom_right.y(),
        bottom_right.x(),
    )
}

/// Map point under a screen position, in Web Mercator
fn unproject_mercator(projector: &Projector, pos: Pos2) -> MapPoint {
    let position = projector.unproject(egui::Vec2::new(pos.x, pos.y));
    MapPoint::from_lat_lon(position.y(), position.x()).project(SpatialReference::WEB_MERCATOR)
}

/// Screen position of a map point in any supported spatial reference
fn to_screen(projector: &Projector, point: &MapPoint) -> Pos2 {
    let (lat, lon) = point.to_lat_lon();
    let v = projector.project(walkers::lat_lon(lat, lon));
    Pos2::new(v.x, v.y)
}

fn coord_to_screen(projector: &Projector, coord: Coord<f64>) -> Pos2 {
    let (lat, lon) = utils::mercator_to_wgs84(coord.x, coord.y);
    let v = projector.project(walkers::lat_lon(lat, lon));
    Pos2::new(v.x, v.y)
}

/// Web Mercator meters spanned by one screen pixel at `at`
fn meters_per_pixel(projector: &Projector, at: Pos2) -> f64 {
    let a = unproject_mercator(projector, at);
    let b = unproject_mercator(projector, at + egui::vec2(1.0, 0.0));
    (b.x() - a.x()).abs().max(f64::EPSILON)
}

/// Draws location markers, service areas and the overlap
pub struct GraphicsPlugin {
    session: Arc<Session>,
}

impl GraphicsPlugin {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Fill a polygon (holes included) through an earcut triangulation
    fn fill_polygon(
        polygon: &Polygon<f64>,
        fill: Color32,
        projector: &Projector,
        painter: &egui::Painter,
    ) {
        let mut mesh = Mesh::default();
        for triangle in polygon.earcut_triangles() {
            let base = mesh.vertices.len() as u32;
            for coord in triangle.to_array() {
                mesh.colored_vertex(coord_to_screen(projector, coord), fill);
            }
            mesh.add_triangle(base, base + 1, base + 2);
        }
        if !mesh.is_empty() {
            painter.add(Shape::mesh(mesh));
        }
    }

    fn outline_polygon(
        polygon: &Polygon<f64>,
        stroke: Stroke,
        projector: &Projector,
        painter: &egui::Painter,
    ) {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            let points: Vec<Pos2> = ring
                .coords()
                .map(|c| coord_to_screen(projector, *c))
                .collect();
            if points.len() >= 3 {
                painter.add(Shape::closed_line(points, stroke));
            }
        }
    }

    fn render_area(graphic: &AreaGraphic, projector: &Projector, painter: &egui::Painter) {
        let (fill, stroke) = match graphic.kind {
            AreaKind::ServiceArea { .. } => (SERVICE_AREA_FILL, Stroke::new(1.0, SERVICE_AREA_OUTLINE)),
            AreaKind::Overlap => (OVERLAP_FILL, Stroke::new(2.0, OVERLAP_OUTLINE)),
        };

        let area = graphic.area.project(SpatialReference::WEB_MERCATOR);
        for polygon in area.polygons() {
            Self::fill_polygon(polygon, fill, projector, painter);
            Self::outline_polygon(polygon, stroke, projector, painter);
        }
    }
}

impl Plugin for GraphicsPlugin {
    fn run(
        self: Box<Self>,
        ui: &mut egui::Ui,
        _response: &egui::Response,
        projector: &Projector,
        _map_memory: &walkers::MapMemory,
    ) {
        profiling::scope!("GraphicsPlugin::run");

        // Use try_read for non-blocking UI polling.
        let Ok(graphics) = self.session.graphics().try_read() else {
            return;
        };

        let painter = ui.painter();
        for graphic in graphics.areas() {
            Self::render_area(graphic, projector, painter);
        }

        for location in graphics.locations() {
            let pos = to_screen(projector, location);
            painter.circle_filled(pos, 6.0, Color32::WHITE);
            painter.circle_filled(pos, 4.0, Color32::from_rgb(226, 119, 40));
        }
    }
}

/// Draws the tree layer: filtered points or clusters, plus highlight rings
pub struct FeaturePlugin {
    session: Arc<Session>,
    tree_layer: Arc<RwLock<TreeLayer>>,
    highlights: HighlightSet,
    /// Cluster grid spacing in screen pixels
    cluster_cell_px: f32,
}

impl FeaturePlugin {
    pub fn new(
        session: Arc<Session>,
        tree_layer: Arc<RwLock<TreeLayer>>,
        highlights: HighlightSet,
    ) -> Self {
        Self {
            session,
            tree_layer,
            highlights,
            cluster_cell_px: 50.0,
        }
    }

    fn render_clusters(
        index: &isochrone_lib::FeatureIndex,
        viewport: Rect<f64>,
        keep: impl Fn(&FeatureRecord) -> bool,
        projector: &Projector,
        painter: &egui::Painter,
        cell_size: f64,
    ) {
        for cluster in index.clusters_matching(viewport, cell_size, keep) {
            let pos = to_screen(projector, &cluster.center);
            if cluster.count == 1 {
                painter.circle_filled(pos, 4.0, TREE_COLOR);
                continue;
            }
            let radius = 8.0 + (cluster.count as f32).log10() * 6.0;
            painter.circle(
                pos,
                radius,
                TREE_COLOR.gamma_multiply(0.8),
                Stroke::new(1.5, Color32::WHITE),
            );
            painter.text(
                pos,
                egui::Align2::CENTER_CENTER,
                cluster.count.to_string(),
                egui::FontId::proportional(11.0),
                Color32::WHITE,
            );
        }
    }
}

impl Plugin for FeaturePlugin {
    fn run(
        self: Box<Self>,
        ui: &mut egui::Ui,
        response: &egui::Response,
        projector: &Projector,
        _map_memory: &walkers::MapMemory,
    ) {
        profiling::scope!("FeaturePlugin::run");

        let Ok(layer) = self.tree_layer.try_read() else {
            return;
        };
        let Some(index) = layer.index() else {
            return;
        };
        // A filter being swapped this frame is treated as no filter
        let filter = self.session.layer_view().try_filter().flatten();
        let keep = |feature: &FeatureRecord| match &filter {
            Some(filter) => filter
                .relationship
                .matches_point(&filter.geometry, &feature.location),
            None => true,
        };

        let painter = ui.painter();
        let viewport = viewport_mercator(response, projector);

        if self.session.is_clustering() {
            let cell_size =
                meters_per_pixel(projector, response.rect.center()) * self.cluster_cell_px as f64;
            Self::render_clusters(index, viewport, keep, projector, painter, cell_size);
        } else {
            profiling::scope!("render_features");
            for feature in index.query_rect(viewport).into_iter().filter(|f| keep(*f)) {
                painter.circle_filled(to_screen(projector, &feature.location), 3.5, TREE_COLOR);
            }
        }

        for id in self.highlights.ids() {
            if let Some(feature) = index.get(id) {
                let pos = to_screen(projector, &feature.location);
                painter.circle_stroke(pos, 8.0, Stroke::new(2.5, HIGHLIGHT_COLOR));
            }
        }
    }
}

/// Records clicks and pointer movement for the app to turn into workflows
pub struct InputPlugin {
    input: Arc<Mutex<MapInput>>,
    tolerance_px: f32,
}

impl InputPlugin {
    pub fn new(input: Arc<Mutex<MapInput>>, tolerance_px: f32) -> Self {
        Self {
            input,
            tolerance_px,
        }
    }
}

impl Plugin for InputPlugin {
    fn run(
        self: Box<Self>,
        _ui: &mut egui::Ui,
        response: &egui::Response,
        projector: &Projector,
        _map_memory: &walkers::MapMemory,
    ) {
        let mut input = self.input.lock().unwrap_or_else(PoisonError::into_inner);

        if response.clicked()
            && let Some(pos) = response.interact_pointer_pos()
        {
            input.clicked = Some(unproject_mercator(projector, pos));
        }

        if let Some(pos) = response.hover_pos() {
            input.hovered = Some(unproject_mercator(projector, pos));
            input.tolerance = meters_per_pixel(projector, pos) * self.tolerance_px as f64;
        }
    }
}
