//! Earth-rooted point quadtree over a feature collection
//!
//! The root node covers the whole Web Mercator plane and nodes split into four
//! quadrants (NW, NE, SW, SE) once they hold too many features. The index backs
//! client-side spatial filtering, hit-testing under the cursor and clustering.

use crate::{Area, FeatureRecord, MapPoint, ObjectId, SpatialReference, SpatialRelationship, utils};
use geo::{Coord, Rect};
use rayon::prelude::*;
use std::collections::HashMap;

/// Maximum depth of the quadtree to prevent infinite recursion
const MAX_DEPTH: u32 = 20;

/// Features held by a leaf before it subdivides
const MAX_FEATURES_PER_NODE: usize = 64;

/// Aggregated marker for a group of nearby features
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    /// Mean position of the grouped features
    pub center: MapPoint,
    /// Number of features in the group
    pub count: usize,
    /// Lowest object id of the group, stable across frames
    pub representative: ObjectId,
}

/// Spatial index over point features, stored in Web Mercator
#[derive(Debug, Clone)]
pub struct FeatureIndex {
    features: Vec<FeatureRecord>,
    by_id: HashMap<ObjectId, usize>,
    root: QuadtreeNode,
}

#[derive(Debug, Clone)]
struct QuadtreeNode {
    /// Bounding box in Web Mercator meters
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    /// Indices into `FeatureIndex::features` (leaves only)
    items: Vec<usize>,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[QuadtreeNode; 4]>>,
}

impl Default for FeatureIndex {
    fn default() -> Self {
        Self {
            features: Vec::new(),
            by_id: HashMap::new(),
            root: QuadtreeNode::new_root(),
        }
    }
}

impl FeatureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-build an index, projecting every feature to Web Mercator
    pub fn from_features(features: impl IntoIterator<Item = FeatureRecord>) -> Self {
        profiling::scope!("feature_index::build");
        let mut index = Self::new();
        for feature in features {
            index.insert(feature);
        }
        tracing::debug!("Indexed {} features", index.len());
        index
    }

    /// Insert a feature; features outside the Mercator plane are skipped
    ///
    /// Returns whether the feature was stored. Object ids are unique: a record
    /// re-using a stored id is dropped and the first one is kept.
    pub fn insert(&mut self, mut feature: FeatureRecord) -> bool {
        if self.by_id.contains_key(&feature.object_id) {
            tracing::debug!("Skipping duplicate feature {}", feature.object_id);
            return false;
        }

        feature.location = feature.location.project(SpatialReference::WEB_MERCATOR);
        let point = feature.location.as_geo();
        if !utils::is_valid_mercator(&point) {
            tracing::warn!(
                "Skipping feature {} outside Web Mercator bounds: ({}, {})",
                feature.object_id,
                point.x(),
                point.y()
            );
            return false;
        }

        let idx = self.features.len();
        self.by_id.insert(feature.object_id, idx);
        self.features.push(feature);
        let coord = point.0;
        self.root.insert(idx, coord, &self.features);
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    #[inline]
    pub fn features(&self) -> &[FeatureRecord] {
        &self.features
    }

    pub fn get(&self, object_id: ObjectId) -> Option<&FeatureRecord> {
        self.by_id.get(&object_id).map(|&i| &self.features[i])
    }

    /// Features whose location falls inside the rectangle (Web Mercator)
    pub fn query_rect(&self, rect: Rect<f64>) -> Vec<&FeatureRecord> {
        let mut indices = Vec::new();
        self.root.query(rect, &self.features, &mut indices);
        indices.into_iter().map(|i| &self.features[i]).collect()
    }

    /// Features satisfying `relationship` with respect to `area`
    pub fn query_area(&self, area: &Area, relationship: SpatialRelationship) -> Vec<&FeatureRecord> {
        profiling::scope!("feature_index::query_area");
        let area = area.project(SpatialReference::WEB_MERCATOR);
        let candidates = self.candidates(&area, relationship);
        let mut matches: Vec<usize> = candidates
            .into_par_iter()
            .filter(|&i| relationship.matches_point(&area, &self.features[i].location))
            .collect();
        matches.sort_unstable();
        matches.into_iter().map(|i| &self.features[i]).collect()
    }

    /// Number of features satisfying `relationship` with respect to `area`
    pub fn count_area(&self, area: &Area, relationship: SpatialRelationship) -> usize {
        profiling::scope!("feature_index::count_area");
        let area = area.project(SpatialReference::WEB_MERCATOR);
        self.candidates(&area, relationship)
            .into_par_iter()
            .filter(|&i| relationship.matches_point(&area, &self.features[i].location))
            .count()
    }

    /// Features within `tolerance` meters of `point`, nearest first
    pub fn nearest_within(&self, point: &MapPoint, tolerance: f64) -> Vec<&FeatureRecord> {
        let center = point.project(SpatialReference::WEB_MERCATOR);
        let rect = Rect::new(
            Coord {
                x: center.x() - tolerance,
                y: center.y() - tolerance,
            },
            Coord {
                x: center.x() + tolerance,
                y: center.y() + tolerance,
            },
        );
        let tolerance_sq = tolerance * tolerance;
        let mut hits: Vec<(f64, &FeatureRecord)> = self
            .query_rect(rect)
            .into_iter()
            .filter_map(|f| {
                let dx = f.location.x() - center.x();
                let dy = f.location.y() - center.y();
                let d2 = dx * dx + dy * dy;
                (d2 <= tolerance_sq).then_some((d2, f))
            })
            .collect();
        hits.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.object_id.cmp(&b.1.object_id))
        });
        hits.into_iter().map(|(_, f)| f).collect()
    }

    /// Grid clustering of the features inside `viewport`
    ///
    /// `cell_size` is the grid spacing in Web Mercator meters.
    pub fn clusters(&self, viewport: Rect<f64>, cell_size: f64) -> Vec<Cluster> {
        self.clusters_matching(viewport, cell_size, |_| true)
    }

    /// Grid clustering restricted to the features accepted by `keep`
    pub fn clusters_matching(
        &self,
        viewport: Rect<f64>,
        cell_size: f64,
        keep: impl Fn(&FeatureRecord) -> bool,
    ) -> Vec<Cluster> {
        profiling::scope!("feature_index::clusters");
        let cell_size = cell_size.max(f64::EPSILON);

        struct Acc {
            sum_x: f64,
            sum_y: f64,
            count: usize,
            representative: ObjectId,
        }

        let mut cells: HashMap<(i64, i64), Acc> = HashMap::new();
        for feature in self.query_rect(viewport).into_iter().filter(|f| keep(*f)) {
            let x = feature.location.x();
            let y = feature.location.y();
            let key = ((x / cell_size).floor() as i64, (y / cell_size).floor() as i64);
            let acc = cells.entry(key).or_insert(Acc {
                sum_x: 0.0,
                sum_y: 0.0,
                count: 0,
                representative: feature.object_id,
            });
            acc.sum_x += x;
            acc.sum_y += y;
            acc.count += 1;
            acc.representative = acc.representative.min(feature.object_id);
        }

        let mut clusters: Vec<Cluster> = cells
            .into_values()
            .map(|acc| Cluster {
                center: MapPoint::new(
                    acc.sum_x / acc.count as f64,
                    acc.sum_y / acc.count as f64,
                    SpatialReference::WEB_MERCATOR,
                ),
                count: acc.count,
                representative: acc.representative,
            })
            .collect();
        clusters.sort_by_key(|c| c.representative);
        clusters
    }

    /// Candidate indices for a relationship test
    fn candidates(&self, area: &Area, relationship: SpatialRelationship) -> Vec<usize> {
        match (relationship, area.extent()) {
            // Disjoint features live outside the extent, so every feature is a candidate
            (SpatialRelationship::Disjoint, _) => (0..self.features.len()).collect(),
            (_, None) => Vec::new(),
            (_, Some(extent)) => {
                let mut indices = Vec::new();
                self.root.query(extent, &self.features, &mut indices);
                indices
            }
        }
    }
}

impl QuadtreeNode {
    /// Create a root node covering the entire Earth in Web Mercator
    fn new_root() -> Self {
        let bounding_box = Rect::new(
            Coord {
                x: utils::EARTH_MERCATOR_MIN,
                y: utils::EARTH_MERCATOR_MIN,
            },
            Coord {
                x: utils::EARTH_MERCATOR_MAX,
                y: utils::EARTH_MERCATOR_MAX,
            },
        );
        Self::new_child(bounding_box, 0)
    }

    fn new_child(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            items: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, idx: usize, coord: Coord<f64>, features: &[FeatureRecord]) {
        if let Some(children) = &mut self.children {
            let quadrant = Self::quadrant(self.bounding_box, coord);
            children[quadrant].insert(idx, coord, features);
            return;
        }

        self.items.push(idx);
        if self.items.len() > MAX_FEATURES_PER_NODE && self.level < MAX_DEPTH {
            self.subdivide(features);
        }
    }

    /// Split this leaf into 4 children and move its features down
    fn subdivide(&mut self, features: &[FeatureRecord]) {
        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;
        let child_level = self.level + 1;

        let nw = Self::new_child(
            Rect::new(Coord { x: min.x, y: mid_y }, Coord { x: mid_x, y: max.y }),
            child_level,
        );
        let ne = Self::new_child(
            Rect::new(Coord { x: mid_x, y: mid_y }, Coord { x: max.x, y: max.y }),
            child_level,
        );
        let sw = Self::new_child(
            Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid_x, y: mid_y }),
            child_level,
        );
        let se = Self::new_child(
            Rect::new(Coord { x: mid_x, y: min.y }, Coord { x: max.x, y: mid_y }),
            child_level,
        );

        let mut children = Box::new([nw, ne, sw, se]);
        for idx in std::mem::take(&mut self.items) {
            let coord = features[idx].location.as_geo().0;
            let quadrant = Self::quadrant(self.bounding_box, coord);
            children[quadrant].insert(idx, coord, features);
        }
        self.children = Some(children);
    }

    /// Quadrant index (NW, NE, SW, SE) of a coordinate inside `bounds`
    #[inline]
    fn quadrant(bounds: Rect<f64>, coord: Coord<f64>) -> usize {
        let center = bounds.center();
        let east = coord.x >= center.x;
        let north = coord.y >= center.y;
        match (north, east) {
            (true, false) => 0,
            (true, true) => 1,
            (false, false) => 2,
            (false, true) => 3,
        }
    }

    fn query(&self, rect: Rect<f64>, features: &[FeatureRecord], results: &mut Vec<usize>) {
        if !self.intersects_rect(rect) {
            return;
        }

        match &self.children {
            Some(children) => {
                for child in children.iter() {
                    child.query(rect, features, results);
                }
            }
            None => {
                results.extend(self.items.iter().copied().filter(|&i| {
                    let c = features[i].location.as_geo().0;
                    c.x >= rect.min().x
                        && c.x <= rect.max().x
                        && c.y >= rect.min().y
                        && c.y <= rect.max().y
                }));
            }
        }
    }

    #[inline]
    fn intersects_rect(&self, rect: Rect<f64>) -> bool {
        let b = self.bounding_box;
        !(b.max().x < rect.min().x
            || b.min().x > rect.max().x
            || b.max().y < rect.min().y
            || b.min().y > rect.max().y)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geometry::tests::square;
    use serde_json::Map;

    pub(crate) fn feature(id: i64, x: f64, y: f64) -> FeatureRecord {
        FeatureRecord::new(
            ObjectId(id),
            MapPoint::new(x, y, SpatialReference::WEB_MERCATOR),
            Map::new(),
        )
    }

    /// 20x20 grid of features, 10 m apart, starting at the origin
    pub(crate) fn grid_index() -> FeatureIndex {
        FeatureIndex::from_features(
            (0..400).map(|i| feature(i, (i % 20) as f64 * 10.0, (i / 20) as f64 * 10.0)),
        )
    }

    #[test]
    fn test_index_subdivides_and_keeps_everything() {
        let index = grid_index();
        assert_eq!(index.len(), 400);
        assert!(index.root.children.is_some());

        let everything = Rect::new(Coord { x: -1.0, y: -1.0 }, Coord { x: 200.0, y: 200.0 });
        assert_eq!(index.query_rect(everything).len(), 400);
    }

    #[test]
    fn test_query_rect_subset() {
        let index = grid_index();
        // x in [0, 20], y in [0, 20] -> 3 x 3 features
        let rect = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 20.0, y: 20.0 });
        assert_eq!(index.query_rect(rect).len(), 9);
    }

    #[test]
    fn test_count_area_intersects() {
        let index = grid_index();
        // Square from 5 to 35 covers columns/rows 10, 20, 30 -> 9 features
        let area = square(5.0, 5.0, 30.0);
        assert_eq!(index.count_area(&area, SpatialRelationship::Intersects), 9);
        assert_eq!(
            index.query_area(&area, SpatialRelationship::Intersects).len(),
            9
        );
        assert_eq!(index.count_area(&area, SpatialRelationship::Disjoint), 391);
    }

    #[test]
    fn test_count_empty_area_is_zero() {
        let index = grid_index();
        let empty = Area::empty(SpatialReference::WEB_MERCATOR);
        assert_eq!(index.count_area(&empty, SpatialRelationship::Intersects), 0);
    }

    #[test]
    fn test_nearest_within_orders_by_distance() {
        let index = grid_index();
        let cursor = MapPoint::new(12.0, 1.0, SpatialReference::WEB_MERCATOR);
        let hits = index.nearest_within(&cursor, 9.0);
        assert_eq!(hits[0].object_id, ObjectId(1)); // (10, 0)
        assert!(hits.iter().all(|f| {
            let dx = f.location.x() - 12.0;
            let dy = f.location.y() - 1.0;
            (dx * dx + dy * dy).sqrt() <= 9.0
        }));
        assert!(index.nearest_within(&cursor, 0.5).is_empty());
    }

    #[test]
    fn test_insert_projects_wgs84_features() {
        let mut index = FeatureIndex::new();
        let tree = FeatureRecord::new(
            ObjectId(1),
            MapPoint::new(-3.21, 55.942, SpatialReference::WGS84),
            Map::new(),
        );
        assert!(index.insert(tree));
        let stored = index.get(ObjectId(1)).unwrap();
        assert!(stored.location.spatial_reference().is_web_mercator());
    }

    #[test]
    fn test_duplicate_ids_are_stored_once() {
        // Overlapping pages can deliver the same record twice
        let index = FeatureIndex::from_features([
            feature(1, 0.0, 0.0),
            feature(2, 10.0, 0.0),
            feature(1, 50.0, 50.0),
        ]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(ObjectId(1)).unwrap().location.x(), 0.0);

        let everything = Rect::new(Coord { x: -1.0, y: -1.0 }, Coord { x: 100.0, y: 100.0 });
        assert_eq!(index.query_rect(everything).len(), 2);
    }

    #[test]
    fn test_out_of_bounds_feature_skipped() {
        let mut index = FeatureIndex::new();
        assert!(!index.insert(feature(1, utils::EARTH_MERCATOR_MAX * 2.0, 0.0)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_clusters_group_by_cell() {
        let index = grid_index();
        let viewport = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 199.0, y: 199.0 });
        let clusters = index.clusters(viewport, 100.0);
        assert_eq!(clusters.len(), 4);
        assert_eq!(clusters.iter().map(|c| c.count).sum::<usize>(), 400);
        assert_eq!(clusters[0].representative, ObjectId(0));
    }

    #[test]
    fn test_clusters_skip_rejected_features() {
        let index = grid_index();
        let viewport = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 199.0, y: 199.0 });
        let clusters = index.clusters_matching(viewport, 100.0, |f| f.location.x() < 100.0);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters.iter().map(|c| c.count).sum::<usize>(), 200);
        assert_eq!(clusters[1].representative, ObjectId(200));
    }
}
