//! Accumulated geometry drawn on the map
//!
//! Service areas are appended in arrival order and never reordered: the first
//! two entries are always the comparison pair used by the overlap computation.

use crate::{Area, MapPoint};

/// What an area graphic represents
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AreaKind {
    /// Service area for a travel-time break, in minutes
    ServiceArea { break_minutes: f64 },
    /// Intersection of the comparison pair
    Overlap,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AreaGraphic {
    pub area: Area,
    pub kind: AreaKind,
}

impl AreaGraphic {
    pub fn service_area(area: Area, break_minutes: f64) -> Self {
        Self {
            area,
            kind: AreaKind::ServiceArea { break_minutes },
        }
    }

    pub fn overlap(area: Area) -> Self {
        Self {
            area,
            kind: AreaKind::Overlap,
        }
    }
}

/// Location markers plus the append-only set of area graphics
#[derive(Clone, Debug, Default)]
pub struct GraphicsLayer {
    locations: Vec<MapPoint>,
    areas: Vec<AreaGraphic>,
}

impl GraphicsLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_location(&mut self, point: MapPoint) {
        self.locations.push(point);
    }

    /// Append service areas after any already accumulated
    pub fn append_areas(&mut self, areas: impl IntoIterator<Item = AreaGraphic>) -> usize {
        let before = self.areas.len();
        self.areas.extend(areas);
        self.areas.len() - before
    }

    /// Entries 0 and 1 in insertion order, if both exist
    pub fn comparison_pair(&self) -> Option<(&AreaGraphic, &AreaGraphic)> {
        match self.areas.as_slice() {
            [first, second, ..] => Some((first, second)),
            _ => None,
        }
    }

    /// Drop every graphic and keep only the overlap (if non-empty)
    pub fn replace_with_overlap(&mut self, overlap: Option<Area>) {
        self.locations.clear();
        self.areas.clear();
        if let Some(area) = overlap.filter(|a| !a.is_empty()) {
            self.areas.push(AreaGraphic::overlap(area));
        }
    }

    pub fn clear(&mut self) {
        self.locations.clear();
        self.areas.clear();
    }

    #[inline]
    pub fn areas(&self) -> &[AreaGraphic] {
        &self.areas
    }

    #[inline]
    pub fn locations(&self) -> &[MapPoint] {
        &self.locations
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.areas.is_empty()
    }
}
