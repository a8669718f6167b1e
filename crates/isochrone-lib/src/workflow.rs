//! User-triggered workflows over a shared [`Session`]

use crate::{
    Config, Error, FeatureFilter, MapPoint, Result, ServiceAreaParameters, Session,
    SpatialReference, SpatialRelationship, TravelMode, TravelTimeService, intersect,
};
use geo::Rect;
use std::sync::Arc;

/// Click → service area → accumulated graphics
pub struct IsochroneWorkflow {
    service: Arc<dyn TravelTimeService>,
    travel_mode: TravelMode,
    breaks: Vec<f64>,
    out_spatial_reference: SpatialReference,
}

impl IsochroneWorkflow {
    pub fn new(service: Arc<dyn TravelTimeService>, travel_mode: TravelMode, config: &Config) -> Self {
        Self {
            service,
            travel_mode,
            breaks: config.breaks_minutes.clone(),
            out_spatial_reference: config.out_spatial_reference,
        }
    }

    /// Fetch the service description and look up the configured travel mode
    ///
    /// Both failures are fatal for the session.
    pub async fn bootstrap(service: Arc<dyn TravelTimeService>, config: &Config) -> Result<Self> {
        let description = service.describe_service().await?;
        let travel_mode = description.travel_mode(&config.travel_mode_name)?;
        tracing::info!("Using travel mode {:?} ({})", travel_mode.name, travel_mode.id);
        Ok(Self::new(service, travel_mode, config))
    }

    pub fn travel_mode(&self) -> &TravelMode {
        &self.travel_mode
    }

    /// Place a location marker and append its service areas
    ///
    /// On a solve failure the marker stays and no area is drawn. Returns the
    /// number of areas appended. A reset while the solve is in flight discards
    /// its result with [`Error::Cancelled`].
    pub async fn run(&self, session: &Session, point: MapPoint) -> Result<usize> {
        let epoch = session.epoch();
        {
            let mut graphics = session.graphics().write().await;
            // A reset may have cleared the layer since the epoch was read
            if !session.is_current(epoch) {
                return Err(Error::Cancelled);
            }
            graphics.add_location(point);
        }

        let params = ServiceAreaParameters::new(
            point,
            self.breaks.clone(),
            self.travel_mode.clone(),
            self.out_spatial_reference,
        );
        let areas = match self.service.solve(&params).await {
            Ok(areas) => areas,
            Err(e) => {
                tracing::warn!("Service area solve failed: {}", e);
                return Err(e);
            }
        };

        let mut graphics = session.graphics().write().await;
        if !session.is_current(epoch) {
            tracing::debug!("Session reset during solve, dropping {} area(s)", areas.len());
            return Err(Error::Cancelled);
        }
        let appended = graphics.append_areas(areas);
        tracing::info!("Added {} service area(s)", appended);
        Ok(appended)
    }
}

/// Result of an overlap request
#[derive(Clone, Debug, PartialEq)]
pub enum OverlapOutcome {
    /// Intersection applied as filter; `extent` (Web Mercator) is where the view should go
    Counted { count: u64, extent: Rect<f64> },
    /// The comparison pair does not overlap; graphics were cleared
    Disjoint,
}

/// Intersection of the first two areas, then a filtered count
#[derive(Debug, Default)]
pub struct OverlapWorkflow;

impl OverlapWorkflow {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, session: &Session) -> Result<OverlapOutcome> {
        let overlap = {
            let mut graphics = session.graphics().write().await;
            let Some((first, second)) = graphics.comparison_pair() else {
                return Err(Error::PreconditionNotMet {
                    required: 2,
                    available: graphics.areas().len(),
                });
            };
            let overlap = intersect(&first.area, &second.area);
            graphics.replace_with_overlap(Some(overlap.clone()));
            overlap
        };

        let Some(extent) = overlap.project(SpatialReference::WEB_MERCATOR).extent() else {
            tracing::info!("Service areas do not overlap");
            return Ok(OverlapOutcome::Disjoint);
        };

        let config = session.config();
        let view = session.layer_view();
        view.apply_filter(FeatureFilter {
            geometry: overlap,
            relationship: SpatialRelationship::Intersects,
            units: config.filter_units,
        })
        .await;

        let count = view.count().await?;
        tracing::info!("{} features inside the common area", count);
        session.show_alert(config.count_message(count)).await;
        Ok(OverlapOutcome::Counted { count, extent })
    }
}
