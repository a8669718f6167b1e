//! Spatial filter + count over a feature collection
//!
//! A [`FeatureLayerView`] wraps a [`FeatureSource`] and owns the single active
//! filter slot: applying a filter replaces the previous one everywhere. Sources
//! are either the remote FeatureServer or a local [`FeatureIndex`].

use crate::geometry::wire::{EsriPoint, EsriPolygon};
use crate::{
    Area, Error, FeatureIndex, FeatureRecord, MapPoint, ObjectId, RemoteError, Result,
    SpatialReference, rest,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Features requested per page during bulk retrieval
const PAGE_SIZE: usize = 2000;

/// Relationship between the filter geometry and a feature
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SpatialRelationship {
    #[default]
    Intersects,
    /// Filter geometry contains the feature
    Contains,
    /// Filter geometry lies within the feature
    Within,
    Disjoint,
}

impl SpatialRelationship {
    /// REST `spatialRel` parameter value
    pub fn esri_name(self) -> &'static str {
        match self {
            Self::Intersects => "esriSpatialRelIntersects",
            Self::Contains => "esriSpatialRelContains",
            Self::Within => "esriSpatialRelWithin",
            Self::Disjoint => "esriSpatialRelDisjoint",
        }
    }

    /// Evaluate the relationship for a point feature
    pub fn matches_point(self, area: &Area, point: &MapPoint) -> bool {
        match self {
            Self::Intersects => area.intersects_point(point),
            Self::Contains => area.contains_point(point),
            // A non-empty polygon is never within a point
            Self::Within => false,
            Self::Disjoint => !area.intersects_point(point),
        }
    }
}

/// Distance units attached to a spatial filter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DistanceUnits {
    Feet,
    Meters,
    Kilometers,
    Miles,
}

impl DistanceUnits {
    /// REST `units` parameter value
    pub fn esri_name(self) -> &'static str {
        match self {
            Self::Feet => "esriSRUnit_Foot",
            Self::Meters => "esriSRUnit_Meter",
            Self::Kilometers => "esriSRUnit_Kilometer",
            Self::Miles => "esriSRUnit_StatuteMile",
        }
    }
}

impl FromStr for DistanceUnits {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "feet" | "foot" | "ft" => Ok(Self::Feet),
            "meters" | "meter" | "m" => Ok(Self::Meters),
            "kilometers" | "kilometer" | "km" => Ok(Self::Kilometers),
            "miles" | "mile" | "mi" => Ok(Self::Miles),
            other => Err(format!("unknown distance unit: {other}")),
        }
    }
}

/// The transient filter: geometry, relationship and unit system
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureFilter {
    pub geometry: Area,
    pub relationship: SpatialRelationship,
    pub units: DistanceUnits,
}

impl FeatureFilter {
    pub fn intersects(geometry: Area, units: DistanceUnits) -> Self {
        Self {
            geometry,
            relationship: SpatialRelationship::Intersects,
            units,
        }
    }
}

/// A queryable feature collection
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Bulk feature retrieval, optionally restricted by a filter
    async fn query_features(&self, filter: Option<&FeatureFilter>) -> Result<Vec<FeatureRecord>>;

    /// Number of features matching the filter (all features for `None`)
    async fn query_feature_count(&self, filter: Option<&FeatureFilter>) -> Result<u64>;
}

/// A feature collection seen through at most one active filter
pub struct FeatureLayerView {
    source: Arc<dyn FeatureSource>,
    filter: RwLock<Option<FeatureFilter>>,
}

impl FeatureLayerView {
    pub fn new(source: Arc<dyn FeatureSource>) -> Self {
        Self {
            source,
            filter: RwLock::new(None),
        }
    }

    pub fn source(&self) -> &Arc<dyn FeatureSource> {
        &self.source
    }

    /// Replace any previously active filter
    pub async fn apply_filter(&self, filter: FeatureFilter) {
        tracing::debug!(
            "Applying {:?} filter ({:?})",
            filter.relationship,
            filter.units
        );
        *self.filter.write().await = Some(filter);
    }

    pub async fn clear_filter(&self) {
        *self.filter.write().await = None;
    }

    /// Snapshot of the active filter
    pub async fn filter(&self) -> Option<FeatureFilter> {
        self.filter.read().await.clone()
    }

    /// Non-blocking snapshot for UI polling; `None` while the slot is being written
    pub fn try_filter(&self) -> Option<Option<FeatureFilter>> {
        self.filter.try_read().ok().map(|f| f.clone())
    }

    /// Count of features under the active filter at call time
    pub async fn count(&self) -> Result<u64> {
        // Snapshot first so the lock is released before the round-trip
        let filter = self.filter().await;
        self.source.query_feature_count(filter.as_ref()).await
    }

    /// Features under the active filter
    pub async fn query_features(&self) -> Result<Vec<FeatureRecord>> {
        let filter = self.filter().await;
        self.source.query_features(filter.as_ref()).await
    }
}

/// Client-side source backed by a [`FeatureIndex`]
#[derive(Clone)]
pub struct IndexedFeatureSource {
    index: Arc<FeatureIndex>,
}

impl IndexedFeatureSource {
    pub fn new(index: Arc<FeatureIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<FeatureIndex> {
        &self.index
    }
}

#[async_trait]
impl FeatureSource for IndexedFeatureSource {
    async fn query_features(&self, filter: Option<&FeatureFilter>) -> Result<Vec<FeatureRecord>> {
        Ok(match filter {
            Some(f) => self
                .index
                .query_area(&f.geometry, f.relationship)
                .into_iter()
                .cloned()
                .collect(),
            None => self.index.features().to_vec(),
        })
    }

    async fn query_feature_count(&self, filter: Option<&FeatureFilter>) -> Result<u64> {
        let count = match filter {
            Some(f) => self.index.count_area(&f.geometry, f.relationship),
            None => self.index.len(),
        };
        Ok(count as u64)
    }
}

/// ArcGIS FeatureServer layer queried over REST
#[derive(Debug, Clone)]
pub struct RemoteFeatureService {
    client: reqwest::Client,
    layer_url: String,
    api_key: Option<String>,
    out_spatial_reference: SpatialReference,
    /// Field used to order pages and, when the response omits it, to read ids
    object_id_field: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    object_id_field_name: Option<String>,
    #[serde(default)]
    spatial_reference: Option<SpatialReference>,
    #[serde(default)]
    features: Vec<WireFeature>,
    #[serde(default)]
    exceeded_transfer_limit: bool,
}

impl QueryResponse {
    /// Offset of the next page, `None` once the server reports no more features
    ///
    /// An empty page ends the loop even when the transfer limit flag is set.
    fn next_offset(&self, offset: usize) -> Option<usize> {
        (self.exceeded_transfer_limit && !self.features.is_empty())
            .then(|| offset + self.features.len())
    }
}

#[derive(Deserialize)]
struct WireFeature {
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(default)]
    geometry: Option<EsriPoint>,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

impl RemoteFeatureService {
    pub fn new(
        layer_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = rest::build_client(timeout).map_err(|e| Error::ServiceUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            layer_url: layer_url.into().trim_end_matches('/').to_string(),
            api_key,
            out_spatial_reference: SpatialReference::WEB_MERCATOR,
            object_id_field: "OBJECTID".to_string(),
        })
    }

    /// Object id field of layers that do not use `OBJECTID`
    pub fn with_object_id_field(mut self, field: impl Into<String>) -> Self {
        self.object_id_field = field.into();
        self
    }

    fn query_url(&self) -> String {
        format!("{}/query", self.layer_url)
    }

    /// Common parameters of every query, including the filter if any
    fn base_params(&self, filter: Option<&FeatureFilter>) -> Result<Vec<(&'static str, String)>> {
        let mut params = vec![
            ("where", "1=1".to_string()),
            ("f", "json".to_string()),
        ];
        if let Some(filter) = filter {
            let geometry = serde_json::to_string(&EsriPolygon::from(&filter.geometry))?;
            params.extend([
                ("geometry", geometry),
                ("geometryType", "esriGeometryPolygon".to_string()),
                ("spatialRel", filter.relationship.esri_name().to_string()),
                ("units", filter.units.esri_name().to_string()),
                ("inSR", filter.geometry.spatial_reference().wkid.to_string()),
            ]);
        }
        Ok(rest::with_token(params, self.api_key.as_deref()))
    }

    /// Parameters shared by every page of a bulk retrieval
    fn page_params(&self, filter: Option<&FeatureFilter>) -> Result<Vec<(&'static str, String)>> {
        let mut params = self.base_params(filter)?;
        params.extend([
            ("outFields", "*".to_string()),
            ("returnGeometry", "true".to_string()),
            ("outSR", self.out_spatial_reference.wkid.to_string()),
            ("resultRecordCount", PAGE_SIZE.to_string()),
            // Offset paging is only stable over a fixed order
            ("orderByFields", self.object_id_field.clone()),
        ]);
        Ok(params)
    }

    async fn post_query<T: serde::de::DeserializeOwned>(
        &self,
        params: &[(&'static str, String)],
    ) -> std::result::Result<T, RemoteError> {
        let response = self
            .client
            .post(self.query_url())
            .form(params)
            .send()
            .await
            .map_err(rest::transport)?;
        rest::read_json(response).await
    }
}

#[async_trait]
impl FeatureSource for RemoteFeatureService {
    async fn query_features(&self, filter: Option<&FeatureFilter>) -> Result<Vec<FeatureRecord>> {
        let base = self.page_params(filter)?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut params = base.clone();
            params.push(("resultOffset", offset.to_string()));
            tracing::debug!("Querying features from {} (offset {})", self.query_url(), offset);

            let page: QueryResponse = self.post_query(&params).await.map_err(|e| {
                tracing::warn!("Feature query failed: {}", e);
                Error::Query(e)
            })?;

            let next = page.next_offset(offset);
            let id_field = page
                .object_id_field_name
                .as_deref()
                .unwrap_or(&self.object_id_field);
            let sr = page.spatial_reference.unwrap_or(self.out_spatial_reference);
            records.extend(
                page.features
                    .into_iter()
                    .filter_map(|f| feature_record(f, id_field, sr)),
            );

            match next {
                Some(next) => offset = next,
                None => break,
            }
        }

        tracing::info!("Retrieved {} features", records.len());
        Ok(records)
    }

    async fn query_feature_count(&self, filter: Option<&FeatureFilter>) -> Result<u64> {
        let mut params = self.base_params(filter)?;
        params.push(("returnCountOnly", "true".to_string()));
        tracing::debug!("Counting features at {}", self.query_url());

        let response: CountResponse = self.post_query(&params).await.map_err(|e| {
            tracing::warn!("Count query failed: {}", e);
            Error::Query(e)
        })?;
        Ok(response.count)
    }
}

/// Convert a wire feature, skipping features without a usable id or point
fn feature_record(feature: WireFeature, id_field: &str, sr: SpatialReference) -> Option<FeatureRecord> {
    let object_id = feature
        .attributes
        .get(id_field)
        .or_else(|| feature.attributes.get("FID"))
        .and_then(Value::as_i64)?;
    let location = feature.geometry?.into_map_point(sr);
    Some(FeatureRecord::new(ObjectId(object_id), location, feature.attributes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_index::tests::grid_index;
    use crate::geometry::tests::square;

    #[tokio::test]
    async fn test_filter_slot_replaces_previous() {
        let source = Arc::new(IndexedFeatureSource::new(Arc::new(grid_index())));
        let view = FeatureLayerView::new(source);

        // No filter counts the whole collection
        assert_eq!(view.count().await.unwrap(), 400);

        view.apply_filter(FeatureFilter::intersects(square(5.0, 5.0, 30.0), DistanceUnits::Miles))
            .await;
        assert_eq!(view.count().await.unwrap(), 9);

        view.apply_filter(FeatureFilter::intersects(square(5.0, 5.0, 10.0), DistanceUnits::Miles))
            .await;
        assert_eq!(view.count().await.unwrap(), 1);
        assert_eq!(view.query_features().await.unwrap().len(), 1);

        view.clear_filter().await;
        assert!(view.filter().await.is_none());
        assert_eq!(view.try_filter(), Some(None));
    }

    #[test]
    fn test_relationship_on_boundary() {
        let area = square(0.0, 0.0, 10.0);
        let edge = MapPoint::new(0.0, 5.0, SpatialReference::WEB_MERCATOR);
        assert!(SpatialRelationship::Intersects.matches_point(&area, &edge));
        assert!(!SpatialRelationship::Contains.matches_point(&area, &edge));
        assert!(!SpatialRelationship::Disjoint.matches_point(&area, &edge));
        assert!(!SpatialRelationship::Within.matches_point(&area, &edge));
    }

    #[test]
    fn test_units_parse() {
        assert_eq!("miles".parse::<DistanceUnits>(), Ok(DistanceUnits::Miles));
        assert_eq!("KM".parse::<DistanceUnits>(), Ok(DistanceUnits::Kilometers));
        assert!("parsecs".parse::<DistanceUnits>().is_err());
        assert_eq!(DistanceUnits::Miles.esri_name(), "esriSRUnit_StatuteMile");
    }

    #[test]
    fn test_query_page_decoding() {
        let body = r#"{
            "objectIdFieldName": "OBJECTID",
            "spatialReference": {"wkid": 102100, "latestWkid": 3857},
            "exceededTransferLimit": true,
            "features": [
                {"attributes": {"OBJECTID": 1, "CommonName": "Rowan"}, "geometry": {"x": -357000.0, "y": 7545000.0}},
                {"attributes": {"OBJECTID": 2}},
                {"attributes": {"CommonName": "Lime"}, "geometry": {"x": 1.0, "y": 2.0}}
            ]
        }"#;
        let page: QueryResponse = rest::parse_body(body).unwrap();
        assert!(page.exceeded_transfer_limit);
        let sr = page.spatial_reference.unwrap();
        let records: Vec<_> = page
            .features
            .into_iter()
            .filter_map(|f| feature_record(f, "OBJECTID", sr))
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].object_id, ObjectId(1));
        assert!(records[0].location.spatial_reference().is_web_mercator());
        assert_eq!(records[0].attribute_text("CommonName"), "Rowan");
    }

    #[test]
    fn test_paging_stops_on_last_or_empty_page() {
        let page = |body: &str| rest::parse_body::<QueryResponse>(body).unwrap();

        let full = page(
            r#"{"exceededTransferLimit": true, "features": [
                {"attributes": {"OBJECTID": 1}, "geometry": {"x": 0.0, "y": 0.0}},
                {"attributes": {"OBJECTID": 2}, "geometry": {"x": 1.0, "y": 1.0}}
            ]}"#,
        );
        assert_eq!(full.next_offset(4000), Some(4002));

        let last = page(r#"{"features": [{"attributes": {"OBJECTID": 3}}]}"#);
        assert_eq!(last.next_offset(4002), None);

        let empty = page(r#"{"exceededTransferLimit": true, "features": []}"#);
        assert_eq!(empty.next_offset(4002), None);
    }

    #[test]
    fn test_filter_params() {
        let service =
            RemoteFeatureService::new("https://example.com/FeatureServer/0/", None, Duration::from_secs(5))
                .unwrap();
        assert_eq!(service.query_url(), "https://example.com/FeatureServer/0/query");

        let filter = FeatureFilter::intersects(square(0.0, 0.0, 10.0), DistanceUnits::Miles);
        let params = service.base_params(Some(&filter)).unwrap();
        let get = |k: &str| params.iter().find(|(n, _)| *n == k).map(|(_, v)| v.as_str());
        assert_eq!(get("spatialRel"), Some("esriSpatialRelIntersects"));
        assert_eq!(get("inSR"), Some("3857"));
        assert!(get("geometry").is_some_and(|g| g.contains("rings")));
        assert!(get("token").is_none());

        let service = service.with_object_id_field("FID");
        let params = service.page_params(None).unwrap();
        let get = |k: &str| params.iter().find(|(n, _)| *n == k).map(|(_, v)| v.as_str());
        assert_eq!(get("orderByFields"), Some("FID"));
        assert_eq!(get("resultRecordCount"), Some("2000"));
        assert!(get("geometry").is_none());
    }
}
