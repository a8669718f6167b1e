//! Travel-time service area client
//!
//! Wraps a remote network-analysis endpoint (`NAServer` service area layer).
//! The service description is fetched once at startup; the travel mode it
//! names is then sent back verbatim with every solve.

use crate::geometry::wire::{EsriPoint, EsriPolygon};
use crate::{
    Area, AreaGraphic, Error, MapPoint, RemoteError, Result, SpatialReference, rest, utils,
};
use async_trait::async_trait;
use geo::{Coord, LineString, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;

/// Vertices used to approximate a walking circle
const CIRCLE_SEGMENTS: usize = 72;

/// A named travel configuration advertised by the service
#[derive(Clone, Debug, PartialEq)]
pub struct TravelMode {
    pub id: String,
    pub name: String,
    pub mode_type: String,
    /// Full JSON object as advertised, sent back unchanged with solves
    pub raw: Value,
}

impl TravelMode {
    /// Build from an advertised travel mode object; `None` if it has no name
    pub fn from_raw(raw: Value) -> Option<Self> {
        let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        let name = text("name")?;
        let id = text("id").or_else(|| text("travelModeId")).unwrap_or_default();
        let mode_type = text("type").unwrap_or_default();
        Some(Self {
            id,
            name,
            mode_type,
            raw,
        })
    }
}

/// Travel modes supported by the service
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceDescription {
    pub supported_travel_modes: Vec<TravelMode>,
    pub default_travel_mode: Option<String>,
}

impl ServiceDescription {
    /// Look up a travel mode by its exact name
    pub fn travel_mode(&self, name: &str) -> Result<TravelMode> {
        self.supported_travel_modes
            .iter()
            .find(|mode| mode.name == name)
            .cloned()
            .ok_or_else(|| Error::TravelModeNotFound(name.to_string()))
    }

    pub fn has_travel_modes(&self) -> bool {
        !self.supported_travel_modes.is_empty()
    }

    /// A description without any usable travel mode cannot drive a session
    pub fn ensure_usable(self) -> Result<Self> {
        if self.has_travel_modes() {
            Ok(self)
        } else {
            Err(Error::ServiceUnavailable(
                "service description lists no travel modes".to_string(),
            ))
        }
    }
}

/// Parameters of one service-area solve
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceAreaParameters {
    /// The single facility to solve for
    pub facility: MapPoint,
    /// Time budgets in minutes
    pub default_breaks: Vec<f64>,
    pub travel_mode: TravelMode,
    pub trim_outer_polygon: bool,
    pub out_spatial_reference: SpatialReference,
}

impl ServiceAreaParameters {
    pub fn new(
        facility: MapPoint,
        default_breaks: Vec<f64>,
        travel_mode: TravelMode,
        out_spatial_reference: SpatialReference,
    ) -> Self {
        Self {
            facility,
            default_breaks,
            travel_mode,
            trim_outer_polygon: true,
            out_spatial_reference,
        }
    }

    /// Form fields of the `solveServiceArea` request
    fn form(&self) -> Result<Vec<(&'static str, String)>> {
        let facilities = json!({
            "features": [{ "geometry": EsriPoint::from(&self.facility) }],
            "spatialReference": self.facility.spatial_reference(),
        });
        let breaks = self
            .default_breaks
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",");

        Ok(vec![
            ("facilities", serde_json::to_string(&facilities)?),
            ("defaultBreaks", breaks),
            ("travelMode", serde_json::to_string(&self.travel_mode.raw)?),
            ("trimOuterPolygon", self.trim_outer_polygon.to_string()),
            ("outSR", self.out_spatial_reference.wkid.to_string()),
            ("returnFacilities", "false".to_string()),
            ("f", "json".to_string()),
        ])
    }
}

/// Asynchronous travel-time service
#[async_trait]
pub trait TravelTimeService: Send + Sync {
    /// Fetch the service description; failure is fatal for the session
    async fn describe_service(&self) -> Result<ServiceDescription>;

    /// Compute the reachable areas, one per break
    ///
    /// All-or-nothing: either every polygon is returned or an error.
    async fn solve(&self, params: &ServiceAreaParameters) -> Result<Vec<AreaGraphic>>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptionResponse {
    #[serde(default)]
    supported_travel_modes: Vec<Value>,
    #[serde(default)]
    default_travel_mode: Option<String>,
}

impl From<DescriptionResponse> for ServiceDescription {
    fn from(raw: DescriptionResponse) -> Self {
        Self {
            supported_travel_modes: raw
                .supported_travel_modes
                .into_iter()
                .filter_map(TravelMode::from_raw)
                .collect(),
            default_travel_mode: raw.default_travel_mode,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolveResponse {
    #[serde(default)]
    sa_polygons: Option<PolygonFeatureSet>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolygonFeatureSet {
    #[serde(default)]
    spatial_reference: Option<SpatialReference>,
    #[serde(default)]
    features: Vec<PolygonFeature>,
}

#[derive(Deserialize)]
struct PolygonFeature {
    #[serde(default)]
    attributes: Map<String, Value>,
    geometry: Option<EsriPolygon>,
}

impl SolveResponse {
    fn into_graphics(self, params: &ServiceAreaParameters) -> Result<Vec<AreaGraphic>> {
        let Some(set) = self.sa_polygons else {
            return Ok(Vec::new());
        };
        let sr = set.spatial_reference.unwrap_or(params.out_spatial_reference);
        let fallback_break = params.default_breaks.first().copied().unwrap_or_default();

        set.features
            .into_iter()
            .filter_map(|feature| {
                let break_minutes = feature
                    .attributes
                    .get("ToBreak")
                    .and_then(Value::as_f64)
                    .unwrap_or(fallback_break);
                feature.geometry.map(|g| (g, break_minutes))
            })
            .map(|(geometry, break_minutes)| {
                let area = geometry.into_area(sr).map_err(|e| {
                    Error::Solve(RemoteError::transport(format!(
                        "invalid service area geometry: {e}"
                    )))
                })?;
                Ok(AreaGraphic::service_area(area, break_minutes))
            })
            .collect()
    }
}

/// REST client for an ArcGIS service area endpoint
#[derive(Debug, Clone)]
pub struct NetworkServiceClient {
    client: reqwest::Client,
    service_url: String,
    api_key: Option<String>,
}

impl NetworkServiceClient {
    /// `service_url` is the `NAServer` layer root, with or without trailing slash
    pub fn new(service_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client =
            rest::build_client(timeout).map_err(|e| Error::ServiceUnavailable(e.to_string()))?;
        let service_url = if service_url.ends_with('/') {
            service_url.to_string()
        } else {
            format!("{service_url}/")
        };
        Ok(Self {
            client,
            service_url,
            api_key,
        })
    }

    async fn get_description(&self, url: &str) -> std::result::Result<ServiceDescription, RemoteError> {
        tracing::debug!("Fetching service description from {}", url);
        let params = rest::with_token(vec![("f", "json".to_string())], self.api_key.as_deref());
        let response = self
            .client
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(rest::transport)?;
        let raw: DescriptionResponse = rest::read_json(response).await?;
        Ok(raw.into())
    }
}

#[async_trait]
impl TravelTimeService for NetworkServiceClient {
    async fn describe_service(&self) -> Result<ServiceDescription> {
        let mut description = self
            .get_description(&self.service_url)
            .await
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        if !description.has_travel_modes() {
            let url = format!("{}retrieveTravelModes", self.service_url);
            description = self
                .get_description(&url)
                .await
                .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;
        }
        let description = description.ensure_usable()?;

        tracing::info!(
            "Service offers {} travel modes",
            description.supported_travel_modes.len()
        );
        Ok(description)
    }

    async fn solve(&self, params: &ServiceAreaParameters) -> Result<Vec<AreaGraphic>> {
        profiling::scope!("network_service::solve");
        let url = format!("{}solveServiceArea", self.service_url);
        let form = rest::with_token(params.form()?, self.api_key.as_deref());
        tracing::debug!(
            "Solving service area at ({:.1}, {:.1}) with breaks {:?}",
            params.facility.x(),
            params.facility.y(),
            params.default_breaks
        );

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Solve(rest::transport(e)))?;
        let raw: SolveResponse = rest::read_json(response).await.map_err(Error::Solve)?;
        raw.into_graphics(params)
    }
}

/// Offline service approximating a walking service area with a circle
///
/// The radius is the distance covered at a constant walking speed, stretched
/// by the Mercator scale factor at the facility's latitude.
#[derive(Debug, Clone)]
pub struct WalkingBufferService {
    speed_kmh: f64,
    description: ServiceDescription,
}

impl WalkingBufferService {
    pub fn new(speed_kmh: f64, travel_mode_name: &str) -> Self {
        let raw = json!({
            "id": "offline-walk",
            "name": travel_mode_name,
            "type": "WALK",
        });
        let description = ServiceDescription {
            supported_travel_modes: TravelMode::from_raw(raw).into_iter().collect(),
            default_travel_mode: Some("offline-walk".to_string()),
        };
        Self {
            speed_kmh,
            description,
        }
    }

    /// Ground distance reachable within `minutes`, in meters
    pub fn reach_meters(&self, minutes: f64) -> f64 {
        self.speed_kmh * 1000.0 / 60.0 * minutes
    }

    fn circle(&self, center: &MapPoint, minutes: f64) -> Area {
        let center = center.project(SpatialReference::WEB_MERCATOR);
        let (lat, _) = center.to_lat_lon();
        let radius = self.reach_meters(minutes) * utils::mercator_scale_factor(lat);

        // Clockwise exterior, as service area rings are
        let ring: Vec<Coord<f64>> = (0..=CIRCLE_SEGMENTS)
            .map(|i| {
                let step = (i % CIRCLE_SEGMENTS) as f64 / CIRCLE_SEGMENTS as f64;
                let angle = -step * std::f64::consts::TAU;
                Coord {
                    x: center.x() + radius * angle.cos(),
                    y: center.y() + radius * angle.sin(),
                }
            })
            .collect();

        Area::from_polygon(
            Polygon::new(LineString::new(ring), Vec::new()),
            SpatialReference::WEB_MERCATOR,
        )
    }
}

impl Default for WalkingBufferService {
    fn default() -> Self {
        Self::new(5.0, "Walking Time")
    }
}

#[async_trait]
impl TravelTimeService for WalkingBufferService {
    async fn describe_service(&self) -> Result<ServiceDescription> {
        Ok(self.description.clone())
    }

    async fn solve(&self, params: &ServiceAreaParameters) -> Result<Vec<AreaGraphic>> {
        if self.description.travel_mode(&params.travel_mode.name).is_err() {
            return Err(Error::Solve(RemoteError::transport(format!(
                "unsupported travel mode: {}",
                params.travel_mode.name
            ))));
        }

        let mut breaks = params.default_breaks.clone();
        breaks.sort_by(f64::total_cmp);
        Ok(breaks
            .into_iter()
            .filter(|minutes| *minutes > 0.0)
            .map(|minutes| {
                let area = self
                    .circle(&params.facility, minutes)
                    .project(params.out_spatial_reference);
                AreaGraphic::service_area(area, minutes)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"{
        "currentVersion": 11.3,
        "supportedTravelModes": [
            {"id": "FEgifRtFndKNcJMJ", "name": "Driving Time", "type": "AUTOMOBILE"},
            {"id": "caFAgoThrvUpkFBW", "name": "Walking Time", "type": "WALK", "impedanceAttributeName": "WalkTime"},
            {"type": "WALK"}
        ],
        "defaultTravelMode": "FEgifRtFndKNcJMJ"
    }"#;

    fn walking_mode() -> TravelMode {
        let raw: DescriptionResponse = rest::parse_body(DESCRIPTION).unwrap();
        ServiceDescription::from(raw).travel_mode("Walking Time").unwrap()
    }

    #[test]
    fn test_description_travel_modes() {
        let raw: DescriptionResponse = rest::parse_body(DESCRIPTION).unwrap();
        let description = ServiceDescription::from(raw);
        // The nameless mode is dropped
        assert_eq!(description.supported_travel_modes.len(), 2);

        let walking = description.travel_mode("Walking Time").unwrap();
        assert_eq!(walking.id, "caFAgoThrvUpkFBW");
        assert_eq!(walking.mode_type, "WALK");
        assert_eq!(walking.raw["impedanceAttributeName"], "WalkTime");

        let err = description.travel_mode("Hovercraft").unwrap_err();
        assert!(matches!(err, Error::TravelModeNotFound(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_description_without_modes_is_fatal() {
        // Only nameless entries: nothing survives decoding
        let raw: DescriptionResponse =
            rest::parse_body(r#"{"supportedTravelModes": [{"id": "x"}, 42]}"#).unwrap();
        let description = ServiceDescription::from(raw);
        assert!(!description.has_travel_modes());
        let err = description.ensure_usable().unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
        assert!(err.is_fatal());

        let err = ServiceDescription::default().ensure_usable().unwrap_err();
        assert!(err.is_fatal());

        let raw: DescriptionResponse = rest::parse_body(DESCRIPTION).unwrap();
        let usable = ServiceDescription::from(raw).ensure_usable().unwrap();
        assert_eq!(usable.supported_travel_modes.len(), 2);
    }

    #[test]
    fn test_solve_form() {
        let params = ServiceAreaParameters::new(
            MapPoint::from_lat_lon(55.942, -3.210),
            vec![15.0],
            walking_mode(),
            SpatialReference::WEB_MERCATOR,
        );
        let form = params.form().unwrap();
        let get = |k: &str| form.iter().find(|(n, _)| *n == k).map(|(_, v)| v.clone());

        assert_eq!(get("defaultBreaks").as_deref(), Some("15"));
        assert_eq!(get("trimOuterPolygon").as_deref(), Some("true"));
        assert_eq!(get("outSR").as_deref(), Some("3857"));
        let facilities: Value = serde_json::from_str(&get("facilities").unwrap()).unwrap();
        assert_eq!(facilities["features"][0]["geometry"]["spatialReference"]["wkid"], 3857);
        let travel_mode: Value = serde_json::from_str(&get("travelMode").unwrap()).unwrap();
        assert_eq!(travel_mode["name"], "Walking Time");
    }

    #[test]
    fn test_solve_response_polygons() {
        let params = ServiceAreaParameters::new(
            MapPoint::from_lat_lon(55.942, -3.210),
            vec![15.0],
            walking_mode(),
            SpatialReference::WEB_MERCATOR,
        );
        let body = r#"{
            "saPolygons": {
                "spatialReference": {"wkid": 102100, "latestWkid": 3857},
                "features": [{
                    "attributes": {"FromBreak": 0, "ToBreak": 15},
                    "geometry": {"rings": [[[0,0],[0,10],[10,10],[10,0],[0,0]]]}
                }]
            }
        }"#;
        let raw: SolveResponse = rest::parse_body(body).unwrap();
        let graphics = raw.into_graphics(&params).unwrap();
        assert_eq!(graphics.len(), 1);
        assert_eq!(
            graphics[0].kind,
            crate::AreaKind::ServiceArea {
                break_minutes: 15.0
            }
        );
        assert!(graphics[0].area.spatial_reference().is_web_mercator());
    }

    #[test]
    fn test_solve_error_payload() {
        let body = r#"{"error":{"code":400,"message":"Unable to complete operation.","details":["Facilities: no valid locations"]}}"#;
        let err = rest::parse_body::<SolveResponse>(body).err().unwrap();
        assert_eq!(err.code, Some(400));
        assert_eq!(err.details.len(), 1);
    }

    #[test]
    fn test_malformed_ring_fails_whole_solve() {
        let params = ServiceAreaParameters::new(
            MapPoint::from_lat_lon(55.942, -3.210),
            vec![15.0],
            walking_mode(),
            SpatialReference::WEB_MERCATOR,
        );
        let body = r#"{"saPolygons":{"features":[
            {"attributes":{"ToBreak":15},"geometry":{"rings":[[[0,0],[0,10],[10,10],[10,0],[0,0]]]}},
            {"attributes":{"ToBreak":15},"geometry":{"rings":[[[0,0],[1,1]]]}}
        ]}}"#;
        let raw: SolveResponse = rest::parse_body(body).unwrap();
        assert!(matches!(raw.into_graphics(&params), Err(Error::Solve(_))));
    }

    #[tokio::test]
    async fn test_walking_buffer_reach() {
        let service = WalkingBufferService::default();
        let description = service.describe_service().await.unwrap();
        let mode = description.travel_mode("Walking Time").unwrap();

        let facility = MapPoint::from_lat_lon(55.942, -3.210);
        let params =
            ServiceAreaParameters::new(facility, vec![15.0], mode, SpatialReference::WEB_MERCATOR);
        let graphics = service.solve(&params).await.unwrap();
        assert_eq!(graphics.len(), 1);

        let area = &graphics[0].area;
        assert!(area.contains_point(&facility));
        // 1250 m on the ground, about 1.78x that in Mercator meters at Edinburgh
        let width = area.extent().unwrap().width();
        let expected = 2.0 * 1250.0 * utils::mercator_scale_factor(55.942);
        assert!((width - expected).abs() / expected < 0.01, "{width} vs {expected}");
    }

    #[test]
    fn test_client_trailing_slash() {
        let client = NetworkServiceClient::new(
            "https://route-api.arcgis.com/arcgis/rest/services/World/ServiceAreas/NAServer/ServiceArea_World",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(client.service_url.ends_with("ServiceArea_World/"));
    }
}
