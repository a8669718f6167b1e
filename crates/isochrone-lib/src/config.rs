//! Runtime configuration for the pipeline

use crate::{DistanceUnits, SpatialReference};
use std::time::Duration;

/// REST service computing service areas (World network, ArcGIS location platform)
pub const DEFAULT_SERVICE_AREA_URL: &str =
    "https://route-api.arcgis.com/arcgis/rest/services/World/ServiceAreas/NAServer/ServiceArea_World/";

/// Trees of Edinburgh (data Copyright City of Edinburgh Council)
pub const DEFAULT_FEATURE_LAYER_URL: &str =
    "https://services.arcgis.com/V6ZHFr6zdgNZuVG0/arcgis/rest/services/All_Edinburgh_Trees/FeatureServer/0";

/// Configuration shared by the services and workflows
#[derive(Debug, Clone)]
pub struct Config {
    /// Network-analysis service root (must end with a slash)
    pub service_area_url: String,
    /// Feature layer endpoint (no trailing `/query`)
    pub feature_layer_url: String,
    /// API key sent as `token` with every request
    pub api_key: Option<String>,
    /// Travel mode looked up by name in the service description
    pub travel_mode_name: String,
    /// Time budgets in minutes, one polygon per break
    pub breaks_minutes: Vec<f64>,
    /// Spatial reference of every geometry returned to the view
    pub out_spatial_reference: SpatialReference,
    /// Distance units sent with the spatial filter
    pub filter_units: DistanceUnits,
    /// Quiet interval before a pointer position is hit-tested
    pub debounce: Duration,
    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
    /// Hit-test radius around the cursor, in screen pixels
    pub hit_tolerance_px: f32,
    /// Plural noun used in the count alert ("There are 12 trees to see.")
    pub feature_label: String,
    /// Walking speed used by the offline service-area approximation
    pub walking_speed_kmh: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_area_url: DEFAULT_SERVICE_AREA_URL.to_string(),
            feature_layer_url: DEFAULT_FEATURE_LAYER_URL.to_string(),
            api_key: None,
            travel_mode_name: "Walking Time".to_string(),
            breaks_minutes: vec![15.0],
            out_spatial_reference: SpatialReference::WEB_MERCATOR,
            filter_units: DistanceUnits::Miles,
            debounce: Duration::from_millis(50),
            request_timeout: Duration::from_secs(30),
            hit_tolerance_px: 8.0,
            feature_label: "trees".to_string(),
            walking_speed_kmh: 5.0,
        }
    }
}

impl Config {
    /// Text shown in the alert after a successful count
    pub fn count_message(&self, count: u64) -> String {
        format!("There are {} {} to see.", count, self.feature_label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.service_area_url.ends_with('/'));
        assert_eq!(config.breaks_minutes, vec![15.0]);
        assert_eq!(config.travel_mode_name, "Walking Time");
        assert_eq!(config.filter_units, DistanceUnits::Miles);
    }

    #[test]
    fn test_count_message() {
        let config = Config::default();
        assert_eq!(config.count_message(0), "There are 0 trees to see.");
        assert_eq!(config.count_message(42), "There are 42 trees to see.");
    }
}
