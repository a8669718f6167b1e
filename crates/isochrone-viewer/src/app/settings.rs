use crate::cli::{get_env, parse_args};
use clap::Parser;
use isochrone_lib::{Config, DistanceUnits, config};
use std::time::Duration;

/// Environment variable holding the location platform API key
pub const API_KEY_ENV: &str = "ARCGIS_API_KEY";

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Isochrone Viewer - Walking-time service areas, their overlap and the trees inside it
pub struct Settings {
    /// Network-analysis service area endpoint
    #[clap(long, default_value = config::DEFAULT_SERVICE_AREA_URL)]
    pub service_area_url: String,

    /// Feature layer with the point features to count
    #[clap(long, default_value = config::DEFAULT_FEATURE_LAYER_URL)]
    pub feature_layer_url: String,

    /// API key (falls back to the ARCGIS_API_KEY environment variable)
    #[clap(long)]
    pub api_key: Option<String>,

    /// Travel mode name as advertised by the service
    #[clap(long, default_value = "Walking Time")]
    pub travel_mode: String,

    /// Time budgets in minutes, comma separated
    #[clap(long, value_delimiter = ',', default_value = "15")]
    pub breaks: Vec<f64>,

    /// Distance units sent with the spatial filter
    #[clap(long, default_value = "miles")]
    pub units: DistanceUnits,

    /// Quiet interval before hit-testing the pointer, in milliseconds
    #[clap(long, default_value = "50")]
    pub debounce_ms: u64,

    /// HTTP request timeout in seconds
    #[clap(long, default_value = "30")]
    pub timeout_secs: u64,

    /// Plural noun used in the count message
    #[clap(long, default_value = "trees")]
    pub feature_label: String,

    /// Initial map centre latitude
    #[clap(long, default_value = "55.942", allow_hyphen_values = true)]
    pub center_lat: f64,

    /// Initial map centre longitude
    #[clap(long, default_value = "-3.210", allow_hyphen_values = true)]
    pub center_lon: f64,

    /// Initial zoom level
    #[clap(long, default_value = "15")]
    pub zoom: f64,

    /// Approximate service areas locally instead of calling the routing service
    #[clap(long, default_value = "false")]
    pub offline: bool,
}

impl Settings {
    /// Parse the command line, exiting with usage on error
    pub fn from_cli() -> Self {
        match parse_args::<Settings>() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| get_env(API_KEY_ENV))
    }

    /// Library configuration derived from the command line
    pub fn to_config(&self) -> Config {
        Config {
            service_area_url: self.service_area_url.clone(),
            feature_layer_url: self.feature_layer_url.clone(),
            api_key: self.api_key(),
            travel_mode_name: self.travel_mode.clone(),
            breaks_minutes: self.breaks.clone(),
            filter_units: self.units,
            debounce: Duration::from_millis(self.debounce_ms),
            request_timeout: Duration::from_secs(self.timeout_secs),
            feature_label: self.feature_label.clone(),
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_library_config() {
        let settings = Settings::parse_from(["isochrone-viewer"]);
        let config = settings.to_config();
        let defaults = Config::default();

        assert_eq!(config.service_area_url, defaults.service_area_url);
        assert_eq!(config.breaks_minutes, vec![15.0]);
        assert_eq!(config.filter_units, DistanceUnits::Miles);
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert!((settings.center_lon + 3.210).abs() < 1e-9);
        assert!(!settings.offline);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::parse_from([
            "isochrone-viewer",
            "--breaks",
            "5,10,15",
            "--units",
            "km",
            "--center-lon",
            "-4.25",
            "--offline",
            "--api-key",
            "secret",
        ]);
        let config = settings.to_config();
        assert_eq!(config.breaks_minutes, vec![5.0, 10.0, 15.0]);
        assert_eq!(config.filter_units, DistanceUnits::Kilometers);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert!(settings.offline);
    }
}
