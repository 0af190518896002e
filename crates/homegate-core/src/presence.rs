//! Home zone and presence derivation

use homegate_api::{HomeProfileView, GEOFENCE_RADIUS_METERS};
use homegate_config::HomeConfig;
use serde::{Deserialize, Serialize};

use crate::{PolicyError, PolicyResult};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A raw location report from the presence monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// SSID of the connected Wi-Fi network, if any
    pub wifi_ssid: Option<String>,
}

impl LocationFix {
    /// A fix with coordinates checked against the WGS84 ranges
    pub fn new(latitude: f64, longitude: f64, wifi_ssid: Option<String>) -> PolicyResult<Self> {
        check_coordinates(latitude, longitude)?;
        Ok(Self {
            latitude,
            longitude,
            wifi_ssid,
        })
    }
}

fn check_coordinates(latitude: f64, longitude: f64) -> PolicyResult<()> {
    let valid = latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude);
    if !valid {
        return Err(PolicyError::InvalidCoordinates {
            latitude,
            longitude,
        });
    }
    Ok(())
}

/// The designated home zone: a geofence around a point plus an optional
/// Wi-Fi network. Either signal alone places the device at home.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeProfile {
    latitude: f64,
    longitude: f64,
    wifi_ssid: String,
}

impl HomeProfile {
    pub fn new(latitude: f64, longitude: f64, wifi_ssid: impl Into<String>) -> PolicyResult<Self> {
        check_coordinates(latitude, longitude)?;

        Ok(Self {
            latitude,
            longitude,
            wifi_ssid: normalize_ssid(&wifi_ssid.into()).to_string(),
        })
    }

    pub fn from_config(config: &HomeConfig) -> PolicyResult<Self> {
        Self::new(config.latitude, config.longitude, config.wifi_ssid.clone())
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn wifi_ssid(&self) -> &str {
        &self.wifi_ssid
    }

    /// (0, 0) marks "no coordinates recorded"; the GPS check is skipped
    pub fn has_coordinates(&self) -> bool {
        !(self.latitude == 0.0 && self.longitude == 0.0)
    }

    /// Whether a fix lies within the home zone
    pub fn contains(&self, fix: &LocationFix) -> bool {
        if !self.wifi_ssid.is_empty()
            && let Some(ssid) = fix.wifi_ssid.as_deref()
            && normalize_ssid(ssid) == self.wifi_ssid
        {
            return true;
        }

        self.has_coordinates()
            && haversine_meters(self.latitude, self.longitude, fix.latitude, fix.longitude)
                <= GEOFENCE_RADIUS_METERS
    }

    pub fn to_view(&self) -> HomeProfileView {
        HomeProfileView {
            latitude: self.latitude,
            longitude: self.longitude,
            wifi_ssid: self.wifi_ssid.clone(),
            radius_meters: GEOFENCE_RADIUS_METERS,
        }
    }
}

/// Android-style SSIDs arrive wrapped in double quotes
fn normalize_ssid(ssid: &str) -> &str {
    let trimmed = ssid.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
}

/// Great-circle distance between two points in meters
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(latitude: f64, longitude: f64, ssid: Option<&str>) -> LocationFix {
        LocationFix {
            latitude,
            longitude,
            wifi_ssid: ssid.map(String::from),
        }
    }

    #[test]
    fn distance_sanity() {
        assert_eq!(haversine_meters(10.0, 20.0, 10.0, 20.0), 0.0);
        // One thousandth of a degree of latitude is about 111 m
        let d = haversine_meters(0.0, 0.0, 0.001, 0.0);
        assert!((d - 111.19).abs() < 0.5, "got {}", d);
    }

    #[test]
    fn within_radius_is_home() {
        let home = HomeProfile::new(47.6062, -122.3321, "").unwrap();
        // ~33 m north
        assert!(home.contains(&fix(47.6065, -122.3321, None)));
        // ~111 m north
        assert!(!home.contains(&fix(47.6072, -122.3321, None)));
    }

    #[test]
    fn wifi_match_suffices() {
        let home = HomeProfile::new(47.6062, -122.3321, "HomeNet").unwrap();
        assert!(home.contains(&fix(0.0, 0.0, Some("\"HomeNet\""))));
        assert!(home.contains(&fix(0.0, 0.0, Some("HomeNet"))));
        assert!(!home.contains(&fix(0.0, 0.0, Some("homenet"))));
        assert!(!home.contains(&fix(0.0, 0.0, Some("CoffeeShop"))));
    }

    #[test]
    fn empty_home_ssid_never_matches() {
        let home = HomeProfile::new(0.0, 0.0, "\"\"").unwrap();
        assert_eq!(home.wifi_ssid(), "");
        assert!(!home.contains(&fix(0.0, 0.0, Some(""))));
    }

    #[test]
    fn zero_coordinates_skip_gps() {
        let home = HomeProfile::new(0.0, 0.0, "HomeNet").unwrap();
        assert!(!home.has_coordinates());
        assert!(!home.contains(&fix(0.0, 0.0, None)));
    }

    #[test]
    fn rejects_invalid_coordinates() {
        assert!(HomeProfile::new(95.0, 0.0, "").is_err());
        assert!(HomeProfile::new(0.0, f64::NAN, "").is_err());
        assert!(LocationFix::new(0.0, 181.0, None).is_err());
        assert_eq!(
            LocationFix::new(47.6, -122.3, Some("HomeNet".into())).unwrap(),
            fix(47.6, -122.3, Some("HomeNet"))
        );
    }
}
