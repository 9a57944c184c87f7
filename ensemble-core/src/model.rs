use std::{fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{bearing, error::EnsembleError, physics};

/// A geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    lat: f64,
    lon: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = EnsembleError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.lat, raw.lon)
    }
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, EnsembleError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(EnsembleError::InvalidCoordinate(format!(
                "latitude {lat} is outside [-90, 90]"
            )));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(EnsembleError::InvalidCoordinate(format!(
                "longitude {lon} is outside [-180, 180]"
            )));
        }
        Ok(Self { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}

impl FromStr for Coordinate {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s.split_once(',').ok_or_else(|| {
            EnsembleError::InvalidCoordinate(format!("expected 'latitude,longitude', got '{s}'"))
        })?;

        let parse = |part: &str, what: &str| {
            part.trim().parse::<f64>().map_err(|e| {
                EnsembleError::InvalidCoordinate(format!("bad {what} '{}': {e}", part.trim()))
            })
        };

        Coordinate::new(parse(lat, "latitude")?, parse(lon, "longitude")?)
    }
}

/// Weather attributes for one point in time.
///
/// Every field is optional: `None` means the provider did not report it,
/// which is distinct from a reported zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Short condition category, e.g. "rain" or "clear".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// °C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// °C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparent_temperature: Option<f64>,
    /// °C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dew_point: Option<f64>,
    /// Relative humidity, 0..1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// 0..1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precip_probability: Option<f64>,
    /// mm/h
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precip_intensity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precip_type: Option<String>,
    /// hPa
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    /// kg/m³
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_density: Option<f64>,
    /// 0..1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_cover: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uv_index: Option<f64>,
    /// m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    /// m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_gust: Option<f64>,
    /// Degrees clockwise from north, [0, 360).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_bearing: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sunrise: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sunset: Option<DateTime<Utc>>,
}

impl Reading {
    /// Fills `air_density` from temperature, pressure and dew point when the
    /// provider did not report it directly.
    pub fn with_derived_air_density(mut self) -> Self {
        if self.air_density.is_none() {
            if let (Some(t), Some(p), Some(dp)) = (self.temperature, self.pressure, self.dew_point)
            {
                self.air_density = Some(physics::air_density(t, p, dp));
            }
        }
        self
    }

    /// Compass label of the wind bearing, e.g. `"WSW"`.
    pub fn wind_direction(&self) -> Option<&'static str> {
        self.wind_bearing.map(bearing::compass_point)
    }
}

/// Number of hourly and daily records a forecast must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastShape {
    pub hours: usize,
    pub days: usize,
}

impl Default for ForecastShape {
    fn default() -> Self {
        Self { hours: 24, days: 7 }
    }
}

/// Hourly and daily forecast records, each ordered by time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    pub hourly: Vec<Reading>,
    pub daily: Vec<Reading>,
}

impl ForecastSeries {
    /// Builds a series of exactly `shape.hours` hourly and `shape.days`
    /// daily records. Fewer records than requested is an error.
    pub fn from_parts(
        mut hourly: Vec<Reading>,
        mut daily: Vec<Reading>,
        shape: ForecastShape,
    ) -> Result<Self, EnsembleError> {
        Self::check(&hourly, &daily, shape)?;
        hourly.truncate(shape.hours);
        daily.truncate(shape.days);
        Ok(Self { hourly, daily })
    }

    /// Fails when either series is shorter than `shape` demands. A daily
    /// series must never be empty.
    pub fn check(
        hourly: &[Reading],
        daily: &[Reading],
        shape: ForecastShape,
    ) -> Result<(), EnsembleError> {
        let min_days = shape.days.max(1);
        if daily.len() < min_days {
            return Err(EnsembleError::InsufficientData {
                series: "daily",
                expected: min_days,
                actual: daily.len(),
            });
        }
        if hourly.len() < shape.hours {
            return Err(EnsembleError::InsufficientData {
                series: "hourly",
                expected: shape.hours,
                actual: hourly.len(),
            });
        }
        Ok(())
    }

    /// Hourly records that fall on `date` in the given offset.
    pub fn hourly_on(&self, date: NaiveDate, offset: FixedOffset) -> Vec<&Reading> {
        self.hourly
            .iter()
            .filter(|r| r.time.is_some_and(|t| t.with_timezone(&offset).date_naive() == date))
            .collect()
    }
}
