use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::model::{Coordinate, ForecastSeries, ForecastShape, Reading};
use crate::provider::{icon_category, percent_to_fraction, truncate_body, unix_to_utc};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

/// OpenWeather One Call 3.0 client.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
        extra: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let mut query: Vec<(&str, String)> = vec![
            ("appid", self.api_key.clone()),
            ("units", "metric".to_string()),
        ];
        query.extend(extra.iter().cloned());

        let res = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Failed to send request to OpenWeather ({what})"))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .with_context(|| format!("Failed to read OpenWeather {what} response body"))?;

        if !status.is_success() {
            return Err(anyhow!(
                "OpenWeather {} request failed with status {}: {}",
                what,
                status,
                truncate_body(&body),
            ));
        }

        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse OpenWeather {what} JSON"))
    }
}

fn location_params(at: Coordinate) -> Vec<(&'static str, String)> {
    vec![("lat", at.lat().to_string()), ("lon", at.lon().to_string())]
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwPrecip {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
}

/// A current, hourly or time-machine data point.
#[derive(Debug, Deserialize)]
struct OwPoint {
    dt: i64,
    sunrise: Option<i64>,
    sunset: Option<i64>,
    temp: Option<f64>,
    feels_like: Option<f64>,
    pressure: Option<f64>,
    humidity: Option<f64>,
    dew_point: Option<f64>,
    uvi: Option<f64>,
    clouds: Option<f64>,
    wind_speed: Option<f64>,
    wind_deg: Option<f64>,
    wind_gust: Option<f64>,
    pop: Option<f64>,
    rain: Option<OwPrecip>,
    snow: Option<OwPrecip>,
    #[serde(default)]
    weather: Vec<OwWeather>,
}

#[derive(Debug, Deserialize)]
struct OwDailyTemp {
    day: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwDaily {
    dt: i64,
    sunrise: Option<i64>,
    sunset: Option<i64>,
    temp: Option<OwDailyTemp>,
    feels_like: Option<OwDailyTemp>,
    pressure: Option<f64>,
    humidity: Option<f64>,
    dew_point: Option<f64>,
    uvi: Option<f64>,
    clouds: Option<f64>,
    wind_speed: Option<f64>,
    wind_deg: Option<f64>,
    wind_gust: Option<f64>,
    pop: Option<f64>,
    /// Daily totals in mm.
    rain: Option<f64>,
    snow: Option<f64>,
    #[serde(default)]
    weather: Vec<OwWeather>,
}

#[derive(Debug, Deserialize)]
struct OwOneCall {
    current: Option<OwPoint>,
    #[serde(default)]
    hourly: Vec<OwPoint>,
    #[serde(default)]
    daily: Vec<OwDaily>,
}

#[derive(Debug, Deserialize)]
struct OwTimeMachine {
    #[serde(default)]
    data: Vec<OwPoint>,
}

fn precip_type(rain: bool, snow: bool) -> Option<String> {
    match (rain, snow) {
        (true, true) => Some("sleet".to_string()),
        (true, false) => Some("rain".to_string()),
        (false, true) => Some("snow".to_string()),
        (false, false) => None,
    }
}

fn condition(weather: &[OwWeather]) -> (Option<String>, Option<String>) {
    match weather.first() {
        Some(w) => (Some(icon_category(&w.main)), Some(w.description.clone())),
        None => (None, None),
    }
}

impl OwPoint {
    fn into_reading(self) -> Reading {
        let rain = self.rain.and_then(|p| p.one_hour);
        let snow = self.snow.and_then(|p| p.one_hour);
        let intensity = match (rain, snow) {
            (None, None) => None,
            (r, s) => Some(r.unwrap_or(0.0) + s.unwrap_or(0.0)),
        };
        let (icon, summary) = condition(&self.weather);

        Reading {
            time: unix_to_utc(self.dt),
            icon,
            summary,
            temperature: self.temp,
            apparent_temperature: self.feels_like,
            dew_point: self.dew_point,
            humidity: self.humidity.map(percent_to_fraction),
            precip_probability: self.pop,
            precip_intensity: intensity,
            precip_type: precip_type(rain.is_some_and(|r| r > 0.0), snow.is_some_and(|s| s > 0.0)),
            pressure: self.pressure,
            air_density: None,
            cloud_cover: self.clouds.map(percent_to_fraction),
            uv_index: self.uvi,
            wind_speed: self.wind_speed,
            wind_gust: self.wind_gust,
            wind_bearing: self.wind_deg,
            sunrise: self.sunrise.and_then(unix_to_utc),
            sunset: self.sunset.and_then(unix_to_utc),
        }
        .with_derived_air_density()
    }
}

impl OwDaily {
    fn into_reading(self) -> Reading {
        let (icon, summary) = condition(&self.weather);
        let intensity = match (self.rain, self.snow) {
            (None, None) => None,
            (r, s) => Some((r.unwrap_or(0.0) + s.unwrap_or(0.0)) / 24.0),
        };

        Reading {
            time: unix_to_utc(self.dt),
            icon,
            summary,
            temperature: self.temp.and_then(|t| t.day),
            apparent_temperature: self.feels_like.and_then(|t| t.day),
            dew_point: self.dew_point,
            humidity: self.humidity.map(percent_to_fraction),
            precip_probability: self.pop,
            precip_intensity: intensity,
            precip_type: precip_type(
                self.rain.is_some_and(|r| r > 0.0),
                self.snow.is_some_and(|s| s > 0.0),
            ),
            pressure: self.pressure,
            air_density: None,
            cloud_cover: self.clouds.map(percent_to_fraction),
            uv_index: self.uvi,
            wind_speed: self.wind_speed,
            wind_gust: self.wind_gust,
            wind_bearing: self.wind_deg,
            sunrise: self.sunrise.and_then(unix_to_utc),
            sunset: self.sunset.and_then(unix_to_utc),
        }
        .with_derived_air_density()
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn name(&self) -> &str {
        "openweather"
    }

    async fn current(&self, at: Coordinate) -> Result<Reading> {
        let mut params = location_params(at);
        params.push(("exclude", "minutely,hourly,daily,alerts".to_string()));

        let parsed: OwOneCall = self
            .get_json("/data/3.0/onecall", "current", &params)
            .await?;

        parsed
            .current
            .map(OwPoint::into_reading)
            .ok_or_else(|| anyhow!("OpenWeather current response contained no data"))
    }

    async fn forecast(&self, at: Coordinate, shape: ForecastShape) -> Result<ForecastSeries> {
        let mut params = location_params(at);
        params.push(("exclude", "current,minutely,alerts".to_string()));

        let parsed: OwOneCall = self
            .get_json("/data/3.0/onecall", "forecast", &params)
            .await?;

        let hourly = parsed
            .hourly
            .into_iter()
            .map(OwPoint::into_reading)
            .collect();
        let daily = parsed
            .daily
            .into_iter()
            .map(OwDaily::into_reading)
            .collect();

        ForecastSeries::from_parts(hourly, daily, shape)
            .context("OpenWeather forecast is too short")
    }

    async fn history(&self, at: Coordinate, when: DateTime<Utc>) -> Result<Reading> {
        let mut params = location_params(at);
        params.push(("dt", when.timestamp().to_string()));

        let parsed: OwTimeMachine = self
            .get_json("/data/3.0/onecall/timemachine", "history", &params)
            .await?;

        let target_ts = when.timestamp();

        parsed
            .data
            .into_iter()
            .min_by_key(|p| (p.dt - target_ts).abs())
            .map(OwPoint::into_reading)
            .ok_or_else(|| anyhow!("OpenWeather history response contained no data"))
    }
}
