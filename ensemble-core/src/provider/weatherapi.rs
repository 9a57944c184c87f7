use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::model::{Coordinate, ForecastSeries, ForecastShape, Reading};
use crate::provider::{icon_category, kph_to_mps, percent_to_fraction, truncate_body, unix_to_utc};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "http://api.weatherapi.com";

/// WeatherAPI.com client.
#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
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
        endpoint: &str,
        at: Coordinate,
        extra: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/v1/{}.json", self.base_url, endpoint);

        let mut query: Vec<(&str, String)> =
            vec![("key", self.api_key.clone()), ("q", format!("{},{}", at.lat(), at.lon()))];
        query.extend(extra.iter().cloned());

        let res = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Failed to send request to WeatherAPI.com ({endpoint})"))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .with_context(|| format!("Failed to read WeatherAPI {endpoint} response body"))?;

        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "WeatherAPI {} request failed with status {}: {}",
                endpoint,
                status,
                truncate_body(&body),
            ));
        }

        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse WeatherAPI {endpoint} JSON"))
    }
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    localtime_epoch: Option<i64>,
    localtime: Option<String>,
}

impl WaLocation {
    /// UTC offset of the location, recovered from its local wall-clock time
    /// and the matching epoch, rounded to the nearest quarter hour.
    fn offset(&self) -> Option<FixedOffset> {
        let epoch = self.localtime_epoch?;
        let local =
            NaiveDateTime::parse_from_str(self.localtime.as_deref()?, "%Y-%m-%d %H:%M").ok()?;
        let diff = local.and_utc().timestamp() - epoch;
        let rounded = ((diff as f64 / 900.0).round() as i32) * 900;
        FixedOffset::east_opt(rounded)
    }
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    last_updated_epoch: Option<i64>,
    temp_c: Option<f64>,
    feelslike_c: Option<f64>,
    dewpoint_c: Option<f64>,
    humidity: Option<f64>,
    wind_kph: Option<f64>,
    wind_degree: Option<f64>,
    gust_kph: Option<f64>,
    pressure_mb: Option<f64>,
    precip_mm: Option<f64>,
    cloud: Option<f64>,
    uv: Option<f64>,
    condition: Option<WaCondition>,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: WaLocation,
    current: WaCurrent,
}

#[derive(Debug, Deserialize)]
struct WaForecastHour {
    time_epoch: i64,
    temp_c: Option<f64>,
    feelslike_c: Option<f64>,
    dewpoint_c: Option<f64>,
    humidity: Option<f64>,
    wind_kph: Option<f64>,
    wind_degree: Option<f64>,
    gust_kph: Option<f64>,
    pressure_mb: Option<f64>,
    precip_mm: Option<f64>,
    cloud: Option<f64>,
    uv: Option<f64>,
    chance_of_rain: Option<f64>,
    chance_of_snow: Option<f64>,
    condition: Option<WaCondition>,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    avgtemp_c: Option<f64>,
    maxwind_kph: Option<f64>,
    totalprecip_mm: Option<f64>,
    avghumidity: Option<f64>,
    daily_chance_of_rain: Option<f64>,
    daily_chance_of_snow: Option<f64>,
    uv: Option<f64>,
    condition: Option<WaCondition>,
}

#[derive(Debug, Deserialize)]
struct WaAstro {
    sunrise: Option<String>,
    sunset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: String,
    day: Option<WaDay>,
    astro: Option<WaAstro>,
    #[serde(default)]
    hour: Vec<WaForecastHour>,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    #[serde(default)]
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    location: WaLocation,
    forecast: WaForecast,
}

fn condition(c: Option<&WaCondition>) -> (Option<String>, Option<String>) {
    match c {
        Some(c) => (Some(icon_category(&c.text)), Some(c.text.clone())),
        None => (None, None),
    }
}

/// Precipitation type from rain/snow chances in percent.
fn precip_type(rain: Option<f64>, snow: Option<f64>) -> Option<String> {
    let rain = rain.unwrap_or(0.0);
    let snow = snow.unwrap_or(0.0);
    if snow > 0.0 && snow >= rain {
        Some("snow".to_string())
    } else if rain > 0.0 {
        Some("rain".to_string())
    } else {
        None
    }
}

fn max_chance(rain: Option<f64>, snow: Option<f64>) -> Option<f64> {
    match (rain, snow) {
        (None, None) => None,
        (r, s) => Some(percent_to_fraction(r.unwrap_or(0.0).max(s.unwrap_or(0.0)))),
    }
}

/// Astro times look like "06:45 AM" in the location's local time.
fn astro_time(
    date: NaiveDate,
    text: Option<&str>,
    offset: Option<FixedOffset>,
) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(text?.trim(), "%I:%M %p").ok()?;
    offset?
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|t| t.with_timezone(&Utc))
}

impl WaCurrent {
    fn into_reading(self) -> Reading {
        let (icon, summary) = condition(self.condition.as_ref());
        Reading {
            time: self.last_updated_epoch.and_then(unix_to_utc),
            icon,
            summary,
            temperature: self.temp_c,
            apparent_temperature: self.feelslike_c,
            dew_point: self.dewpoint_c,
            humidity: self.humidity.map(percent_to_fraction),
            precip_intensity: self.precip_mm,
            pressure: self.pressure_mb,
            cloud_cover: self.cloud.map(percent_to_fraction),
            uv_index: self.uv,
            wind_speed: self.wind_kph.map(kph_to_mps),
            wind_gust: self.gust_kph.map(kph_to_mps),
            wind_bearing: self.wind_degree,
            ..Reading::default()
        }
        .with_derived_air_density()
    }
}

impl WaForecastHour {
    fn into_reading(self) -> Reading {
        let (icon, summary) = condition(self.condition.as_ref());
        Reading {
            time: unix_to_utc(self.time_epoch),
            icon,
            summary,
            temperature: self.temp_c,
            apparent_temperature: self.feelslike_c,
            dew_point: self.dewpoint_c,
            humidity: self.humidity.map(percent_to_fraction),
            precip_probability: max_chance(self.chance_of_rain, self.chance_of_snow),
            precip_intensity: self.precip_mm,
            precip_type: precip_type(self.chance_of_rain, self.chance_of_snow),
            pressure: self.pressure_mb,
            air_density: None,
            cloud_cover: self.cloud.map(percent_to_fraction),
            uv_index: self.uv,
            wind_speed: self.wind_kph.map(kph_to_mps),
            wind_gust: self.gust_kph.map(kph_to_mps),
            wind_bearing: self.wind_degree,
            sunrise: None,
            sunset: None,
        }
        .with_derived_air_density()
    }
}

impl WaForecastDay {
    fn date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .with_context(|| format!("Invalid WeatherAPI forecast date '{}'", self.date))
    }

    fn sun_times(
        &self,
        offset: Option<FixedOffset>,
    ) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let date = self.date()?;
        let astro = self.astro.as_ref();
        Ok((
            astro_time(date, astro.and_then(|a| a.sunrise.as_deref()), offset),
            astro_time(date, astro.and_then(|a| a.sunset.as_deref()), offset),
        ))
    }

    /// Daily summary stamped at local noon, so it lands on the right
    /// calendar day in any nearby offset.
    fn daily_reading(&self, offset: Option<FixedOffset>) -> Result<Reading> {
        let date = self.date()?;
        let noon = date
            .and_hms_opt(12, 0, 0)
            .and_then(|t| {
                let offset = offset.or_else(|| FixedOffset::east_opt(0))?;
                offset.from_local_datetime(&t).single()
            })
            .map(|t| t.with_timezone(&Utc));
        let (sunrise, sunset) = self.sun_times(offset)?;

        let Some(day) = self.day.as_ref() else {
            return Ok(Reading {
                time: noon,
                sunrise,
                sunset,
                ..Reading::default()
            });
        };
        let (icon, summary) = condition(day.condition.as_ref());

        Ok(Reading {
            time: noon,
            icon,
            summary,
            temperature: day.avgtemp_c,
            humidity: day.avghumidity.map(percent_to_fraction),
            precip_probability: max_chance(day.daily_chance_of_rain, day.daily_chance_of_snow),
            precip_intensity: day.totalprecip_mm.map(|mm| mm / 24.0),
            precip_type: precip_type(day.daily_chance_of_rain, day.daily_chance_of_snow),
            uv_index: day.uv,
            // Peak sustained wind is the only daily wind figure available.
            wind_speed: day.maxwind_kph.map(kph_to_mps),
            sunrise,
            sunset,
            ..Reading::default()
        })
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn name(&self) -> &str {
        "weatherapi"
    }

    async fn current(&self, at: Coordinate) -> Result<Reading> {
        let parsed: WaResponse = self.get_json("current", at, &[]).await?;

        let mut reading = parsed.current.into_reading();
        if reading.time.is_none() {
            reading.time = parsed.location.localtime_epoch.and_then(unix_to_utc);
        }
        Ok(reading)
    }

    async fn forecast(&self, at: Coordinate, shape: ForecastShape) -> Result<ForecastSeries> {
        // The hourly window starts at the current local hour, so it can spill
        // into one more day than it spans.
        let days = shape.days.max(shape.hours.div_ceil(24) + 1).to_string();
        let parsed: WaForecastResponse = self.get_json("forecast", at, &[("days", days)]).await?;

        let offset = parsed.location.offset();
        let start = parsed
            .location
            .localtime_epoch
            .unwrap_or_else(|| Utc::now().timestamp());
        let start_hour = start - start.rem_euclid(3600);

        let mut daily = Vec::with_capacity(parsed.forecast.forecastday.len());
        for day in &parsed.forecast.forecastday {
            daily.push(day.daily_reading(offset)?);
        }

        let hourly = parsed
            .forecast
            .forecastday
            .into_iter()
            .flat_map(|d| d.hour)
            .filter(|h| h.time_epoch >= start_hour)
            .map(WaForecastHour::into_reading)
            .collect();

        ForecastSeries::from_parts(hourly, daily, shape)
            .context("WeatherAPI forecast is too short")
    }

    async fn history(&self, at: Coordinate, when: DateTime<Utc>) -> Result<Reading> {
        let parsed: WaForecastResponse = self
            .get_json("history", at, &[("unixdt", when.timestamp().to_string())])
            .await?;

        let offset = parsed.location.offset();
        let target_ts = when.timestamp();

        let day = parsed
            .forecast
            .forecastday
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("WeatherAPI response contained no forecastday data"))?;

        let (sunrise, sunset) = day.sun_times(offset)?;

        let hour_entry = day
            .hour
            .into_iter()
            .min_by_key(|h| (h.time_epoch - target_ts).abs())
            .ok_or_else(|| anyhow::anyhow!("WeatherAPI response contained no hourly data"))?;

        Ok(Reading {
            sunrise,
            sunset,
            ..hour_entry.into_reading()
        })
    }
}
