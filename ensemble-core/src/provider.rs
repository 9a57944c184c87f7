use crate::{
    Config, Coordinate, ForecastSeries, ForecastShape, Reading,
    provider::{openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

pub mod openweather;
pub mod weatherapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi."
            )),
        }
    }
}

/// A source of weather readings.
///
/// Implementations report fields the upstream service omitted as `None`
/// rather than inventing a default.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Short identifier used in logs and error reports.
    fn name(&self) -> &str;

    async fn current(&self, at: Coordinate) -> anyhow::Result<Reading>;

    /// Hourly and daily series holding at least `shape.hours` and
    /// `shape.days` records; a shorter upstream response is an error.
    async fn forecast(&self, at: Coordinate, shape: ForecastShape)
    -> anyhow::Result<ForecastSeries>;

    async fn history(&self, at: Coordinate, when: DateTime<Utc>) -> anyhow::Result<Reading>;
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Box<dyn WeatherProvider>> {
    let api_key = config
        .provider_api_key(id)
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No API key configured for provider '{id}'.\n\
                 Hint: run `weather configure {id}` and enter your API key."
            )
        })?;

    let boxed: Box<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather => Box::new(OpenWeatherProvider::new(api_key.to_owned())),
        ProviderId::WeatherApi => Box::new(WeatherApiProvider::new(api_key.to_owned())),
    };

    Ok(boxed)
}

/// Coarse condition category shared by all providers, so that icons from
/// different services can be compared.
pub(crate) fn icon_category(text: &str) -> String {
    let t = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| t.contains(w));
    let category = if t.contains("thunder") {
        "thunderstorm"
    } else if has(&["snow", "sleet", "blizzard", "ice"]) {
        "snow"
    } else if has(&["rain", "drizzle", "shower"]) {
        "rain"
    } else if has(&["fog", "mist", "haze"]) {
        "fog"
    } else if has(&["cloud", "overcast"]) {
        "cloudy"
    } else if has(&["clear", "sunny"]) {
        "clear"
    } else {
        return t.trim().to_string();
    };
    category.to_string()
}

pub(crate) fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

pub(crate) fn percent_to_fraction(pct: f64) -> f64 {
    pct / 100.0
}

pub(crate) fn kph_to_mps(kph: f64) -> f64 {
    kph / 3.6
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}
