use anyhow::{Context, Result, anyhow};
use chrono::{FixedOffset, Offset, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::{model::ForecastShape, provider::ProviderId};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,

    /// Relative weight in the ensemble; 0 means "unset" and receives an
    /// equal share of whatever the explicit weights leave over.
    #[serde(default)]
    pub weight: f64,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// timezone = "+02:00"
/// timeout_secs = 5
///
/// [providers.openweather]
/// api_key = "..."
/// weight = 0.6
///
/// [providers.weatherapi]
/// api_key = "..."
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Fixed UTC offset used to group daily forecasts by calendar day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Per-provider request timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_hours: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_days: Option<usize>,

    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Validated, non-provider settings for an ensemble.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleSettings {
    pub timeout: Duration,
    pub forecast: ForecastShape,
    pub utc_offset: FixedOffset,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            forecast: ForecastShape::default(),
            utc_offset: utc(),
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

impl Config {
    pub fn has_provider(&self, id: ProviderId) -> bool {
        self.providers.contains_key(id.as_str())
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(contents)?;
        for name in cfg.providers.keys() {
            ProviderId::try_from(name.as_str())?;
        }
        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-ensemble", "weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Set/replace a provider API key, keeping any weight already configured.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .and_modify(|cfg| cfg.api_key = api_key.clone())
            .or_insert(ProviderConfig {
                api_key,
                weight: 0.0,
            });
    }

    /// Set the ensemble weight of an already configured provider.
    pub fn set_provider_weight(&mut self, provider_id: ProviderId, weight: f64) -> Result<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(anyhow!("Weight must be a non-negative number, got {weight}"));
        }

        let cfg = self.providers.get_mut(provider_id.as_str()).ok_or_else(|| {
            anyhow!(
                "Provider '{provider_id}' is not configured.\n\
                 Hint: run `weather configure {provider_id}` first."
            )
        })?;
        cfg.weight = weight;
        Ok(())
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers
            .get(provider_id.as_str())
            .map(|cfg| cfg.api_key.as_str())
    }

    /// Declared (not normalised) weight of a provider; 0 when unset.
    pub fn provider_weight(&self, provider_id: ProviderId) -> f64 {
        self.provider_config(provider_id)
            .map_or(0.0, |cfg| cfg.weight)
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id)
            .is_some_and(|key| !key.trim().is_empty())
    }

    /// UTC offset from `timezone`, defaulting to UTC.
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        match self.timezone.as_deref().map(str::trim) {
            None | Some("") => Ok(utc()),
            Some("UTC") | Some("Z") => Ok(utc()),
            Some(tz) => tz.parse::<FixedOffset>().map_err(|e| {
                anyhow!("Invalid timezone '{tz}': expected a UTC offset such as +02:00 ({e})")
            }),
        }
    }

    /// Validated settings for building an ensemble.
    pub fn ensemble_settings(&self) -> Result<EnsembleSettings> {
        let defaults = EnsembleSettings::default();

        let timeout = match self.timeout_secs {
            Some(0) => return Err(anyhow!("timeout_secs must be greater than zero")),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.timeout,
        };

        let forecast = ForecastShape {
            hours: self.forecast_hours.unwrap_or(defaults.forecast.hours),
            days: self.forecast_days.unwrap_or(defaults.forecast.days),
        };
        if forecast.days == 0 {
            return Err(anyhow!("forecast_days must be at least 1"));
        }

        Ok(EnsembleSettings {
            timeout,
            forecast,
            utc_offset: self.utc_offset()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;

    #[test]
    fn upsert_sets_key_and_keeps_weight() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());
        cfg.set_provider_weight(ProviderId::OpenWeather, 0.7)
            .unwrap();
        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "NEW_KEY".into());

        assert_eq!(cfg.provider_api_key(ProviderId::OpenWeather), Some("NEW_KEY"));
        assert_eq!(cfg.provider_weight(ProviderId::OpenWeather), 0.7);
        assert!(cfg.is_provider_configured(ProviderId::OpenWeather));
        assert!(!cfg.is_provider_configured(ProviderId::WeatherApi));
    }

    #[test]
    fn weight_requires_configured_provider() {
        let mut cfg = Config::default();
        let err = cfg
            .set_provider_weight(ProviderId::WeatherApi, 0.5)
            .unwrap_err();
        assert!(err.to_string().contains("is not configured"));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "K".into());
        assert!(cfg.set_provider_weight(ProviderId::WeatherApi, -0.1).is_err());
        assert!(cfg.set_provider_weight(ProviderId::WeatherApi, f64::NAN).is_err());
    }

    #[test]
    fn blank_key_is_not_configured() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "".into());
        assert!(cfg.has_provider(ProviderId::WeatherApi));
        assert!(!cfg.is_provider_configured(ProviderId::WeatherApi));
    }

    #[test]
    fn parses_toml() {
        let cfg = Config::from_toml(
            r#"
            timezone = "-07:00"
            timeout_secs = 3
            forecast_days = 3

            [providers.openweather]
            api_key = "A"
            weight = 0.25

            [providers.weatherapi]
            api_key = "B"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.provider_weight(ProviderId::OpenWeather), 0.25);
        assert_eq!(cfg.provider_weight(ProviderId::WeatherApi), 0.0);

        let settings = cfg.ensemble_settings().unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(3));
        assert_eq!(settings.forecast, ForecastShape { hours: 24, days: 3 });
        assert_eq!(settings.utc_offset, FixedOffset::west_opt(7 * 3600).unwrap());
    }

    #[test]
    fn unknown_provider_in_toml_is_rejected() {
        let err = Config::from_toml("[providers.darksky]\napi_key = \"X\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn settings_validation() {
        let cfg = Config {
            timezone: Some("Mars/Olympus".into()),
            ..Config::default()
        };
        assert!(cfg.ensemble_settings().is_err());

        let cfg = Config {
            timeout_secs: Some(0),
            ..Config::default()
        };
        assert!(cfg.ensemble_settings().is_err());

        let cfg = Config {
            forecast_days: Some(0),
            ..Config::default()
        };
        assert!(cfg.ensemble_settings().is_err());

        let cfg = Config {
            timezone: Some("UTC".into()),
            ..Config::default()
        };
        assert_eq!(cfg.ensemble_settings().unwrap(), EnsembleSettings::default());
    }

    #[test]
    fn toml_roundtrip_keeps_weights() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "B".into());
        cfg.set_provider_weight(ProviderId::WeatherApi, 0.4)
            .unwrap();

        let text = toml::to_string_pretty(&cfg).unwrap();
        let back = Config::from_toml(&text).unwrap();
        assert_eq!(back.provider_weight(ProviderId::WeatherApi), 0.4);
    }
}
