use anyhow::{Context, anyhow};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use ensemble_core::{Config, Coordinate, Ensemble, ProviderId};

use crate::output;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Consensus weather from several providers")]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct Location {
    /// Point to query, as "latitude,longitude".
    #[arg(long, allow_hyphen_values = true)]
    latlng: Coordinate,

    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials and weight for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,

        /// API key; prompted for when omitted.
        #[arg(long)]
        key: Option<String>,

        /// Relative weight in the ensemble (0 = share the remainder evenly).
        #[arg(long)]
        weight: Option<f64>,
    },

    /// List configured providers and their normalised weights.
    Providers,

    /// Current conditions.
    Current {
        #[command(flatten)]
        location: Location,
    },

    /// Hourly and daily forecast.
    Forecast {
        #[command(flatten)]
        location: Location,
    },

    /// Conditions at a past time.
    History {
        #[command(flatten)]
        location: Location,

        /// RFC 3339 timestamp, or "YYYY-MM-DD HH:MM" in the configured timezone.
        #[arg(long)]
        time: String,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let mut config = Config::load()?;

        match self.command {
            Command::Configure { provider, key, weight } => {
                let id = ProviderId::try_from(provider.as_str())?;
                let key = match key {
                    Some(key) => key,
                    None => inquire::Password::new(&format!("{id} API key:"))
                        .without_confirmation()
                        .prompt()
                        .context("Failed to read API key")?,
                };
                if key.trim().is_empty() {
                    return Err(anyhow!("API key for '{id}' must not be empty"));
                }

                config.upsert_provider_api_key(id, key.trim().to_string());
                if let Some(weight) = weight {
                    config.set_provider_weight(id, weight)?;
                }
                config.save()?;
                tracing::debug!(provider = %id, "saved provider configuration");

                println!("Configured provider: {id}");
            }
            Command::Providers => {
                let ensemble = Ensemble::from_config(&config)?;
                for (name, weight) in ensemble.members() {
                    println!("{name:<12} {weight:.3}");
                }
            }
            Command::Current { location } => {
                let ensemble = Ensemble::from_config(&config)?;
                let reading = ensemble.current(location.latlng).await?;
                if location.json {
                    println!("{}", serde_json::to_string_pretty(&reading)?);
                } else {
                    println!("{}", output::reading(&reading));
                }
            }
            Command::Forecast { location } => {
                let ensemble = Ensemble::from_config(&config)?;
                let forecast = ensemble.forecast(location.latlng).await?;
                if location.json {
                    println!("{}", serde_json::to_string_pretty(&forecast)?);
                } else {
                    println!("{}", output::forecast(&forecast, ensemble.settings().utc_offset));
                }
            }
            Command::History { location, time } => {
                let ensemble = Ensemble::from_config(&config)?;
                let when = parse_time(&time, ensemble.settings().utc_offset)?;
                let reading = ensemble.history(location.latlng, when).await?;
                if location.json {
                    println!("{}", serde_json::to_string_pretty(&reading)?);
                } else {
                    println!("{}", output::reading(&reading));
                }
            }
        }

        Ok(())
    }
}

/// Accepts RFC 3339, or a local "YYYY-MM-DD HH:MM" / "YYYY-MM-DD" in `offset`.
fn parse_time(s: &str, offset: FixedOffset) -> anyhow::Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }

    let naive = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| anyhow!("Could not parse time '{s}'. Use RFC 3339 or 'YYYY-MM-DD HH:MM'."))?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("Time '{s}' is ambiguous in offset {offset}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    #[test]
    fn parses_rfc3339() {
        let t = parse_time("2024-06-01T12:00:00+02:00", offset(0)).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn local_times_use_configured_offset() {
        let t = parse_time("2024-06-01 12:30", offset(-7)).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 6, 1, 19, 30, 0).unwrap());

        let t = parse_time("2024-06-01", offset(1)).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 5, 31, 23, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_time("yesterday-ish", offset(0)).is_err());
    }

    #[test]
    fn negative_coordinates_parse() {
        let cli = Cli::try_parse_from(["weather", "current", "--latlng", "-33.92,18.42"]).unwrap();
        match cli.command {
            Command::Current { location } => {
                assert_eq!(location.latlng.lat(), -33.92);
                assert!(!location.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn history_requires_time() {
        assert!(Cli::try_parse_from(["weather", "history", "--latlng", "1,2"]).is_err());
    }
}
