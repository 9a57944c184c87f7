//! The ensemble coordinator: fans a query out to every configured provider,
//! waits for all of them to settle and combines whatever succeeded.

use std::{future::Future, sync::Arc};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::{
    aggregate::{aggregate_forecasts, aggregate_readings},
    config::{Config, EnsembleSettings},
    error::{EnsembleError, ProviderFailure},
    model::{Coordinate, ForecastSeries, Reading},
    provider::{ProviderId, WeatherProvider, provider_from_config},
    weights::{is_configured, normalize_weights},
};

/// A candidate ensemble member before weight normalisation.
///
/// An empty `key` means the provider is not configured and is left out.
#[derive(Debug, Clone)]
pub struct ProviderSlot {
    pub key: String,
    pub weight: f64,
    pub provider: Arc<dyn WeatherProvider>,
}

#[derive(Debug, Clone)]
struct Member {
    provider: Arc<dyn WeatherProvider>,
    weight: f64,
}

/// What to ask every provider for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    Current,
    Forecast,
    History(DateTime<Utc>),
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Current => "current",
            Operation::Forecast => "forecast",
            Operation::History(_) => "history",
        }
    }
}

/// Combined answer to an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Reading(Reading),
    Forecast(ForecastSeries),
}

/// A fixed, weighted set of providers. Built once, immutable afterwards.
#[derive(Debug, Clone)]
pub struct Ensemble {
    members: Vec<Member>,
    settings: EnsembleSettings,
}

impl Ensemble {
    /// Builds an ensemble from every provider that has an API key in `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let settings = config.ensemble_settings()?;

        let mut slots = Vec::new();
        for &id in ProviderId::all() {
            if !config.is_provider_configured(id) {
                continue;
            }
            let provider: Arc<dyn WeatherProvider> = provider_from_config(id, config)?.into();
            slots.push(ProviderSlot {
                key: config.provider_api_key(id).unwrap_or_default().to_string(),
                weight: config.provider_weight(id),
                provider,
            });
        }

        Ok(Self::from_slots(slots, settings)?)
    }

    /// Normalises slot weights and keeps every configured slot that ends up
    /// with a positive weight.
    pub fn from_slots(
        slots: Vec<ProviderSlot>,
        settings: EnsembleSettings,
    ) -> Result<Self, EnsembleError> {
        let invalid = slots
            .iter()
            .filter(|s| is_configured(&s.key))
            .find(|s| !s.weight.is_finite() || s.weight < 0.0);
        if let Some(bad) = invalid {
            return Err(EnsembleError::InvalidWeight {
                provider: bad.provider.name().to_string(),
                weight: bad.weight,
            });
        }

        let keyed: Vec<(&str, f64)> = slots.iter().map(|s| (s.key.as_str(), s.weight)).collect();
        let weights = normalize_weights(&keyed)?;

        let members: Vec<Member> = slots
            .into_iter()
            .zip(weights)
            .filter(|(_, w)| *w > 0.0)
            .map(|(slot, weight)| Member {
                provider: slot.provider,
                weight,
            })
            .collect();

        if members.is_empty() {
            return Err(EnsembleError::NoProviders);
        }

        info!(
            providers = ?members.iter().map(|m| (m.provider.name(), m.weight)).collect::<Vec<_>>(),
            "weather ensemble ready"
        );

        Ok(Self { members, settings })
    }

    /// `(provider name, normalised weight)` for every member.
    pub fn members(&self) -> Vec<(&str, f64)> {
        self.members
            .iter()
            .map(|m| (m.provider.name(), m.weight))
            .collect()
    }

    pub fn settings(&self) -> &EnsembleSettings {
        &self.settings
    }

    pub async fn query(
        &self,
        at: Coordinate,
        operation: Operation,
    ) -> Result<QueryResult, EnsembleError> {
        match operation {
            Operation::Current => self.current(at).await.map(QueryResult::Reading),
            Operation::Forecast => self.forecast(at).await.map(QueryResult::Forecast),
            Operation::History(when) => self.history(at, when).await.map(QueryResult::Reading),
        }
    }

    pub async fn current(&self, at: Coordinate) -> Result<Reading, EnsembleError> {
        let readings = self
            .settle(Operation::Current, move |p| async move {
                Ok::<_, anyhow::Error>(p.current(at).await?.with_derived_air_density())
            })
            .await?;

        combine_readings(&readings)
    }

    pub async fn history(
        &self,
        at: Coordinate,
        when: DateTime<Utc>,
    ) -> Result<Reading, EnsembleError> {
        let readings = self
            .settle(Operation::History(when), move |p| async move {
                Ok::<_, anyhow::Error>(p.history(at, when).await?.with_derived_air_density())
            })
            .await?;

        combine_readings(&readings)
    }

    pub async fn forecast(&self, at: Coordinate) -> Result<ForecastSeries, EnsembleError> {
        let shape = self.settings.forecast;

        let series = self
            .settle(Operation::Forecast, move |p| async move {
                let mut series = p.forecast(at, shape).await?;
                ForecastSeries::check(&series.hourly, &series.daily, shape)?;
                for r in series.hourly.iter_mut().chain(series.daily.iter_mut()) {
                    *r = std::mem::take(r).with_derived_air_density();
                }
                Ok::<_, anyhow::Error>(series)
            })
            .await?;

        let refs: Vec<(&ForecastSeries, f64)> = series.iter().map(|(s, w)| (s, *w)).collect();
        aggregate_forecasts(&refs, self.settings.utc_offset, shape)
    }

    /// Runs `call` against every member concurrently, one task each, and
    /// waits for all of them. Returns the successful results with weights
    /// renormalised over the successes, or every failure if none succeeded.
    async fn settle<T, F, Fut>(
        &self,
        operation: Operation,
        call: F,
    ) -> Result<Vec<(T, f64)>, EnsembleError>
    where
        F: Fn(Arc<dyn WeatherProvider>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let op = operation.as_str();
        let timeout = self.settings.timeout;

        debug!(operation = op, providers = self.members.len(), "querying weather ensemble");

        let handles: Vec<_> = self
            .members
            .iter()
            .map(|m| {
                let fut = call(Arc::clone(&m.provider));
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, fut).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(anyhow!("timed out after {timeout:?}")),
                    }
                })
            })
            .collect();

        let outcomes = join_all(handles).await;

        let mut succeeded = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();

        for (member, joined) in self.members.iter().zip(outcomes) {
            let outcome = joined.unwrap_or_else(|e| Err(anyhow!("provider task failed: {e}")));
            match outcome {
                Ok(value) => succeeded.push((value, member.weight)),
                Err(error) => {
                    let provider = member.provider.name().to_string();
                    warn!(
                        operation = op,
                        provider = %provider,
                        error = %format!("{error:#}"),
                        "weather provider failed"
                    );
                    failures.push(ProviderFailure { provider, error });
                }
            }
        }

        info!(
            operation = op,
            succeeded = succeeded.len(),
            failed = failures.len(),
            "weather ensemble query settled"
        );

        if succeeded.is_empty() {
            return Err(EnsembleError::AllProvidersFailed {
                operation: op,
                failures,
            });
        }

        let total: f64 = succeeded.iter().map(|(_, w)| w).sum();
        Ok(succeeded.into_iter().map(|(v, w)| (v, w / total)).collect())
    }
}

fn combine_readings(readings: &[(Reading, f64)]) -> Result<Reading, EnsembleError> {
    let refs: Vec<(&Reading, f64)> = readings.iter().map(|(r, w)| (r, *w)).collect();
    aggregate_readings(&refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ForecastShape;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::time::{Duration, Instant};

    #[derive(Debug, Default)]
    struct MockProvider {
        name: &'static str,
        reading: Option<Reading>,
        forecast: Option<ForecastSeries>,
        delay: Option<Duration>,
    }

    impl MockProvider {
        fn ok(name: &'static str, reading: Reading) -> Self {
            Self {
                name,
                reading: Some(reading),
                ..Self::default()
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                name,
                ..Self::default()
            }
        }

        fn with_forecast(name: &'static str, forecast: ForecastSeries) -> Self {
            Self {
                name,
                forecast: Some(forecast),
                ..Self::default()
            }
        }

        async fn wait(&self) {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
        }

        fn reading_or_fail(&self) -> anyhow::Result<Reading> {
            self.reading
                .clone()
                .ok_or_else(|| anyhow!("{} is rate limited", self.name))
        }
    }

    #[async_trait]
    impl WeatherProvider for MockProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn current(&self, _at: Coordinate) -> anyhow::Result<Reading> {
            self.wait().await;
            self.reading_or_fail()
        }

        async fn forecast(
            &self,
            _at: Coordinate,
            _shape: ForecastShape,
        ) -> anyhow::Result<ForecastSeries> {
            self.wait().await;
            self.forecast
                .clone()
                .ok_or_else(|| anyhow!("{} has no forecast", self.name))
        }

        async fn history(&self, _at: Coordinate, when: DateTime<Utc>) -> anyhow::Result<Reading> {
            self.wait().await;
            let mut r = self.reading_or_fail()?;
            r.time = Some(when);
            Ok(r)
        }
    }

    fn slot(key: &str, weight: f64, provider: MockProvider) -> ProviderSlot {
        ProviderSlot {
            key: key.to_string(),
            weight,
            provider: Arc::new(provider),
        }
    }

    fn settings() -> EnsembleSettings {
        EnsembleSettings {
            timeout: Duration::from_millis(500),
            forecast: ForecastShape { hours: 2, days: 1 },
            ..EnsembleSettings::default()
        }
    }

    fn here() -> Coordinate {
        Coordinate::new(45.0, 7.0).unwrap()
    }

    fn temp(t: f64) -> Reading {
        Reading {
            temperature: Some(t),
            ..Reading::default()
        }
    }

    fn hour(h: u32) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, 0, 0).single()
    }

    fn series(start: u32, temps: &[f64]) -> ForecastSeries {
        ForecastSeries {
            hourly: temps
                .iter()
                .enumerate()
                .map(|(i, t)| Reading {
                    time: hour(start + i as u32),
                    ..temp(*t)
                })
                .collect(),
            daily: vec![Reading {
                time: hour(12),
                ..temp(temps[0])
            }],
        }
    }

    #[test]
    fn construction_fails_without_any_key() {
        let err = Ensemble::from_slots(
            vec![
                slot("", 0.5, MockProvider::ok("a", temp(1.0))),
                slot("", 0.5, MockProvider::ok("b", temp(2.0))),
            ],
            settings(),
        )
        .unwrap_err();
        assert!(matches!(err, EnsembleError::NoProviders));

        assert!(matches!(
            Ensemble::from_slots(vec![], settings()),
            Err(EnsembleError::NoProviders)
        ));
    }

    #[test]
    fn construction_rejects_negative_weight() {
        let slots = vec![slot("k", -1.0, MockProvider::failing("neg"))];
        let err = Ensemble::from_slots(slots, settings()).unwrap_err();
        assert!(matches!(
            err,
            EnsembleError::InvalidWeight { ref provider, .. } if provider == "neg"
        ));
    }

    #[test]
    fn members_are_normalised_and_unconfigured_dropped() {
        let ensemble = Ensemble::from_slots(
            vec![
                slot("k1", 3.0, MockProvider::failing("a")),
                slot("", 1.0, MockProvider::failing("b")),
                slot("k3", 1.0, MockProvider::failing("c")),
            ],
            settings(),
        )
        .unwrap();

        assert_eq!(ensemble.members(), vec![("a", 0.75), ("c", 0.25)]);
    }

    #[test]
    fn unconfigured_slot_weight_is_ignored() {
        let ensemble = Ensemble::from_slots(
            vec![
                slot("k", 0.5, MockProvider::failing("a")),
                slot("", -1.0, MockProvider::failing("unconfigured")),
                slot("  ", f64::NAN, MockProvider::failing("blank")),
            ],
            settings(),
        )
        .unwrap();

        assert_eq!(ensemble.members(), vec![("a", 1.0)]);
    }

    #[test]
    fn zero_weight_after_scaling_is_dropped() {
        let ensemble = Ensemble::from_slots(
            vec![
                slot("k1", 2.0, MockProvider::failing("a")),
                slot("k2", 0.0, MockProvider::failing("b")),
            ],
            settings(),
        )
        .unwrap();

        assert_eq!(ensemble.members(), vec![("a", 1.0)]);
    }

    #[test]
    fn from_config_requires_a_provider() {
        let err = Ensemble::from_config(&Config::default()).unwrap_err();
        assert!(matches!(err.downcast_ref::<EnsembleError>(), Some(EnsembleError::NoProviders)));
    }

    #[test]
    fn from_config_builds_weighted_members() {
        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "A".into());
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "B".into());
        cfg.set_provider_weight(ProviderId::OpenWeather, 0.8)
            .unwrap();

        let ensemble = Ensemble::from_config(&cfg).unwrap();
        let members = ensemble.members();

        assert_eq!(members.len(), 2);
        assert_eq!(members[0], ("openweather", 0.8));
        assert_eq!(members[1].0, "weatherapi");
        assert!((members[1].1 - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn current_is_weighted_consensus() {
        let ensemble = Ensemble::from_slots(
            vec![
                slot("k", 0.25, MockProvider::ok("a", temp(10.0))),
                slot("k", 0.75, MockProvider::ok("b", temp(20.0))),
            ],
            settings(),
        )
        .unwrap();

        let r = ensemble.current(here()).await.unwrap();
        assert!((r.temperature.unwrap() - 17.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn air_density_is_derived_before_aggregation() {
        let reading = Reading {
            temperature: Some(20.0),
            pressure: Some(1013.25),
            dew_point: Some(10.0),
            ..Reading::default()
        };
        let slots = vec![slot("k", 1.0, MockProvider::ok("a", reading))];
        let ensemble = Ensemble::from_slots(slots, settings()).unwrap();

        let r = ensemble.current(here()).await.unwrap();
        assert!((r.air_density.unwrap() - 1.1986).abs() < 1e-3);
    }

    #[tokio::test]
    async fn single_success_is_returned_as_is() {
        let survivor = Reading {
            temperature: Some(13.7),
            humidity: Some(0.42),
            wind_speed: Some(3.3),
            wind_bearing: Some(123.0),
            icon: Some("cloudy".into()),
            ..Reading::default()
        };
        let ensemble = Ensemble::from_slots(
            vec![
                slot("k", 0.5, MockProvider::failing("a")),
                slot("k", 0.3, MockProvider::ok("b", survivor.clone())),
                slot("k", 0.2, MockProvider::failing("c")),
            ],
            settings(),
        )
        .unwrap();

        let r = ensemble.current(here()).await.unwrap();
        assert_eq!(r, survivor);
    }

    #[tokio::test]
    async fn total_failure_reports_every_provider() {
        let ensemble = Ensemble::from_slots(
            vec![
                slot("k", 0.0, MockProvider::failing("a")),
                slot("k", 0.0, MockProvider::failing("b")),
                slot("k", 0.0, MockProvider::failing("c")),
            ],
            settings(),
        )
        .unwrap();

        let err = ensemble.current(here()).await.unwrap_err();
        match &err {
            EnsembleError::AllProvidersFailed { operation, failures } => {
                assert_eq!(*operation, "current");
                let names: Vec<_> = failures.iter().map(|f| f.provider.as_str()).collect();
                assert_eq!(names, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("c: c is rate limited"));
    }

    #[tokio::test]
    async fn slow_provider_times_out_without_sinking_the_query() {
        let slow = MockProvider {
            delay: Some(Duration::from_secs(30)),
            ..MockProvider::ok("slow", temp(100.0))
        };
        let ensemble = Ensemble::from_slots(
            vec![slot("k", 0.5, slow), slot("k", 0.5, MockProvider::ok("fast", temp(5.0)))],
            EnsembleSettings {
                timeout: Duration::from_millis(50),
                ..settings()
            },
        )
        .unwrap();

        let r = ensemble.current(here()).await.unwrap();
        assert_eq!(r.temperature, Some(5.0));
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let slow = MockProvider {
            delay: Some(Duration::from_secs(30)),
            ..MockProvider::ok("slow", temp(1.0))
        };
        let ensemble = Ensemble::from_slots(
            vec![slot("k", 1.0, slow)],
            EnsembleSettings {
                timeout: Duration::from_millis(20),
                ..settings()
            },
        )
        .unwrap();

        let err = ensemble.current(here()).await.unwrap_err();
        assert!(err.to_string().contains("slow: timed out"));
    }

    #[tokio::test]
    async fn providers_are_queried_concurrently() {
        let delayed = |name, t| MockProvider {
            delay: Some(Duration::from_millis(200)),
            ..MockProvider::ok(name, temp(t))
        };
        let ensemble = Ensemble::from_slots(
            vec![
                slot("k", 0.0, delayed("a", 1.0)),
                slot("k", 0.0, delayed("b", 2.0)),
                slot("k", 0.0, delayed("c", 3.0)),
            ],
            EnsembleSettings {
                timeout: Duration::from_secs(5),
                ..settings()
            },
        )
        .unwrap();

        let started = Instant::now();
        let r = ensemble.current(here()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(550));
        assert!((r.temperature.unwrap() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn history_is_forwarded_with_its_timestamp() {
        let slots = vec![slot("k", 1.0, MockProvider::ok("a", temp(4.0)))];
        let ensemble = Ensemble::from_slots(slots, settings()).unwrap();

        let when = Utc.with_ymd_and_hms(2020, 1, 1, 6, 0, 0).unwrap();
        let r = ensemble.history(here(), when).await.unwrap();
        assert_eq!(r.time, Some(when));
    }

    #[tokio::test]
    async fn forecasts_are_aligned_across_providers() {
        let ensemble = Ensemble::from_slots(
            vec![
                slot("k", 0.5, MockProvider::with_forecast("a", series(0, &[10.0, 20.0]))),
                slot("k", 0.5, MockProvider::with_forecast("b", series(1, &[30.0, 40.0]))),
            ],
            EnsembleSettings { forecast: ForecastShape { hours: 3, days: 1 }, ..settings() },
        )
        .unwrap();

        // Hourly shape is 3 but each provider has 2: both fall short.
        let err = ensemble.forecast(here()).await.unwrap_err();
        assert!(err.to_string().contains("Not enough hourly records"));

        let ensemble = Ensemble::from_slots(
            vec![
                slot("k", 0.5, MockProvider::with_forecast("a", series(0, &[10.0, 20.0]))),
                slot("k", 0.5, MockProvider::with_forecast("b", series(1, &[30.0, 40.0]))),
            ],
            settings(),
        )
        .unwrap();

        let f = ensemble.forecast(here()).await.unwrap();
        let temps: Vec<_> = f.hourly.iter().map(|r| r.temperature.unwrap()).collect();
        assert_eq!(temps, vec![10.0, 25.0]);
        assert_eq!(f.daily.len(), 1);
        assert_eq!(f.daily[0].temperature, Some(20.0));
    }

    #[tokio::test]
    async fn short_forecast_excludes_only_that_provider() {
        let short = ForecastSeries {
            hourly: vec![],
            daily: vec![],
        };
        let ensemble = Ensemble::from_slots(
            vec![
                slot("k", 0.5, MockProvider::with_forecast("short", short)),
                slot("k", 0.5, MockProvider::with_forecast("full", series(0, &[7.0, 8.0]))),
            ],
            settings(),
        )
        .unwrap();

        let f = ensemble.forecast(here()).await.unwrap();
        assert_eq!(f.hourly.len(), 2);
        assert_eq!(f.hourly[0].temperature, Some(7.0));
    }

    #[tokio::test]
    async fn query_dispatches_by_operation() {
        let provider = MockProvider {
            forecast: Some(series(0, &[1.0, 2.0])),
            ..MockProvider::ok("a", temp(3.0))
        };
        let ensemble = Ensemble::from_slots(vec![slot("k", 1.0, provider)], settings()).unwrap();

        assert!(matches!(
            ensemble.query(here(), Operation::Current).await.unwrap(),
            QueryResult::Reading(r) if r.temperature == Some(3.0)
        ));
        assert!(matches!(
            ensemble.query(here(), Operation::Forecast).await.unwrap(),
            QueryResult::Forecast(f) if f.hourly.len() == 2
        ));
    }
}
