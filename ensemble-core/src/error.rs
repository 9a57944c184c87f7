use std::fmt;

/// One provider's failure during a single ensemble query.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: anyhow::Error,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.provider, self.error)
    }
}

/// Errors surfaced by the ensemble layer.
#[derive(Debug, thiserror::Error)]
pub enum EnsembleError {
    #[error(
        "No weather providers configured.\n\
         Hint: run `weather configure <provider>` and enter your API key."
    )]
    NoProviders,

    #[error(
        "Invalid weight {weight} for provider '{provider}': weights must be finite and non-negative"
    )]
    InvalidWeight { provider: String, weight: f64 },

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Not enough {series} records returned: expected at least {expected}, got {actual}")]
    InsufficientData {
        series: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(
        "All {} weather providers failed ({operation}):\n{}",
        .failures.len(),
        list_failures(.failures)
    )]
    AllProvidersFailed {
        operation: &'static str,
        failures: Vec<ProviderFailure>,
    },

    #[error("Nothing to aggregate: no readings with positive weight")]
    NothingToAggregate,
}

fn list_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {f}"))
        .collect::<Vec<_>>()
        .join("\n")
}
