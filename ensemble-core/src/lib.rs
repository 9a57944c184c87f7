//! Core library for the `weather` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling, including provider weights
//! - Abstraction over weather providers and two HTTP implementations
//! - Shared domain models (coordinates, readings, forecast series)
//! - The ensemble: concurrent fan-out to every configured provider and the
//!   weighted consensus of their answers
//!
//! It is used by `ensemble-cli`, but can also be reused by other binaries or services.

pub mod aggregate;
pub mod bearing;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod model;
pub mod physics;
pub mod provider;
pub mod weights;

pub use config::{Config, EnsembleSettings, ProviderConfig};
pub use ensemble::{Ensemble, Operation, ProviderSlot, QueryResult};
pub use error::{EnsembleError, ProviderFailure};
pub use model::{Coordinate, ForecastSeries, ForecastShape, Reading};
pub use provider::{ProviderId, WeatherProvider};
