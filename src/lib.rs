//! Control plane of a data-ingestion cluster.
//!
//! A [`configurator::Configurator`] keeps the routing configuration in sync
//! with a coordination store through one-shot watches, and a
//! [`balance::Scheduler`] answers location-aware scheduling requests from a
//! periodically rebuilt cluster load tree.

mod config;
mod errors;
mod watch;

pub mod balance;
pub mod configurator;
pub mod constants;
pub mod metrics;
pub mod routing;
pub mod store;
pub mod utils;

pub use config::*;
pub use errors::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);
