//! Settings for a control-plane node.
//!
//! Sources are merged with priority (lowest first):
//! 1. Default values (hardcoded)
//! 2. Config file passed by the caller
//! 3. Config file named by `CONFIG_PATH`
//! 4. Environment variables `ROUTEPLANE__<SECTION>__<FIELD>` (highest priority)

mod balance;
mod dataflow;
mod monitoring;
mod node;
mod scheduler;
mod store;
pub use balance::*;
pub use dataflow::*;
pub use monitoring::*;
pub use node::*;
pub use scheduler::*;
pub use store::*;


//---
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Coordination store connection
    #[serde(default)]
    pub store: StoreConfig,
    /// Coordination store layout
    #[serde(default)]
    pub paths: PathsConfig,
    /// Identity this node advertises to the discovery base
    #[serde(default)]
    pub node: NodeConfig,
    /// Event loop timing of the scheduler
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Load-score weights used until the store provides its own
    #[serde(default)]
    pub balance: BalanceConfig,
    /// Local pipeline fallback
    #[serde(default)]
    pub dataflow: DataflowConfig,
    /// Logs and load reporting
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Settings {
    /// Load and validate settings.
    ///
    /// # Arguments
    /// * `config_path` - Optional TOML file layered over the defaults
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        if let Some(path) = config_path {
            config = config.add_source(File::with_name(path).required(true));
        }
        if let Ok(path) = env::var("CONFIG_PATH") {
            config = config.add_source(File::with_name(&path).required(true));
        }

        config = config.add_source(
            Environment::with_prefix("ROUTEPLANE")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Settings = config.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.paths.validate()?;
        self.node.validate()?;
        self.scheduler.validate()?;
        self.balance.validate()?;
        self.dataflow.validate()?;
        self.monitoring.validate()?;
        Ok(())
    }
}
