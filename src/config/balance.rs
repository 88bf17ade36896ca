use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Load-score weights. The store's balance node overrides these at runtime.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BalanceConfig {
    #[serde(default = "default_agent_weight")]
    pub agent_weight: f64,
    #[serde(default = "default_resource_weight")]
    pub cpu_weight: f64,
    #[serde(default = "default_resource_weight")]
    pub mem_weight: f64,
    #[serde(default = "default_resource_weight")]
    pub net_weight: f64,
    /// Network device sampled by the load probe
    #[serde(default = "default_net_dev")]
    pub net_dev: String,
    /// Link speed in Mbit/s used to turn throughput into a usage percentage
    #[serde(default = "default_net_speed")]
    pub net_speed: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            agent_weight: default_agent_weight(),
            cpu_weight: default_resource_weight(),
            mem_weight: default_resource_weight(),
            net_weight: default_resource_weight(),
            net_dev: default_net_dev(),
            net_speed: default_net_speed(),
        }
    }
}

impl BalanceConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [self.agent_weight, self.cpu_weight, self.mem_weight, self.net_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::InvalidConfig(format!(
                "balance weights must be finite and non-negative: {:?}",
                weights
            )));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::InvalidConfig("balance weights must not all be zero".into()));
        }
        Ok(())
    }
}

fn default_agent_weight() -> f64 {
    40.0
}
fn default_resource_weight() -> f64 {
    20.0
}
fn default_net_dev() -> String {
    "eth0".to_string()
}
fn default_net_speed() -> u64 {
    10_000
}
