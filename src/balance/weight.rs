use super::ServerBalanceInfo;
use crate::BalanceConfig;
use crate::SchemaError;

/// Weights of the four load components
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadWeights {
    pub agent: f64,
    pub cpu: f64,
    pub mem: f64,
    pub net: f64,
}

impl Default for LoadWeights {
    fn default() -> Self {
        LoadWeights::from(&BalanceConfig::default())
    }
}

impl From<&BalanceConfig> for LoadWeights {
    fn from(config: &BalanceConfig) -> Self {
        Self {
            agent: config.agent_weight,
            cpu: config.cpu_weight,
            mem: config.mem_weight,
            net: config.net_weight,
        }
    }
}

impl LoadWeights {
    /// Parses the balance node value, a flat JSON object of weights.
    pub fn parse(raw: &str) -> Result<(Self, BalanceConfig), SchemaError> {
        let config: BalanceConfig = serde_json::from_str(raw)?;
        config
            .validate()
            .map_err(|e| SchemaError::invalid("balance config", e.to_string()))?;
        Ok((LoadWeights::from(&config), config))
    }

    pub fn total(&self) -> f64 {
        self.agent + self.cpu + self.mem + self.net
    }

    /// Score in `[0, 100]`, higher meaning less loaded.
    ///
    /// `100 - (agent% * Wa + cpu% * Wc + mem% * Wm + net% * Wn) / Wtotal`,
    /// with usages clamped to `[0, 100]`. A server at its agent limit scores 0
    /// and is never preferred, so the score drops in one step at the limit.
    pub fn score(
        &self,
        info: &ServerBalanceInfo,
    ) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        if info.max_agent_count > 0 && info.agent_count >= info.max_agent_count {
            return 0.0;
        }
        let agent_pct = if info.max_agent_count == 0 {
            0.0
        } else {
            100.0 * info.agent_count as f64 / info.max_agent_count as f64
        };
        let raw = agent_pct * self.agent
            + clamp_pct(info.cpu_usage) * self.cpu
            + clamp_pct(info.mem_usage) * self.mem
            + clamp_pct(info.net_usage) * self.net;
        (100.0 - raw / total).clamp(0.0, 100.0)
    }
}

fn clamp_pct(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
