use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DataflowConfig {
    /// JSON pipeline document loaded once when no store is configured
    #[serde(default)]
    pub local_file: Option<PathBuf>,
}

impl DataflowConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.local_file {
            if path.as_os_str().is_empty() {
                return Err(Error::InvalidConfig("dataflow.local_file cannot be empty".into()));
            }
        }
        Ok(())
    }
}
