use serde::Deserialize;
use std::time::Duration;

pub const TOOL_IDENTITY: &str = "easyeda_convertlib";
pub const DEFAULT_FILE_PREFIX: &str = "easyeda_convertlib";
pub const DEFAULT_POOL_CAP: usize = 16;

const DEFAULT_USER_AGENT: &str = "easyeda_convertlib/0.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KicadVersion {
    V5,
    #[default]
    V6,
}

impl KicadVersion {
    pub fn symbol_lib_extension(self) -> &'static str {
        match self {
            KicadVersion::V5 => "lib",
            KicadVersion::V6 => "kicad_sym",
        }
    }

    /// Text of a freshly created, empty symbol library.
    pub fn symbol_lib_header(self) -> String {
        match self {
            KicadVersion::V5 => "EESchema-LIBRARY Version 2.4\n#encoding utf-8\n".to_string(),
            KicadVersion::V6 => format!(
                "(kicad_symbol_lib\n  (version 20211014)\n  (generator \"{}\")\n)",
                TOOL_IDENTITY
            ),
        }
    }
}

/// Retry policy and transport settings for the EasyEDA client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_retries: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    /// Delay to wait after the given zero-based failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub pool_cap: usize,
    pub kicad_version: KicadVersion,
    pub project_relative_models: bool,
    pub fetch: FetchConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            pool_cap: DEFAULT_POOL_CAP,
            kicad_version: KicadVersion::default(),
            project_relative_models: false,
            fetch: FetchConfig::default(),
        }
    }
}

impl ExportConfig {
    pub fn from_json_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
