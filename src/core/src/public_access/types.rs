use serde::{Deserialize, Serialize};
use std::fmt;

/// How learners reach a running lab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    /// `scheme://host:port` straight to the published container port.
    Direct,
    /// Through a reverse proxy at `base_url/prefix/<instance>/`.
    Proxy,
}

impl ExposureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureMode::Direct => "direct",
            ExposureMode::Proxy => "proxy",
        }
    }

    /// Case-insensitive parse; `None` for anything unrecognised.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(ExposureMode::Direct),
            "proxy" => Some(ExposureMode::Proxy),
            _ => None,
        }
    }
}

impl fmt::Display for ExposureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicEndpoint {
    pub access_url: String,
    pub host_port: u16,
    pub public_host: String,
    pub mode: ExposureMode,
}
