//! Configuration data model

use std::path::PathBuf;
use std::time::Duration;

use cccc_sdk::{ClientOptions, Endpoint};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    /// cccc home directory (`~` already expanded)
    pub home: Option<PathBuf>,
    /// Request timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Default actor for mutating operations
    pub by: Option<String>,
    /// Fixed daemon endpoint, bypassing discovery
    pub endpoint: Option<Endpoint>,
}

impl ClientConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Build SDK client options from this configuration
    pub fn to_client_options(&self) -> ClientOptions {
        ClientOptions {
            cccc_home: self.home.clone(),
            endpoint: self.endpoint.clone(),
            timeout: self.timeout(),
            by: self.by.clone(),
        }
    }
}

impl From<ClientConfig> for ClientOptions {
    fn from(config: ClientConfig) -> Self {
        config.to_client_options()
    }
}
