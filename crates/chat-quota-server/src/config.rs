use thiserror::Error;

pub const HOST_VAR: &str = "CHAT_QUOTA_HOST";
pub const PORT_VAR: &str = "CHAT_QUOTA_PORT";
pub const DATABASE_URL_VAR: &str = "CHAT_QUOTA_DATABASE_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Server configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "sqlite://chat-quota.db".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from an arbitrary variable source; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match lookup(PORT_VAR) {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: PORT_VAR,
                value,
            })?,
            None => defaults.port,
        };

        Ok(Self {
            host: lookup(HOST_VAR).unwrap_or(defaults.host),
            port,
            database_url: lookup(DATABASE_URL_VAR).unwrap_or(defaults.database_url),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
