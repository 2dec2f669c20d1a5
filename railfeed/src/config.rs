use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::error::ConfigError;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    /// Feed topic identifier: MVT, PPM, VSTP or TD.
    #[envconfig(from = "TOPIC", default = "MVT")]
    pub topic: String,

    #[envconfig(from = "STOMP_HOST", default = "datafeeds.networkrail.co.uk")]
    pub stomp_host: String,

    #[envconfig(from = "STOMP_PORT", default = "61618")]
    pub stomp_port: u16,

    #[envconfig(from = "DATAFEED_USERNAME")]
    pub username: String,

    #[envconfig(from = "DATAFEED_PW")]
    pub password: String,

    #[envconfig(from = "SUBSCRIPTION_ID", default = "1")]
    pub subscription_id: String,

    /// Overrides the topic's default database file. The table name is derived from it.
    #[envconfig(from = "DATABASE_PATH")]
    pub database_path: Option<String>,

    #[envconfig(from = "DROP_IF_EXISTS", default = "true")]
    pub drop_if_exists: bool,

    /// Log rows instead of persisting them.
    #[envconfig(from = "VIEW", default = "false")]
    pub view: bool,

    #[envconfig(from = "LIVENESS_INTERVAL", default = "1000")]
    pub liveness_interval: EnvMsDuration,

    #[envconfig(from = "DISCONNECT_TIMEOUT", default = "5000")]
    pub disconnect_timeout: EnvMsDuration,

    #[envconfig(from = "MAX_FRAME_BYTES", default = "16777216")]
    pub max_frame_bytes: usize,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values that parse but would make the session fail once running.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.liveness_interval.0.is_zero() {
            return Err(ConfigError::ZeroLivenessInterval);
        }
        Ok(())
    }

    /// How long the dispatcher may go without reporting before it counts as stalled:
    /// three liveness intervals, saturating on overflow.
    pub fn liveness_deadline(&self) -> ::time::Duration {
        self.liveness_interval
            .0
            .checked_mul(3)
            .and_then(|deadline| ::time::Duration::try_from(deadline).ok())
            .unwrap_or(::time::Duration::MAX)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
