//! Bridge configuration, read from the environment.
//!
//! Every knob is an environment variable; there is no configuration file.
//! [`Config::from_env`] fails fast on a missing required variable so a
//! misconfigured bridge exits nonzero at startup instead of limping.

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use crate::internal::prelude::*;

/// Zello Channels connection settings.
pub struct ZelloConfig {
    /// `wss://` endpoint of the Zello Channels API.
    pub endpoint: String,
    pub username: String,
    pub password: SecretString,
    /// The one channel this bridge joins.
    pub channel: String,
    /// Path to an RS256 private key (PEM). Presence selects Zello Free
    /// token authentication.
    pub private_key: Option<PathBuf>,
    /// `iss` claim for minted tokens.
    pub issuer: String,
}

/// USRP endpoint settings.
pub struct UsrpConfig {
    pub bind_addr: IpAddr,
    pub rx_port: u16,
    pub tx_host: String,
    pub tx_port: u16,
    pub rx_gain_db: i32,
    pub tx_gain_db: i32,
}

pub struct Config {
    pub zello: ZelloConfig,
    pub usrp: UsrpConfig,
    pub opus_complexity: Option<u8>,
    pub opus_bitrate: Option<i32>,
}

impl Config {
    /// Builds the full bridge configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let zello = ZelloConfig {
            endpoint: required("ZELLO_WS_ENDPOINT")?,
            username: required("ZELLO_USERNAME")?,
            password: SecretString::new(required("ZELLO_PASSWORD")?),
            channel: required("ZELLO_CHANNEL")?,
            private_key: env::var("ZELLO_PRIVATE_KEY").ok().map(PathBuf::from),
            issuer: env::var("ZELLO_ISSUER").unwrap_or_default(),
        };

        let usrp = UsrpConfig {
            bind_addr: parse(&required("USRP_BIND")?, "USRP_BIND")?,
            rx_port: parse(&required("USRP_RXPORT")?, "USRP_RXPORT")?,
            tx_host: required("USRP_HOST")?,
            tx_port: parse_or("USRP_TXPORT", 7070)?,
            rx_gain_db: parse_or("USRP_GAIN_RX_DB", 0)?,
            tx_gain_db: parse_or("USRP_GAIN_TX_DB", 0)?,
        };

        Ok(Self {
            zello,
            usrp,
            opus_complexity: parse_optional("OPUS_COMPLEXITY")?,
            opus_bitrate: parse_optional("OPUS_BITRATE")?,
        })
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("{name} must be set")))
}

fn parse<T: FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{name} has an invalid value: {value}")))
}

fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(value) => parse(&value, name),
        Err(_) => Ok(default),
    }
}

fn parse_optional<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => parse(&value, name).map(Some),
        Err(_) => Ok(None),
    }
}

/// The environment variable table printed by `--help`.
pub const HELP: &str = "\
zello-usrp-bridge - bridge a Zello channel to a USRP endpoint

Configuration is taken from the environment:
  ZELLO_WS_ENDPOINT   WebSocket URL of the Zello Channels API (required)
  ZELLO_USERNAME      Zello username (required)
  ZELLO_PASSWORD      Zello password (required)
  ZELLO_CHANNEL       Channel to join (required)
  ZELLO_PRIVATE_KEY   Path to an RS256 private key PEM (Zello Free auth)
  ZELLO_ISSUER        JWT issuer claim (default empty)
  USRP_BIND           Local address for USRP UDP receive (required)
  USRP_RXPORT         Local port for USRP UDP receive (required)
  USRP_HOST           Remote USRP host (required)
  USRP_TXPORT         Remote USRP port (default 7070)
  USRP_GAIN_RX_DB     Receive gain in dB (default 0)
  USRP_GAIN_TX_DB     Transmit gain in dB (default 0)
  OPUS_COMPLEXITY     Opus encoder complexity 0-10 (optional)
  OPUS_BITRATE        Opus encoder bitrate in bits/s (optional)
  LOG_LEVEL           Log filter, tracing env-filter syntax (default info)
  LOG_FORMAT          `compact` (default) or `pretty`
";
