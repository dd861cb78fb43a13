use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::io::Error as IoError;
use std::num::ParseIntError;

use audiopus::Error as OpusError;
use jsonwebtoken::errors::Error as JwtError;
use serde_json::Error as JsonError;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use url::ParseError as UrlError;

use crate::zello::ZelloError;

/// The common result type between most library functions.
pub type Result<T> = std::result::Result<T, Error>;

/// A common error enum returned by most of the bridge's functionality within
/// a custom [`Result`].
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A required environment variable was missing or unparseable.
    Config(String),
    /// An `std::io` error.
    Io(IoError),
    /// An error from the `serde_json` crate.
    Json(JsonError),
    /// An error signing the Zello authentication token.
    Jwt(JwtError),
    /// An error occurred while parsing an integer from the environment.
    Num(ParseIntError),
    /// An error from the `audiopus` crate.
    Opus(OpusError),
    /// An error from the `tungstenite` crate.
    Tungstenite(Box<TungsteniteError>),
    /// An error while parsing the configured WebSocket endpoint.
    Url(UrlError),
    /// An error from the Zello session.
    Zello(ZelloError),
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        Error::Io(e)
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<JwtError> for Error {
    fn from(e: JwtError) -> Error {
        Error::Jwt(e)
    }
}

impl From<ParseIntError> for Error {
    fn from(e: ParseIntError) -> Error {
        Error::Num(e)
    }
}

impl From<OpusError> for Error {
    fn from(e: OpusError) -> Error {
        Error::Opus(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        Error::Tungstenite(Box::new(e))
    }
}

impl From<UrlError> for Error {
    fn from(e: UrlError) -> Error {
        Error::Url(e)
    }
}

impl From<ZelloError> for Error {
    fn from(e: ZelloError) -> Error {
        Error::Zello(e)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Io(inner) => Display::fmt(&inner, f),
            Self::Json(inner) => Display::fmt(&inner, f),
            Self::Jwt(inner) => Display::fmt(&inner, f),
            Self::Num(inner) => Display::fmt(&inner, f),
            Self::Opus(inner) => Display::fmt(&inner, f),
            Self::Tungstenite(inner) => Display::fmt(&inner, f),
            Self::Url(inner) => Display::fmt(&inner, f),
            Self::Zello(inner) => Display::fmt(&inner, f),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(inner) => Some(inner),
            Self::Json(inner) => Some(inner),
            Self::Jwt(inner) => Some(inner),
            Self::Num(inner) => Some(inner),
            Self::Opus(inner) => Some(inner),
            Self::Tungstenite(inner) => Some(inner),
            Self::Url(inner) => Some(inner),
            Self::Zello(inner) => Some(inner),
            Self::Config(_) => None,
        }
    }
}
