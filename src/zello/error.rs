use std::error::Error as StdError;
use std::fmt::{self, Display};

use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// An error that occurred while attempting to deal with the Zello session.
///
/// Most of these tear down the current connection; the session's outer loop
/// resets state and reconnects.
#[derive(Clone, Debug)]
pub enum ZelloError {
    /// The connection closed, potentially uncleanly.
    Closed(Option<CloseFrame<'static>>),
    /// The server terminated the session.
    Kicked,
    /// The session did not reach the logged-in state in time.
    LoginTimeout,
    /// A send was attempted after the connection went away.
    NotConnected,
    /// The server reported an error the session cannot recover from in
    /// place.
    Server(String),
}

impl Display for ZelloError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(Some(frame)) => write!(f, "Connection closed: {frame}"),
            Self::Closed(None) => f.write_str("Connection closed"),
            Self::Kicked => f.write_str("Kicked by the server"),
            Self::LoginTimeout => f.write_str("Timed out waiting to log in"),
            Self::NotConnected => f.write_str("Not connected"),
            Self::Server(message) => write!(f, "Server error: {message}"),
        }
    }
}

impl StdError for ZelloError {}
