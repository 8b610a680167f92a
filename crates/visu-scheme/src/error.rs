//! Scheme errors and write rejections.

use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised while loading a scheme or talking to its data modules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemeError {
    /// Configuration could not be read, parsed or resolved.
    #[error("invalid config: {0}")]
    InvalidConfig(SmolStr),

    /// Two catalog elements share the same data module and data id.
    #[error("duplicate element '{data_id}' in data module '{data_module}'")]
    DuplicateElement {
        data_module: SmolStr,
        data_id: SmolStr,
    },

    /// No element with the given svg id.
    #[error("unknown element '{0}'")]
    UnknownElement(SmolStr),

    /// More than one element uses the given svg id.
    #[error("element '{0}' is bound more than once")]
    AmbiguousElement(SmolStr),

    /// Socket open/send/receive failure.
    #[error("transport error on '{module}': {message}")]
    Transport { module: SmolStr, message: SmolStr },

    /// Inbound frame that is not a JSON object.
    #[error("protocol error: {0}")]
    Protocol(SmolStr),

    /// Historical data request failed.
    #[error("history request failed: {0}")]
    History(SmolStr),

    /// The channel for a data module is gone.
    #[error("channel for data module '{0}' is closed")]
    ChannelClosed(SmolStr),
}

impl SchemeError {
    pub(crate) fn transport(module: &str, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            module: SmolStr::new(module),
            message: message.to_string().into(),
        }
    }
}

/// Reasons a candidate value is refused before a write is sent.
///
/// The `Display` text is what the write form shows to the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteRejection {
    #[error("Element is not writable")]
    NotWritable,

    #[error("Value is not one of {}", .0.join(","))]
    NotOneOf(Vec<String>),

    #[error("Value does not match '{0}'")]
    NoMatch(String),

    #[error("Value is not a number")]
    NotANumber,

    #[error("Value is less than {0}")]
    LessThan(f64),

    #[error("Value is more than {0}")]
    MoreThan(f64),
}

/// Failure of a write submitted through a session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    #[error(transparent)]
    Rejected(#[from] WriteRejection),

    #[error(transparent)]
    Scheme(#[from] SchemeError),
}
