//! `visu-scheme` - live data binding for SVG telemetry schemes.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

/// Subscription grouping per data module.
pub mod aggregate;
/// Cooperative cancellation flag.
pub mod cancel;
/// Element catalog of a scheme.
pub mod catalog;
/// Telemetry channels and socket workers.
pub mod channel;
/// Configuration loading.
pub mod config;
/// Scheme errors and write rejections.
pub mod error;
/// Historical series for the detail view.
pub mod history;
/// Wire frames.
pub mod protocol;
/// Value routing and the in-memory SVG scene.
pub mod router;
/// Live session driving channels and router.
pub mod session;
/// Style rule resolution.
pub mod style;
/// Write validation.
pub mod write;

pub use catalog::{Catalog, Element, ElementKind, Pattern, StyleRule};
pub use channel::{Connector, WebSocketConnector};
pub use config::{ClientConfig, VisuConfig};
pub use error::{SchemeError, WriteError, WriteRejection};
pub use history::{HistoryBridge, HistoryRange, HttpHistoryFetcher};
pub use router::{Renderer, SvgScene, ValueRouter};
pub use session::Session;
pub use write::WriteForm;
