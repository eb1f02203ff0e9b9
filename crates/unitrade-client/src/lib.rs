//! Client side of the marketplace: a typed HTTP client for the REST API, the
//! process-wide session and the state behind the search, moderation and room
//! chat views.

pub mod error;
pub mod http;
pub mod moderation;
pub mod room;
pub mod search;
pub mod session;

pub use error::{ClientError, Result};
pub use http::UnitradeClient;
pub use session::{SessionContext, SessionReader};
