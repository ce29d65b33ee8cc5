pub mod error;
pub mod logger;

pub use error::{ChatError, Result};
pub use logger::setup_logging;
