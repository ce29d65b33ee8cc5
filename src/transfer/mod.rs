pub mod downloader;
pub mod negotiator;
pub mod uploader;

pub use negotiator::PendingTransfers;
