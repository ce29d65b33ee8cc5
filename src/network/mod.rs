pub mod dispatcher;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use transport::Transport;
