mod logging;
pub use logging::setup_logging;
mod cli;
pub use cli::Args;
mod app;
pub use app::App;
mod connection;
pub use connection::Connection;
pub mod dispatcher;
pub use dispatcher::{Dispatcher, Outcome, QueryContext, Reply};
pub mod matcher;
pub mod notifier;
mod rebind;
pub use rebind::RebindStore;
mod server;
pub use server::DnsServer;
pub mod synthesizer;
mod util;
pub use util::{encode_message, get_response_message, render_message};

/// RFC1035
pub const MAX_STANDARD_DNS_MSG_SIZE: usize = 512;
/// Receive buffer for UDP messages, large enough for common EDNS payload sizes
pub const MAX_UDP_MSG_SIZE: usize = 4096;
