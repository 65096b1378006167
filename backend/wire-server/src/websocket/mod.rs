pub mod manager;
pub mod messages;
pub mod session;

pub use manager::ConnectionManager;
pub use messages::{ClientMessage, ServerMessage};
pub use session::WsSession;
