pub mod config;
pub mod dispatch;
pub mod events;
pub mod protocol;
pub mod session;
pub mod tiles;
pub mod transport;
pub mod viewport;
