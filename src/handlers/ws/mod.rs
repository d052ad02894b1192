pub mod controller;
pub mod handler;
pub mod messages;

pub use handler::websocket_handler;
