//! Live push channel. Every authenticated websocket joins the room of its
//! user; the HTTP side publishes events into rooms through the [`Dispatcher`].

pub mod connection;
pub mod dispatcher;

pub use dispatcher::{ConnectionId, Dispatcher};
