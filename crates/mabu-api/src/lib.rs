//! HTTP surface of the messaging core: sessions, conversations, message
//! ingress, notifications and the gateway upgrade.

pub mod admin;
pub mod auth;
pub mod conversations;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod mailer;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod router;
pub mod session;
pub mod uploads;

pub use auth::{AppState, AppStateInner};
pub use error::{ApiError, ApiResult};
pub use router::router;
