//! Wire types shared by the REST surface, the realtime gateway and the store.

pub mod api;
pub mod events;
pub mod models;
