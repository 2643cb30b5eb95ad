//! API endpoint handlers.
//!
//! Model calls and outbound HTTP are blocking, so handlers move them onto
//! the blocking pool with `spawn_blocking`.

pub mod chat;
pub mod diagnose;
pub mod health;
pub mod reference;
pub mod weather;
