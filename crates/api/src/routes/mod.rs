//! HTTP route handlers.

pub mod allocators;
pub mod system;
pub mod tickets;
