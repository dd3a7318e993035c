//! API routes and handlers

pub mod protocol;
pub mod voice_ws;
mod router;

pub use router::create_router;
