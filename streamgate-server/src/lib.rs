//! # Streamgate Server
//!
//! HTTP front end for the streamgate session supervisor. A player asks for
//! `/streams/{key}/index.m3u8`; the first request starts an ffmpeg
//! conversion for that key, later requests share it, and segment fetches
//! keep it alive until viewers go away.

pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use errors::{AppError, AppResult};
pub use routes::create_app;
pub use state::AppState;
