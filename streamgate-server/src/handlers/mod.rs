pub mod status;
pub mod stream;

pub use status::{health_handler, status_handler};
pub use stream::{playlist_handler, segment_handler, stop_handler};
