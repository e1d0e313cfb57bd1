//! lookoutd — serves one camera as a `multipart/x-mixed-replace` JPEG stream.
//!
//! `GET /` returns a page embedding the stream, `GET /video_feed` the stream
//! itself. Frames are captured on demand, one per part, and turned upside
//! down unless configured otherwise.

pub mod config;
pub mod server;

pub use config::Config;
pub use server::{router, AppState, StreamError};
