use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream;
use lookout_hw::{mjpeg, CameraError, FrameError, FrameSource};
use std::sync::{Arc, Mutex};
use thiserror::Error;

const INDEX_HTML: &str = include_str!("../templates/video.html");

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("camera lock poisoned")]
    Poisoned,
}

/// Shared by every request: one camera, one frame at a time.
#[derive(Clone)]
pub struct AppState {
    camera: Arc<Mutex<Box<dyn FrameSource + Send>>>,
    rotate_180: bool,
    jpeg_quality: u8,
}

impl AppState {
    pub fn new(camera: Box<dyn FrameSource + Send>, rotate_180: bool, jpeg_quality: u8) -> Self {
        Self {
            camera: Arc::new(Mutex::new(camera)),
            rotate_180,
            jpeg_quality,
        }
    }

    /// Capture, orient and encode one frame as a complete multipart part.
    /// Blocks on the camera.
    pub fn next_part(&self) -> Result<Vec<u8>, StreamError> {
        let frame = {
            let mut camera = self.camera.lock().map_err(|_| StreamError::Poisoned)?;
            camera.next_frame()?
        };
        let frame = if self.rotate_180 { frame.rotated_180() } else { frame };
        let jpeg = frame.to_jpeg(self.jpeg_quality)?;
        Ok(mjpeg::encode_part(&jpeg))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Endless `multipart/x-mixed-replace` response; ends when a capture fails
/// or the client goes away.
async fn video_feed(State(state): State<AppState>) -> Response {
    tracing::info!("stream client connected");
    let parts = stream::unfold(state, |state| async move {
        let worker = state.clone();
        match tokio::task::spawn_blocking(move || worker.next_part()).await {
            Ok(Ok(part)) => Some((Ok::<_, std::io::Error>(Bytes::from(part)), state)),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "capture failed, ending stream");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "capture task failed, ending stream");
                None
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}
