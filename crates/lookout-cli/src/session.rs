//! Capture loop sessions, one per mode.

use crate::config::Config;
use crate::display::{Key, Screen};
use crate::gate::Mode;
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use lookout_core::{overlay, registry, FaceMatcher, FacePipeline, Label, PersonDetector, Registry};
use lookout_hw::{open_source, FrameSource, Frames};
use std::path::{Path, PathBuf};

/// Result of the reference capture step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    Saved(PathBuf),
    Aborted,
}

/// Run the session for `mode` until the user quits or the camera fails.
pub async fn dispatch<V: Screen>(mode: Mode, config: &Config, screen: &mut V) -> Result<()> {
    tracing::info!(?mode, camera = %config.camera, "session starting");
    match mode {
        Mode::Find => match capture_reference(config, screen).await? {
            Capture::Saved(_) => recognize(config, screen, true).await,
            Capture::Aborted => {
                tracing::info!("reference capture cancelled");
                Ok(())
            }
        },
        Mode::Count => count(config, screen).await,
        Mode::Recognize => recognize(config, screen, false).await,
    }
}

/// Empty the reference folder, preview the camera and save the frame shown
/// when Enter is pressed.
pub async fn capture_reference<V: Screen>(config: &Config, screen: &mut V) -> Result<Capture> {
    let removed = registry::clear_reference_dir(&config.reference_dir)
        .with_context(|| format!("failed to clear {}", config.reference_dir.display()))?;
    tracing::info!(dir = %config.reference_dir.display(), removed, "reference folder cleared");

    let mut frames = open_frames(config)?;
    capture_from(&mut frames, screen, &config.reference_photo_path()).await
}

async fn capture_from<S, V>(frames: &mut Frames<S>, screen: &mut V, path: &Path) -> Result<Capture>
where
    S: FrameSource,
    V: Screen,
{
    let hint = [Label {
        x: 10,
        y: 30,
        text: "Press Enter to capture, q to cancel".to_string(),
        color: Rgb([255, 255, 255]),
    }];

    for result in frames.by_ref() {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "camera read failed");
                break;
            }
        };
        match screen.show(&frame.image, &hint).await {
            Key::Capture => {
                frame
                    .image
                    .save(path)
                    .with_context(|| format!("failed to save {}", path.display()))?;
                tracing::info!(path = %path.display(), "reference photo saved");
                return Ok(Capture::Saved(path.to_path_buf()));
            }
            Key::Quit => return Ok(Capture::Aborted),
            Key::None => {}
        }
    }
    Ok(Capture::Aborted)
}

/// Count people in every frame.
pub async fn count<V: Screen>(config: &Config, screen: &mut V) -> Result<()> {
    let mut people = load_person_detector(config)?;
    let mut frames = open_frames(config)?;
    run_loop(&mut frames, screen, |image| {
        let count = people.count_and_draw(image)?;
        tracing::debug!(count = count.count, average = count.average_confidence, "people counted");
        Ok(overlay::people_labels(&count))
    })
    .await;
    Ok(())
}

/// Name every face against the reference folder, optionally counting people
/// in the same frame.
pub async fn recognize<V: Screen>(config: &Config, screen: &mut V, with_counting: bool) -> Result<()> {
    let mut faces = load_faces(config)?;
    let registry = Registry::load_dir(&config.reference_dir, &mut faces).context("failed to load reference registry")?;
    let matcher = FaceMatcher::new(registry)
        .with_policy(config.match_policy)
        .with_tolerance(config.face_tolerance);
    if matcher.registry().is_empty() {
        tracing::warn!(dir = %config.reference_dir.display(), "no reference images, every face will be Unknown");
    }

    let mut people = if with_counting {
        Some(load_person_detector(config)?)
    } else {
        None
    };

    let mut frames = open_frames(config)?;
    run_loop(&mut frames, screen, |image| {
        // Both detectors see the frame before anything is drawn on it.
        let recognition = matcher.recognize(&mut faces, image)?;
        let mut labels = Vec::new();
        if let Some(people) = people.as_mut() {
            let count = people.count_and_draw(image)?;
            labels.extend(overlay::people_labels(&count));
        }
        labels.extend(overlay::draw_faces(image, &recognition));
        Ok(labels)
    })
    .await;
    Ok(())
}

/// Pull frames until quit or a read failure and return how many were shown.
/// A processing error skips the annotation of that frame only.
async fn run_loop<S, V, F>(frames: &mut Frames<S>, screen: &mut V, mut process: F) -> u64
where
    S: FrameSource,
    V: Screen,
    F: FnMut(&mut RgbImage) -> Result<Vec<Label>>,
{
    let stop = frames.stop_handle();

    let mut shown = 0u64;
    while let Some(result) = frames.next() {
        let mut frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "camera read failed, stopping");
                break;
            }
        };

        let labels = match process(&mut frame.image) {
            Ok(labels) => labels,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "frame processing failed");
                Vec::new()
            }
        };

        shown += 1;
        if screen.show(&frame.image, &labels).await == Key::Quit {
            stop.stop();
        }
    }

    tracing::info!(frames = shown, source = %frames.source().describe(), "capture loop finished");
    shown
}

fn open_frames(config: &Config) -> Result<Frames<Box<dyn FrameSource + Send>>> {
    let spec = config.camera_spec()?;
    let source = open_source(&spec, config.frame_width, config.frame_height)
        .with_context(|| format!("failed to open camera {spec}"))?;
    Ok(Frames::new(source))
}

pub fn load_faces(config: &Config) -> Result<FacePipeline> {
    let (scrfd, arcface) = (config.scrfd_model_path(), config.arcface_model_path());
    let faces = FacePipeline::load(&scrfd, &arcface).context("failed to load face models")?;
    tracing::info!(scrfd = %scrfd, arcface = %arcface, "face models loaded");
    Ok(faces)
}

fn load_person_detector(config: &Config) -> Result<PersonDetector> {
    let path = config.person_model_path();
    let detector = PersonDetector::load(&path)
        .with_context(|| format!("failed to load person model {path}"))?
        .with_threshold(config.person_confidence);
    tracing::info!(path = %path, threshold = config.person_confidence, "person model loaded");
    Ok(detector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_hw::mjpeg;
    use lookout_hw::{CameraError, Frame};
    use std::collections::VecDeque;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    /// Frame `n` has every pixel set to `n`; fails after `limit` frames.
    struct Numbered {
        reads: u32,
        limit: u32,
    }

    impl FrameSource for Numbered {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.reads += 1;
            if self.reads > self.limit {
                return Err(CameraError::CaptureFailed("numbered source exhausted".into()));
            }
            let n = self.reads as u8;
            Ok(Frame::new(RgbImage::from_pixel(4, 4, Rgb([n, n, n])), self.reads))
        }

        fn describe(&self) -> String {
            "numbered".into()
        }
    }

    fn numbered(limit: u32) -> Frames<Numbered> {
        Frames::new(Numbered { reads: 0, limit })
    }

    /// Answers with queued keys, then `Key::None`; records what was shown.
    #[derive(Default)]
    struct Scripted {
        keys: VecDeque<Key>,
        /// Frame number and label count of each shown frame.
        shown: Vec<(u8, usize)>,
    }

    impl Scripted {
        fn with_keys(keys: &[Key]) -> Self {
            Self {
                keys: keys.iter().copied().collect(),
                shown: Vec::new(),
            }
        }
    }

    impl Screen for Scripted {
        async fn show(&mut self, image: &RgbImage, labels: &[Label]) -> Key {
            self.shown.push((image.get_pixel(0, 0).0[0], labels.len()));
            self.keys.pop_front().unwrap_or(Key::None)
        }
    }

    fn label() -> Label {
        Label {
            x: 0,
            y: 0,
            text: "ok".into(),
            color: Rgb([0, 255, 0]),
        }
    }

    /// Serve `count` gray JPEG parts to the first client, then close.
    fn serve_frames(count: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let Ok((mut conn, _)) = listener.accept() else { return };
            let mut request = BufReader::new(conn.try_clone().unwrap());
            let mut line = String::new();
            while request.read_line(&mut line).unwrap_or(0) > 2 {
                line.clear();
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
                mjpeg::CONTENT_TYPE
            );
            let jpeg = lookout_hw::frame::encode_jpeg(&RgbImage::from_pixel(8, 8, Rgb([90, 90, 90])), 80).unwrap();
            let _ = conn.write_all(head.as_bytes());
            for _ in 0..count {
                if conn.write_all(&mjpeg::encode_part(&jpeg)).is_err() {
                    return;
                }
            }
        });
        format!("http://{addr}/video_feed")
    }

    fn stream_config(dir: &Path, camera: String) -> Config {
        Config {
            camera,
            reference_dir: dir.join("images"),
            model_dir: dir.join("no-models"),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_processing_error_skips_annotation_only() {
        let mut frames = numbered(5);
        let mut screen = Scripted::default();
        let shown = run_loop(&mut frames, &mut screen, |image| {
            if image.get_pixel(0, 0).0[0] == 2 {
                anyhow::bail!("detector failed");
            }
            Ok(vec![label()])
        })
        .await;

        assert_eq!(shown, 5);
        assert_eq!(screen.shown, vec![(1, 1), (2, 0), (3, 1), (4, 1), (5, 1)]);
    }

    #[tokio::test]
    async fn test_read_failure_ends_loop() {
        let mut frames = numbered(3);
        let mut screen = Scripted::default();
        let shown = run_loop(&mut frames, &mut screen, |_| Ok(Vec::new())).await;

        assert_eq!(shown, 3);
        assert_eq!(screen.shown.len(), 3);
        assert_eq!(frames.into_inner().reads, 4);
    }

    #[tokio::test]
    async fn test_quit_stops_before_next_read() {
        let mut frames = numbered(100);
        let mut screen = Scripted::with_keys(&[Key::None, Key::Quit]);
        let shown = run_loop(&mut frames, &mut screen, |_| Ok(Vec::new())).await;

        assert_eq!(shown, 2);
        assert_eq!(frames.into_inner().reads, 2);
    }

    #[tokio::test]
    async fn test_capture_saves_frame_shown_at_enter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Person_Found.jpg");
        let mut screen = Scripted::with_keys(&[Key::None, Key::None, Key::Capture]);

        let capture = capture_from(&mut numbered(10), &mut screen, &path).await.unwrap();
        assert_eq!(capture, Capture::Saved(path.clone()));
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (4, 4));
        assert_eq!(screen.shown.len(), 3);
    }

    #[tokio::test]
    async fn test_capture_aborts_on_quit_or_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Person_Found.jpg");

        let mut screen = Scripted::with_keys(&[Key::Quit]);
        assert_eq!(capture_from(&mut numbered(10), &mut screen, &path).await.unwrap(), Capture::Aborted);

        let mut screen = Scripted::default();
        assert_eq!(capture_from(&mut numbered(2), &mut screen, &path).await.unwrap(), Capture::Aborted);
        assert_eq!(screen.shown.len(), 2);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cancelled_find_skips_recognition() {
        let dir = tempfile::tempdir().unwrap();
        let config = stream_config(dir.path(), serve_frames(5));
        let mut screen = Scripted::with_keys(&[Key::Quit]);

        // The model directory is missing, so reaching recognition would fail.
        dispatch(Mode::Find, &config, &mut screen).await.unwrap();
        assert_eq!(screen.shown.len(), 1);
        assert!(!config.reference_photo_path().exists());
    }

    #[tokio::test]
    async fn test_captured_find_goes_on_to_recognition() {
        let dir = tempfile::tempdir().unwrap();
        let config = stream_config(dir.path(), serve_frames(5));
        let mut screen = Scripted::with_keys(&[Key::Capture]);

        let err = dispatch(Mode::Find, &config, &mut screen).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to load face models"), "{err:#}");
        assert!(config.reference_photo_path().exists());
    }
}
