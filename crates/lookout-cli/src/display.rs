//! Preview window: the annotated frame scaled into a macroquad window with
//! overlay labels drawn on top.

use image::RgbImage;
use lookout_core::Label;
use macroquad::prelude::*;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

/// Input observed while a frame was on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    None,
    /// Enter: take the current frame.
    Capture,
    /// `q`, Escape or the window close button.
    Quit,
}

/// Open the window and drive `task` on its event loop until it returns.
pub fn run_window<Fut>(title: &str, width: u32, height: u32, task: Fut) -> anyhow::Result<()>
where
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    let outcome = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&outcome);
    let conf = Conf {
        window_title: title.to_string(),
        window_width: width as i32,
        window_height: height as i32,
        ..Default::default()
    };

    macroquad::Window::from_config(conf, async move {
        prevent_quit();
        let result = task.await;
        *slot.borrow_mut() = Some(result);
    });

    let result = outcome.borrow_mut().take();
    result.unwrap_or(Ok(()))
}

/// Where a capture loop puts each annotated frame.
#[allow(async_fn_in_trait)]
pub trait Screen {
    /// Show `image` with `labels` and report the key pressed while it was up.
    async fn show(&mut self, image: &RgbImage, labels: &[Label]) -> Key;
}

/// Persistent texture the frames are uploaded into.
pub struct Preview {
    texture: Option<Texture2D>,
    font_size: f32,
}

impl Preview {
    pub fn new(font_size: f32) -> Self {
        Self {
            texture: None,
            font_size,
        }
    }

    fn upload(&mut self, image: &RgbImage) {
        let Some((w, h)) = texture_size(image) else {
            tracing::warn!(width = image.width(), height = image.height(), "frame too large for a texture, not shown");
            return;
        };
        let bytes = rgba_bytes(image);
        match &self.texture {
            Some(tex) if tex.width() == w as f32 && tex.height() == h as f32 => {
                tex.update(&Image { bytes, width: w, height: h });
            }
            _ => {
                let texture = Texture2D::from_rgba8(w, h, &bytes);
                texture.set_filter(FilterMode::Linear);
                self.texture = Some(texture);
            }
        }
    }
}

impl Screen for Preview {
    /// Waits for the next screen refresh before returning.
    async fn show(&mut self, image: &RgbImage, labels: &[Label]) -> Key {
        self.upload(image);
        clear_background(BLACK);

        if let Some(texture) = &self.texture {
            let fit = Fit::new(texture.width(), texture.height(), screen_width(), screen_height());
            draw_texture_ex(
                texture,
                fit.x,
                fit.y,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(fit.width, fit.height)),
                    ..Default::default()
                },
            );
            for label in labels {
                let (x, y) = fit.to_screen(label.x as f32, label.y as f32);
                let [r, g, b] = label.color.0;
                draw_text(&label.text, x, y, self.font_size, Color::from_rgba(r, g, b, 255));
            }
        }

        let key = if is_quit_requested() || is_key_pressed(KeyCode::Q) || is_key_pressed(KeyCode::Escape) {
            Key::Quit
        } else if is_key_pressed(KeyCode::Enter) || is_key_pressed(KeyCode::KpEnter) {
            Key::Capture
        } else {
            Key::None
        };
        next_frame().await;
        key
    }
}

/// Texture dimensions, `None` when a side does not fit macroquad's `u16`.
fn texture_size(image: &RgbImage) -> Option<(u16, u16)> {
    Some((u16::try_from(image.width()).ok()?, u16::try_from(image.height()).ok()?))
}

fn rgba_bytes(image: &RgbImage) -> Vec<u8> {
    image.pixels().flat_map(|p| [p[0], p[1], p[2], 255]).collect()
}

/// Aspect-preserving placement of a frame inside the window.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Fit {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    scale: f32,
}

impl Fit {
    fn new(frame_w: f32, frame_h: f32, screen_w: f32, screen_h: f32) -> Self {
        let scale = (screen_w / frame_w).min(screen_h / frame_h);
        let (width, height) = (frame_w * scale, frame_h * scale);
        Self {
            x: (screen_w - width) / 2.0,
            y: (screen_h - height) / 2.0,
            width,
            height,
            scale,
        }
    }

    fn to_screen(&self, x: f32, y: f32) -> (f32, f32) {
        (self.x + x * self.scale, self.y + y * self.scale)
    }
}
