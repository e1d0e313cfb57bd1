//! Annotation of frames: boxes are drawn into the pixel buffer, text is
//! returned as [`Label`]s for the display to render.

use crate::matcher::Recognition;
use crate::person::PersonCount;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

pub const PEOPLE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const FACE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 2;

/// Text to render on top of a frame, in frame pixel coordinates (baseline).
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub x: i32,
    pub y: i32,
    pub text: String,
    pub color: Rgb<u8>,
}

/// Draw a 2-px rectangle outline between two corners, clipped to the frame.
pub fn draw_box(image: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
        return;
    }
    let (left, right) = (x1.min(x2).clamp(0, w - 1), x1.max(x2).clamp(0, w - 1));
    let (top, bottom) = (y1.min(y2).clamp(0, h - 1), y1.max(y2).clamp(0, h - 1));

    for inset in 0..BOX_THICKNESS {
        let rw = right - left + 1 - 2 * inset;
        let rh = bottom - top + 1 - 2 * inset;
        if rw <= 0 || rh <= 0 {
            break;
        }
        let rect = Rect::at(left + inset, top + inset).of_size(rw as u32, rh as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Counter text shown in the top-left corner.
pub fn people_labels(count: &PersonCount) -> Vec<Label> {
    vec![
        Label {
            x: 10,
            y: 30,
            text: format!("Total People: {}", count.count),
            color: PEOPLE_COLOR,
        },
        Label {
            x: 10,
            y: 70,
            text: format!("Average Confidence: {:.2}", count.average_confidence),
            color: PEOPLE_COLOR,
        },
    ]
}

/// Outline every recognized face and return its name label.
pub fn draw_faces(image: &mut RgbImage, recognition: &Recognition) -> Vec<Label> {
    recognition
        .boxes
        .iter()
        .zip(&recognition.names)
        .map(|(face, name)| {
            let (top, right, bottom, left) = face.trbl();
            draw_box(image, left, top, right, bottom, FACE_COLOR);
            Label {
                x: left + 6,
                y: top - 6,
                text: name.clone(),
                color: FACE_COLOR,
            }
        })
        .collect()
}
