//! Stateless frame preparation shared by enrollment and recognition:
//! display downscaling, colour conversion, face crops and overlay drawing.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const STATUS_BAR_HEIGHT: u32 = 30;

/// Bound per-frame cost: frames wider than `max_width` are resized to `target`.
pub fn downscale(frame: RgbImage, max_width: u32, target: (u32, u32)) -> RgbImage {
    if frame.width() <= max_width {
        return frame;
    }
    imageops::resize(&frame, target.0, target.1, FilterType::Triangle)
}

pub fn to_gray(frame: &RgbImage) -> GrayImage {
    imageops::grayscale(frame)
}

pub fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

/// Grayscale `size`² crop of `face`, or `None` if the box misses the frame.
pub fn face_sample(frame: &RgbImage, face: &BoundingBox, size: u32) -> Option<GrayImage> {
    let (x, y, w, h) = face.clip(frame.width(), frame.height())?;
    let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
    let resized = imageops::resize(&crop, size, size, FilterType::Triangle);
    Some(to_gray(&resized))
}

/// Outline `face`, grown by `margin` pixels on every side.
pub fn draw_face_box(frame: &mut RgbImage, face: &BoundingBox, margin: i32) {
    let w = face.width.round() as i32 + 2 * margin;
    let h = face.height.round() as i32 + 2 * margin;
    if w <= 0 || h <= 0 {
        return;
    }
    let x = face.x.round() as i32 - margin;
    let y = face.y.round() as i32 - margin;
    // 2 px outline
    draw_hollow_rect_mut(frame, Rect::at(x, y).of_size(w as u32, h as u32), BOX_COLOR);
    if w > 2 && h > 2 {
        let inner = Rect::at(x + 1, y + 1).of_size(w as u32 - 2, h as u32 - 2);
        draw_hollow_rect_mut(frame, inner, BOX_COLOR);
    }
}

/// Black strip along the bottom edge that carries the notification text.
pub fn draw_status_bar(frame: &mut RgbImage) {
    let height = STATUS_BAR_HEIGHT.min(frame.height());
    if height == 0 || frame.width() == 0 {
        return;
    }
    let top = (frame.height() - height) as i32;
    draw_filled_rect_mut(frame, Rect::at(0, top).of_size(frame.width(), height), Rgb([0, 0, 0]));
}
