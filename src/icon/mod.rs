//! Toolbar icon composition. Pure pixel work on `image` buffers, no
//! knowledge of where the result is displayed.

use std::path::Path;

use bytes::Bytes;
use image::{imageops, imageops::FilterType, Rgba, RgbaImage};
use tracing::warn;

pub const ICON_SIZE: u32 = 32;
pub const FRAME_COUNT: usize = 8;

const BACKGROUND: Rgba<u8> = Rgba([37, 99, 235, 255]);
const ARROW: Rgba<u8> = Rgba([255, 255, 255, 255]);

const SHAFT_WIDTH: u32 = 4;
const SHAFT_HEIGHT: u32 = 10;
const HEAD_WIDTH: u32 = 12;
const HEAD_HEIGHT: u32 = 6;
const ARROW_HEIGHT: u32 = SHAFT_HEIGHT + HEAD_HEIGHT;

/// Raw RGBA pixels ready to hand to the toolbar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Bytes,
}

impl From<RgbaImage> for IconImage {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            rgba: Bytes::from(image.into_raw()),
        }
    }
}

pub fn load_base_artwork(path: &Path) -> Option<RgbaImage> {
    match image::open(path) {
        Ok(img) => Some(img.to_rgba8()),
        Err(e) => {
            warn!(path = %path.display(), "base icon unavailable, using plain background: {}", e);
            None
        }
    }
}

fn base_canvas(base: Option<&RgbaImage>) -> RgbaImage {
    match base {
        Some(img) if img.width() > 0 && img.height() > 0 => {
            if img.dimensions() == (ICON_SIZE, ICON_SIZE) {
                img.clone()
            } else {
                imageops::resize(img, ICON_SIZE, ICON_SIZE, FilterType::Triangle)
            }
        }
        _ => RgbaImage::from_pixel(ICON_SIZE, ICON_SIZE, BACKGROUND),
    }
}

/// Vertical position of the arrow's top edge; moves down linearly with the frame.
pub fn arrow_offset(frame_index: usize) -> u32 {
    let travel = ICON_SIZE - ARROW_HEIGHT;
    let frame = (frame_index % FRAME_COUNT) as u32;
    frame * travel / FRAME_COUNT as u32
}

fn fill_rect(canvas: &mut RgbaImage, x: u32, y: u32, width: u32, height: u32, color: Rgba<u8>) {
    for py in y..(y + height).min(canvas.height()) {
        for px in x..(x + width).min(canvas.width()) {
            canvas.put_pixel(px, py, color);
        }
    }
}

fn draw_arrow(canvas: &mut RgbaImage, top: u32) {
    let center = ICON_SIZE / 2;
    fill_rect(
        canvas,
        center - SHAFT_WIDTH / 2,
        top,
        SHAFT_WIDTH,
        SHAFT_HEIGHT,
        ARROW,
    );

    // Head narrows one step per row until it reaches a point
    let head_top = top + SHAFT_HEIGHT;
    for row in 0..HEAD_HEIGHT {
        let half = (HEAD_WIDTH / 2) * (HEAD_HEIGHT - row) / HEAD_HEIGHT;
        fill_rect(
            canvas,
            center.saturating_sub(half),
            head_top + row,
            (half * 2).max(1),
            1,
            ARROW,
        );
    }
}

/// Icon shown when nothing is transferring.
pub fn render_static(base: Option<&RgbaImage>) -> RgbaImage {
    base_canvas(base)
}

/// One frame of the "downloading" animation.
pub fn render_frame(base: Option<&RgbaImage>, frame_index: usize) -> RgbaImage {
    let mut canvas = base_canvas(base);
    draw_arrow(&mut canvas, arrow_offset(frame_index));
    canvas
}
