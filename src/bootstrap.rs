//! System-default bootstrap (ambient concern A5).
//!
//! The resolver's universal fallback (spec §4.1 step 6) needs a source
//! image to exist on disk before the server can serve it. If the
//! configured system-default path is absent at startup, generate one: a
//! white canvas with a fixed textual marker baked in via the `image`
//! crate's own drawing primitives (no external font-rendering dependency),
//! encoded at the default `TransformParams` format/quality (spec §6).

use std::path::Path;

use image::{Rgb, RgbImage};

use crate::params::TransformParams;
use crate::transform::encode_image;

const BACKGROUND_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const MARKER_COLOR: Rgb<u8> = Rgb([60, 60, 60]);
const CANVAS_SIZE: u32 = 1000;
const GLYPH_SCALE: u32 = 16;

/// Create the system-default source image at `path` if it does not already
/// exist. Never overwrites an operator-provided default.
pub async fn ensure_system_default(path: &Path) -> std::io::Result<()> {
    if tokio::fs::metadata(path).await.is_ok() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = tokio::task::spawn_blocking(render_default_canvas)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    tokio::fs::write(path, bytes).await
}

fn render_default_canvas() -> Vec<u8> {
    let mut img = RgbImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, BACKGROUND_COLOR);
    draw_marker(&mut img, "NO IMAGE");

    let params = TransformParams::default();
    let dynamic = image::DynamicImage::ImageRgb8(img);
    encode_image(&dynamic, params.format, params.quality)
        .expect("encoding a flat in-memory canvas cannot fail")
}

/// Draw `text` centered on `img` using a fixed 5x7 bitmap font, each glyph
/// cell blown up by [`GLYPH_SCALE`]. Unsupported characters render as a
/// blank cell (a space).
fn draw_marker(img: &mut RgbImage, text: &str) {
    let glyph_w = 5 * GLYPH_SCALE;
    let glyph_h = 7 * GLYPH_SCALE;
    let spacing = GLYPH_SCALE;
    let total_w = text.len() as u32 * glyph_w + (text.len().saturating_sub(1)) as u32 * spacing;

    let (canvas_w, canvas_h) = (img.width(), img.height());
    let start_x = canvas_w.saturating_sub(total_w) / 2;
    let start_y = canvas_h.saturating_sub(glyph_h) / 2;

    let mut cursor_x = start_x;
    for ch in text.chars() {
        draw_glyph(img, ch, cursor_x, start_y);
        cursor_x += glyph_w + spacing;
    }
}

fn draw_glyph(img: &mut RgbImage, ch: char, origin_x: u32, origin_y: u32) {
    let rows = glyph_rows(ch);
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..5 {
            if bits & (1 << (4 - col)) == 0 {
                continue;
            }
            let px0 = origin_x + col as u32 * GLYPH_SCALE;
            let py0 = origin_y + row as u32 * GLYPH_SCALE;
            for dy in 0..GLYPH_SCALE {
                for dx in 0..GLYPH_SCALE {
                    let x = px0 + dx;
                    let y = py0 + dy;
                    if x < img.width() && y < img.height() {
                        img.put_pixel(x, y, MARKER_COLOR);
                    }
                }
            }
        }
    }
}

/// 5x7 bitmap font, one `u8` per row (bits 4..=0 are columns left to right).
/// Covers only the glyphs the fixed marker text actually uses.
fn glyph_rows(ch: char) -> [u8; 7] {
    match ch {
        'N' => [
            0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001,
        ],
        'O' => [
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ],
        'I' => [
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b11111,
        ],
        'M' => [
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ],
        'A' => [
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ],
        'G' => [
            0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01110,
        ],
        'E' => [
            0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111,
        ],
        _ => [0; 7],
    }
}
