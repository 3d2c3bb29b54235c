//! Composite "sequence" image: a grid of time-ordered frames for quick review.

use image::{imageops, Rgb, RgbImage};

pub const DEFAULT_COLUMNS: u32 = 5;

const LABEL_MARGIN: u32 = 10;
const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;

/// Lay `frames` into a row-major grid `columns` wide.
///
/// Frames that differ in size from the first frame are resized to match it.
/// Each tile is labelled `T-k`, where k counts frames back from the last one.
/// Returns `None` for an empty input.
pub fn build_composite(frames: &[RgbImage], columns: u32) -> Option<RgbImage> {
    let first = frames.first()?;
    let columns = columns.max(1);
    let (w, h) = first.dimensions();
    let count = frames.len() as u32;
    let rows = count.div_ceil(columns);

    let mut composite = RgbImage::new(w * columns, h * rows);
    for (i, frame) in frames.iter().enumerate() {
        let i = i as u32;
        let x = (i % columns) * w;
        let y = (i / columns) * h;

        if frame.dimensions() == (w, h) {
            imageops::replace(&mut composite, frame, x as i64, y as i64);
        } else {
            let resized = imageops::resize(frame, w, h, imageops::FilterType::Triangle);
            imageops::replace(&mut composite, &resized, x as i64, y as i64);
        }

        let label = format!("T-{}", count - i - 1);
        draw_label(&mut composite, &label, x, y, w, h);
    }
    Some(composite)
}

/// Draw `text` inside the tile at (`tile_x`, `tile_y`), clipped to the tile.
fn draw_label(img: &mut RgbImage, text: &str, tile_x: u32, tile_y: u32, tile_w: u32, tile_h: u32) {
    let scale = if tile_h >= 120 { 2 } else { 1 };
    let origin_x = tile_x + LABEL_MARGIN.min(tile_w / 4);
    let origin_y = tile_y + LABEL_MARGIN.min(tile_h / 4);
    let max_x = tile_x + tile_w;
    let max_y = tile_y + tile_h;

    for (n, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch) else {
            continue;
        };
        let gx = origin_x + n as u32 * (GLYPH_W + 1) * scale;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = gx + col * scale + dx;
                        let py = origin_y + row as u32 * scale + dy;
                        if px < max_x && py < max_y {
                            img.put_pixel(px, py, Rgb([255, 255, 255]));
                        }
                    }
                }
            }
        }
    }
}

/// 5x7 bitmaps for the characters labels use.
fn glyph(ch: char) -> Option<[u8; GLYPH_H as usize]> {
    let rows = match ch {
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        _ => return None,
    };
    Some(rows)
}
