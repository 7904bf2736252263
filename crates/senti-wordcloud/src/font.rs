//! 5x7 bitmap glyphs. Each row is five bits, most significant bit leftmost.

use image::{Rgb, RgbImage};

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const SPACING: u32 = 1;

const LETTERS: [[u8; 7]; 26] = [
    [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11], // A
    [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
    [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
    [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
    [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
    [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
    [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
    [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
    [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
    [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
    [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
    [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
    [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
    [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
    [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
    [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
    [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
    [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
    [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
    [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
    [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F], // Z
];

const DIGITS: [[u8; 7]; 10] = [
    [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
    [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
    [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
    [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
    [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
    [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
    [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
    [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
];

const APOSTROPHE: [u8; 7] = [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00];

// Anything outside the table renders as an outlined box.
const UNKNOWN: [u8; 7] = [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F];

fn glyph(c: char) -> &'static [u8; 7] {
    match c.to_ascii_uppercase() {
        u @ 'A'..='Z' => &LETTERS[(u as u8 - b'A') as usize],
        d @ '0'..='9' => &DIGITS[(d as u8 - b'0') as usize],
        '\'' => &APOSTROPHE,
        _ => &UNKNOWN,
    }
}

/// Pixel width and height of `text` drawn at `scale`.
pub(crate) fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    if chars == 0 {
        return (0, 0);
    }
    let width = (chars * (GLYPH_W + SPACING) - SPACING) * scale;
    (width, GLYPH_H * scale)
}

pub(crate) fn draw_text(canvas: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    let advance = (GLYPH_W + SPACING) * scale;
    for (i, c) in text.chars().enumerate() {
        let origin_x = x + i as u32 * advance;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                fill_block(
                    canvas,
                    origin_x + col * scale,
                    y + row as u32 * scale,
                    scale,
                    color,
                );
            }
        }
    }
}

fn fill_block(canvas: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    let x_end = (x + size).min(canvas.width());
    let y_end = (y + size).min(canvas.height());
    for py in y..y_end {
        for px in x..x_end {
            canvas.put_pixel(px, py, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_accounts_for_spacing_and_scale() {
        assert_eq!(text_size("ab", 1), (11, 7));
        assert_eq!(text_size("ab", 3), (33, 21));
        assert_eq!(text_size("", 3), (0, 0));
    }

    #[test]
    fn drawing_stays_inside_the_word_box() {
        let mut canvas = RgbImage::from_pixel(40, 20, Rgb([255, 255, 255]));
        draw_text(&mut canvas, "hé1", 2, 3, 2, Rgb([0, 0, 0]));
        let (w, h) = text_size("hé1", 2);
        for (px, py, pixel) in canvas.enumerate_pixels() {
            if pixel.0 == [0, 0, 0] {
                assert!(px >= 2 && px < 2 + w && py >= 3 && py < 3 + h);
            }
        }
    }
}
