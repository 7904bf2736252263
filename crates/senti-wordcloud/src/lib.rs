//! Word cloud rendering to in-memory PNG buffers.
//!
//! Words are weighted by frequency, drawn with a built-in 5x7 bitmap font
//! and placed by walking an elliptical spiral out from a random start until
//! the word's box clears everything already placed. Placement is unseeded,
//! so the same text can produce different (content-equivalent) images.

use std::collections::HashMap;
use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use senti_core::text::content_words;
use thiserror::Error;
use tracing::debug;

mod font;

pub const CRATE_NAME: &str = "senti-wordcloud";

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 400;

const SPIRAL_STEPS: usize = 1200;
const SPIRAL_STEP: f64 = 0.3;
const MAX_CONSECUTIVE_MISSES: usize = 20;

const PALETTE: &[[u8; 3]] = &[
    [68, 1, 84],
    [72, 40, 120],
    [62, 74, 137],
    [49, 104, 142],
    [38, 130, 142],
    [31, 158, 137],
    [53, 183, 121],
    [94, 161, 56],
];

#[derive(Debug, Error)]
pub enum WordCloudError {
    #[error("encoding png: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone)]
pub struct WordCloudConfig {
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
    pub max_words: usize,
    /// Pixels per font dot for the most frequent word.
    pub max_scale: u32,
    pub margin: u32,
}

impl Default for WordCloudConfig {
    fn default() -> Self {
        Self {
            width: WIDTH,
            height: HEIGHT,
            background: [255, 255, 255],
            max_words: 200,
            max_scale: 12,
            margin: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

impl Rect {
    fn overlaps(&self, other: &Rect, margin: u32) -> bool {
        self.x < other.x + other.w + margin
            && other.x < self.x + self.w + margin
            && self.y < other.y + other.h + margin
            && other.y < self.y + self.h + margin
    }
}

/// Frequency-ranked words, most frequent first, ties alphabetical.
pub fn word_frequencies(text: &str, limit: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in content_words(text) {
        *counts.entry(word).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

pub struct WordCloud {
    config: WordCloudConfig,
    rng: fastrand::Rng,
}

impl WordCloud {
    pub fn new(config: WordCloudConfig) -> Self {
        Self {
            config,
            rng: fastrand::Rng::new(),
        }
    }

    pub fn seeded(config: WordCloudConfig, seed: u64) -> Self {
        Self {
            config,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn render(&mut self, text: &str) -> RgbImage {
        let mut canvas = RgbImage::from_pixel(
            self.config.width,
            self.config.height,
            Rgb(self.config.background),
        );
        let words = word_frequencies(text, self.config.max_words);
        let Some(top) = words.first().map(|(_, n)| *n as f64) else {
            return canvas;
        };

        let mut placed: Vec<Rect> = Vec::with_capacity(words.len());
        let mut misses = 0usize;
        for (word, count) in &words {
            let relative = *count as f64 / top;
            let wanted = (self.config.max_scale as f64 * (0.5 + 0.5 * relative)).round() as u32;
            let fitted = self.fit_scale(word, wanted.max(1));

            let mut landed = false;
            for scale in (1..=fitted).rev() {
                let (w, h) = font::text_size(word, scale);
                if let Some(rect) = self.find_spot(w, h, &placed) {
                    let color = PALETTE[self.rng.usize(..PALETTE.len())];
                    font::draw_text(&mut canvas, word, rect.x, rect.y, scale, Rgb(color));
                    placed.push(rect);
                    landed = true;
                    break;
                }
            }

            if landed {
                misses = 0;
            } else {
                misses += 1;
                if misses >= MAX_CONSECUTIVE_MISSES {
                    break;
                }
            }
        }
        debug!(words = words.len(), placed = placed.len(), "word cloud laid out");
        canvas
    }

    pub fn render_png(&mut self, text: &str) -> Result<Vec<u8>, WordCloudError> {
        let canvas = self.render(text);
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(canvas).write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }

    /// Largest scale <= `wanted` at which the word fits the canvas at all.
    fn fit_scale(&self, word: &str, wanted: u32) -> u32 {
        let usable_w = self.config.width.saturating_sub(2 * self.config.margin);
        let usable_h = self.config.height.saturating_sub(2 * self.config.margin);
        (1..=wanted)
            .rev()
            .find(|&scale| {
                let (w, h) = font::text_size(word, scale);
                w <= usable_w && h <= usable_h
            })
            .unwrap_or(0)
    }

    fn find_spot(&mut self, w: u32, h: u32, placed: &[Rect]) -> Option<Rect> {
        let max_x = self.config.width.checked_sub(w)?;
        let max_y = self.config.height.checked_sub(h)?;
        let cx = self.rng.u32(..=max_x) as f64;
        let cy = self.rng.u32(..=max_y) as f64;

        for step in 0..SPIRAL_STEPS {
            let t = step as f64 * SPIRAL_STEP;
            let x = cx + 2.0 * t * t.cos();
            let y = cy + t * t.sin();
            if x < 0.0 || y < 0.0 || x > max_x as f64 || y > max_y as f64 {
                continue;
            }
            let rect = Rect {
                x: x as u32,
                y: y as u32,
                w,
                h,
            };
            if placed.iter().all(|p| !p.overlaps(&rect, self.config.margin)) {
                return Some(rect);
            }
        }
        None
    }
}

/// 800x400 white-background word cloud for `text`, PNG encoded.
pub fn generate_wordcloud(text: &str) -> Result<Vec<u8>, WordCloudError> {
    WordCloud::new(WordCloudConfig::default()).render_png(text)
}
