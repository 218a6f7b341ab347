//! Local rasterization: panel placeholders, the dialogue bubble overlay, and the
//! two-tier font lookup both of them draw with.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_ellipse_mut, draw_filled_rect_mut, draw_hollow_ellipse_mut, draw_text_mut,
    text_size,
};
use imageproc::rect::Rect;
use inkframe_contracts::truncate_caption;
use tracing::{debug, warn};

use crate::providers::IMAGE_SIZE;

pub const PLACEHOLDER_BACKGROUND: Rgb<u8> = Rgb([0xf0, 0xf0, 0xf0]);
const PLACEHOLDER_TITLE: Rgb<u8> = Rgb([0x33, 0x33, 0x33]);
const PLACEHOLDER_BODY: Rgb<u8> = Rgb([0x66, 0x66, 0x66]);
const PLACEHOLDER_TEXT_PX: f32 = 40.0;
const PLACEHOLDER_DESCRIPTION_CHARS: usize = 50;
const PLACEHOLDER_MARGIN: u32 = 64;

const BUBBLE_FILL: Rgb<u8> = Rgb([0xff, 0xff, 0xff]);
const BUBBLE_INK: Rgb<u8> = Rgb([0x00, 0x00, 0x00]);
const BUBBLE_OUTLINE_PX: i32 = 4;
const BUBBLE_TOP_FRACTION: f32 = 0.02;
const BUBBLE_HEIGHT_FRACTION: f32 = 0.18;
const BUBBLE_WIDTH_FRACTION: f32 = 0.70;

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static PANEL_FONT: OnceLock<PanelFont> = OnceLock::new();

/// A TrueType font when one resolves, else the built-in 8x8 bitmap face.
pub enum PanelFont {
    Vector { font: FontVec, source: PathBuf },
    Bitmap,
}

/// Resolves the process-wide font. The first call decides; later calls reuse it.
pub fn init_panel_font(preferred: Option<&Path>) -> &'static PanelFont {
    PANEL_FONT.get_or_init(|| PanelFont::resolve(preferred))
}

pub fn panel_font() -> &'static PanelFont {
    init_panel_font(None)
}

impl PanelFont {
    pub fn resolve(preferred: Option<&Path>) -> Self {
        let candidates = preferred
            .map(Path::to_path_buf)
            .into_iter()
            .chain(SYSTEM_FONT_CANDIDATES.iter().map(PathBuf::from));
        for source in candidates {
            let Ok(bytes) = std::fs::read(&source) else {
                continue;
            };
            match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    debug!(font = %source.display(), "resolved panel font");
                    return Self::Vector { font, source };
                }
                Err(err) => warn!(font = %source.display(), %err, "unusable font file"),
            }
        }
        debug!("no system font resolved; using built-in bitmap font");
        Self::Bitmap
    }

    pub fn source(&self) -> Option<&Path> {
        match self {
            Self::Vector { source, .. } => Some(source),
            Self::Bitmap => None,
        }
    }

    pub fn measure(&self, px: f32, text: &str) -> (u32, u32) {
        match self {
            Self::Vector { font, .. } => text_size(PxScale::from(px), font, text),
            Self::Bitmap => {
                let cell = 8 * bitmap_scale(px);
                (cell * text.chars().count() as u32, cell)
            }
        }
    }

    pub fn draw(&self, canvas: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, px: f32, text: &str) {
        match self {
            Self::Vector { font, .. } => {
                draw_text_mut(canvas, color, x, y, PxScale::from(px), font, text)
            }
            Self::Bitmap => draw_bitmap_text(canvas, color, x, y, bitmap_scale(px), text),
        }
    }

    /// Greedy word wrap to `max_width` pixels; words wider than a line are split.
    pub fn wrap(&self, px: f32, text: &str, max_width: u32) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if self.measure(px, &candidate).0 <= max_width {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if self.measure(px, word).0 <= max_width {
                current = word.to_string();
                continue;
            }
            for ch in word.chars() {
                let mut next = current.clone();
                next.push(ch);
                if !current.is_empty() && self.measure(px, &next).0 > max_width {
                    lines.push(std::mem::take(&mut current));
                    current.push(ch);
                } else {
                    current = next;
                }
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines
    }
}

fn bitmap_scale(px: f32) -> u32 {
    ((px / 8.0).round() as u32).max(1)
}

fn draw_bitmap_text(canvas: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, scale: u32, text: &str) {
    let cell = 8 * scale as i32;
    for (offset, ch) in text.chars().enumerate() {
        let glyph = BASIC_FONTS
            .get(ch)
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or([0; 8]);
        let origin_x = x + offset as i32 * cell;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                let px = origin_x + col * scale as i32;
                let py = y + row as i32 * scale as i32;
                draw_filled_rect_mut(canvas, Rect::at(px, py).of_size(scale, scale), color);
            }
        }
    }
}

/// Flat 1024x1024 card with the panel number and a truncated description, centered.
///
/// Pure function of its inputs and the resolved font, so repeated calls produce
/// identical pixels.
pub fn render_placeholder(index: u32, description: &str) -> RgbImage {
    let font = panel_font();
    let mut canvas = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, PLACEHOLDER_BACKGROUND);
    let center_x = IMAGE_SIZE as i32 / 2;
    let center_y = IMAGE_SIZE as i32 / 2;

    let title = format!("Panel {index}");
    let (title_w, title_h) = font.measure(PLACEHOLDER_TEXT_PX, &title);
    font.draw(
        &mut canvas,
        PLACEHOLDER_TITLE,
        center_x - title_w as i32 / 2,
        center_y - 50 - title_h as i32 / 2,
        PLACEHOLDER_TEXT_PX,
        &title,
    );

    let caption = truncate_caption(description.trim(), PLACEHOLDER_DESCRIPTION_CHARS);
    let lines = font.wrap(
        PLACEHOLDER_TEXT_PX,
        &caption,
        IMAGE_SIZE - 2 * PLACEHOLDER_MARGIN,
    );
    let mut y = center_y + 50 - title_h as i32 / 2;
    for line in lines {
        let (line_w, line_h) = font.measure(PLACEHOLDER_TEXT_PX, &line);
        font.draw(
            &mut canvas,
            PLACEHOLDER_BODY,
            center_x - line_w as i32 / 2,
            y,
            PLACEHOLDER_TEXT_PX,
            &line,
        );
        y += line_h.max(title_h) as i32 + 10;
    }
    canvas
}

pub fn placeholder_png(index: u32, description: &str) -> Result<Vec<u8>> {
    encode_png(&render_placeholder(index, description))
}

/// Draws a speech bubble across the top of the panel and writes `dialogue` into it.
pub fn composite_dialogue(canvas: &mut RgbImage, dialogue: &str) {
    let font = panel_font();
    let (width, height) = canvas.dimensions();
    let radius_x = (width as f32 * BUBBLE_WIDTH_FRACTION / 2.0) as i32;
    let radius_y = (height as f32 * BUBBLE_HEIGHT_FRACTION / 2.0) as i32;
    let center_x = width as i32 / 2;
    let center_y = (height as f32 * BUBBLE_TOP_FRACTION) as i32 + radius_y;

    draw_filled_ellipse_mut(
        canvas,
        (center_x, center_y),
        radius_x,
        radius_y,
        BUBBLE_FILL,
    );
    for inset in 0..BUBBLE_OUTLINE_PX {
        draw_hollow_ellipse_mut(
            canvas,
            (center_x, center_y),
            radius_x - inset,
            radius_y - inset,
            BUBBLE_INK,
        );
    }

    let px = (height as f32 * 0.028).max(12.0);
    let text_width = (radius_x as f32 * 2.0 * 0.7) as u32;
    let left = center_x - text_width as i32 / 2;
    let line_height = font.measure(px, "Ag").1 as i32 + 6;
    let usable_height = (radius_y as f32 * 2.0 * 0.7) as i32;
    let max_lines = (usable_height / line_height.max(1)).max(1) as usize;

    let mut lines = font.wrap(px, dialogue.trim(), text_width);
    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            while !last.is_empty() && font.measure(px, &format!("{last}...")).0 > text_width {
                last.pop();
            }
            last.push_str("...");
        }
    }

    let block_height = line_height * lines.len() as i32;
    let mut y = center_y - block_height / 2;
    for line in &lines {
        font.draw(canvas, BUBBLE_INK, left, y, px, line);
        y += line_height;
    }
}

/// Decodes provider bytes into a 1024x1024 RGB canvas.
pub fn normalize_provider_image(bytes: &[u8]) -> Result<RgbImage> {
    let decoded = image::load_from_memory(bytes)
        .context("provider payload is not a decodable image")?;
    let sized = if decoded.width() == IMAGE_SIZE && decoded.height() == IMAGE_SIZE {
        decoded
    } else {
        decoded.resize_exact(IMAGE_SIZE, IMAGE_SIZE, FilterType::Lanczos3)
    };
    Ok(sized.to_rgb8())
}

pub(crate) fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(bytes)
}
