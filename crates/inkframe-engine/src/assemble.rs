//! Deliverable assembly: the paginated PDF and the ZIP archive for one request.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use inkframe_contracts::{
    panel_file_name, truncate_caption, Bundle, BundleNames, ComicError, RenderResult,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::canvas::placeholder_png;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 40;
const HEADER_HEIGHT: i64 = 30;
const PANELS_PER_PAGE: usize = 4;
const CELL_WIDTH: i64 = 258;
const CELL_HEIGHT: i64 = 366;
const IMAGE_BOX: i64 = 237;
const CAPTION_CHARS: usize = 60;
const CAPTION_LINE_CHARS: usize = 45;
const CAPTION_MAX_LINES: usize = 3;
const EMBED_EDGE: u32 = 512;
const JPEG_QUALITY: u8 = 85;
const TEXT_LINE_CHARS: usize = 90;

const FONT_REGULAR: &str = "F1";
const FONT_BOLD: &str = "F2";

/// Builds the PDF bytes for panels already in ascending index order.
type DocumentBuilder = fn(&[&RenderResult], &[String]) -> Result<Vec<u8>>;

/// Writes the document and then the archive into `working_dir`.
///
/// Entries follow ascending panel index whatever order `results` arrive in. A grid
/// document that cannot be built degrades to a text-only document; only a failure to
/// produce either document, or the archive itself, is returned as an error.
pub fn assemble(
    results: &[RenderResult],
    descriptions: &[String],
    working_dir: &Path,
    names: &BundleNames,
) -> Result<Bundle, ComicError> {
    assemble_with(grid_document, results, descriptions, working_dir, names)
}

fn assemble_with(
    grid: DocumentBuilder,
    results: &[RenderResult],
    descriptions: &[String],
    working_dir: &Path,
    names: &BundleNames,
) -> Result<Bundle, ComicError> {
    let mut ordered: Vec<&RenderResult> = results.iter().collect();
    ordered.sort_by_key(|result| result.index);

    let (document, document_degraded) = match grid(&ordered, descriptions) {
        Ok(bytes) => (bytes, false),
        Err(err) => {
            warn!(
                error = %format!("{err:#}"),
                "grid document failed; writing text-only document"
            );
            let bytes = text_document(&ordered, descriptions).map_err(|fallback| {
                ComicError::Assembly(format!(
                    "document could not be built: {err:#}; text fallback: {fallback:#}"
                ))
            })?;
            (bytes, true)
        }
    };

    let document_name = names.document_name();
    let document_path = working_dir.join(&document_name);
    fs::write(&document_path, &document).map_err(|err| ComicError::io(&document_path, err))?;

    let archive_path = working_dir.join(names.archive_name());
    write_archive(
        &archive_path,
        &ordered,
        descriptions,
        &document_name,
        &document,
    )?;

    info!(
        archive = %archive_path.display(),
        document = %document_path.display(),
        document_degraded,
        panels = ordered.len(),
        "bundle assembled"
    );
    Ok(Bundle {
        archive_path,
        document_path,
        document_degraded,
    })
}

fn description_for<'a>(descriptions: &'a [String], index: u32) -> &'a str {
    (index as usize)
        .checked_sub(1)
        .and_then(|slot| descriptions.get(slot))
        .map(String::as_str)
        .unwrap_or("")
}

fn write_archive(
    archive_path: &Path,
    ordered: &[&RenderResult],
    descriptions: &[String],
    document_name: &str,
    document: &[u8],
) -> Result<(), ComicError> {
    let file = File::create(archive_path).map_err(|err| ComicError::io(archive_path, err))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for result in ordered {
        let bytes = match fs::read(&result.image_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    panel = result.index,
                    error = %err,
                    "panel file missing at archive time; archiving placeholder"
                );
                placeholder_png(result.index, description_for(descriptions, result.index))
                    .map_err(|err| archive_err(format!("{err:#}")))?
            }
        };
        add_entry(&mut zip, &panel_file_name(result.index), &bytes, options)?;
    }

    add_entry(&mut zip, document_name, document, options)?;
    zip.finish().map_err(archive_err)?;
    Ok(())
}

fn add_entry(
    zip: &mut ZipWriter<File>,
    name: &str,
    bytes: &[u8],
    options: SimpleFileOptions,
) -> Result<(), ComicError> {
    zip.start_file(name, options).map_err(archive_err)?;
    zip.write_all(bytes).map_err(archive_err)
}

fn archive_err(err: impl std::fmt::Display) -> ComicError {
    ComicError::Assembly(format!("archive write failed: {err}"))
}

/// Top-left corner of grid slot `slot` (0..4) on a page.
fn cell_origin(slot: usize) -> (i64, i64) {
    let row = (slot / 2) as i64;
    let col = (slot % 2) as i64;
    let left = MARGIN + col * CELL_WIDTH;
    let top = PAGE_HEIGHT - MARGIN - HEADER_HEIGHT - row * CELL_HEIGHT;
    (left, top)
}

fn grid_document(ordered: &[&RenderResult], descriptions: &[String]) -> Result<Vec<u8>> {
    let mut pdf = PdfBuilder::new();
    let page_count = ordered.len().div_ceil(PANELS_PER_PAGE).max(1);

    for (page, chunk) in ordered.chunks(PANELS_PER_PAGE).enumerate() {
        let mut ops = header(page + 1, page_count);
        let mut xobjects = Dictionary::new();

        for (slot, result) in chunk.iter().enumerate() {
            let (left, top) = cell_origin(slot);
            let label = format!("Panel {}", result.index);
            ops.extend(text(FONT_BOLD, 11, left, top - 12, &label));
            let description = description_for(descriptions, result.index);
            let caption = truncate_caption(description, CAPTION_CHARS);
            for (line_no, line) in wrap_chars(&caption, CAPTION_LINE_CHARS)
                .iter()
                .take(CAPTION_MAX_LINES)
                .enumerate()
            {
                let y = top - 24 - 9 * line_no as i64;
                ops.extend(text(FONT_REGULAR, 8, left, y, line));
            }

            let box_bottom = top - 50 - IMAGE_BOX;
            match embeddable_jpeg(&result.image_path) {
                Ok(embedded) => {
                    let name = format!("Im{}", result.index);
                    let (width, height) = fit_box(embedded.width, embedded.height);
                    let image_id = pdf.add_jpeg(embedded);
                    xobjects.set(name.as_bytes().to_vec(), image_id);
                    let x = left + (IMAGE_BOX - width) / 2;
                    let y = box_bottom + (IMAGE_BOX - height) / 2;
                    ops.extend([
                        Operation::new("q", vec![]),
                        Operation::new(
                            "cm",
                            vec![
                                width.into(),
                                0i64.into(),
                                0i64.into(),
                                height.into(),
                                x.into(),
                                y.into(),
                            ],
                        ),
                        Operation::new("Do", vec![Object::Name(name.into_bytes())]),
                        Operation::new("Q", vec![]),
                    ]);
                    ops.extend(frame(left, box_bottom));
                }
                Err(err) => {
                    warn!(
                        panel = result.index,
                        error = %format!("{err:#}"),
                        "panel image unavailable for document; drawing error box"
                    );
                    ops.extend(frame(left, box_bottom));
                    ops.extend(text(
                        FONT_BOLD,
                        14,
                        left + IMAGE_BOX / 2 - 18,
                        box_bottom + IMAGE_BOX / 2 - 5,
                        "Error",
                    ));
                }
            }
        }

        pdf.add_page(ops, xobjects)?;
    }

    pdf.finish()
}

fn text_document(ordered: &[&RenderResult], descriptions: &[String]) -> Result<Vec<u8>> {
    let mut pages: Vec<Vec<Operation>> = Vec::new();
    let mut ops = text(
        FONT_BOLD,
        18,
        MARGIN,
        PAGE_HEIGHT - MARGIN - 18,
        "Inkframe Comic",
    );
    ops.extend(text(
        FONT_REGULAR,
        11,
        MARGIN,
        PAGE_HEIGHT - MARGIN - 40,
        "Panel images unavailable - descriptions only",
    ));
    let mut y = PAGE_HEIGHT - MARGIN - 70;

    for result in ordered {
        let lines = wrap_chars(description_for(descriptions, result.index), TEXT_LINE_CHARS);
        let needed = 16 + 13 * lines.len() as i64;
        if y - needed < MARGIN {
            pages.push(std::mem::take(&mut ops));
            y = PAGE_HEIGHT - MARGIN - 12;
        }
        let label = format!("Panel {}:", result.index);
        ops.extend(text(FONT_BOLD, 11, MARGIN, y, &label));
        y -= 16;
        for line in &lines {
            ops.extend(text(FONT_REGULAR, 10, MARGIN + 20, y, line));
            y -= 13;
        }
        y -= 8;
    }
    pages.push(ops);

    let mut pdf = PdfBuilder::new();
    for page in pages {
        pdf.add_page(page, Dictionary::new())?;
    }
    pdf.finish()
}

fn header(page: usize, page_count: usize) -> Vec<Operation> {
    text(
        FONT_BOLD,
        14,
        MARGIN,
        PAGE_HEIGHT - MARGIN - 14,
        &format!("Inkframe Comic - page {page} of {page_count}"),
    )
}

fn text(font: &str, size: i64, x: i64, y: i64, body: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(font.into()), size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new("Tj", vec![Object::string_literal(pdf_text(body))]),
        Operation::new("ET", vec![]),
    ]
}

fn frame(left: i64, bottom: i64) -> Vec<Operation> {
    vec![
        Operation::new("w", vec![1i64.into()]),
        Operation::new(
            "re",
            vec![
                left.into(),
                bottom.into(),
                IMAGE_BOX.into(),
                IMAGE_BOX.into(),
            ],
        ),
        Operation::new("S", vec![]),
    ]
}

/// Standard Type1 fonts only cover Latin-1; anything else is drawn as `?`.
fn pdf_text(body: &str) -> Vec<u8> {
    body.chars()
        .map(|ch| match ch {
            ' '..='~' => ch as u8,
            '\u{a0}'..='\u{ff}' => ch as u32 as u8,
            _ => b'?',
        })
        .collect()
}

fn fit_box(width: u32, height: u32) -> (i64, i64) {
    if width == 0 || height == 0 {
        return (IMAGE_BOX, IMAGE_BOX);
    }
    if width >= height {
        let scaled = (IMAGE_BOX * height as i64) / width as i64;
        (IMAGE_BOX, scaled.max(1))
    } else {
        let scaled = (IMAGE_BOX * width as i64) / height as i64;
        (scaled.max(1), IMAGE_BOX)
    }
}

/// Greedy word wrap by character count; words longer than `width` are split.
fn wrap_chars(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word.drain(..width).collect());
        }
        let word: String = word.into_iter().collect();
        if word.is_empty() {
            continue;
        }
        let joined_len =
            current.chars().count() + usize::from(!current.is_empty()) + word.chars().count();
        if joined_len > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

struct EmbeddedJpeg {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

fn embeddable_jpeg(path: &Path) -> Result<EmbeddedJpeg> {
    let decoded = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let resized = if decoded.width() > EMBED_EDGE || decoded.height() > EMBED_EDGE {
        decoded.resize(EMBED_EDGE, EMBED_EDGE, FilterType::Triangle)
    } else {
        decoded
    };
    let rgb = resized.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(&DynamicImage::ImageRgb8(rgb))
        .with_context(|| format!("failed to encode {} as JPEG", path.display()))?;
    Ok(EmbeddedJpeg {
        bytes,
        width,
        height,
    })
}

/// Minimal page tree writer over `lopdf`: standard fonts, JPEG XObjects, A4 pages.
struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    fonts: Dictionary,
    kids: Vec<Object>,
}

impl PdfBuilder {
    fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let regular = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let fonts = dictionary! {
            FONT_REGULAR => regular,
            FONT_BOLD => bold,
        };
        Self {
            doc,
            pages_id,
            fonts,
            kids: Vec::new(),
        }
    }

    fn add_jpeg(&mut self, image: EmbeddedJpeg) -> ObjectId {
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8i64,
                "Filter" => "DCTDecode",
            },
            image.bytes,
        )
        .with_compression(false);
        self.doc.add_object(stream)
    }

    fn add_page(&mut self, operations: Vec<Operation>, xobjects: Dictionary) -> Result<()> {
        let content = Content { operations }
            .encode()
            .context("failed to encode page content")?;
        let stream = Stream::new(Dictionary::new(), content).with_compression(false);
        let content_id = self.doc.add_object(stream);
        let mut resources = dictionary! {
            "Font" => self.fonts.clone(),
        };
        if !xobjects.is_empty() {
            resources.set("XObject", xobjects);
        }
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.kids.push(page_id.into());
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>> {
        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => count,
            "MediaBox" => vec![0i64.into(), 0i64.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        };
        self.doc
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        self.doc
            .save_to(&mut bytes)
            .context("failed to serialize PDF")?;
        Ok(bytes)
    }
}
