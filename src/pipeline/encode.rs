//! Document encoding: ordered page images → one PDF.
//!
//! The assembler only decides *which* files go in and in what order; the
//! container format lives behind [`DocumentEncoder`]. The default
//! [`PdfEncoder`] embeds each JPEG as-is (`DCTDecode`), so pages are not
//! recompressed and the PDF is roughly the sum of its images.

use crate::error::TileBookError;
use image::codecs::jpeg::{JpegDecoder, JpegEncoder};
use image::{ColorType, ImageDecoder, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Turns an ordered list of page images into a single output file.
///
/// Called once per document build, on the blocking thread pool. An
/// implementation must either write `output` completely or return an error.
pub trait DocumentEncoder: Send + Sync {
    fn encode(&self, pages: &[PathBuf], output: &Path) -> Result<(), TileBookError>;
}

/// One image per PDF page, page size derived from pixel size at `dpi`.
#[derive(Debug, Clone, Copy)]
pub struct PdfEncoder {
    pub dpi: f32,
}

impl Default for PdfEncoder {
    fn default() -> Self {
        Self { dpi: 100.0 }
    }
}

/// JPEG bytes ready for embedding.
struct EmbeddedJpeg {
    data: Vec<u8>,
    width: u32,
    height: u32,
    color_space: &'static str,
}

fn encode_failed(path: &Path, detail: impl ToString) -> TileBookError {
    TileBookError::EncodeFailed {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Read a page image, passing baseline RGB/gray JPEGs through untouched and
/// re-encoding anything else.
fn load_jpeg(path: &Path) -> Result<EmbeddedJpeg, TileBookError> {
    let bytes = std::fs::read(path).map_err(|e| TileBookError::io(path, e))?;

    if matches!(image::guess_format(&bytes), Ok(ImageFormat::Jpeg)) {
        let decoder = JpegDecoder::new(Cursor::new(&bytes)).map_err(|e| encode_failed(path, e))?;
        let (width, height) = decoder.dimensions();
        let color_space = match decoder.color_type() {
            ColorType::L8 => Some("DeviceGray"),
            ColorType::Rgb8 => Some("DeviceRGB"),
            _ => None,
        };
        if let Some(color_space) = color_space {
            return Ok(EmbeddedJpeg {
                data: bytes,
                width,
                height,
                color_space,
            });
        }
    }

    debug!("Re-encoding {} as RGB JPEG", path.display());
    let rgb = image::load_from_memory(&bytes)
        .map_err(|e| encode_failed(path, e))?
        .to_rgb8();
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, 90)
        .encode_image(&rgb)
        .map_err(|e| encode_failed(path, e))?;
    Ok(EmbeddedJpeg {
        data,
        width: rgb.width(),
        height: rgb.height(),
        color_space: "DeviceRGB",
    })
}

impl PdfEncoder {
    fn build(&self, pages: &[PathBuf], output: &Path) -> Result<Document, TileBookError> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

        for path in pages {
            let jpeg = load_jpeg(path)?;
            let width_pt = jpeg.width as f32 * 72.0 / self.dpi;
            let height_pt = jpeg.height as f32 * 72.0 / self.dpi;

            let image_id = doc.add_object(
                Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => i64::from(jpeg.width),
                        "Height" => i64::from(jpeg.height),
                        "ColorSpace" => jpeg.color_space,
                        "BitsPerComponent" => 8i64,
                        "Filter" => "DCTDecode",
                    },
                    jpeg.data,
                )
                .with_compression(false),
            );

            let content = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![
                            width_pt.into(),
                            0i64.into(),
                            0i64.into(),
                            height_pt.into(),
                            0i64.into(),
                            0i64.into(),
                        ],
                    ),
                    Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                    Operation::new("Q", vec![]),
                ],
            };
            let content_bytes = content.encode().map_err(|e| encode_failed(output, e))?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0i64.into(), 0i64.into(), width_pt.into(), height_pt.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im0" => image_id },
                },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        Ok(doc)
    }
}

impl DocumentEncoder for PdfEncoder {
    fn encode(&self, pages: &[PathBuf], output: &Path) -> Result<(), TileBookError> {
        if pages.is_empty() {
            return Err(encode_failed(output, "no pages"));
        }
        let mut doc = self.build(pages, output)?;
        doc.save(output).map_err(|e| encode_failed(output, e))?;
        debug!("Wrote {} pages to {}", pages.len(), output.display());
        Ok(())
    }
}
