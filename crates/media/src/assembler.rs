//! Image-to-PDF assembly.
//!
//! Every input buffer becomes exactly one page. The page is sized to the
//! image's native pixel dimensions (one pixel per PDF point) and the image is
//! drawn to fill it, with no margin, scaling or cropping. Page order follows
//! input order.
//!
//! Decoding follows an explicit priority list of raster formats: each buffer
//! is tried against the formats in order and the first one that decodes wins.
//! A buffer that matches none of them fails the whole document.

use std::io::Write;

use {
    bytes::Bytes,
    flate2::{Compression, write::ZlibEncoder},
    image::{DynamicImage, GenericImageView, ImageFormat},
    lopdf::{
        Document, Object, ObjectId, Stream,
        content::{Content, Operation},
        dictionary,
    },
    tracing::{debug, warn},
};

use lembar_common::RasterFormat;

use crate::{Error, Result};

/// MIME type of assembled documents.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// File extension appended to every assembled document name.
pub const PDF_EXTENSION: &str = "pdf";

const IMAGE_RESOURCE: &str = "Im0";

/// Builds a paginated PDF from an ordered list of raster images.
///
/// Pure transform: no filesystem or network access.
#[derive(Debug, Clone)]
pub struct DocumentAssembler {
    decoders: Vec<RasterFormat>,
}

impl Default for DocumentAssembler {
    fn default() -> Self {
        Self {
            decoders: RasterFormat::DEFAULT_ORDER.to_vec(),
        }
    }
}

impl DocumentAssembler {
    /// Create an assembler that tries `decoders` in the given order.
    ///
    /// Duplicates are dropped. An empty list falls back to the default order.
    pub fn new(decoders: impl IntoIterator<Item = RasterFormat>) -> Self {
        let mut ordered: Vec<RasterFormat> = Vec::new();
        for format in decoders {
            if !ordered.contains(&format) {
                ordered.push(format);
            }
        }
        if ordered.is_empty() {
            warn!("empty decoder list, using default order");
            return Self::default();
        }
        Self { decoders: ordered }
    }

    pub fn decoders(&self) -> &[RasterFormat] {
        &self.decoders
    }

    /// Decode one buffer using the first format in priority order that accepts it.
    pub fn decode(&self, index: usize, data: &[u8]) -> Result<(RasterFormat, DynamicImage)> {
        for &format in &self.decoders {
            match image::load_from_memory_with_format(data, image_format(format)) {
                Ok(img) => return Ok((format, img)),
                Err(e) => debug!(index, %format, error = %e, "decoder rejected image"),
            }
        }
        Err(Error::UndecodableImage {
            index,
            tried: self
                .decoders
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join("/"),
        })
    }

    /// Assemble `images` into a single self-contained PDF byte stream.
    pub fn assemble(&self, images: &[Bytes]) -> Result<Vec<u8>> {
        if images.is_empty() {
            return Err(Error::NoImages);
        }

        // Decode everything up front so a bad buffer fails before any encoding work.
        let decoded = images
            .iter()
            .enumerate()
            .map(|(index, data)| self.decode(index, data))
            .collect::<Result<Vec<_>>>()?;

        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::with_capacity(decoded.len());

        for (index, (format, img)) in decoded.iter().enumerate() {
            let (width, height) = img.dimensions();
            debug!(index, %format, width, height, "adding page");
            let image_id = add_image_xobject(&mut doc, img)?;
            let page_id = add_page(&mut doc, pages_id, image_id, width, height)?;
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

        let mut out = Vec::new();
        doc.save_to(&mut out).map_err(Error::encode)?;
        Ok(out)
    }
}

fn image_format(format: RasterFormat) -> ImageFormat {
    match format {
        RasterFormat::Jpeg => ImageFormat::Jpeg,
        RasterFormat::Png => ImageFormat::Png,
        RasterFormat::Webp => ImageFormat::WebP,
    }
}

/// Embed `img` as a Flate-compressed image XObject. Alpha goes into a soft mask.
fn add_image_xobject(doc: &mut Document, img: &DynamicImage) -> Result<ObjectId> {
    let (width, height) = img.dimensions();
    let color = img.color();

    let (color_space, pixels, alpha) = if color.has_alpha() {
        let rgba = img.to_rgba8();
        let mut rgb = Vec::with_capacity(rgba.as_raw().len() / 4 * 3);
        let mut alpha = Vec::with_capacity(rgba.as_raw().len() / 4);
        for px in rgba.pixels() {
            rgb.extend_from_slice(&px.0[..3]);
            alpha.push(px.0[3]);
        }
        ("DeviceRGB", rgb, Some(alpha))
    } else if color.has_color() {
        ("DeviceRGB", img.to_rgb8().into_raw(), None)
    } else {
        ("DeviceGray", img.to_luma8().into_raw(), None)
    };

    let mut dict = image_dictionary(width, height, color_space);
    if let Some(alpha) = alpha {
        let mask = Stream::new(
            image_dictionary(width, height, "DeviceGray"),
            deflate(&alpha)?,
        );
        let mask_id = doc.add_object(mask);
        dict.set("SMask", mask_id);
    }

    Ok(doc.add_object(Stream::new(dict, deflate(&pixels)?)))
}

fn image_dictionary(width: u32, height: u32, color_space: &str) -> lopdf::Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(width),
        "Height" => i64::from(height),
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8_i64,
        "Filter" => "FlateDecode",
    }
}

fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    image_id: ObjectId,
    width: u32,
    height: u32,
) -> Result<ObjectId> {
    let (w, h) = (i64::from(width), i64::from(height));
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new("cm", vec![
                w.into(),
                0_i64.into(),
                0_i64.into(),
                h.into(),
                0_i64.into(),
                0_i64.into(),
            ]),
            Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().map_err(Error::encode)?,
    ));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0_i64.into(), 0_i64.into(), w.into(), h.into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                IMAGE_RESOURCE => image_id,
            },
        },
    }))
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(Error::encode)?;
    encoder.finish().map_err(Error::encode)
}
