use std::io::Cursor;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use super::Converter;
use crate::registry::FileCategory;

/// Targets that require opaque pixels: sources with an alpha channel are
/// composited onto a white background before encoding.
const OPAQUE_TARGETS: &[&str] = &["jpg", "jpeg", "pdf"];

/// Nominal resolution used when wrapping a raster into a PDF page
const PDF_WRAP_DPI: f32 = 100.0;

pub struct ImageConverter;

#[async_trait]
impl Converter for ImageConverter {
    fn category(&self) -> FileCategory {
        FileCategory::Image
    }

    async fn run(&self, input: &Path, output: &Path, target_ext: &str) -> Result<()> {
        let input = input.to_owned();
        let output = output.to_owned();
        let target = target_ext.to_lowercase();
        tokio::task::spawn_blocking(move || convert_image(&input, &output, &target))
            .await
            .context("image worker panicked")?
    }
}

fn convert_image(input: &Path, output: &Path, target: &str) -> Result<()> {
    let img = image::open(input).context("failed to load source image")?;

    let img = if OPAQUE_TARGETS.contains(&target) && img.color().has_alpha() {
        flatten_onto_white(&img)
    } else {
        img
    };

    if target == "pdf" {
        return wrap_in_pdf(&img, output);
    }

    let format = format_for(target)?;
    // Encoders for the lossy/indexed targets only take 8-bit buffers
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        ImageFormat::Gif | ImageFormat::WebP => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => img,
    };
    img.save_with_format(output, format)
        .context("failed to encode target image")?;
    Ok(())
}

fn format_for(target: &str) -> Result<ImageFormat> {
    match target {
        "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
        "png" => Ok(ImageFormat::Png),
        "webp" => Ok(ImageFormat::WebP),
        "gif" => Ok(ImageFormat::Gif),
        "bmp" => Ok(ImageFormat::Bmp),
        "tiff" => Ok(ImageFormat::Tiff),
        other => Err(anyhow!("unsupported image target: {other}")),
    }
}

/// Composite onto an opaque white background sized to the source.
fn flatten_onto_white(img: &DynamicImage) -> DynamicImage {
    let mut canvas = image::RgbaImage::from_pixel(
        img.width(),
        img.height(),
        image::Rgba([255, 255, 255, 255]),
    );
    image::imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

/// Wraps the raster as a single-page PDF: the image is embedded as a
/// JPEG-encoded XObject and the page is sized to the pixel dimensions at
/// `PDF_WRAP_DPI`.
fn wrap_in_pdf(img: &DynamicImage, output: &Path) -> Result<()> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .context("failed to encode intermediate JPEG")?;

    let page_width = width as f32 * 72.0 / PDF_WRAP_DPI;
    let page_height = height as f32 * 72.0 / PDF_WRAP_DPI;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut image_stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    );
    image_stream.allows_compression = false;
    let image_id = doc.add_object(image_stream);

    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! { "Im0" => image_id },
    });

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    page_width.into(),
                    0.into(),
                    0.into(),
                    page_height.into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec!["Im0".into()]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().context("failed to encode page content")?,
    ));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), page_width.into(), page_height.into()],
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc.save(output).context("failed to write PDF")?;
    Ok(())
}
