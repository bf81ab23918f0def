//! Reference image compression.
//!
//! Reference images are resent with every page, so they are bounded
//! before dispatch: first by walking down JPEG quality, then by
//! downscaling. Compression never fails; if the bound cannot be met at
//! the floor resolution, the smallest achieved encoding is returned.

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use pagecraft_core::ReferenceCompressor;
use std::io::Cursor;
use tracing::warn;

const QUALITY_STEPS: [u8; 5] = [85, 70, 55, 40, 30];
const DOWNSCALE_QUALITY: u8 = 40;
const MIN_DIMENSION: u32 = 200;

/// Compressor that re-encodes references as JPEG.
pub struct JpegReferenceCompressor;

impl ReferenceCompressor for JpegReferenceCompressor {
    fn compress(&self, bytes: &[u8], max_kb: u32) -> Vec<u8> {
        let limit = max_kb as usize * 1024;
        if bytes.len() <= limit {
            return bytes.to_vec();
        }

        let decoded = match image::load_from_memory(bytes) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(error = %err, "reference image not decodable, passing it through unchanged");
                return bytes.to_vec();
            }
        };
        // JPEG has no alpha channel.
        let mut image = DynamicImage::ImageRgb8(decoded.to_rgb8());

        let mut best: Option<Vec<u8>> = None;
        let mut consider = |encoded: Vec<u8>| {
            if best.as_ref().is_none_or(|b| encoded.len() < b.len()) {
                best = Some(encoded);
            }
        };

        for quality in QUALITY_STEPS {
            if let Some(encoded) = encode_jpeg(&image, quality) {
                if encoded.len() <= limit {
                    return encoded;
                }
                consider(encoded);
            }
        }

        while image.width().min(image.height()) > MIN_DIMENSION {
            let width = (image.width() * 4 / 5).max(1);
            let height = (image.height() * 4 / 5).max(1);
            image = image.resize(width, height, FilterType::Triangle);
            if let Some(encoded) = encode_jpeg(&image, DOWNSCALE_QUALITY) {
                if encoded.len() <= limit {
                    return encoded;
                }
                consider(encoded);
            }
        }

        match best {
            Some(encoded) => {
                warn!(
                    size = encoded.len(),
                    limit, "reference image stayed above the size bound at floor resolution"
                );
                encoded
            }
            None => bytes.to_vec(),
        }
    }
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Option<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    image.write_with_encoder(encoder).ok()?;
    Some(out.into_inner())
}
