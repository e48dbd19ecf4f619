//! Asset manufacturing: turning reference or generated imagery into
//! print-ready PNGs.
//!
//! Three treatments, chosen upstream per trend: background removal alone
//! (`Clean`), background removal plus a caption overlay (`Meme`), and
//! fresh generation (`Regen`). Per-directive failures are logged and
//! skipped so one bad image never sinks the batch.

use ab_glyph::{FontVec, PxScale};
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

use crate::imagen::{generate_with_backoff, ImagenClient};
use crate::models::{AssetDecision, AssetDirective};
use crate::utils::term_slug;

/// Channel floor above which a pixel counts as white background.
const WHITE_THRESHOLD: u8 = 240;
/// Caption height relative to the canvas.
const CAPTION_HEIGHT_FRACTION: f32 = 0.09;
/// Vertical anchor of the caption.
const CAPTION_Y_FRACTION: f32 = 0.82;
const STROKE_PX: i32 = 5;
const STROKE_OFFSETS: [(i32, i32); 8] = [
    (-STROKE_PX, -STROKE_PX),
    (0, -STROKE_PX),
    (STROKE_PX, -STROKE_PX),
    (-STROKE_PX, 0),
    (STROKE_PX, 0),
    (-STROKE_PX, STROKE_PX),
    (0, STROKE_PX),
    (STROKE_PX, STROKE_PX),
];

/// Drop the near-white background and crop to what remains.
///
/// Pixels with every channel above the threshold become transparent;
/// the result is cropped to the bounding box of the surviving pixels.
/// A fully-white input is an error since nothing would remain.
pub fn remove_background(source: &DynamicImage) -> Result<RgbaImage, Box<dyn Error>> {
    let mut rgba = source.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        if r > WHITE_THRESHOLD && g > WHITE_THRESHOLD && b > WHITE_THRESHOLD {
            pixel.0[3] = 0;
        }
    }

    let (width, height) = rgba.dimensions();
    let mut min_x = width;
    let mut min_y = height;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut any_opaque = false;
    for (x, y, pixel) in rgba.enumerate_pixels() {
        if pixel.0[3] != 0 {
            any_opaque = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if !any_opaque {
        return Err("image is entirely background".into());
    }

    Ok(imageops::crop_imm(&rgba, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image())
}

/// Overlay an uppercase caption: white fill over a black stroke drawn
/// as offset passes, centered horizontally in the lower band.
pub fn apply_meme_text(canvas: &mut RgbaImage, caption: &str, font: &FontVec) {
    let caption = caption.to_uppercase();
    let (width, height) = canvas.dimensions();
    let scale = PxScale::from(height as f32 * CAPTION_HEIGHT_FRACTION);
    let (text_width, _text_height) = text_size(scale, font, &caption);
    let text_width = text_width as i32;
    let x = (width as i32 - text_width) / 2;
    let y = (height as f32 * CAPTION_Y_FRACTION) as i32;

    let black = Rgba([0u8, 0, 0, 255]);
    let white = Rgba([255u8, 255, 255, 255]);
    for (dx, dy) in STROKE_OFFSETS {
        draw_text_mut(canvas, black, x + dx, y + dy, scale, font, &caption);
    }
    draw_text_mut(canvas, white, x, y, scale, font, &caption);
}

/// Load the caption font, if one is configured and readable. Caption
/// overlays are skipped without a font, never failed.
pub fn load_font(path: Option<&str>) -> Option<FontVec> {
    let path = path?;
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, path, "Caption font not readable, meme captions disabled");
            return None;
        }
    };
    match FontVec::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!(error = %e, path, "Caption font not parseable, meme captions disabled");
            None
        }
    }
}

/// Work through the directives, writing finished assets to
/// `{out_dir}/final/` and returning the paths that made it.
#[instrument(level = "info", skip_all, fields(directives = directives.len()))]
pub async fn process_directives(
    directives: &[AssetDirective],
    visuals: &BTreeMap<String, Vec<PathBuf>>,
    imagen: Option<&ImagenClient>,
    font: Option<&FontVec>,
    out_dir: &str,
) -> Vec<PathBuf> {
    let final_dir = Path::new(out_dir).join("final");
    if let Err(e) = std::fs::create_dir_all(&final_dir) {
        error!(error = %e, dir = %final_dir.display(), "Could not create the final assets directory");
        return Vec::new();
    }

    let mut finished = Vec::new();
    for directive in directives {
        match manufacture(directive, visuals, imagen, font, &final_dir).await {
            Ok(Some(path)) => {
                info!(
                    trend = %directive.trend,
                    decision = %directive.decision,
                    path = %path.display(),
                    "Asset finished"
                );
                finished.push(path);
            }
            Ok(None) => warn!(trend = %directive.trend, "Asset skipped"),
            Err(e) => {
                warn!(trend = %directive.trend, error = %e, "Asset manufacturing failed")
            }
        }
    }
    finished
}

async fn manufacture(
    directive: &AssetDirective,
    visuals: &BTreeMap<String, Vec<PathBuf>>,
    imagen: Option<&ImagenClient>,
    font: Option<&FontVec>,
    final_dir: &Path,
) -> Result<Option<PathBuf>, Box<dyn Error>> {
    let out_path = final_dir.join(format!("{}.png", term_slug(&directive.trend)));

    match directive.decision {
        AssetDecision::Clean | AssetDecision::Meme => {
            let Some(source) = source_visual(directive, visuals) else {
                return Err("no reference visual on disk for this trend".into());
            };
            let image = image::open(&source)?;
            let mut cutout = remove_background(&image)?;
            if directive.decision == AssetDecision::Meme {
                match font {
                    Some(font) if !directive.action.is_empty() => {
                        apply_meme_text(&mut cutout, &directive.action, font);
                    }
                    Some(_) => {
                        warn!(trend = %directive.trend, "Empty caption, leaving the cutout clean")
                    }
                    None => {
                        warn!(trend = %directive.trend, "No caption font loaded, leaving the cutout clean")
                    }
                }
            }
            cutout.save(&out_path)?;
            Ok(Some(out_path))
        }
        AssetDecision::Regen => {
            let Some(client) = imagen else {
                return Err("image generation requested but no GCP credentials are configured".into());
            };
            if directive.action.is_empty() {
                return Err("regen directive carries no prompt".into());
            }
            let Some(bytes) = generate_with_backoff(client, &directive.action).await? else {
                return Ok(None);
            };
            let image = image::load_from_memory(&bytes)?;
            image.save(&out_path)?;
            Ok(Some(out_path))
        }
    }
}

/// Reference image for a directive: its 1-based SOURCE number within the
/// trend's saved visuals, falling back to the first when the number is
/// missing or out of range. Trend lookup is case-insensitive.
fn source_visual(
    directive: &AssetDirective,
    visuals: &BTreeMap<String, Vec<PathBuf>>,
) -> Option<PathBuf> {
    let needle = directive.trend.trim().to_lowercase();
    let paths = visuals
        .iter()
        .find(|(term, _)| term.trim().to_lowercase() == needle)
        .map(|(_, paths)| paths)?;
    directive
        .source_index
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| paths.get(i))
        .or_else(|| paths.first())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white_image_with_red_block(size: u32, block_at: u32, block_size: u32) -> DynamicImage {
        let mut img = RgbaImage::from_pixel(size, size, Rgba([255, 255, 255, 255]));
        for y in block_at..block_at + block_size {
            for x in block_at..block_at + block_size {
                img.put_pixel(x, y, Rgba([200, 30, 30, 255]));
            }
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn test_background_removal_crops_to_the_subject() {
        let source = white_image_with_red_block(10, 4, 3);

        let cutout = remove_background(&source).unwrap();

        assert_eq!(cutout.dimensions(), (3, 3));
        assert!(cutout.pixels().all(|p| p.0[3] == 255));
        assert_eq!(cutout.get_pixel(0, 0).0[0], 200);
    }

    #[test]
    fn test_background_removal_rejects_blank_images() {
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            8,
            Rgba([255, 255, 255, 255]),
        ));
        assert!(remove_background(&source).is_err());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // Every channel exactly at the threshold stays opaque.
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            4,
            4,
            Rgba([WHITE_THRESHOLD, WHITE_THRESHOLD, WHITE_THRESHOLD, 255]),
        ));
        let cutout = remove_background(&source).unwrap();
        assert_eq!(cutout.dimensions(), (4, 4));
    }

    #[test]
    fn test_font_loading_degrades_to_none() {
        assert!(load_font(None).is_none());
        assert!(load_font(Some("/nonexistent/font.ttf")).is_none());
    }

    fn directive(trend: &str, decision: AssetDecision, source_index: Option<usize>) -> AssetDirective {
        AssetDirective {
            trend: trend.to_string(),
            decision,
            action: "SOAK IT ALL IN".to_string(),
            source_index,
        }
    }

    #[test]
    fn test_source_visual_uses_one_based_numbering() {
        let mut visuals = BTreeMap::new();
        visuals.insert(
            "Capybara".to_string(),
            vec![PathBuf::from("raw_0.jpg"), PathBuf::from("raw_1.jpg")],
        );

        let picked = source_visual(
            &directive("capybara", AssetDecision::Clean, Some(2)),
            &visuals,
        );
        assert_eq!(picked, Some(PathBuf::from("raw_1.jpg")));

        let fallback = source_visual(
            &directive("CAPYBARA", AssetDecision::Clean, Some(9)),
            &visuals,
        );
        assert_eq!(fallback, Some(PathBuf::from("raw_0.jpg")));

        assert!(source_visual(&directive("unknown", AssetDecision::Clean, None), &visuals).is_none());
    }

    #[tokio::test]
    async fn test_meme_without_a_font_still_produces_a_cutout() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("raw_0.png");
        white_image_with_red_block(20, 6, 8).save(&source_path).unwrap();

        let mut visuals = BTreeMap::new();
        visuals.insert("capybara".to_string(), vec![source_path]);
        let directives = vec![directive("capybara", AssetDecision::Meme, Some(1))];

        let finished = process_directives(
            &directives,
            &visuals,
            None,
            None,
            dir.path().to_str().unwrap(),
        )
        .await;

        assert_eq!(finished.len(), 1);
        let saved = image::open(&finished[0]).unwrap();
        assert_eq!(saved.to_rgba8().dimensions(), (8, 8));
    }

    #[tokio::test]
    async fn test_regen_without_credentials_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let visuals = BTreeMap::new();
        let directives = vec![directive("capybara", AssetDecision::Regen, None)];

        let finished = process_directives(
            &directives,
            &visuals,
            None,
            None,
            dir.path().to_str().unwrap(),
        )
        .await;

        assert!(finished.is_empty());
    }
}
