//! Preprocessor (C6): grayscale -> background correction -> threshold ->
//! morphology, producing a binary mask at ROI resolution.

use crate::error::DropError;
use crate::types::{BackgroundMethod, DetectionConfig, Frame, MorphologyOp, ThresholdMode};
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, open};
use imageproc::distance_transform::Norm;

/// Converts an interleaved RGB [`Frame`] to a single-channel grayscale image
/// using standard luminance weights.
pub fn to_grayscale(frame: &Frame) -> GrayImage {
    let mut gray = GrayImage::new(frame.width, frame.height);
    for y in 0..frame.height {
        for x in 0..frame.width {
            let idx = ((y * frame.width + x) * 3) as usize;
            let r = frame.pixels[idx] as f32;
            let g = frame.pixels[idx + 1] as f32;
            let b = frame.pixels[idx + 2] as f32;
            let luma = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
            gray.put_pixel(x, y, Luma([luma]));
        }
    }
    gray
}

/// Subtracts a static reference frame pixel-by-pixel, clamping at zero so the
/// result stays in `u8` range (background correction, static variant).
pub fn subtract_static_background(frame: &GrayImage, reference: &GrayImage) -> GrayImage {
    let (width, height) = frame.dimensions();
    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let f = frame.get_pixel(x, y).0[0] as i16;
            let r = reference.get_pixel(x, y).0[0] as i16;
            let diff = (f - r).max(0) as u8;
            out.put_pixel(x, y, Luma([diff]));
        }
    }
    out
}

/// High-pass background correction: subtracts a large-kernel Gaussian blur
/// of the frame from itself, with the kernel sized at roughly half the
/// image height (rounded odd by the Gaussian implementation's own sigma).
pub fn subtract_high_pass(frame: &GrayImage) -> GrayImage {
    let height = frame.height() as f32;
    let sigma = (height * 0.5 / 3.0).max(1.0);
    let blurred = gaussian_blur_f32(frame, sigma);

    let (width, h) = frame.dimensions();
    let mut out = GrayImage::new(width, h);
    for y in 0..h {
        for x in 0..width {
            let f = frame.get_pixel(x, y).0[0] as i16;
            let b = blurred.get_pixel(x, y).0[0] as i16;
            let diff = (f - b).max(0) as u8;
            out.put_pixel(x, y, Luma([diff]));
        }
    }
    out
}

/// Binarizes `image` to strictly {0, 255} using the configured threshold mode.
pub fn threshold(image: &GrayImage, mode: ThresholdMode, block_size: u32, constant: i16) -> GrayImage {
    match mode {
        ThresholdMode::Otsu => {
            let level = otsu_level(image);
            binarize_with_level(image, level)
        }
        ThresholdMode::Adaptive => adaptive_mean_threshold(image, block_size.max(3), constant),
    }
}

fn binarize_with_level(image: &GrayImage, level: u8) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let v = if image.get_pixel(x, y).0[0] > level { 255 } else { 0 };
            out.put_pixel(x, y, Luma([v]));
        }
    }
    out
}

fn adaptive_mean_threshold(image: &GrayImage, block_size: u32, constant: i16) -> GrayImage {
    let (width, height) = image.dimensions();
    let radius = (block_size / 2) as i64;
    let mut out = GrayImage::new(width, height);

    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut sum: u32 = 0;
            let mut count: u32 = 0;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let nx = x + dx;
                    let ny = y + dy;
                    if nx >= 0 && ny >= 0 && nx < width as i64 && ny < height as i64 {
                        sum += image.get_pixel(nx as u32, ny as u32).0[0] as u32;
                        count += 1;
                    }
                }
            }
            let mean = (sum / count.max(1)) as i16;
            let pixel = image.get_pixel(x as u32, y as u32).0[0] as i16;
            let v = if pixel > mean - constant { 255 } else { 0 };
            out.put_pixel(x as u32, y as u32, Luma([v]));
        }
    }
    out
}

/// Applies open/close/both with an approximately-elliptical structuring
/// element of `kernel_size`, using `imageproc`'s chamfer-distance morphology
/// (open = erode then dilate, close = dilate then erode).
pub fn apply_morphology(mask: &GrayImage, op: MorphologyOp, kernel_size: u32) -> GrayImage {
    let k = kernel_size.max(1) as u8;
    match op {
        MorphologyOp::Open => open(mask, Norm::LInf, k),
        MorphologyOp::Close => close(mask, Norm::LInf, k),
        MorphologyOp::Both => {
            let opened = open(mask, Norm::LInf, k);
            close(&opened, Norm::LInf, k)
        }
    }
}

/// Runs the full C6 pipeline. `reference` is required only when
/// `background_method` is `Static`.
pub fn preprocess(
    frame: &Frame,
    config: &DetectionConfig,
    reference: Option<&GrayImage>,
) -> Result<GrayImage, DropError> {
    let gray = to_grayscale(frame);

    let corrected = match config.background_method {
        BackgroundMethod::Static => {
            let reference = reference.ok_or_else(|| DropError::Pipeline {
                stage: "preprocess".into(),
                message: "static background method requires a reference frame".into(),
            })?;
            subtract_static_background(&gray, reference)
        }
        BackgroundMethod::HighPass => subtract_high_pass(&gray),
    };

    let binary = threshold(&corrected, config.threshold_mode, 11, 2);
    let cleaned = apply_morphology(&binary, config.morphology_op, config.morphology_kernel);
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Roi;

    fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(height, width, vec![value; (width * height * 3) as usize], 0, 0)
    }

    #[test]
    fn test_mask_shape_matches_roi() {
        let frame = solid_frame(20, 16, 100);
        let config = DetectionConfig::default();
        let reference = to_grayscale(&solid_frame(20, 16, 10));
        let mask = preprocess(&frame, &config, Some(&reference)).unwrap();
        assert_eq!(mask.width(), 20);
        assert_eq!(mask.height(), 16);
    }

    #[test]
    fn test_mask_is_strictly_binary() {
        let frame = solid_frame(16, 16, 128);
        let config = DetectionConfig {
            background_method: crate::types::BackgroundMethod::HighPass,
            ..DetectionConfig::default()
        };
        let mask = preprocess(&frame, &config, None).unwrap();
        for pixel in mask.pixels() {
            assert!(pixel.0[0] == 0 || pixel.0[0] == 255);
        }
    }

    #[test]
    fn test_static_background_requires_reference() {
        let frame = solid_frame(8, 8, 50);
        let config = DetectionConfig::default();
        let result = preprocess(&frame, &config, None);
        assert!(matches!(result, Err(DropError::Pipeline { .. })));
    }

    #[test]
    fn test_never_mutates_input() {
        let frame = solid_frame(8, 8, 77);
        let original_pixels = frame.pixels.clone();
        let reference = to_grayscale(&solid_frame(8, 8, 10));
        let config = DetectionConfig::default();
        let _ = preprocess(&frame, &config, Some(&reference));
        assert_eq!(frame.pixels, original_pixels);
    }

    #[test]
    fn test_roi_bounds_unaffected_by_preprocessing() {
        let roi = Roi { x: 0, y: 0, w: 16, h: 16 };
        assert!(roi.validate(16, 16).is_ok());
    }
}
