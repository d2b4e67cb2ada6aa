//! Loading of height images.
//!
//! TIFF files are decoded with the `tiff` crate, since they commonly carry 16 bit or
//! floating point elevation data. Every other extension is handed to the `image` crate.
//! Integer samples are normalized by `2^bit_depth`, floating point samples are kept as is.

pub mod tiff;

use anyhow::{anyhow, Result};
use image::DynamicImage;
use ndarray::Array2;
use std::path::Path;

pub(crate) fn load_height_image(path: &Path) -> Result<Array2<f32>> {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("tif" | "tiff") => tiff::load_tiff(path),
        _ => load_image(path),
    }
}

fn load_image(path: &Path) -> Result<Array2<f32>> {
    let image = image::open(path)?;
    let (width, height) = (image.width() as usize, image.height() as usize);

    let samples = match image {
        DynamicImage::ImageLuma8(buffer) => normalize(buffer.into_raw(), 8),
        DynamicImage::ImageLuma16(buffer) => normalize(buffer.into_raw(), 16),
        image => normalize(image.into_luma16().into_raw(), 16),
    };

    to_grid(samples, width, height)
}

pub(crate) fn normalize<T: Into<f64>>(raw: Vec<T>, bit_depth: u32) -> Vec<f32> {
    let max_value = 2f64.powi(bit_depth as i32);

    raw.into_iter()
        .map(|value| (value.into() / max_value) as f32)
        .collect()
}

/// Reshapes row major samples into a grid, keeping the first channel of interleaved data.
pub(crate) fn to_grid(samples: Vec<f32>, width: usize, height: usize) -> Result<Array2<f32>> {
    let pixel_count = width * height;

    if pixel_count == 0 {
        return Err(anyhow!("The height image is empty."));
    }
    if samples.len() % pixel_count != 0 {
        return Err(anyhow!(
            "Expected a multiple of {pixel_count} samples, found {}.",
            samples.len()
        ));
    }

    let channel_count = samples.len() / pixel_count;
    let samples = if channel_count == 1 {
        samples
    } else {
        samples.into_iter().step_by(channel_count).collect()
    };

    Ok(Array2::from_shape_vec((height, width), samples)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn normalizes_by_bit_depth() {
        assert_eq!(normalize(vec![0u16, 32768], 16), vec![0.0, 0.5]);
        assert_eq!(normalize(vec![64u8], 8), vec![0.25]);
    }

    #[test]
    fn keeps_first_channel() {
        let grid = to_grid(vec![0.1, 9.0, 0.2, 9.0, 0.3, 9.0, 0.4, 9.0], 2, 2).unwrap();

        assert_eq!(grid[[0, 1]], 0.2);
        assert_eq!(grid[[1, 0]], 0.3);
    }

    #[test]
    fn loads_png() {
        let path = std::env::temp_dir().join("bevy_multires_terrain_height.png");
        let image = ImageBuffer::<Luma<u16>, _>::from_fn(3, 2, |x, y| Luma([(x + y * 3) as u16 * 4096]));
        image.save(&path).unwrap();

        let grid = load_height_image(&path).unwrap();

        assert_eq!(grid.dim(), (2, 3));
        assert_eq!(grid[[1, 2]], 5.0 * 4096.0 / 65536.0);
    }

    #[test]
    fn missing_file() {
        assert!(load_height_image(Path::new("does/not/exist.png")).is_err());
    }
}
