use crate::formats::{normalize, to_grid};
use anyhow::{anyhow, Result};
use ndarray::Array2;
use std::{fs::File, io::BufReader, path::Path};
use tiff::decoder::{Decoder, DecodingResult};

/// Decodes the first image of a TIFF file into a normalized height grid.
pub fn load_tiff(path: &Path) -> Result<Array2<f32>> {
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;

    let (width, height) = decoder.dimensions()?;

    let samples = match decoder.read_image()? {
        DecodingResult::U8(data) => normalize(data, 8),
        DecodingResult::U16(data) => normalize(data, 16),
        DecodingResult::U32(data) => normalize(data, 32),
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|value| value as f32).collect(),
        DecodingResult::I8(data) => normalize(data, 7),
        DecodingResult::I16(data) => normalize(data, 15),
        DecodingResult::I32(data) => normalize(data, 31),
        _ => return Err(anyhow!("Unsupported 64 bit integer height samples.")),
    };

    to_grid(samples, width as usize, height as usize)
}
