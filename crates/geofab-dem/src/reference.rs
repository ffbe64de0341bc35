//! Background (reference) DEM used to patch land not covered by LiDAR.

use crate::grid::ElevationGrid;
use crate::{DemError, Result};
use geo::{coord, Rect};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

/// GeoTIFF ModelTiepoint tag.
const MODEL_TIEPOINT_TAG: u16 = 33922;
/// GeoTIFF ModelPixelScale tag.
const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
/// GDAL no-data tag, stored as an ASCII string.
const GDAL_NODATA_TAG: u16 = 42113;

/// A coarse background raster already in the output CRS.
///
/// Reprojection is the caller's concern; this type only resamples the
/// raster onto output cell centres.
#[derive(Debug, Clone)]
pub struct ReferenceDem {
    /// Elevation data in row-major order (north to south, west to east).
    data: Vec<f32>,
    /// Width of the raster in pixels.
    width: usize,
    /// Height of the raster in pixels.
    height: usize,
    /// Outer edges of the raster.
    bounds: Rect<f64>,
    /// No-data value (elevations equal to this are treated as missing).
    no_data_value: Option<f32>,
}

impl ReferenceDem {
    /// Load a single-band GeoTIFF.
    pub fn from_geotiff<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mut decoder = Decoder::new(file)?;

        // Background rasters can be large national mosaics
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024 * 1024 * 1024;
        limits.intermediate_buffer_size = 1024 * 1024 * 1024;
        limits.ifd_value_size = 1024 * 1024 * 1024;
        decoder = decoder.with_limits(limits);

        let (width, height) = decoder.dimensions()?;
        let bounds = Self::read_geotransform(&mut decoder, width, height, path)?;
        let data = Self::decode_elevation_data(&mut decoder)?;
        let no_data_value = decoder
            .get_tag_ascii_string(Tag::Unknown(GDAL_NODATA_TAG))
            .ok()
            .and_then(|s| s.trim().trim_end_matches('\0').parse().ok());

        Ok(Self {
            data,
            width: width as usize,
            height: height as usize,
            bounds,
            no_data_value,
        })
    }

    /// Wrap an in-memory grid.
    pub fn from_grid(grid: &ElevationGrid) -> Self {
        let spec = grid.spec();
        Self {
            data: grid.values().iter().map(|v| *v as f32).collect(),
            width: spec.width,
            height: spec.height,
            bounds: spec.bounds(),
            no_data_value: None,
        }
    }

    fn read_geotransform<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
        width: u32,
        height: u32,
        path: &Path,
    ) -> Result<Rect<f64>> {
        let tiepoint = decoder.get_tag_f64_vec(Tag::Unknown(MODEL_TIEPOINT_TAG));
        let pixel_scale = decoder.get_tag_f64_vec(Tag::Unknown(MODEL_PIXEL_SCALE_TAG));

        match (tiepoint, pixel_scale) {
            (Ok(tiepoint), Ok(scale)) if tiepoint.len() >= 6 && scale.len() >= 2 => {
                // Tiepoint format: [i, j, k, x, y, z] tying pixel (i, j) to (x, y)
                let x_min = tiepoint[3] - tiepoint[0] * scale[0];
                let y_max = tiepoint[4] + tiepoint[1] * scale[1];
                Ok(Rect::new(
                    coord! { x: x_min, y: y_max - height as f64 * scale[1] },
                    coord! { x: x_min + width as f64 * scale[0], y: y_max },
                ))
            }
            _ => Err(DemError::InvalidGeoTiff(format!(
                "{} has no ModelTiepoint/ModelPixelScale tags",
                path.display()
            ))),
        }
    }

    fn decode_elevation_data<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
    ) -> Result<Vec<f32>> {
        let result = decoder.read_image()?;

        match result {
            DecodingResult::F32(data) => Ok(data),
            DecodingResult::F64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U16(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U32(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I8(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::U64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
            DecodingResult::I64(data) => Ok(data.into_iter().map(|v| v as f32).collect()),
        }
    }

    /// Outer edges of the raster.
    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    /// Dimensions in pixels.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Bilinear elevation at a coordinate, between pixel centres.
    ///
    /// Returns `None` outside the raster or if any contributing pixel is no data.
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let b = self.bounds;
        if x < b.min().x || x > b.max().x || y < b.min().y || y > b.max().y {
            return None;
        }
        let pixel_w = b.width() / self.width as f64;
        let pixel_h = b.height() / self.height as f64;

        // Continuous pixel coordinates relative to pixel centres
        let px = ((x - b.min().x) / pixel_w - 0.5).clamp(0.0, (self.width - 1) as f64);
        let py = ((b.max().y - y) / pixel_h - 0.5).clamp(0.0, (self.height - 1) as f64);

        let x0 = px.floor() as usize;
        let y0 = py.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = px - x0 as f64;
        let fy = py - y0 as f64;

        let v00 = self.pixel(x0, y0)?;
        let v10 = self.pixel(x1, y0)?;
        let v01 = self.pixel(x0, y1)?;
        let v11 = self.pixel(x1, y1)?;

        Some(
            v00 * (1.0 - fx) * (1.0 - fy)
                + v10 * fx * (1.0 - fy)
                + v01 * (1.0 - fx) * fy
                + v11 * fx * fy,
        )
    }

    fn pixel(&self, x: usize, y: usize) -> Option<f64> {
        let value = *self.data.get(y * self.width + x)?;
        if !value.is_finite() {
            return None;
        }
        if let Some(nodata) = self.no_data_value {
            if (value - nodata).abs() < 0.001 {
                return None;
            }
        }
        Some(value as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CellSource, GridSpec};
    use approx::assert_relative_eq;

    fn ramp() -> ReferenceDem {
        // 2x2 raster covering [0, 20] x [0, 20]: west column 0, east column 10
        let spec = GridSpec::covering(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 20.0, y: 20.0 }), 10.0)
            .expect("valid grid");
        let grid = ElevationGrid::from_values(spec, vec![0.0, 10.0, 0.0, 10.0], CellSource::Reference)
            .expect("grid");
        ReferenceDem::from_grid(&grid)
    }

    #[test]
    fn test_sample_at_pixel_centres() {
        let dem = ramp();
        assert_relative_eq!(dem.sample(5.0, 15.0).expect("value"), 0.0);
        assert_relative_eq!(dem.sample(15.0, 5.0).expect("value"), 10.0);
    }

    #[test]
    fn test_sample_interpolates_between_centres() {
        let dem = ramp();
        assert_relative_eq!(dem.sample(10.0, 10.0).expect("value"), 5.0, epsilon = 1e-6);
        // Clamped beyond the outermost centres
        assert_relative_eq!(dem.sample(19.0, 10.0).expect("value"), 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sample_outside_bounds() {
        assert!(ramp().sample(-1.0, 5.0).is_none());
        assert!(ramp().sample(5.0, 25.0).is_none());
    }

    #[test]
    fn test_no_data_pixel() {
        let spec = GridSpec::covering(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 2.0, y: 1.0 }), 1.0)
            .expect("valid grid");
        let grid = ElevationGrid::from_values(spec, vec![1.0, f64::NAN], CellSource::Reference)
            .expect("grid");
        let dem = ReferenceDem::from_grid(&grid);
        assert!(dem.sample(1.5, 0.5).is_none());
    }
}
