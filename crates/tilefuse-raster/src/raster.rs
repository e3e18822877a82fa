//! Single-band in-memory raster.

use crate::{RasterError, RasterGrid, Result};

/// Tolerance used when comparing a pixel value with the nodata sentinel.
const NODATA_EPSILON: f32 = 0.001;

/// Resampling kernel used when a raster is sampled off its own grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampling {
    /// Value of the pixel containing the sample point (categorical data).
    Nearest,
    /// Bilinear interpolation between the four surrounding pixel centres
    /// (continuous data such as elevations).
    #[default]
    Bilinear,
}

impl std::str::FromStr for Resampling {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" | "near" => Ok(Resampling::Nearest),
            "bilinear" => Ok(Resampling::Bilinear),
            other => Err(format!("unknown resampling method '{}'", other)),
        }
    }
}

/// A single-band f32 raster on a [`RasterGrid`].
///
/// Pixels are stored in row-major order (north to south, west to east).
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    grid: RasterGrid,
    data: Vec<f32>,
    /// No-data value (values equal to this, and NaN, are treated as missing).
    nodata: Option<f32>,
}

impl Raster {
    /// Wrap a pixel buffer.
    pub fn new(grid: RasterGrid, data: Vec<f32>, nodata: Option<f32>) -> Result<Self> {
        if data.len() != grid.len() {
            return Err(RasterError::BufferSize {
                expected: grid.len(),
                actual: data.len(),
            });
        }
        Ok(Self { grid, data, nodata })
    }

    /// A raster where every pixel is nodata.
    pub fn empty(grid: RasterGrid, nodata: f32) -> Self {
        let data = vec![nodata; grid.len()];
        Self {
            grid,
            data,
            nodata: Some(nodata),
        }
    }

    /// A raster where every pixel holds `value`.
    pub fn filled(grid: RasterGrid, value: f32, nodata: Option<f32>) -> Self {
        let data = vec![value; grid.len()];
        Self { grid, data, nodata }
    }

    /// Build a raster by evaluating `f(col, row)` for every pixel.
    pub fn from_fn<F>(grid: RasterGrid, nodata: Option<f32>, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(grid.len());
        for row in 0..grid.height {
            for col in 0..grid.width {
                data.push(f(col, row));
            }
        }
        Self { grid, data, nodata }
    }

    /// The raster's grid.
    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    /// Raw pixel values.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable raw pixel values.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consume the raster and return its pixel buffer.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// The nodata sentinel, if any.
    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    /// Value used to mark missing pixels when writing into this raster.
    pub fn nodata_or_nan(&self) -> f32 {
        self.nodata.unwrap_or(f32::NAN)
    }

    /// Whether `value` is missing under this raster's nodata convention.
    pub fn is_nodata(&self, value: f32) -> bool {
        if value.is_nan() {
            return true;
        }
        match self.nodata {
            Some(nodata) => (value - nodata).abs() < NODATA_EPSILON,
            None => false,
        }
    }

    /// Valid value at a pixel, `None` for nodata or out-of-range pixels.
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.grid.width || row >= self.grid.height {
            return None;
        }
        let value = self.data[self.grid.index(col, row)];
        (!self.is_nodata(value)).then_some(value)
    }

    /// Valid value at a row-major index.
    pub fn get_index(&self, index: usize) -> Option<f32> {
        let value = *self.data.get(index)?;
        (!self.is_nodata(value)).then_some(value)
    }

    /// Number of valid (non-nodata) pixels.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !self.is_nodata(**v)).count()
    }

    /// Whether at least one pixel holds data.
    pub fn has_data(&self) -> bool {
        self.data.iter().any(|v| !self.is_nodata(*v))
    }

    /// Sample the raster at a world coordinate in its own CRS.
    ///
    /// Returns `None` outside the raster or where no valid value is
    /// available.
    pub fn sample(&self, x: f64, y: f64, resampling: Resampling) -> Option<f32> {
        match resampling {
            Resampling::Nearest => self.sample_nearest(x, y),
            Resampling::Bilinear => self.sample_bilinear(x, y),
        }
    }

    /// Value of the pixel containing a world coordinate.
    pub fn sample_nearest(&self, x: f64, y: f64) -> Option<f32> {
        let (col, row) = self.grid.pixel_at(x, y)?;
        self.get(col, row)
    }

    /// Bilinear interpolation between the four nearest pixel centres.
    ///
    /// Falls back to the containing pixel when a neighbour is nodata, and
    /// clamps at the raster edge so the outer half pixel is still sampled.
    pub fn sample_bilinear(&self, x: f64, y: f64) -> Option<f32> {
        let nearest = self.sample_nearest(x, y)?;

        let (px, py) = self.grid.transform.world_to_pixel(x, y);
        // Shift so that integer coordinates are pixel centres
        let fx_total = (px - 0.5).max(0.0);
        let fy_total = (py - 0.5).max(0.0);
        let max_col = self.grid.width - 1;
        let max_row = self.grid.height - 1;

        let x0 = (fx_total.floor() as usize).min(max_col);
        let y0 = (fy_total.floor() as usize).min(max_row);
        let x1 = (x0 + 1).min(max_col);
        let y1 = (y0 + 1).min(max_row);

        let fx = (fx_total - x0 as f64).clamp(0.0, 1.0);
        let fy = (fy_total - y0 as f64).clamp(0.0, 1.0);

        let (v00, v10, v01, v11) = match (
            self.get(x0, y0),
            self.get(x1, y0),
            self.get(x0, y1),
            self.get(x1, y1),
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return Some(nearest),
        };

        let value = v00 as f64 * (1.0 - fx) * (1.0 - fy)
            + v10 as f64 * fx * (1.0 - fy)
            + v01 as f64 * (1.0 - fx) * fy
            + v11 as f64 * fx * fy;

        Some(value as f32)
    }
}
