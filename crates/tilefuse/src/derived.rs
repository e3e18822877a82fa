//! Output products: region-clipped rasters cast to their storage type.

use crate::FusionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tilefuse_raster::{region_mask, write_geotiff, PixelData, Raster, RasterGrid, Region};

/// Nodata of f32 products.
pub const F32_NODATA: f64 = -9999.0;

/// Which product a [`DerivedRaster`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    /// Ground elevation model.
    Dem,
    /// Building heights.
    BuildingHeight,
    /// Tree canopy height.
    TreeCanopy,
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProductKind::Dem => "dem",
            ProductKind::BuildingHeight => "building-height",
            ProductKind::TreeCanopy => "tree-canopy",
        };
        f.write_str(name)
    }
}

/// Storage sample type of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDType {
    /// 8-bit unsigned, nodata 255.
    #[default]
    U8,
    /// 16-bit unsigned, nodata 65535.
    U16,
    /// 32-bit float, nodata -9999.
    F32,
}

impl OutputDType {
    /// Default nodata sentinel.
    pub fn default_nodata(self) -> f64 {
        match self {
            OutputDType::U8 => u8::MAX as f64,
            OutputDType::U16 => u16::MAX as f64,
            OutputDType::F32 => F32_NODATA,
        }
    }

    /// Largest storable value, `None` for floats.
    fn max_value(self) -> Option<f64> {
        match self {
            OutputDType::U8 => Some(u8::MAX as f64),
            OutputDType::U16 => Some(u16::MAX as f64),
            OutputDType::F32 => None,
        }
    }

    /// Check that `nodata` is storable in this type. Integer sentinels
    /// must be whole numbers inside the type range.
    pub fn check_nodata(self, nodata: f64) -> Result<(), String> {
        match self.max_value() {
            None if nodata.is_nan() || (nodata.abs() <= f32::MAX as f64) => Ok(()),
            None => Err(format!("{} does not fit in {}", nodata, self)),
            Some(_) if !nodata.is_finite() => Err(format!("{} has no {} representation", nodata, self)),
            Some(max) if nodata < 0.0 || nodata > max || nodata.fract() != 0.0 => {
                Err(format!("{} is not a whole number in 0..={} as required by {}", nodata, max, self))
            }
            Some(_) => Ok(()),
        }
    }
}

impl FromStr for OutputDType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u8" | "uint8" => Ok(OutputDType::U8),
            "u16" | "uint16" => Ok(OutputDType::U16),
            "f32" | "float32" => Ok(OutputDType::F32),
            other => Err(format!("unsupported dtype '{}' (expected uint8, uint16 or float32)", other)),
        }
    }
}

impl fmt::Display for OutputDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputDType::U8 => "uint8",
            OutputDType::U16 => "uint16",
            OutputDType::F32 => "float32",
        };
        f.write_str(name)
    }
}

/// One output product on its grid.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRaster {
    kind: ProductKind,
    grid: RasterGrid,
    pixels: PixelData,
    nodata: f64,
    dtype: OutputDType,
    valid_mask: Vec<bool>,
}

impl DerivedRaster {
    /// Clip `values` to the region and cast them to `dtype`.
    ///
    /// Pixels outside the region polygon or missing in `values` become
    /// `nodata` (the dtype default when `None`). Integer outputs are rounded
    /// and clamped to the type range; a valid value that lands on the
    /// sentinel is moved one step towards the middle of the range so that it
    /// stays distinguishable from nodata.
    pub fn encode(
        kind: ProductKind,
        values: &Raster,
        region: &Region,
        dtype: OutputDType,
        nodata: Option<f64>,
    ) -> Result<Self, FusionError> {
        let nodata = nodata.unwrap_or_else(|| dtype.default_nodata());
        dtype.check_nodata(nodata).map_err(FusionError::InvalidNodata)?;

        let grid = values.grid().clone();
        let inside = region_mask(&grid, region)?;

        let valid_mask: Vec<bool> = (0..grid.len())
            .map(|i| inside[i] && values.get_index(i).is_some())
            .collect();
        let value_at = |i: usize| if valid_mask[i] { values.get_index(i) } else { None };

        let pixels = match dtype.max_value() {
            None => PixelData::F32(
                (0..grid.len())
                    .map(|i| value_at(i).unwrap_or(nodata as f32))
                    .collect(),
            ),
            Some(max) => {
                let cast = |v: f32| {
                    let v = (v as f64).round().clamp(0.0, max);
                    if v != nodata {
                        v
                    } else if nodata > 0.0 {
                        nodata - 1.0
                    } else {
                        nodata + 1.0
                    }
                };
                match dtype {
                    OutputDType::U8 => PixelData::U8(
                        (0..grid.len())
                            .map(|i| value_at(i).map_or(nodata, cast) as u8)
                            .collect(),
                    ),
                    _ => PixelData::U16(
                        (0..grid.len())
                            .map(|i| value_at(i).map_or(nodata, cast) as u16)
                            .collect(),
                    ),
                }
            }
        };

        Ok(Self {
            kind,
            grid,
            pixels,
            nodata,
            dtype,
            valid_mask,
        })
    }

    /// Which product this is.
    pub fn kind(&self) -> ProductKind {
        self.kind
    }

    /// Pixel frame.
    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    /// Stored pixels.
    pub fn pixels(&self) -> &PixelData {
        &self.pixels
    }

    /// Nodata sentinel.
    pub fn nodata(&self) -> f64 {
        self.nodata
    }

    /// Storage type.
    pub fn dtype(&self) -> OutputDType {
        self.dtype
    }

    /// Per-pixel validity (inside the region and backed by data).
    pub fn valid_mask(&self) -> &[bool] {
        &self.valid_mask
    }

    /// Number of valid pixels.
    pub fn valid_count(&self) -> usize {
        self.valid_mask.iter().filter(|v| **v).count()
    }

    /// Stored value at a pixel, `None` where invalid.
    pub fn value(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.grid.width || row >= self.grid.height {
            return None;
        }
        let index = self.grid.index(col, row);
        if !self.valid_mask[index] {
            return None;
        }
        self.pixels.value(index)
    }

    /// Write the product as a single-band GeoTIFF.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> tilefuse_raster::Result<()> {
        write_geotiff(path, &self.grid, &self.pixels, Some(self.nodata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilefuse_raster::{Crs, GeoTransform};

    fn values(data: Vec<f32>) -> Raster {
        let grid = RasterGrid::new(
            Crs::LV95,
            GeoTransform {
                origin_x: 0.0,
                origin_y: 1.0,
                pixel_width: 1.0,
                pixel_height: 1.0,
            },
            data.len(),
            1,
        )
        .unwrap();
        Raster::new(grid, data, Some(-9999.0)).unwrap()
    }

    fn everywhere() -> Region {
        Region::from_bbox([-10.0, -10.0, 100.0, 100.0], Crs::LV95).unwrap()
    }

    #[test]
    fn test_u8_clamps_below_nodata() {
        let raster = values(vec![-3.0, 12.4, 254.6, 400.0, -9999.0]);
        let out = DerivedRaster::encode(ProductKind::TreeCanopy, &raster, &everywhere(), OutputDType::U8, None).unwrap();
        assert_eq!(out.pixels(), &PixelData::U8(vec![0, 12, 254, 254, 255]));
        assert_eq!(out.valid_count(), 4);
    }

    #[test]
    fn test_zero_nodata_frees_top_of_range() {
        let raster = values(vec![300.0, 0.0, 7.0, -9999.0]);
        let out =
            DerivedRaster::encode(ProductKind::TreeCanopy, &raster, &everywhere(), OutputDType::U8, Some(0.0)).unwrap();
        // Zero canopy is stored as 1 so it never reads back as nodata
        assert_eq!(out.pixels(), &PixelData::U8(vec![255, 1, 7, 0]));
        assert_eq!(out.valid_count(), 3);
    }

    #[test]
    fn test_valid_values_never_share_the_sentinel() {
        let raster = values(vec![0.0, 7.0, 8.0, -9999.0]);
        let out =
            DerivedRaster::encode(ProductKind::TreeCanopy, &raster, &everywhere(), OutputDType::U16, Some(7.0)).unwrap();
        assert_eq!(out.pixels(), &PixelData::U16(vec![0, 6, 8, 7]));
        match out.pixels() {
            PixelData::U16(stored) => {
                for (index, value) in stored.iter().enumerate() {
                    assert_eq!(out.valid_mask()[index], *value != 7, "pixel {}", index);
                }
            }
            other => panic!("unexpected pixels {:?}", other),
        }
    }

    #[test]
    fn test_unstorable_integer_nodata_is_rejected() {
        let raster = values(vec![0.0, 7.0, -9999.0]);
        for nodata in [-9999.0, f64::NAN, f64::INFINITY, 256.0, 2.5] {
            let result =
                DerivedRaster::encode(ProductKind::TreeCanopy, &raster, &everywhere(), OutputDType::U8, Some(nodata));
            assert!(matches!(result, Err(FusionError::InvalidNodata(_))), "nodata {}", nodata);
        }
        assert!(DerivedRaster::encode(ProductKind::Dem, &raster, &everywhere(), OutputDType::F32, Some(f64::NAN)).is_ok());
    }

    #[test]
    fn test_check_nodata() {
        assert!(OutputDType::U8.check_nodata(255.0).is_ok());
        assert!(OutputDType::U8.check_nodata(0.0).is_ok());
        assert!(OutputDType::U16.check_nodata(65535.0).is_ok());
        assert!(OutputDType::U16.check_nodata(65536.0).is_err());
        assert!(OutputDType::U8.check_nodata(-1.0).is_err());
        assert!(OutputDType::F32.check_nodata(-9999.0).is_ok());
        assert!(OutputDType::F32.check_nodata(1e300).is_err());
    }

    #[test]
    fn test_f32_keeps_fractions() {
        let raster = values(vec![1.25, -9999.0]);
        let out = DerivedRaster::encode(ProductKind::Dem, &raster, &everywhere(), OutputDType::F32, None).unwrap();
        assert_eq!(out.pixels(), &PixelData::F32(vec![1.25, -9999.0]));
        assert_eq!(out.value(0, 0), Some(1.25));
        assert_eq!(out.value(1, 0), None);
    }

    #[test]
    fn test_outside_region_is_nodata() {
        let raster = values(vec![5.0, 5.0, 5.0, 5.0]);
        let region = Region::from_bbox([0.0, 0.0, 2.0, 1.0], Crs::LV95).unwrap();
        let out = DerivedRaster::encode(ProductKind::Dem, &raster, &region, OutputDType::U16, None).unwrap();
        assert_eq!(out.pixels(), &PixelData::U16(vec![5, 5, 65535, 65535]));
    }

    #[test]
    fn test_dtype_parsing() {
        assert_eq!("float32".parse::<OutputDType>().unwrap(), OutputDType::F32);
        assert_eq!("UINT8".parse::<OutputDType>().unwrap(), OutputDType::U8);
        assert!("int64".parse::<OutputDType>().is_err());
    }
}
