//! Single-band GeoTIFF reading and writing.
//!
//! Georeferencing is carried entirely by the file's own tags:
//! `ModelPixelScale` (33550), `ModelTiepoint` (33922), `GeoKeyDirectory`
//! (34735) and the GDAL no-data tag (42113).

use crate::{Crs, GeoTransform, Raster, RasterError, RasterGrid, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tracing::debug;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_GT_MODEL_TYPE: u16 = 1024;
const KEY_GT_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Georeferencing read from a GeoTIFF without decoding its pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTiffHeader {
    /// Pixel frame of the file.
    pub grid: RasterGrid,
    /// No-data value recorded in the file, if any.
    pub nodata: Option<f32>,
}

/// Pixel buffer in one of the supported output sample types.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    /// 8-bit unsigned integers.
    U8(Vec<u8>),
    /// 16-bit unsigned integers.
    U16(Vec<u16>),
    /// 32-bit IEEE floats.
    F32(Vec<f32>),
}

impl PixelData {
    /// Number of pixels in the buffer.
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::F32(v) => v.len(),
        }
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index` widened to f64.
    pub fn value(&self, index: usize) -> Option<f64> {
        match self {
            PixelData::U8(v) => v.get(index).map(|x| *x as f64),
            PixelData::U16(v) => v.get(index).map(|x| *x as f64),
            PixelData::F32(v) => v.get(index).map(|x| *x as f64),
        }
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    let decoder = Decoder::new(BufReader::new(file))?;

    // Allow large elevation tiles: a 1 km swissALTI3D tile at 0.5 m is
    // 2000 x 2000 f32 pixels, point-cloud rasters can be larger still.
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024; // 1 GB
    limits.intermediate_buffer_size = 1024 * 1024 * 1024; // 1 GB
    limits.ifd_value_size = 1024 * 1024 * 1024;
    Ok(decoder.with_limits(limits))
}

/// Read only the georeferencing of a GeoTIFF.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<GeoTiffHeader> {
    let path = path.as_ref();
    let mut decoder = open_decoder(path)?;
    read_header_from(&mut decoder, path)
}

/// Read a single-band GeoTIFF into memory as f32.
pub fn read_raster<P: AsRef<Path>>(path: P) -> Result<Raster> {
    let path = path.as_ref();
    let mut decoder = open_decoder(path)?;
    let header = read_header_from(&mut decoder, path)?;
    let data = decode_band(&mut decoder)?;

    debug!(
        path = %path.display(),
        width = header.grid.width,
        height = header.grid.height,
        "read GeoTIFF"
    );
    Raster::new(header.grid, data, header.nodata)
}

fn read_header_from<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<GeoTiffHeader> {
    let invalid = |reason: &str| RasterError::InvalidGeoTiff {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let (width, height) = decoder.dimensions()?;

    let tiepoint = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT))
        .map_err(|_| invalid("missing ModelTiepoint tag"))?;
    let scale = decoder
        .get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE))
        .map_err(|_| invalid("missing ModelPixelScale tag"))?;
    if tiepoint.len() < 6 || scale.len() < 2 {
        return Err(invalid("truncated ModelTiepoint or ModelPixelScale tag"));
    }

    // Tiepoint format: [i, j, k, x, y, z] where (i, j) is the raster
    // position tied to model coordinate (x, y)
    let (tie_i, tie_j) = (tiepoint[0], tiepoint[1]);
    let (tie_x, tie_y) = (tiepoint[3], tiepoint[4]);
    let transform = GeoTransform {
        origin_x: tie_x - tie_i * scale[0],
        origin_y: tie_y + tie_j * scale[1],
        pixel_width: scale[0],
        pixel_height: scale[1],
    };

    let crs = match decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY)) {
        Ok(keys) => crs_from_geo_keys(&keys)?,
        // swisstopo tiles always carry geokeys; default to the national frame
        Err(_) => Crs::LV95,
    };

    let nodata = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f32>().ok());

    let grid = RasterGrid::new(crs, transform, width as usize, height as usize)?;
    Ok(GeoTiffHeader { grid, nodata })
}

fn crs_from_geo_keys(keys: &[u16]) -> Result<Crs> {
    if keys.len() < 4 {
        return Ok(Crs::LV95);
    }
    let count = keys[3] as usize;
    let mut model_type = None;
    let mut code = None;
    for entry in keys[4..].chunks_exact(4).take(count) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        // Only inline SHORT values matter here
        if location != 0 {
            continue;
        }
        match key {
            KEY_GT_MODEL_TYPE => model_type = Some(value),
            KEY_PROJECTED_CS_TYPE | KEY_GEOGRAPHIC_TYPE => code = Some(value),
            _ => {}
        }
    }
    match (model_type, code) {
        (_, Some(code)) => Crs::from_epsg(code),
        (Some(MODEL_TYPE_GEOGRAPHIC), None) => Ok(Crs::WGS84),
        _ => Ok(Crs::LV95),
    }
}

fn geo_keys_for(crs: Crs) -> Vec<u16> {
    let (model_type, cs_key) = if crs.is_projected() {
        (MODEL_TYPE_PROJECTED, KEY_PROJECTED_CS_TYPE)
    } else {
        (MODEL_TYPE_GEOGRAPHIC, KEY_GEOGRAPHIC_TYPE)
    };
    vec![
        1, 1, 0, 3, // header: version 1.1.0, 3 keys
        KEY_GT_MODEL_TYPE, 0, 1, model_type,
        KEY_GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        cs_key, 0, 1, crs.epsg(),
    ]
}

/// Decode the first band as f32.
fn decode_band<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f32>> {
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

/// Write a single-band GeoTIFF with georeferencing and no-data tags.
pub fn write_geotiff<P: AsRef<Path>>(
    path: P,
    grid: &RasterGrid,
    pixels: &PixelData,
    nodata: Option<f64>,
) -> Result<()> {
    let path = path.as_ref();
    if pixels.len() != grid.len() {
        return Err(RasterError::BufferSize {
            expected: grid.len(),
            actual: pixels.len(),
        });
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let (width, height) = (grid.width as u32, grid.height as u32);

    match pixels {
        PixelData::U8(data) => {
            let mut image = encoder.new_image::<colortype::Gray8>(width, height)?;
            write_geo_tags(image.encoder(), grid, nodata)?;
            image.write_data(data)?;
        }
        PixelData::U16(data) => {
            let mut image = encoder.new_image::<colortype::Gray16>(width, height)?;
            write_geo_tags(image.encoder(), grid, nodata)?;
            image.write_data(data)?;
        }
        PixelData::F32(data) => {
            let mut image = encoder.new_image::<colortype::Gray32Float>(width, height)?;
            write_geo_tags(image.encoder(), grid, nodata)?;
            image.write_data(data)?;
        }
    }

    debug!(path = %path.display(), width, height, "wrote GeoTIFF");
    Ok(())
}

/// Convenience wrapper writing an f32 raster with its own nodata value.
pub fn write_raster<P: AsRef<Path>>(path: P, raster: &Raster) -> Result<()> {
    write_geotiff(
        path,
        raster.grid(),
        &PixelData::F32(raster.data().to_vec()),
        raster.nodata().map(f64::from),
    )
}

fn write_geo_tags<W, K>(
    dir: &mut tiff::encoder::DirectoryEncoder<'_, W, K>,
    grid: &RasterGrid,
    nodata: Option<f64>,
) -> Result<()>
where
    W: std::io::Write + Seek,
    K: tiff::encoder::TiffKind,
{
    let t = &grid.transform;
    let scale = [t.pixel_width, t.pixel_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &scale[..])?;
    dir.write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), &tiepoint[..])?;
    dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), &geo_keys_for(grid.crs)[..])?;
    if let Some(nodata) = nodata {
        let text = if nodata.is_nan() {
            "nan".to_string()
        } else {
            format!("{}", nodata)
        };
        dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), text.as_str())?;
    }
    Ok(())
}
