//! Native GeoTIFF reading and writing on top of the `tiff` crate
//!
//! Reads are chunk-based: only the strips or tiles intersecting a window are
//! decoded, and at most one row of chunks is cached. Writes stream Float32
//! strips top to bottom, so neither direction holds a whole raster in memory.
//!
//! Georeferencing uses ModelPixelScale + ModelTiepoint, the projection the
//! EPSG keys of the GeoKeyDirectory, and no-data the GDAL_NODATA ASCII tag.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::{GeoTiffTarget, OutputTarget, RasterSink, RasterSource};
use crate::raster::{GeoTransform, GridSpec, Raster, RasterElement, RasterInfo};
use crate::window::Window;
use ndarray::{Array2, ArrayView2};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tiff::{ColorType, TiffResult};
use tracing::{debug, warn};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Target uncompressed strip size in samples
const STRIP_SAMPLES: usize = 64 * 1024;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// A GeoTIFF opened for windowed reads.
pub struct GeoTiffReader {
    path: PathBuf,
    info: RasterInfo,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    state: Mutex<ReaderState>,
}

struct ReaderState {
    decoder: Decoder<BufReader<File>>,
    /// Chunk row the cache belongs to
    cached_row: Option<usize>,
    cache: HashMap<u32, Chunk>,
}

struct Chunk {
    width: usize,
    height: usize,
    values: Vec<f64>,
}

impl GeoTiffReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;

        let (width, height) = decoder.dimensions()?;
        match decoder.colortype()? {
            ColorType::Gray(_) => {}
            other => {
                return Err(Error::UnsupportedDataType(format!(
                    "{}: only single-band rasters are supported, found {:?}",
                    path.display(),
                    other
                )))
            }
        }

        let transform = match read_geotransform(&mut decoder)? {
            Some(t) => t,
            None => {
                warn!(path = %path.display(), "no georeferencing tags, using pixel coordinates");
                GeoTransform::default()
            }
        };
        let crs = read_crs(&mut decoder)?;
        let nodata = read_nodata(&mut decoder)?;

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let chunk_width = (chunk_width as usize).max(1);
        let chunk_height = (chunk_height as usize).max(1);
        let grid = GridSpec::new(transform, width as usize, height as usize, crs);
        debug!(
            path = %path.display(),
            width, height, chunk_width, chunk_height,
            "opened GeoTIFF"
        );

        Ok(Self {
            chunks_across: grid.width.div_ceil(chunk_width),
            path,
            info: RasterInfo::new(grid, nodata),
            chunk_width,
            chunk_height,
            state: Mutex::new(ReaderState {
                decoder,
                cached_row: None,
                cache: HashMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RasterSource for GeoTiffReader {
    fn info(&self) -> &RasterInfo {
        &self.info
    }

    fn read_window(&self, window: &Window) -> Result<Array2<f64>> {
        let grid = &self.info.grid;
        if window.col_end() > grid.width || window.row_end() > grid.height {
            return Err(Error::IndexOutOfBounds {
                row: window.row_end(),
                col: window.col_end(),
                rows: grid.height,
                cols: grid.width,
            });
        }

        let mut out = Array2::from_elem(window.shape(), f64::NAN);
        if window.is_empty() {
            return Ok(out);
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Other(format!("reader for {} is poisoned", self.path.display())))?;

        for chunk_row in window.row_offset / self.chunk_height..=(window.row_end() - 1) / self.chunk_height {
            for chunk_col in window.col_offset / self.chunk_width..=(window.col_end() - 1) / self.chunk_width {
                let index = (chunk_row * self.chunks_across + chunk_col) as u32;
                let chunk = state.chunk(index, chunk_row, self.info.nodata)?;

                let x0 = chunk_col * self.chunk_width;
                let y0 = chunk_row * self.chunk_height;
                let cols = window.col_offset.max(x0)..window.col_end().min(x0 + chunk.width);
                let rows = window.row_offset.max(y0)..window.row_end().min(y0 + chunk.height);

                for r in rows {
                    let src = &chunk.values[(r - y0) * chunk.width..];
                    for c in cols.clone() {
                        out[[r - window.row_offset, c - window.col_offset]] = src[c - x0];
                    }
                }
            }
        }
        Ok(out)
    }
}

impl ReaderState {
    fn chunk(&mut self, index: u32, chunk_row: usize, nodata: Option<f64>) -> Result<&Chunk> {
        if self.cached_row != Some(chunk_row) {
            self.cache.clear();
            self.cached_row = Some(chunk_row);
        }
        if !self.cache.contains_key(&index) {
            let (width, height) = self.decoder.chunk_data_dimensions(index);
            let values = decoded_values(self.decoder.read_chunk(index)?, nodata)?;
            let (width, height) = (width as usize, height as usize);
            if values.len() < width * height {
                return Err(Error::Tiff(format!(
                    "chunk {} holds {} samples, expected {}",
                    index,
                    values.len(),
                    width * height
                )));
            }
            self.cache.insert(index, Chunk { width, height, values });
        }
        self.cache
            .get(&index)
            .ok_or_else(|| Error::Other(format!("chunk {} missing from cache", index)))
    }
}

/// Widen decoded samples to f64, mapping the no-data value to NaN.
fn decoded_values(result: DecodingResult, nodata: Option<f64>) -> Result<Vec<f64>> {
    macro_rules! widen {
        ($buf:expr, $t:ty) => {{
            let nd: Option<$t> = nodata.and_then(|v| num_traits::cast::<f64, $t>(v));
            $buf.into_iter()
                .map(|v| if Some(v) == nd { f64::NAN } else { v as f64 })
                .collect()
        }};
    }

    Ok(match result {
        DecodingResult::U8(buf) => widen!(buf, u8),
        DecodingResult::U16(buf) => widen!(buf, u16),
        DecodingResult::U32(buf) => widen!(buf, u32),
        DecodingResult::U64(buf) => widen!(buf, u64),
        DecodingResult::I8(buf) => widen!(buf, i8),
        DecodingResult::I16(buf) => widen!(buf, i16),
        DecodingResult::I32(buf) => widen!(buf, i32),
        DecodingResult::I64(buf) => widen!(buf, i64),
        DecodingResult::F32(buf) => widen!(buf, f32),
        DecodingResult::F64(buf) => widen!(buf, f64),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(Error::UnsupportedDataType(
                "unsupported TIFF sample format".to_string(),
            ))
        }
    })
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<GeoTransform>> {
    let Some(scale) = decoder.find_tag(tag(MODEL_PIXEL_SCALE))? else {
        return Ok(None);
    };
    let Some(tiepoint) = decoder.find_tag(tag(MODEL_TIEPOINT))? else {
        return Ok(None);
    };
    let scale = scale.into_f64_vec()?;
    let tiepoint = tiepoint.into_f64_vec()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return Ok(None);
    }
    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Ok(Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1])))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<CRS>> {
    let Some(value) = decoder.find_tag(tag(GEO_KEY_DIRECTORY))? else {
        return Ok(None);
    };
    Ok(crs_from_geokeys(&value.into_u16_vec()?))
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f64>> {
    let Some(value) = decoder.find_tag(tag(GDAL_NODATA))? else {
        return Ok(None);
    };
    let text = value.into_string()?;
    let text = text.trim_matches(char::from(0)).trim();
    match text.parse::<f64>() {
        Ok(v) => Ok(Some(v)),
        Err(_) => {
            warn!(nodata = text, "ignoring unparseable GDAL_NODATA tag");
            Ok(None)
        }
    }
}

/// EPSG code from a GeoKeyDirectory: header of four shorts, then
/// (key, location, count, value) entries.
fn crs_from_geokeys(keys: &[u16]) -> Option<CRS> {
    let count = *keys.get(3)? as usize;
    let mut geographic = None;
    let mut projected = None;
    for entry in keys[4..].chunks_exact(4).take(count) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == USER_DEFINED {
            continue;
        }
        match id {
            GEOGRAPHIC_TYPE_KEY => geographic = Some(value),
            PROJECTED_CS_TYPE_KEY => projected = Some(value),
            _ => {}
        }
    }
    projected.or(geographic).map(|code| CRS::from_epsg(code as u32))
}

fn geokeys_for(crs: Option<&CRS>) -> Vec<u16> {
    let mut entries: Vec<[u16; 4]> = Vec::new();
    let code = crs.and_then(|c| c.epsg()).and_then(|e| u16::try_from(e).ok());
    match (crs, code) {
        (Some(c), Some(code)) if c.is_geographic() => {
            entries.push([GT_MODEL_TYPE_KEY, 0, 1, MODEL_TYPE_GEOGRAPHIC]);
            entries.push([GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
            entries.push([GEOGRAPHIC_TYPE_KEY, 0, 1, code]);
        }
        (Some(_), Some(code)) => {
            entries.push([GT_MODEL_TYPE_KEY, 0, 1, MODEL_TYPE_PROJECTED]);
            entries.push([GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
            entries.push([PROJECTED_CS_TYPE_KEY, 0, 1, code]);
        }
        _ => entries.push([GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA]),
    }

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}

/// Encode a Float32 GeoTIFF over `grid`, letting `fill` stream windows into it.
pub(crate) fn encode<W: Write + Seek>(
    writer: W,
    grid: &GridSpec,
    nodata: Option<f64>,
    fill: &mut dyn FnMut(&mut dyn RasterSink) -> Result<()>,
) -> Result<()> {
    let too_large = || Error::InvalidDimensions {
        width: grid.width,
        height: grid.height,
    };
    if grid.is_empty() {
        return Err(too_large());
    }
    let width = u32::try_from(grid.width).map_err(|_| too_large())?;
    let height = u32::try_from(grid.height).map_err(|_| too_large())?;
    let rows_per_strip = (STRIP_SAMPLES / grid.width).clamp(1, grid.height);

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<Gray32Float>(width, height)?;
    image.rows_per_strip(rows_per_strip as u32)?;

    let gt = &grid.transform;
    let scale = [gt.pixel_width, -gt.pixel_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    let geokeys = geokeys_for(grid.crs.as_ref());
    image.encoder().write_tag(tag(MODEL_PIXEL_SCALE), &scale[..])?;
    image.encoder().write_tag(tag(MODEL_TIEPOINT), &tiepoint[..])?;
    image.encoder().write_tag(tag(GEO_KEY_DIRECTORY), geokeys.as_slice())?;
    if let Some(nd) = nodata {
        let text = if nd.is_nan() { "nan".to_string() } else { nd.to_string() };
        image.encoder().write_tag(tag(GDAL_NODATA), text.as_str())?;
    }

    let mut write_strip = |data: &[f32]| image.write_strip(data);
    let mut sink = StripSink::new(grid.width, grid.height, rows_per_strip, &mut write_strip);
    fill(&mut sink)?;
    sink.finish()?;

    image.finish()?;
    Ok(())
}

/// Collects windows into full-width bands and emits them as TIFF strips.
///
/// Windows must arrive in row-major order; a band may be split into
/// several windows side by side.
struct StripSink<'s> {
    width: usize,
    height: usize,
    rows_per_strip: usize,
    write_strip: &'s mut dyn FnMut(&[f32]) -> TiffResult<()>,
    band: Option<Band>,
    pending: Vec<f32>,
    rows_done: usize,
}

struct Band {
    row: usize,
    height: usize,
    values: Vec<f32>,
    filled: usize,
}

impl<'s> StripSink<'s> {
    fn new(
        width: usize,
        height: usize,
        rows_per_strip: usize,
        write_strip: &'s mut dyn FnMut(&[f32]) -> TiffResult<()>,
    ) -> Self {
        Self {
            width,
            height,
            rows_per_strip,
            write_strip,
            band: None,
            pending: Vec::with_capacity(rows_per_strip * width),
            rows_done: 0,
        }
    }

    fn flush_band(&mut self, band: Band) -> Result<()> {
        self.pending.extend_from_slice(&band.values);
        self.rows_done += band.height;
        let strip_len = self.rows_per_strip * self.width;
        while self.pending.len() >= strip_len {
            (self.write_strip)(&self.pending[..strip_len])?;
            self.pending.drain(..strip_len);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        if self.band.is_some() || self.rows_done != self.height {
            return Err(Error::Other(format!(
                "GeoTIFF output incomplete: {} of {} rows written",
                self.rows_done, self.height
            )));
        }
        if !self.pending.is_empty() {
            (self.write_strip)(&self.pending)?;
            self.pending.clear();
        }
        Ok(())
    }
}

impl RasterSink for StripSink<'_> {
    fn write_window(&mut self, window: &Window, data: ArrayView2<'_, f64>) -> Result<()> {
        if data.dim() != window.shape() {
            let (er, ec) = window.shape();
            let (ar, ac) = data.dim();
            return Err(Error::SizeMismatch { er, ec, ar, ac });
        }
        if window.col_end() > self.width || window.row_end() > self.height {
            return Err(Error::IndexOutOfBounds {
                row: window.row_end(),
                col: window.col_end(),
                rows: self.height,
                cols: self.width,
            });
        }

        let continues_band = matches!(
            &self.band,
            Some(b) if b.row == window.row_offset && b.height == window.height
        );
        if !continues_band {
            if self.band.is_some() || window.row_offset != self.rows_done {
                return Err(Error::Other(format!(
                    "GeoTIFF windows must be written in row-major order, got row {} after row {}",
                    window.row_offset, self.rows_done
                )));
            }
            self.band = Some(Band {
                row: window.row_offset,
                height: window.height,
                values: vec![f32::NAN; window.height * self.width],
                filled: 0,
            });
        }

        let width = self.width;
        let complete = match self.band.as_mut() {
            Some(band) => {
                for (r, row) in data.outer_iter().enumerate() {
                    let start = r * width + window.col_offset;
                    for (dst, &v) in band.values[start..start + window.width].iter_mut().zip(row.iter()) {
                        *dst = v as f32;
                    }
                }
                band.filled += window.len();
                band.filled >= band.values.len()
            }
            None => false,
        };

        if complete {
            if let Some(band) = self.band.take() {
                self.flush_band(band)?;
            }
        }
        Ok(())
    }
}

/// Read a whole GeoTIFF into memory, no-data as NaN.
pub fn read_geotiff(path: impl AsRef<Path>) -> Result<Raster<f64>> {
    let reader = GeoTiffReader::open(path)?;
    let grid = reader.grid().clone();
    let data = reader.read_window(&Window::full(grid.width, grid.height))?;

    let mut raster = Raster::from_array(data);
    raster.set_transform(grid.transform);
    raster.set_crs(grid.crs);
    raster.set_nodata(reader.info().nodata);
    Ok(raster)
}

/// Write a raster as a Float32 GeoTIFF, replacing `path` atomically.
pub fn write_geotiff<T: RasterElement>(raster: &Raster<T>, path: impl AsRef<Path>) -> Result<()> {
    let target = GeoTiffTarget::new(path.as_ref());
    let nodata = raster.info().nodata;
    let staged = target.stage(raster.grid(), nodata, &mut |sink| {
        let grid = raster.grid();
        let all = Window::full(grid.width, grid.height);
        sink.write_window(&all, raster.read_window(&all)?.view())
    })?;
    target.commit(staged)
}
