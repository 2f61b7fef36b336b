//! Output targets: stage privately, promote atomically

use crate::error::{Error, Result};
use crate::io::{geotiff, GeoTiffReader, OutputTarget, RasterSink, RasterSource};
use crate::raster::{GridSpec, Raster};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Directory a file lives in, `.` for bare file names
fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Temporary file next to `path`, so promotion is a same-filesystem rename
fn staging_file(path: &Path, suffix: &str) -> Result<NamedTempFile> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir)?;
    Ok(tempfile::Builder::new()
        .prefix(".staged-")
        .suffix(suffix)
        .tempfile_in(dir)?)
}

fn promote(staged: NamedTempFile, path: &Path) -> Result<()> {
    staged.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// A GeoTIFF file on disk.
#[derive(Debug, Clone)]
pub struct GeoTiffTarget {
    path: PathBuf,
}

impl GeoTiffTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputTarget for GeoTiffTarget {
    type Staged = NamedTempFile;

    fn stage(
        &self,
        grid: &GridSpec,
        nodata: Option<f64>,
        fill: &mut dyn FnMut(&mut dyn RasterSink) -> Result<()>,
    ) -> Result<NamedTempFile> {
        let mut staged = staging_file(&self.path, ".tif")?;
        geotiff::encode(staged.as_file_mut(), grid, nodata, fill)?;
        staged.as_file_mut().sync_all()?;
        Ok(staged)
    }

    fn open_staged<'s>(&self, staged: &'s NamedTempFile) -> Result<Box<dyn RasterSource + 's>> {
        Ok(Box::new(GeoTiffReader::open(staged.path())?))
    }

    fn commit(&self, staged: NamedTempFile) -> Result<()> {
        promote(staged, &self.path)
    }
}

/// Keeps the committed raster in memory. Unwritten pixels stay NaN.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    committed: Mutex<Option<Raster<f64>>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed raster, if any
    pub fn take(&self) -> Option<Raster<f64>> {
        self.committed.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl OutputTarget for MemoryTarget {
    type Staged = Raster<f64>;

    fn stage(
        &self,
        grid: &GridSpec,
        nodata: Option<f64>,
        fill: &mut dyn FnMut(&mut dyn RasterSink) -> Result<()>,
    ) -> Result<Raster<f64>> {
        let mut raster = Raster::with_grid(grid.clone(), f64::NAN);
        raster.set_nodata(nodata);
        fill(&mut raster)?;
        Ok(raster)
    }

    fn open_staged<'s>(&self, staged: &'s Raster<f64>) -> Result<Box<dyn RasterSource + 's>> {
        Ok(Box::new(staged))
    }

    fn commit(&self, staged: Raster<f64>) -> Result<()> {
        let mut slot = self
            .committed
            .lock()
            .map_err(|_| Error::Other("memory target lock poisoned".into()))?;
        *slot = Some(staged);
        Ok(())
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut staged = staging_file(path, ".json")?;
    serde_json::to_writer_pretty(staged.as_file_mut(), value)?;
    staged.as_file_mut().write_all(b"\n")?;
    staged.as_file_mut().sync_all()?;
    promote(staged, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;
    use crate::window::Window;
    use ndarray::Array2;
    use tempfile::tempdir;

    fn grid() -> GridSpec {
        GridSpec::new(GeoTransform::new(0.0, 4.0, 1.0, -1.0), 4, 4, None)
    }

    #[test]
    fn test_failed_stage_leaves_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.tif");
        let target = GeoTiffTarget::new(&path);
        let result = target.stage(&grid(), None, &mut |_| Err(Error::Other("boom".into())));
        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_staged_output_readable_before_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.tif");
        let target = GeoTiffTarget::new(&path);
        let staged = target
            .stage(&grid(), None, &mut |sink| {
                sink.write_window(&Window::full(4, 4), Array2::from_elem((4, 4), 2.0).view())
            })
            .unwrap();
        assert!(!path.exists());

        {
            let source = target.open_staged(&staged).unwrap();
            let block = source.read_window(&Window::full(4, 4)).unwrap();
            assert_eq!(block.sum(), 32.0);
        }

        target.commit(staged).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_memory_target_commit() {
        let target = MemoryTarget::new();
        let staged = target
            .stage(&grid(), Some(-1.0), &mut |sink| {
                sink.write_window(&Window::new(0, 0, 4, 1), Array2::from_elem((1, 4), 1.0).view())
            })
            .unwrap();
        assert!(target.take().is_none());
        target.commit(staged).unwrap();

        let raster = target.take().unwrap();
        assert_eq!(raster.get(0, 3).unwrap(), 1.0);
        assert!(raster.get(1, 0).unwrap().is_nan());
    }

    #[test]
    fn test_json_written_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("m.json");
        write_json_atomic(&serde_json::json!({"b": 1, "a": 2}), &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
