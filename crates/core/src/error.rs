//! Error types for the AOH calculator

use thiserror::Error;

/// Main error type for AOH operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Inputs do not share pixel size, projection or pixel registration.
    #[error("Alignment error: {0}")]
    Alignment(String),

    /// A declared habitat code has no crosswalk entry at any ancestor level.
    #[error("Crosswalk error: habitat code {code} has no crosswalk entry at any level")]
    Crosswalk { code: String },

    /// Both or neither of a mutually exclusive input pair were given.
    #[error("Input mode error: {0}")]
    InputMode(String),

    #[error("Partition invariant violated at ({row}, {col}): class fractions sum to {sum}")]
    PartitionInvariant { row: usize, col: usize, sum: f64 },

    #[error("Species data error: {0}")]
    Species(String),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("TIFF error: {0}")]
    Tiff(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error belongs to the fatal, pre-execution class that
    /// aborts a unit before any pixel work.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::Alignment(_) | Error::Crosswalk { .. } | Error::InputMode(_) | Error::Species(_)
        )
    }
}

impl From<tiff::TiffError> for Error {
    fn from(e: tiff::TiffError) -> Self {
        Error::Tiff(e.to_string())
    }
}

impl From<geojson::Error> for Error {
    fn from(e: geojson::Error) -> Self {
        Error::GeoJson(e.to_string())
    }
}

/// Result type alias for AOH operations
pub type Result<T> = std::result::Result<T, Error>;
