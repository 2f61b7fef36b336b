//! Cell value trait for in-memory rasters

use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// Trait for types that can be stored in a raster cell.
///
/// Every streaming computation works in `f64`; this trait is the bridge
/// between a typed in-memory raster and those `f64` windows.
pub trait RasterElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// Whether this value represents no-data
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    /// Whether this type is a floating point type
    fn is_float() -> bool;

    /// Convert to f64, mapping no-data to NaN
    fn to_window_value(self, nodata: Option<Self>) -> f64 {
        if self.is_nodata(nodata) {
            return f64::NAN;
        }
        NumCast::from(self).unwrap_or(f64::NAN)
    }

    /// Convert from f64, saturating to zero when the value is not representable
    fn from_window_value(value: f64) -> Self {
        NumCast::from(value).unwrap_or_else(Self::zero)
    }
}

macro_rules! impl_raster_element_int {
    ($t:ty) => {
        impl RasterElement for $t {
            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                nodata.is_some_and(|nd| *self == nd)
            }

            fn is_float() -> bool {
                false
            }
        }
    };
}

macro_rules! impl_raster_element_float {
    ($t:ty) => {
        impl RasterElement for $t {
            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                if self.is_nan() {
                    return true;
                }
                match nodata {
                    Some(nd) => *self == nd,
                    None => false,
                }
            }

            fn is_float() -> bool {
                true
            }

            fn from_window_value(value: f64) -> Self {
                value as $t
            }
        }
    };
}

impl_raster_element_int!(i8);
impl_raster_element_int!(i16);
impl_raster_element_int!(i32);
impl_raster_element_int!(i64);
impl_raster_element_int!(u8);
impl_raster_element_int!(u16);
impl_raster_element_int!(u32);
impl_raster_element_int!(u64);
impl_raster_element_float!(f32);
impl_raster_element_float!(f64);
