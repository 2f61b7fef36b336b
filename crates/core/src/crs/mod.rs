//! Coordinate Reference System handling

mod transform;

pub use transform::{
    transform_between, CoordinateTransform, IdentityTransform, TransverseMercator, UtmToWgs84,
    Wgs84ToUtm,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG codes of the geographic (degree based) systems the calculator knows
const GEOGRAPHIC_EPSG: [u32; 5] = [4326, 4258, 4269, 4267, 4230];

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// EPSG code if known
    epsg: Option<u32>,
    /// WKT representation
    wkt: Option<String>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            epsg: Some(code),
            wkt: None,
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            epsg: None,
            wkt: Some(wkt.into()),
        }
    }

    /// Parse `EPSG:4326`, `epsg:32630` or a bare code
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        code.parse().ok().map(Self::from_epsg)
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Whether coordinates are longitude/latitude degrees
    pub fn is_geographic(&self) -> bool {
        if let Some(code) = self.epsg {
            return GEOGRAPHIC_EPSG.contains(&code);
        }
        self.wkt
            .as_deref()
            .map(|w| w.trim_start().starts_with("GEOGCS") || w.trim_start().starts_with("GEOGCRS"))
            .unwrap_or(false)
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }
        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            return format!("WKT:{}", &wkt[..wkt.len().min(50)]);
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}
