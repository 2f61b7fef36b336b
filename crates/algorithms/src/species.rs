//! Species-season records
//!
//! One record drives one AOH computation: who the species is, which season,
//! its elevation preference, its declared IUCN habitat codes and its range
//! polygon in the working projection.

use aohcalc_core::vector::{read_geojson, AttributeValue, Feature};
use aohcalc_core::{Error, Result};
use geo_types::{Geometry, MultiPolygon};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// IUCN seasonal occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Resident,
    Breeding,
    Nonbreeding,
    Passage,
    Unknown,
}

impl Season {
    /// IUCN seasonal code, 1 to 5
    pub fn code(self) -> u8 {
        match self {
            Season::Resident => 1,
            Season::Breeding => 2,
            Season::Nonbreeding => 3,
            Season::Passage => 4,
            Season::Unknown => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Season::Resident),
            2 => Some(Season::Breeding),
            3 => Some(Season::Nonbreeding),
            4 => Some(Season::Passage),
            5 => Some(Season::Unknown),
            _ => None,
        }
    }

    /// Lowercase name used in output file names
    pub fn name(self) -> &'static str {
        match self {
            Season::Resident => "resident",
            Season::Breeding => "breeding",
            Season::Nonbreeding => "nonbreeding",
            Season::Passage => "passage",
            Season::Unknown => "unknown",
        }
    }

    /// Accepts codes and the spellings used by IUCN exports, e.g.
    /// "Breeding Season", "Non-Breeding Season" or "Seasonal Occurrence Uncertain".
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().to_lowercase();
        if let Ok(code) = text.parse::<i64>() {
            return Self::from_code(code);
        }
        if text.starts_with("resident") {
            Some(Season::Resident)
        } else if text.starts_with("breeding") {
            Some(Season::Breeding)
        } else if text.starts_with("non") && text.contains("breed") {
            Some(Season::Nonbreeding)
        } else if text.starts_with("pass") {
            Some(Season::Passage)
        } else if text.contains("unknown") || text.contains("uncertain") {
            Some(Season::Unknown)
        } else {
            None
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Season {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Season::parse(s).ok_or_else(|| Error::Species(format!("unrecognised season '{}'", s)))
    }
}

/// Limits for elevation tidying (Busana et al.)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TidyParams {
    pub elevation_min: f64,
    pub elevation_max: f64,
    /// Narrowest allowed elevation range
    pub min_separation: f64,
}

impl Default for TidyParams {
    fn default() -> Self {
        Self {
            elevation_min: -500.0,
            elevation_max: 9000.0,
            min_separation: 50.0,
        }
    }
}

/// One species-season's inputs to an AOH computation
#[derive(Debug, Clone)]
pub struct SpeciesRecord {
    pub id_no: i64,
    pub season: Season,
    /// Absent means no lower bound
    pub elevation_lower: Option<f64>,
    /// Absent means no upper bound
    pub elevation_upper: Option<f64>,
    /// Declared IUCN habitat codes, in declaration order without repeats
    pub full_habitat_code: Vec<String>,
    pub geometry: MultiPolygon<f64>,
}

impl SpeciesRecord {
    /// Load the single feature of a species GeoJSON file.
    pub fn from_geojson(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let features = read_geojson(path)?;
        if features.len() != 1 {
            return Err(Error::Species(format!(
                "{}: expected exactly one feature, found {}",
                path.display(),
                features.len()
            )));
        }
        let record = features
            .iter()
            .next()
            .ok_or_else(|| Error::Species(format!("{}: no feature", path.display())))
            .and_then(Self::from_feature);
        record
    }

    pub fn from_feature(feature: &Feature) -> Result<Self> {
        let id_no = feature
            .get_property("id_no")
            .and_then(AttributeValue::as_i64)
            .ok_or_else(|| Error::Species("missing or non-integer id_no".into()))?;

        let season = match feature.get_property("season") {
            Some(AttributeValue::Int(code)) => Season::from_code(*code),
            Some(AttributeValue::Float(code)) if code.fract() == 0.0 => Season::from_code(*code as i64),
            Some(AttributeValue::String(name)) => Season::parse(name),
            _ => None,
        }
        .ok_or_else(|| Error::Species(format!("species {}: missing or unrecognised season", id_no)))?;

        // whole metres, rounded down
        let elevation = |key: &str| {
            feature
                .get_property(key)
                .and_then(AttributeValue::as_f64)
                .filter(|v| v.is_finite())
                .map(f64::floor)
        };

        let geometry = match &feature.geometry {
            Some(Geometry::Polygon(p)) => MultiPolygon::new(vec![p.clone()]),
            Some(Geometry::MultiPolygon(mp)) => mp.clone(),
            Some(_) => {
                return Err(Error::Species(format!(
                    "species {}: range geometry must be a Polygon or MultiPolygon",
                    id_no
                )))
            }
            None => return Err(Error::Species(format!("species {}: range has no geometry", id_no))),
        };

        Ok(Self {
            id_no,
            season,
            elevation_lower: elevation("elevation_lower"),
            elevation_upper: elevation("elevation_upper"),
            full_habitat_code: habitat_codes(feature.get_property("full_habitat_code")),
            geometry,
        })
    }

    /// `{id_no}_{season}`, the stem of every output file for this record
    pub fn stem(&self) -> String {
        format!("{}_{}", self.id_no, self.season)
    }

    /// Elevation interval with absent bounds opened to infinity
    pub fn elevation_interval(&self) -> (f64, f64) {
        (
            self.elevation_lower.unwrap_or(f64::NEG_INFINITY),
            self.elevation_upper.unwrap_or(f64::INFINITY),
        )
    }

    /// Copy with elevation bounds cleaned up: swapped or missing bounds
    /// become the limits, bounds are clamped to the limits, and ranges
    /// narrower than `min_separation` are widened symmetrically, then shifted
    /// back inside the limits.
    pub fn tidied(&self, params: &TidyParams) -> Self {
        let (min, max) = (params.elevation_min, params.elevation_max);
        let (mut lower, mut upper) = (self.elevation_lower, self.elevation_upper);

        if let (Some(l), Some(u)) = (lower, upper) {
            if l > u {
                lower = Some(min);
                upper = Some(max);
            }
        }

        let mut lower = match lower {
            Some(l) => l,
            None => {
                if upper.is_some_and(|u| u < min) {
                    upper = Some(max);
                }
                min
            }
        };
        let mut upper = match upper {
            Some(u) => u,
            None => {
                if lower > max {
                    lower = min;
                }
                max
            }
        };

        lower = lower.max(min);
        upper = upper.min(max);

        let diff = upper - lower;
        if diff < params.min_separation {
            let adjust = ((params.min_separation - diff) / 2.0).ceil();
            lower -= adjust;
            upper += adjust;
            if lower < min {
                let shift = min - lower;
                lower += shift;
                upper += shift;
            } else if upper > max {
                let shift = upper - max;
                lower -= shift;
                upper -= shift;
            }
        }

        Self {
            elevation_lower: Some(lower),
            elevation_upper: Some(upper),
            ..self.clone()
        }
    }
}

/// Split a pipe-separated code list; null or blank means no codes.
fn habitat_codes(value: Option<&AttributeValue>) -> Vec<String> {
    let text = match value {
        Some(AttributeValue::String(s)) => s.clone(),
        Some(AttributeValue::Int(i)) => i.to_string(),
        Some(AttributeValue::Float(f)) => f.to_string(),
        _ => return Vec::new(),
    };
    let mut codes: Vec<String> = Vec::new();
    for code in text.split('|').map(str::trim).filter(|c| !c.is_empty()) {
        if !codes.iter().any(|c| c == code) {
            codes.push(code.to_string());
        }
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use aohcalc_core::vector::parse_geojson;
    use geo_types::polygon;

    fn record(lower: Option<f64>, upper: Option<f64>) -> SpeciesRecord {
        SpeciesRecord {
            id_no: 1,
            season: Season::Resident,
            elevation_lower: lower,
            elevation_upper: upper,
            full_habitat_code: vec![],
            geometry: MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)]]),
        }
    }

    #[test]
    fn test_tidy_default_limits() {
        let cases = [
            ((Some(0.0), Some(100.0)), (0.0, 100.0)),
            ((Some(0.0), Some(1.0)), (-25.0, 26.0)),
            ((None, Some(1.0)), (-500.0, 1.0)),
            ((Some(0.0), None), (0.0, 9000.0)),
            ((Some(10000.0), None), (-500.0, 9000.0)),
            ((None, Some(-600.0)), (-500.0, 9000.0)),
            ((Some(1.0), Some(0.0)), (-500.0, 9000.0)),
            ((Some(-1000.0), Some(1.0)), (-500.0, 1.0)),
            ((Some(0.0), Some(10000.0)), (0.0, 9000.0)),
            ((Some(1010.0), Some(1020.0)), (990.0, 1040.0)),
            ((Some(-500.0), Some(-490.0)), (-500.0, -450.0)),
            ((Some(-600.0), Some(-490.0)), (-500.0, -450.0)),
        ];
        for ((lower, upper), expected) in cases {
            let tidy = record(lower, upper).tidied(&TidyParams::default());
            assert_eq!(tidy.elevation_interval(), expected, "input {:?}", (lower, upper));
        }
    }

    #[test]
    fn test_tidy_custom_limits() {
        let params = TidyParams {
            elevation_min: -427.0,
            elevation_max: 8580.0,
            min_separation: 12.0,
        };
        let cases = [
            ((Some(0.0), Some(1.0)), (-6.0, 7.0)),
            ((None, Some(-600.0)), (-427.0, 8580.0)),
            ((Some(1010.0), Some(1020.0)), (1009.0, 1021.0)),
            ((Some(-600.0), Some(-490.0)), (-427.0, -414.0)),
        ];
        for ((lower, upper), expected) in cases {
            assert_eq!(record(lower, upper).tidied(&params).elevation_interval(), expected);
        }
    }

    #[test]
    fn test_untidied_bounds_are_open() {
        assert_eq!(
            record(None, Some(5.0)).elevation_interval(),
            (f64::NEG_INFINITY, 5.0)
        );
    }

    #[test]
    fn test_season_parsing() {
        assert_eq!(Season::parse("2"), Some(Season::Breeding));
        assert_eq!(Season::parse("Non-Breeding Season"), Some(Season::Nonbreeding));
        assert_eq!(Season::parse("Seasonal Occurrence Uncertain"), Some(Season::Unknown));
        assert_eq!(Season::parse("resident"), Some(Season::Resident));
        assert!("winter".parse::<Season>().is_err());
        assert_eq!(Season::Nonbreeding.to_string(), "nonbreeding");
    }

    #[test]
    fn test_record_from_feature() {
        let fc = parse_geojson(
            r#"{"type": "Feature",
                "properties": {"id_no": 123, "season": 3, "elevation_lower": null,
                               "elevation_upper": 1500, "full_habitat_code": "1.5|1.6|1.5"},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[2,0],[2,2],[0,0]]]}}"#,
        )
        .unwrap();
        let rec = SpeciesRecord::from_feature(&fc.features[0]).unwrap();
        assert_eq!(rec.id_no, 123);
        assert_eq!(rec.season, Season::Nonbreeding);
        assert_eq!(rec.elevation_lower, None);
        assert_eq!(rec.elevation_upper, Some(1500.0));
        assert_eq!(rec.full_habitat_code, vec!["1.5", "1.6"]);
        assert_eq!(rec.stem(), "123_nonbreeding");
        assert_eq!(rec.geometry.0.len(), 1);
    }

    #[test]
    fn test_elevation_bounds_are_floored_on_load() {
        let cases = [
            ("999.7", "1500.2", (999.0, 1500.0)),
            ("-10.5", "20", (-11.0, 20.0)),
            ("0.99", "49.9", (0.0, 49.0)),
        ];
        for (lower, upper, expected) in cases {
            let fc = parse_geojson(&format!(
                r#"{{"type": "Feature",
                    "properties": {{"id_no": 1, "season": 1, "elevation_lower": {}, "elevation_upper": {}}},
                    "geometry": {{"type": "Polygon", "coordinates": [[[0,0],[2,0],[2,2],[0,0]]]}}}}"#,
                lower, upper
            ))
            .unwrap();
            let rec = SpeciesRecord::from_feature(&fc.features[0]).unwrap();
            assert_eq!(rec.elevation_interval(), expected, "input {} {}", lower, upper);
        }

        // flooring happens before tidying widens a narrow range
        let fc = parse_geojson(
            r#"{"type": "Feature",
                "properties": {"id_no": 1, "season": 1, "elevation_lower": 1010.9, "elevation_upper": 1020.9},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[2,0],[2,2],[0,0]]]}}"#,
        )
        .unwrap();
        let rec = SpeciesRecord::from_feature(&fc.features[0]).unwrap();
        assert_eq!(rec.tidied(&TidyParams::default()).elevation_interval(), (990.0, 1040.0));
    }

    #[test]
    fn test_record_rejects_point_geometry() {
        let fc = parse_geojson(
            r#"{"type": "Feature", "properties": {"id_no": 1, "season": "resident"},
                "geometry": {"type": "Point", "coordinates": [0, 0]}}"#,
        )
        .unwrap();
        assert!(matches!(SpeciesRecord::from_feature(&fc.features[0]), Err(Error::Species(_))));
    }
}
