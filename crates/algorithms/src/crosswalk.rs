//! IUCN habitat code to raster class crosswalk
//!
//! The table is read once per run from a `code,value` CSV and then shared
//! read-only between workers.
//!
//! Lookup is hierarchical. A code resolves to every value registered at the
//! code itself or at any of its descendants ("1.5" picks up "1.5.1" and
//! "1.5.2"). When neither exists, the nearest ancestor with entries stands in
//! ("1.5.2" falls back to "1.5", then "1"). A code with nothing at any level
//! is a [`Error::Crosswalk`].

use aohcalc_core::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// A dotted hierarchical IUCN habitat code such as `1.5` or `14.1`.
///
/// Components are numeric, so `"1.0"` (a spreadsheet's rendering of code 1)
/// and `"1"` are the same code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HabitatCode(Vec<u32>);

impl HabitatCode {
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text
            .trim()
            .split('.')
            .map(|p| p.trim().parse::<u32>().ok())
            .collect::<Option<Vec<u32>>>()?;
        // IUCN components start at 1, a trailing 0 is float formatting
        while parts.len() > 1 && parts.last() == Some(&0) {
            parts.pop();
        }
        if parts.is_empty() || parts[0] == 0 {
            return None;
        }
        Some(Self(parts))
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// The enclosing code, `None` for a top level code
    pub fn parent(&self) -> Option<HabitatCode> {
        (self.0.len() > 1).then(|| HabitatCode(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Whether `self` is `other` or lies below it in the hierarchy
    pub fn is_within(&self, other: &HabitatCode) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Display for HabitatCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

impl FromStr for HabitatCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        HabitatCode::parse(s).ok_or_else(|| Error::Crosswalk { code: s.to_string() })
    }
}

#[derive(Debug, Deserialize)]
struct CrosswalkRow {
    code: String,
    value: String,
}

/// Mapping from habitat codes to raster class values
#[derive(Debug, Clone, Default)]
pub struct CrosswalkTable {
    entries: BTreeMap<HabitatCode, BTreeSet<i64>>,
}

impl CrosswalkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a `code,value` CSV. Extra columns are ignored; values may be
    /// written as floats but must be whole numbers.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut table = Self::new();
        for (line, row) in csv_reader.deserialize::<CrosswalkRow>().enumerate() {
            let row = row.map_err(|e| Error::Csv(e.to_string()))?;
            // header is line 1
            let line = line + 2;
            let code = HabitatCode::parse(&row.code).ok_or_else(|| {
                Error::Csv(format!("line {}: invalid habitat code '{}'", line, row.code))
            })?;
            let value = parse_class_value(&row.value).ok_or_else(|| {
                Error::Csv(format!("line {}: invalid raster value '{}'", line, row.value))
            })?;
            table.insert(code, value);
        }
        Ok(table)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_reader(file).map_err(|e| match e {
            Error::Csv(msg) => Error::Csv(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Build from `(code, value)` pairs
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, i64)>) -> Result<Self> {
        let mut table = Self::new();
        for (code, value) in pairs {
            table.insert(code.parse()?, value);
        }
        Ok(table)
    }

    pub fn insert(&mut self, code: HabitatCode, value: i64) {
        self.entries.entry(code).or_default().insert(value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every raster value that appears in the table
    pub fn all_values(&self) -> BTreeSet<i64> {
        self.entries.values().flatten().copied().collect()
    }

    /// Values for one code: the code and its descendants, else the nearest
    /// ancestor.
    pub fn values_for_code(&self, code: &HabitatCode) -> Result<BTreeSet<i64>> {
        let subtree: BTreeSet<i64> = self
            .entries
            .range(code.clone()..)
            .take_while(|(key, _)| key.is_within(code))
            .flat_map(|(_, values)| values.iter().copied())
            .collect();
        if !subtree.is_empty() {
            return Ok(subtree);
        }

        let mut ancestor = code.parent();
        while let Some(candidate) = ancestor {
            if let Some(values) = self.entries.get(&candidate) {
                return Ok(values.clone());
            }
            ancestor = candidate.parent();
        }

        Err(Error::Crosswalk {
            code: code.to_string(),
        })
    }

    /// Union of the values of every declared code. Any unresolvable code
    /// fails the whole lookup.
    pub fn values_for<S: AsRef<str>>(&self, codes: &[S]) -> Result<BTreeSet<i64>> {
        let mut values = BTreeSet::new();
        for text in codes {
            let code: HabitatCode = text.as_ref().parse()?;
            values.extend(self.values_for_code(&code)?);
        }
        Ok(values)
    }
}

fn parse_class_value(text: &str) -> Option<i64> {
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    let v = text.parse::<f64>().ok()?;
    (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CrosswalkTable {
        CrosswalkTable::from_pairs([
            ("1", 100),
            ("1.1", 101),
            ("1.2", 102),
            ("2", 200),
            ("2.1", 201),
            ("2.2", 202),
            ("3.5", 305),
        ])
        .unwrap()
    }

    fn set(values: &[i64]) -> BTreeSet<i64> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_code_parsing() {
        assert_eq!(HabitatCode::parse("1.0"), HabitatCode::parse("1"));
        assert_eq!(HabitatCode::parse(" 14.1 ").unwrap().to_string(), "14.1");
        assert_eq!(HabitatCode::parse("5.10").unwrap().components(), &[5, 10]);
        assert!(HabitatCode::parse("").is_none());
        assert!(HabitatCode::parse("1.x").is_none());
        assert!(HabitatCode::parse("0").is_none());
        assert_eq!(
            HabitatCode::parse("1.5.2").unwrap().parent(),
            HabitatCode::parse("1.5")
        );
    }

    #[test]
    fn test_parent_subsumes_children() {
        let t = table();
        assert_eq!(t.values_for(&["1"]).unwrap(), set(&[100, 101, 102]));
        assert_eq!(t.values_for(&["1.1"]).unwrap(), set(&[101]));
        assert_eq!(t.values_for(&["1.1", "2.2"]).unwrap(), set(&[101, 202]));
        assert_eq!(t.values_for(&["2.0"]).unwrap(), set(&[200, 201, 202]));
    }

    #[test]
    fn test_child_reduces_to_ancestor() {
        let t = CrosswalkTable::from_pairs([("1.5", 15), ("1.6", 16)]).unwrap();
        assert_eq!(t.values_for(&["1.5.2"]).unwrap(), set(&[15]));
        assert_eq!(t.values_for(&["1.5.2.3"]).unwrap(), set(&[15]));
        // "1" has descendants but no entry of its own
        assert_eq!(t.values_for(&["1"]).unwrap(), set(&[15, 16]));
    }

    #[test]
    fn test_unresolvable_code_fails() {
        let t = table();
        match t.values_for(&["1.1", "4.2"]) {
            Err(Error::Crosswalk { code }) => assert_eq!(code, "4.2"),
            other => panic!("expected crosswalk error, got {:?}", other),
        }
        assert!(matches!(t.values_for(&["3.4"]), Err(Error::Crosswalk { .. })));
        assert!(matches!(t.values_for(&["junk"]), Err(Error::Crosswalk { .. })));
    }

    #[test]
    fn test_empty_code_list() {
        assert!(table().values_for::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_read_csv() {
        let text = "code,value\n1.1, 101\n1.1,102.0\n\"1.0\",100\n";
        let t = CrosswalkTable::from_reader(text.as_bytes()).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.values_for(&["1.1"]).unwrap(), set(&[101, 102]));
        assert_eq!(t.all_values(), set(&[100, 101, 102]));
    }

    #[test]
    fn test_read_csv_rejects_fractional_values() {
        let err = CrosswalkTable::from_reader("code,value\n1.1,10.5\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Csv(msg) if msg.contains("line 2")));
    }
}
