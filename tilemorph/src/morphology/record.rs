use std::collections::HashSet;
use std::fmt;

use super::{IsophoteSchedule, MorphologyOutput, QUANTITY_NAMES};
use crate::tile::TileId;

/// Scalar value of one output field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) if v.is_nan() => f.write_str("nan"),
            FieldValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Identification fields leading every record.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceIdentity {
    pub tile: TileId,
    /// Row index of the source in the tile catalog
    pub idx: usize,
    pub ra: f64,
    pub dec: f64,
    /// Seeing FWHM used for the PSF
    pub fwhm: f64,
}

/// Flat, ordered mapping of field name to value for one measured source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MorphologyRecord {
    fields: Vec<(String, FieldValue)>,
}

impl MorphologyRecord {
    /// Flatten an engine result.
    ///
    /// Field order: `tile, idx, ra, dec, fwhm`, the quantities in
    /// [`QUANTITY_NAMES`] order (NaN when the engine did not report one),
    /// any further quantities by name, one `aiso_*` field per isophote level,
    /// then `flag` and `flag_sersic`.
    pub fn flatten(
        identity: &SourceIdentity,
        output: &MorphologyOutput,
        schedule: &IsophoteSchedule,
    ) -> Self {
        let mut record = Self::default();
        record.push("tile", FieldValue::Text(identity.tile.to_string()));
        record.push("idx", FieldValue::Int(identity.idx as i64));
        record.push("ra", FieldValue::Float(identity.ra));
        record.push("dec", FieldValue::Float(identity.dec));
        record.push("fwhm", FieldValue::Float(identity.fwhm));

        for name in QUANTITY_NAMES {
            let value = output.quantities.get(*name).copied().unwrap_or(f64::NAN);
            record.push(name, FieldValue::Float(value));
        }

        let known: HashSet<&str> = QUANTITY_NAMES.iter().copied().collect();
        let mut extra: Vec<_> = output
            .quantities
            .iter()
            .filter(|(name, _)| !known.contains(name.as_str()))
            .collect();
        extra.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in extra {
            record.push(name, FieldValue::Float(*value));
        }

        for (name, value) in schedule
            .field_names()
            .into_iter()
            .zip(&output.isophote_asymmetry)
        {
            record.push(&name, FieldValue::Float(*value));
        }

        record.push("flag", FieldValue::Int(output.flag));
        record.push("flag_sersic", FieldValue::Int(output.flag_sersic));
        record
    }

    pub fn push(&mut self, name: &str, value: FieldValue) {
        self.fields.push((name.to_string(), value));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}
