// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Recognition of older calfits header schemas.
//!
//! Some axis keys were added to calfits after files were already in
//! circulation. When one of them is missing, [`COMPATIBILITY_TABLE`] says
//! what to use instead and which old format the file belongs to. In strict
//! mode nothing is defaulted and the missing key is an error.

use std::fmt::Display;

use log::warn;
use strum_macros::IntoStaticStr;

use crate::error::SchemaError;

/// The tables of a calfits file that carry axis descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum CalTable {
    #[strum(serialize = "primary")]
    Primary,

    #[strum(serialize = "FLAGS")]
    Flags,

    #[strum(serialize = "TOTQLTY")]
    TotalQuality,
}

impl CalTable {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// A historical calfits header schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyFormat {
    /// Written before reference pixels and spectral window reference values
    /// were stored.
    OldCalfits,

    /// A delay file written before the FLAGS table carried a spectral window
    /// reference value.
    OldDelayCalfits,
}

/// What to use in place of a missing key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fallback {
    /// A constant.
    Value(f64),

    /// The corresponding descriptor of the primary table.
    PrimaryAxis,
}

/// One row of the compatibility table.
#[derive(Debug, Clone, Copy)]
pub struct CompatEntry {
    /// The table the key is missing from. `None` matches any table.
    pub table: Option<CalTable>,
    /// The key without its axis number, e.g. "CRPIX".
    pub key: &'static str,
    /// The axis number. `None` matches any axis.
    pub axis: Option<usize>,
    pub fallback: Fallback,
    pub format: LegacyFormat,
}

impl CompatEntry {
    fn applies_to(&self, table: CalTable, key: &str, axis: usize) -> bool {
        self.table.map(|t| t == table).unwrap_or(true)
            && self.key == key
            && self.axis.map(|a| a == axis).unwrap_or(true)
    }
}

pub const COMPATIBILITY_TABLE: &[CompatEntry] = &[
    CompatEntry {
        table: None,
        key: "CRPIX",
        axis: None,
        fallback: Fallback::Value(1.0),
        format: LegacyFormat::OldCalfits,
    },
    // On disk the spectral windows are one-based.
    CompatEntry {
        table: Some(CalTable::Primary),
        key: "CRVAL",
        axis: Some(5),
        fallback: Fallback::Value(1.0),
        format: LegacyFormat::OldCalfits,
    },
    CompatEntry {
        table: Some(CalTable::Flags),
        key: "CRVAL",
        axis: Some(5),
        fallback: Fallback::PrimaryAxis,
        format: LegacyFormat::OldDelayCalfits,
    },
    CompatEntry {
        table: Some(CalTable::TotalQuality),
        key: "CRVAL",
        axis: Some(4),
        fallback: Fallback::PrimaryAxis,
        format: LegacyFormat::OldCalfits,
    },
];

/// A non-fatal notice that a file uses an old header schema and a key was
/// defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityWarning {
    pub file: String,
    pub table: CalTable,
    pub key: String,
    pub format: LegacyFormat,
}

impl Display for CompatibilityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.format {
            LegacyFormat::OldCalfits => "an old calfits format",
            LegacyFormat::OldDelayCalfits => "an old calfits format for delay files",
        };
        write!(
            f,
            "{} appears to be {kind} which has been deprecated (the {} table has no {}). Rewrite this file with write_calfits to ensure future compatibility.",
            self.file,
            self.table.name(),
            self.key
        )
    }
}

/// Resolves missing keys while reading a single file, collecting warnings as
/// it goes.
#[derive(Debug)]
pub(crate) struct LegacyDetector {
    file: String,
    strict: bool,
    warnings: Vec<CompatibilityWarning>,
}

impl LegacyDetector {
    pub(crate) fn new(file: String, strict: bool) -> LegacyDetector {
        LegacyDetector {
            file,
            strict,
            warnings: vec![],
        }
    }

    /// `key` (e.g. "CRPIX") for axis `axis` is missing from `table`. Get the
    /// fallback to use, or an error if there isn't one or we're strict.
    pub(crate) fn reconcile(
        &mut self,
        table: CalTable,
        key: &'static str,
        axis: usize,
    ) -> Result<Fallback, SchemaError> {
        let missing = || SchemaError::MissingKey {
            file: self.file.clone(),
            table: table.name(),
            key: format!("{key}{axis}"),
        };

        let entry = COMPATIBILITY_TABLE
            .iter()
            .find(|e| e.applies_to(table, key, axis))
            .ok_or_else(missing)?;
        if self.strict {
            return Err(missing());
        }

        let warning = CompatibilityWarning {
            file: self.file.clone(),
            table,
            key: format!("{key}{axis}"),
            format: entry.format,
        };
        warn!("{warning}");
        self.warnings.push(warning);
        Ok(entry.fallback)
    }

    pub(crate) fn into_warnings(self) -> Vec<CompatibilityWarning> {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_crpix_defaults_anywhere() {
        let mut detector = LegacyDetector::new("test.calfits".to_string(), false);
        for (table, axis) in [
            (CalTable::Primary, 2),
            (CalTable::Flags, 4),
            (CalTable::TotalQuality, 1),
        ] {
            let fallback = detector.reconcile(table, "CRPIX", axis).unwrap();
            assert_eq!(fallback, Fallback::Value(1.0));
        }
        let warnings = detector.into_warnings();
        assert_eq!(warnings.len(), 3);
        assert!(warnings
            .iter()
            .all(|w| w.format == LegacyFormat::OldCalfits));
        assert_eq!(warnings[1].key, "CRPIX4");
        assert!(warnings[0]
            .to_string()
            .starts_with("test.calfits appears to be an old calfits format"));
    }

    #[test]
    fn spw_reference_values() {
        let mut detector = LegacyDetector::new("f".to_string(), false);
        assert_eq!(
            detector.reconcile(CalTable::Primary, "CRVAL", 5).unwrap(),
            Fallback::Value(1.0)
        );
        assert_eq!(
            detector.reconcile(CalTable::Flags, "CRVAL", 5).unwrap(),
            Fallback::PrimaryAxis
        );
        assert_eq!(
            detector
                .reconcile(CalTable::TotalQuality, "CRVAL", 4)
                .unwrap(),
            Fallback::PrimaryAxis
        );
        let warnings = detector.into_warnings();
        assert_eq!(warnings[1].format, LegacyFormat::OldDelayCalfits);
        assert!(warnings[1].to_string().contains("for delay files"));
    }

    #[test]
    fn keys_outside_the_table_are_errors() {
        let mut detector = LegacyDetector::new("f".to_string(), false);
        let result = detector.reconcile(CalTable::Primary, "CRVAL", 3);
        assert!(matches!(
            result,
            Err(SchemaError::MissingKey { ref key, .. }) if key == "CRVAL3"
        ));
        assert!(detector.into_warnings().is_empty());
    }

    #[test]
    fn strict_mode_never_defaults() {
        let mut detector = LegacyDetector::new("f".to_string(), true);
        let result = detector.reconcile(CalTable::Flags, "CRPIX", 2);
        match result {
            Err(SchemaError::MissingKey { table, key, .. }) => {
                assert_eq!(table, "FLAGS");
                assert_eq!(key, "CRPIX2");
            }
            other => panic!("Expected a MissingKey error, got {other:?}"),
        }
        assert!(detector.into_warnings().is_empty());
    }
}
