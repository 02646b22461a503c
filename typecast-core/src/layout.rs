#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::str::FromStr;

use miette::Diagnostic;
use target_lexicon::{OperatingSystem, Triple};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LayoutError {
    #[error("invalid target triple `{triple}`: {reason}")]
    #[diagnostic(code(typecast::layout::triple))]
    InvalidTriple { triple: String, reason: String },

    #[error("target `{triple}` has no known pointer width")]
    #[diagnostic(code(typecast::layout::pointer_width))]
    UnknownPointerWidth { triple: String },
}

/// Storage widths that depend on the analysed program's target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetLayout {
    pub pointer_bits: u16,
    pub long_bits: u16,
    pub long_double_bits: u16,
}

impl Default for TargetLayout {
    /// LP64 with an x87 `long double`.
    fn default() -> Self {
        Self {
            pointer_bits: 64,
            long_bits: 64,
            long_double_bits: 128,
        }
    }
}

impl TargetLayout {
    pub fn host() -> Self {
        Self::for_triple(&Triple::host()).unwrap_or_default()
    }

    pub fn from_triple(triple: &str) -> Result<Self, LayoutError> {
        let parsed = Triple::from_str(triple).map_err(|e| LayoutError::InvalidTriple {
            triple: triple.to_string(),
            reason: e.to_string(),
        })?;
        Self::for_triple(&parsed)
    }

    pub fn for_triple(triple: &Triple) -> Result<Self, LayoutError> {
        let pointer_bits = triple
            .pointer_width()
            .map_err(|()| LayoutError::UnknownPointerWidth {
                triple: triple.to_string(),
            })?
            .bits() as u16;

        // LLP64 keeps `long` at 32 bits and `long double` equal to `double`.
        // `long` is never narrower than the 32-bit `int`.
        let windows = triple.operating_system == OperatingSystem::Windows;
        let long_bits = if windows { 32 } else { pointer_bits.max(32) };
        let long_double_bits = if windows || pointer_bits < 64 { 64 } else { 128 };

        Ok(Self {
            pointer_bits,
            long_bits,
            long_double_bits,
        })
    }
}
