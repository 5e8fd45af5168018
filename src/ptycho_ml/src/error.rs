//! Error types for kernel operations.

use std::fmt;

use thiserror::Error;

/// Field of an address row, used to report which offset was out of bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    Mode,
    Object,
    Exit,
    Pattern,
    PlacementRow,
    PlacementCol,
}

impl fmt::Display for AddressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressField::Mode => "mode",
            AddressField::Object => "object",
            AddressField::Exit => "exit",
            AddressField::Pattern => "pattern",
            AddressField::PlacementRow => "placement row",
            AddressField::PlacementCol => "placement col",
        };
        f.write_str(name)
    }
}

/// Errors returned by kernel construction and operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("shape mismatch for {buffer}: expected {expected}, got {actual}")]
    ShapeMismatch {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("address row {row}: {field} offset {value} exceeds extent {extent}")]
    AddressOutOfBounds {
        row: usize,
        field: AddressField,
        value: usize,
        extent: usize,
    },

    #[error("address rows {first} and {second} both write exit frame {exit}")]
    AliasedExitWave {
        first: usize,
        second: usize,
        exit: usize,
    },

    #[error("invalid kernel geometry: {reason}")]
    InvalidGeometry { reason: &'static str },

    #[error("numerical degeneracy in {operation}: {detail}")]
    NumericalDegeneracy {
        operation: &'static str,
        detail: String,
    },

    #[error("failed to reserve {bytes} bytes for {buffer}")]
    ResourceExhaustion { buffer: &'static str, bytes: usize },
}

impl KernelError {
    /// Whether a host buffer could not be reserved.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, KernelError::ResourceExhaustion { .. })
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Check a buffer length against the configured geometry.
pub(crate) fn check_len(buffer: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(KernelError::ShapeMismatch {
            buffer,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_out_of_bounds() {
        let err = KernelError::AddressOutOfBounds {
            row: 3,
            field: AddressField::Pattern,
            value: 9,
            extent: 4,
        };
        assert_eq!(
            err.to_string(),
            "address row 3: pattern offset 9 exceeds extent 4"
        );
    }

    #[test]
    fn test_check_len() {
        assert!(check_len("weight", 4, 4).is_ok());
        assert_eq!(
            check_len("weight", 4, 3),
            Err(KernelError::ShapeMismatch {
                buffer: "weight",
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_resource_exhaustion_flag() {
        let err = KernelError::ResourceExhaustion {
            buffer: "imodel",
            bytes: 1 << 40,
        };
        assert!(err.is_resource_exhaustion());
        assert!(!KernelError::InvalidGeometry { reason: "x" }.is_resource_exhaustion());
    }
}
