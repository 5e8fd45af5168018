//! Address rows and the buffer geometry they index into.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Top-left corner of a view inside its object layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub row: u32,
    pub col: u32,
}

impl Placement {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// One batched view's index mapping.
///
/// Each row names the probe mode, the object layer and placement it reads,
/// the exit frame it owns and the diffraction pattern its intensity lands in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressEntry {
    /// Probe-mode index.
    pub mode: u32,
    /// Object-storage layer index.
    pub object: u32,
    /// Frame index into the exit-wave buffer.
    pub exit: u32,
    /// Frame index into the diffraction-pattern buffers.
    pub pattern: u32,
    /// Sub-region of the object layer covered by this view.
    pub placement: Placement,
}

impl AddressEntry {
    /// Row with the placement at the layer origin.
    pub fn new(mode: u32, object: u32, exit: u32, pattern: u32) -> Self {
        Self {
            mode,
            object,
            exit,
            pattern,
            placement: Placement::default(),
        }
    }

    /// Same row at a different placement.
    pub fn at(self, row: u32, col: u32) -> Self {
        Self {
            placement: Placement::new(row, col),
            ..self
        }
    }

    /// Build from the fixed-width `[mode, object, exit, pattern, row, col]` layout.
    pub fn from_raw(raw: [u32; 6]) -> Self {
        Self {
            mode: raw[0],
            object: raw[1],
            exit: raw[2],
            pattern: raw[3],
            placement: Placement::new(raw[4], raw[5]),
        }
    }

    /// Inverse of [`AddressEntry::from_raw`].
    pub fn to_raw(&self) -> [u32; 6] {
        [
            self.mode,
            self.object,
            self.exit,
            self.pattern,
            self.placement.row,
            self.placement.col,
        ]
    }
}

/// Extent of the object storage. An empty extent disables object checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectExtent {
    pub layers: usize,
    pub rows: usize,
    pub cols: usize,
}

impl ObjectExtent {
    pub fn new(layers: usize, rows: usize, cols: usize) -> Self {
        Self { layers, rows, cols }
    }

    pub fn is_empty(&self) -> bool {
        self.layers == 0
    }
}

/// Buffer geometry fixed when a kernel is constructed.
///
/// The exit-wave buffer holds `n_patterns * n_modes` frames, all per-pattern
/// buffers (model, weight, measured, LLerr, LLden) hold `n_patterns` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelGeometry {
    pub n_patterns: usize,
    pub n_modes: usize,
    pub frame_rows: usize,
    pub frame_cols: usize,
    pub object: ObjectExtent,
}

impl KernelGeometry {
    pub fn new(n_patterns: usize, n_modes: usize, frame_rows: usize, frame_cols: usize) -> Self {
        Self {
            n_patterns,
            n_modes,
            frame_rows,
            frame_cols,
            object: ObjectExtent::default(),
        }
    }

    /// Same geometry with object bounds enforced on address rows.
    pub fn with_object(self, object: ObjectExtent) -> Self {
        Self { object, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_patterns == 0 {
            return Err(KernelError::InvalidGeometry {
                reason: "pattern count is zero",
            });
        }
        if self.n_modes == 0 {
            return Err(KernelError::InvalidGeometry {
                reason: "mode count is zero",
            });
        }
        if self.frame_rows == 0 || self.frame_cols == 0 {
            return Err(KernelError::InvalidGeometry {
                reason: "frame has zero pixels",
            });
        }
        // Address rows index exit frames and patterns as u32.
        let Some(exit_frames) = self.n_patterns.checked_mul(self.n_modes) else {
            return Err(KernelError::InvalidGeometry {
                reason: "exit frame count overflows usize",
            });
        };
        if exit_frames > u32::MAX as usize {
            return Err(KernelError::InvalidGeometry {
                reason: "exit frame count exceeds u32 address range",
            });
        }
        if exit_frames.checked_mul(self.frame_len()).is_none() {
            return Err(KernelError::InvalidGeometry {
                reason: "exit buffer size overflows usize",
            });
        }
        Ok(())
    }

    /// Pixels per frame.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.frame_rows * self.frame_cols
    }

    /// Frames in the exit-wave buffer.
    #[inline]
    pub fn n_exit_frames(&self) -> usize {
        self.n_patterns * self.n_modes
    }

    /// Elements in the exit-wave buffer.
    #[inline]
    pub fn exit_len(&self) -> usize {
        self.n_exit_frames() * self.frame_len()
    }

    /// Elements in a per-pattern buffer.
    #[inline]
    pub fn pattern_len(&self) -> usize {
        self.n_patterns * self.frame_len()
    }
}
