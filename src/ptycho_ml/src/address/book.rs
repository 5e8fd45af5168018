//! Validated address table.

use super::segments::DestinationSegments;
use super::types::{AddressEntry, KernelGeometry};
use crate::error::{AddressField, KernelError, Result};

/// Immutable, validated table of address rows for one batch.
///
/// Every row is bounds-checked against the geometry once, at construction.
/// Kernel operations then index buffers through the book without further
/// per-row checks, after confirming the book was built for their geometry.
#[derive(Debug, Clone)]
pub struct AddressBook {
    rows: Vec<AddressEntry>,
    geometry: KernelGeometry,
    by_pattern: DestinationSegments,
    /// Pattern written through each exit frame, if any row owns it.
    exit_pattern: Vec<Option<u32>>,
}

impl AddressBook {
    /// Validate `rows` against `geometry` and build the destination segments.
    pub fn new(rows: Vec<AddressEntry>, geometry: &KernelGeometry) -> Result<Self> {
        geometry.validate()?;

        let mut exit_owner: Vec<Option<usize>> = vec![None; geometry.n_exit_frames()];
        for (index, row) in rows.iter().enumerate() {
            validate_row(index, row, geometry)?;

            let slot = &mut exit_owner[row.exit as usize];
            if let Some(first) = *slot {
                return Err(KernelError::AliasedExitWave {
                    first,
                    second: index,
                    exit: row.exit as usize,
                });
            }
            *slot = Some(index);
        }

        let keys: Vec<u32> = rows.iter().map(|row| row.pattern).collect();
        let by_pattern = DestinationSegments::build(&keys, geometry.n_patterns);

        let exit_pattern = exit_owner
            .iter()
            .map(|owner| owner.map(|index| rows[index].pattern))
            .collect();

        tracing::debug!(
            rows = rows.len(),
            patterns = by_pattern.occupied().count(),
            "address book validated"
        );

        Ok(Self {
            rows,
            geometry: *geometry,
            by_pattern,
            exit_pattern,
        })
    }

    /// Build from the fixed-width `[mode, object, exit, pattern, row, col]` layout.
    pub fn from_raw(raw: &[[u32; 6]], geometry: &KernelGeometry) -> Result<Self> {
        Self::new(
            raw.iter().copied().map(AddressEntry::from_raw).collect(),
            geometry,
        )
    }

    /// Conventional mode-major table: pattern `p`, mode `m` owns exit frame
    /// `p * n_modes + m` and reads object layer 0 at the origin.
    pub fn mode_major(geometry: &KernelGeometry) -> Result<Self> {
        geometry.validate()?;
        let n_modes = geometry.n_modes as u32;
        let rows = (0..geometry.n_patterns as u32)
            .flat_map(|pattern| {
                (0..n_modes).map(move |mode| {
                    AddressEntry::new(mode, 0, pattern * n_modes + mode, pattern)
                })
            })
            .collect();
        Self::new(rows, geometry)
    }

    pub fn rows(&self) -> &[AddressEntry] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn geometry(&self) -> &KernelGeometry {
        &self.geometry
    }

    /// Rows writing to `pattern`, in table order.
    pub fn rows_for(&self, pattern: usize) -> impl Iterator<Item = &AddressEntry> + '_ {
        self.by_pattern
            .segment(pattern)
            .iter()
            .map(move |&index| &self.rows[index as usize])
    }

    /// Whether any row writes to `pattern`.
    pub fn is_active(&self, pattern: usize) -> bool {
        !self.by_pattern.segment(pattern).is_empty()
    }

    /// Patterns referenced by at least one row, ascending.
    pub fn active_patterns(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_pattern.occupied()
    }

    /// Pattern written through exit frame `exit`.
    pub fn pattern_of_exit(&self, exit: usize) -> Option<usize> {
        self.exit_pattern
            .get(exit)
            .copied()
            .flatten()
            .map(|pattern| pattern as usize)
    }

    pub fn segments(&self) -> &DestinationSegments {
        &self.by_pattern
    }

    /// Reject a book validated for a different geometry.
    pub(crate) fn check_geometry(&self, geometry: &KernelGeometry) -> Result<()> {
        let pairs = [
            ("address book patterns", geometry.n_patterns, self.geometry.n_patterns),
            ("address book modes", geometry.n_modes, self.geometry.n_modes),
            ("address book frame rows", geometry.frame_rows, self.geometry.frame_rows),
            ("address book frame cols", geometry.frame_cols, self.geometry.frame_cols),
            ("address book object layers", geometry.object.layers, self.geometry.object.layers),
            ("address book object rows", geometry.object.rows, self.geometry.object.rows),
            ("address book object cols", geometry.object.cols, self.geometry.object.cols),
        ];
        for (buffer, expected, actual) in pairs {
            crate::error::check_len(buffer, expected, actual)?;
        }
        Ok(())
    }
}

fn validate_row(index: usize, row: &AddressEntry, geometry: &KernelGeometry) -> Result<()> {
    let out_of_bounds = |field, value: u32, extent: usize| KernelError::AddressOutOfBounds {
        row: index,
        field,
        value: value as usize,
        extent,
    };

    if row.mode as usize >= geometry.n_modes {
        return Err(out_of_bounds(AddressField::Mode, row.mode, geometry.n_modes));
    }
    if row.exit as usize >= geometry.n_exit_frames() {
        return Err(out_of_bounds(
            AddressField::Exit,
            row.exit,
            geometry.n_exit_frames(),
        ));
    }
    if row.pattern as usize >= geometry.n_patterns {
        return Err(out_of_bounds(
            AddressField::Pattern,
            row.pattern,
            geometry.n_patterns,
        ));
    }

    let object = &geometry.object;
    if object.is_empty() {
        return Ok(());
    }
    if row.object as usize >= object.layers {
        return Err(out_of_bounds(AddressField::Object, row.object, object.layers));
    }
    // The whole frame must fit inside the layer, not just its corner.
    let row_end = row.placement.row as usize + geometry.frame_rows;
    if row_end > object.rows {
        return Err(out_of_bounds(
            AddressField::PlacementRow,
            row.placement.row,
            object.rows.saturating_sub(geometry.frame_rows) + 1,
        ));
    }
    let col_end = row.placement.col as usize + geometry.frame_cols;
    if col_end > object.cols {
        return Err(out_of_bounds(
            AddressField::PlacementCol,
            row.placement.col,
            object.cols.saturating_sub(geometry.frame_cols) + 1,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ObjectExtent;

    fn geometry() -> KernelGeometry {
        KernelGeometry::new(2, 2, 2, 2)
    }

    #[test]
    fn test_mode_major_layout() {
        let book = AddressBook::mode_major(&geometry()).unwrap();
        assert_eq!(book.len(), 4);

        let exits: Vec<u32> = book.rows_for(1).map(|row| row.exit).collect();
        assert_eq!(exits, vec![2, 3]);
        assert_eq!(book.pattern_of_exit(3), Some(1));
        assert_eq!(book.active_patterns().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_rejects_pattern_out_of_bounds() {
        let rows = vec![AddressEntry::new(0, 0, 0, 0), AddressEntry::new(0, 0, 1, 2)];
        let err = AddressBook::new(rows, &geometry()).unwrap_err();
        assert_eq!(
            err,
            KernelError::AddressOutOfBounds {
                row: 1,
                field: AddressField::Pattern,
                value: 2,
                extent: 2,
            }
        );
    }

    #[test]
    fn test_rejects_mode_and_exit_out_of_bounds() {
        let bad_mode = vec![AddressEntry::new(2, 0, 0, 0)];
        assert!(matches!(
            AddressBook::new(bad_mode, &geometry()),
            Err(KernelError::AddressOutOfBounds {
                field: AddressField::Mode,
                ..
            })
        ));

        let bad_exit = vec![AddressEntry::new(0, 0, 4, 0)];
        assert!(matches!(
            AddressBook::new(bad_exit, &geometry()),
            Err(KernelError::AddressOutOfBounds {
                field: AddressField::Exit,
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_aliased_exit() {
        let rows = vec![AddressEntry::new(0, 0, 1, 0), AddressEntry::new(1, 0, 1, 1)];
        assert_eq!(
            AddressBook::new(rows, &geometry()).unwrap_err(),
            KernelError::AliasedExitWave {
                first: 0,
                second: 1,
                exit: 1
            }
        );
    }

    #[test]
    fn test_object_bounds() {
        let geometry = geometry().with_object(ObjectExtent::new(1, 4, 4));

        let inside = vec![AddressEntry::new(0, 0, 0, 0).at(2, 2)];
        assert!(AddressBook::new(inside, &geometry).is_ok());

        let past_edge = vec![AddressEntry::new(0, 0, 0, 0).at(3, 0)];
        assert!(matches!(
            AddressBook::new(past_edge, &geometry),
            Err(KernelError::AddressOutOfBounds {
                field: AddressField::PlacementRow,
                ..
            })
        ));

        let bad_layer = vec![AddressEntry::new(0, 1, 0, 0)];
        assert!(matches!(
            AddressBook::new(bad_layer, &geometry),
            Err(KernelError::AddressOutOfBounds {
                field: AddressField::Object,
                ..
            })
        ));
    }

    #[test]
    fn test_from_raw() {
        let raw = [[0, 0, 0, 1, 0, 0], [1, 0, 3, 1, 0, 0]];
        let book = AddressBook::from_raw(&raw, &geometry()).unwrap();
        assert!(!book.is_active(0));
        assert!(book.is_active(1));
        assert_eq!(book.pattern_of_exit(2), None);
    }

    #[test]
    fn test_mode_major_rejects_oversized_geometry() {
        let geometry = KernelGeometry::new(1 << 16, (1 << 16) + 1, 1, 1);
        assert!(matches!(
            AddressBook::mode_major(&geometry),
            Err(KernelError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_check_geometry() {
        let book = AddressBook::mode_major(&geometry()).unwrap();
        assert!(book.check_geometry(&geometry()).is_ok());
        assert!(matches!(
            book.check_geometry(&KernelGeometry::new(2, 2, 4, 2)),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_check_geometry_compares_object_extent() {
        let book = AddressBook::mode_major(&geometry()).unwrap();
        let bounded = geometry().with_object(ObjectExtent::new(1, 4, 4));
        assert!(matches!(
            book.check_geometry(&bounded),
            Err(KernelError::ShapeMismatch {
                buffer: "address book object layers",
                ..
            })
        ));
    }
}
