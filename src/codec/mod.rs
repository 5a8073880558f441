//! Matrix codec - segments <-> flat engine pixel mapping
//!
//! The editor composes a virtual as an ordered list of [`Segment`]s; the
//! engine consumes a flat [`Matrix`] of cells. Both directions are single
//! linear passes. Decoding coalesces maximal contiguous runs, so
//! `encode(decode(m)) == m` for every matrix while segment boundaries of the
//! original list may merge.

mod editor;
mod segment;

pub use editor::SegmentList;
pub use segment::{Segment, SegmentKind};

use crate::error::ValidationError;
use crate::types::{Cell, MatrixCell, PhysicalDevice};
use std::collections::{HashMap, HashSet};

/// Decode a flat matrix row into maximal segments
pub fn decode(matrix: &[Cell]) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut current: Option<Segment> = None;

    for cell in matrix {
        if let Some(seg) = current.as_mut() {
            let absorbs = match (seg.kind(), cell) {
                (SegmentKind::Gap { .. }, None) => true,
                (SegmentKind::DeviceRange { device_id, end, .. }, Some(cell)) => {
                    *device_id == cell.device_id && end.checked_add(1) == Some(cell.pixel_index)
                }
                _ => false,
            };
            if absorbs {
                seg.extend();
                continue;
            }
        }

        if let Some(done) = current.take() {
            segments.push(done);
        }
        // Fresh single-cell segments are always valid
        current = match cell {
            None => Segment::gap(1).ok(),
            Some(cell) => Segment::range(cell.device_id.clone(), cell.pixel_index, cell.pixel_index).ok(),
        };
    }

    if let Some(done) = current {
        segments.push(done);
    }
    segments
}

/// Encode segments into a flat matrix row
pub fn encode(segments: &[Segment]) -> Vec<Cell> {
    let total: usize = segments.iter().map(|s| s.len() as usize).sum();
    let mut matrix = Vec::with_capacity(total);
    for segment in segments {
        match segment.kind() {
            SegmentKind::Gap { length } => {
                matrix.extend(std::iter::repeat(None).take(*length as usize));
            }
            SegmentKind::DeviceRange {
                device_id,
                start,
                end,
            } => {
                matrix.extend((*start..=*end).map(|i| Some(MatrixCell::new(device_id.clone(), i))));
            }
        }
    }
    matrix
}

/// Reject `candidate` if it claims a pixel already used by `existing`
///
/// Reports the lowest conflicting pixel of the candidate.
pub fn validate_no_overlap(existing: &[Segment], candidate: &Segment) -> Result<(), ValidationError> {
    let SegmentKind::DeviceRange {
        device_id,
        start,
        end,
    } = candidate.kind()
    else {
        return Ok(());
    };

    let mut claimed: HashSet<(&str, u32)> = HashSet::new();
    for segment in existing {
        if let SegmentKind::DeviceRange {
            device_id,
            start,
            end,
        } = segment.kind()
        {
            for i in *start..=*end {
                claimed.insert((device_id.as_str(), i));
            }
        }
    }

    for i in *start..=*end {
        if claimed.contains(&(device_id.as_str(), i)) {
            return Err(ValidationError::Overlap {
                device_id: device_id.clone(),
                pixel_index: i,
            });
        }
    }
    Ok(())
}

/// Check the matrix invariants: no duplicate cells, every pixel within its device
pub fn validate_matrix(matrix: &[Cell], devices: &[PhysicalDevice]) -> Result<(), ValidationError> {
    let counts: HashMap<&str, u32> = devices.iter().map(|d| (d.id.as_str(), d.pixel_count)).collect();
    let mut seen: HashSet<(&str, u32)> = HashSet::with_capacity(matrix.len());

    for cell in matrix.iter().flatten() {
        let pixel_count = *counts
            .get(cell.device_id.as_str())
            .ok_or_else(|| ValidationError::UnknownDevice(cell.device_id.clone()))?;
        if cell.pixel_index >= pixel_count {
            return Err(ValidationError::PixelOutOfRange {
                device_id: cell.device_id.clone(),
                pixel_index: cell.pixel_index,
                pixel_count,
            });
        }
        if !seen.insert((cell.device_id.as_str(), cell.pixel_index)) {
            return Err(ValidationError::DuplicateCell {
                device_id: cell.device_id.clone(),
                pixel_index: cell.pixel_index,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cell(device: &str, pixel: u32) -> Cell {
        Some(MatrixCell::new(device, pixel))
    }

    fn device(id: &str, pixel_count: u32) -> PhysicalDevice {
        PhysicalDevice {
            id: id.to_string(),
            name: id.to_string(),
            pixel_count,
        }
    }

    #[test]
    fn test_empty_matrix_decodes_to_nothing() {
        assert!(decode(&[]).is_empty());
        assert!(encode(&[]).is_empty());
    }

    #[test]
    fn test_decode_mixed_row() {
        let matrix = vec![cell("A", 0), cell("A", 1), None, cell("B", 3)];
        let segments = decode(&matrix);
        let kinds: Vec<_> = segments.iter().map(|s| s.kind().clone()).collect();
        assert_eq!(
            kinds,
            vec![
                SegmentKind::DeviceRange {
                    device_id: "A".to_string(),
                    start: 0,
                    end: 1
                },
                SegmentKind::Gap { length: 1 },
                SegmentKind::DeviceRange {
                    device_id: "B".to_string(),
                    start: 3,
                    end: 3
                },
            ]
        );
        assert_eq!(encode(&segments), matrix);
    }

    #[test]
    fn test_gap_runs_merge() {
        let segments = decode(&[None, None, None]);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].kind(), &SegmentKind::Gap { length: 3 });

        let three_gaps = vec![
            Segment::gap(1).unwrap(),
            Segment::gap(1).unwrap(),
            Segment::gap(1).unwrap(),
        ];
        assert_eq!(encode(&three_gaps), vec![None, None, None]);
    }

    #[test]
    fn test_descending_or_repeated_pixels_split_segments() {
        let segments = decode(&[cell("A", 3), cell("A", 2), cell("A", 2), cell("B", 3)]);
        assert_eq!(segments.len(), 4);
    }

    #[test]
    fn test_same_pixel_on_other_device_splits() {
        let segments = decode(&[cell("A", 0), cell("B", 1)]);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_overlap_reports_first_conflict() {
        let existing = vec![Segment::range("A", 0, 9).unwrap()];
        let candidate = Segment::range("A", 5, 14).unwrap();
        assert_eq!(
            validate_no_overlap(&existing, &candidate),
            Err(ValidationError::Overlap {
                device_id: "A".to_string(),
                pixel_index: 5
            })
        );
    }

    #[test]
    fn test_overlap_ignores_gaps_and_other_devices() {
        let existing = vec![Segment::range("A", 0, 9).unwrap(), Segment::gap(4).unwrap()];
        assert!(validate_no_overlap(&existing, &Segment::range("B", 0, 9).unwrap()).is_ok());
        assert!(validate_no_overlap(&existing, &Segment::range("A", 10, 12).unwrap()).is_ok());
        assert!(validate_no_overlap(&existing, &Segment::gap(2).unwrap()).is_ok());
    }

    #[test]
    fn test_validate_matrix_bounds_and_duplicates() {
        let devices = vec![device("A", 4)];
        assert!(validate_matrix(&[cell("A", 0), None, cell("A", 3)], &devices).is_ok());
        assert!(matches!(
            validate_matrix(&[cell("A", 4)], &devices),
            Err(ValidationError::PixelOutOfRange { pixel_index: 4, .. })
        ));
        assert!(matches!(
            validate_matrix(&[cell("A", 1), cell("A", 1)], &devices),
            Err(ValidationError::DuplicateCell { pixel_index: 1, .. })
        ));
        assert_eq!(
            validate_matrix(&[cell("Z", 0)], &devices),
            Err(ValidationError::UnknownDevice("Z".to_string()))
        );
    }

    fn arb_segments() -> impl Strategy<Value = Vec<Segment>> {
        // Each device range is drawn from its own disjoint block so lists never overlap.
        prop::collection::vec((0u8..3, 0u32..8, 1u32..6), 0..12).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(slot, (kind, offset, len))| match kind {
                    0 => Segment::gap(len).unwrap(),
                    k => {
                        let device = if k == 1 { "A" } else { "B" };
                        let start = slot as u32 * 32 + offset;
                        Segment::range(device, start, start + len - 1).unwrap()
                    }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_decode_then_encode_preserves_matrix(segments in arb_segments()) {
            let matrix = encode(&segments);
            let expected_len: u32 = segments.iter().map(Segment::len).sum();
            prop_assert_eq!(matrix.len() as u32, expected_len);

            let decoded = decode(&matrix);
            prop_assert!(decoded.len() <= segments.len());
            prop_assert_eq!(encode(&decoded), matrix);
        }
    }
}
