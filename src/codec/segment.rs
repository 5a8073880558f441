//! Editor-facing segments: a contiguous device pixel range or a gap run

use crate::error::ValidationError;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SEGMENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_segment_id() -> String {
    format!("seg_{}", NEXT_SEGMENT_ID.fetch_add(1, Ordering::Relaxed))
}

/// What a segment covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// `length` unlit pixels
    Gap { length: u32 },
    /// Pixels `start..=end` of one device, ascending
    DeviceRange {
        device_id: String,
        start: u32,
        end: u32,
    },
}

/// One unit of the segment editor's working list
///
/// Constructed only through [`Segment::gap`] and [`Segment::range`], so a
/// range with `start > end` or an empty gap never exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    id: String,
    kind: SegmentKind,
}

impl Segment {
    pub fn gap(length: u32) -> Result<Self, ValidationError> {
        if length == 0 {
            return Err(ValidationError::ZeroLengthGap);
        }
        Ok(Self {
            id: next_segment_id(),
            kind: SegmentKind::Gap { length },
        })
    }

    pub fn range(device_id: impl Into<String>, start: u32, end: u32) -> Result<Self, ValidationError> {
        let device_id = device_id.into();
        if start > end {
            return Err(ValidationError::InvalidRange {
                device_id,
                start,
                end,
            });
        }
        Ok(Self {
            id: next_segment_id(),
            kind: SegmentKind::DeviceRange {
                device_id,
                start,
                end,
            },
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    pub fn is_gap(&self) -> bool {
        matches!(self.kind, SegmentKind::Gap { .. })
    }

    pub fn device_id(&self) -> Option<&str> {
        match &self.kind {
            SegmentKind::DeviceRange { device_id, .. } => Some(device_id),
            SegmentKind::Gap { .. } => None,
        }
    }

    /// Number of matrix cells this segment encodes to
    pub fn len(&self) -> u32 {
        match &self.kind {
            SegmentKind::Gap { length } => *length,
            SegmentKind::DeviceRange { start, end, .. } => (end - start).saturating_add(1),
        }
    }

    /// Grow by one cell during decode. Callers guarantee contiguity.
    pub(super) fn extend(&mut self) {
        match &mut self.kind {
            SegmentKind::Gap { length } => *length += 1,
            SegmentKind::DeviceRange { end, .. } => *end += 1,
        }
    }

    /// Short human description, e.g. `Pixels 0 to 9` or `3 pixels`
    pub fn describe(&self) -> String {
        match &self.kind {
            SegmentKind::Gap { length } => format!("{} pixels", length),
            SegmentKind::DeviceRange { start, end, .. } => format!("Pixels {} to {}", start, end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed_range_rejected() {
        let err = Segment::range("A", 9, 3).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidRange {
                device_id: "A".to_string(),
                start: 9,
                end: 3
            }
        );
    }

    #[test]
    fn test_empty_gap_rejected() {
        assert_eq!(Segment::gap(0).unwrap_err(), ValidationError::ZeroLengthGap);
    }

    #[test]
    fn test_lengths() {
        assert_eq!(Segment::range("A", 4, 4).unwrap().len(), 1);
        assert_eq!(Segment::range("A", 0, 9).unwrap().len(), 10);
        assert_eq!(Segment::gap(3).unwrap().len(), 3);
    }

    #[test]
    fn test_full_width_range_saturates() {
        assert_eq!(Segment::range("A", 0, u32::MAX).unwrap().len(), u32::MAX);
        assert_eq!(Segment::range("A", 1, u32::MAX).unwrap().len(), u32::MAX);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Segment::gap(1).unwrap();
        let b = Segment::gap(1).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
