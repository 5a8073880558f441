//! Working segment list for composing or editing a virtual

use super::{decode, encode, validate_matrix, validate_no_overlap, Segment, SegmentKind};
use crate::error::ValidationError;
use crate::types::{PhysicalDevice, VirtualDevice};
use tracing::debug;

/// Ordered, overlap-free list of segments being edited
///
/// Every candidate is validated before it is admitted, so the editor can
/// report a conflict on the action that caused it rather than at save time.
#[derive(Debug, Clone)]
pub struct SegmentList {
    devices: Vec<PhysicalDevice>,
    segments: Vec<Segment>,
}

impl SegmentList {
    /// Start an empty list against the currently known physical devices
    pub fn new(devices: Vec<PhysicalDevice>) -> Self {
        Self {
            devices,
            segments: Vec::new(),
        }
    }

    /// Load an existing virtual's first row for editing
    pub fn from_virtual(virtual_device: &VirtualDevice, devices: Vec<PhysicalDevice>) -> Self {
        Self {
            devices,
            segments: decode(virtual_device.primary_row()),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total matrix length of the list
    pub fn total_len(&self) -> u32 {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Validate and append a candidate segment
    pub fn add(&mut self, candidate: Segment) -> Result<(), ValidationError> {
        if let SegmentKind::DeviceRange { device_id, end, .. } = candidate.kind() {
            let device = self
                .devices
                .iter()
                .find(|d| &d.id == device_id)
                .ok_or_else(|| ValidationError::UnknownDevice(device_id.clone()))?;
            if *end >= device.pixel_count {
                return Err(ValidationError::PixelOutOfRange {
                    device_id: device_id.clone(),
                    pixel_index: *end,
                    pixel_count: device.pixel_count,
                });
            }
        }
        validate_no_overlap(&self.segments, &candidate)?;

        debug!("Segment {} admitted ({})", candidate.id(), candidate.describe());
        self.segments.push(candidate);
        Ok(())
    }

    /// Remove a segment by id; returns whether anything was removed
    pub fn remove(&mut self, segment_id: &str) -> bool {
        let before = self.segments.len();
        self.segments.retain(|s| s.id() != segment_id);
        before != self.segments.len()
    }

    /// Move the segment at `from` to position `to` (drag reorder)
    pub fn move_segment(&mut self, from: usize, to: usize) -> bool {
        if from >= self.segments.len() || to >= self.segments.len() {
            return false;
        }
        let segment = self.segments.remove(from);
        self.segments.insert(to, segment);
        true
    }

    /// Produce the virtual to send with `add_virtual` / `update_virtual`
    pub fn build_virtual(&self, id: impl Into<String>, name: &str) -> Result<VirtualDevice, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.segments.is_empty() {
            return Err(ValidationError::NoSegments);
        }

        let row = encode(&self.segments);
        validate_matrix(&row, &self.devices)?;

        Ok(VirtualDevice {
            id: id.into(),
            name: name.to_string(),
            source_device_id: None,
            matrix: vec![row],
        })
    }
}
