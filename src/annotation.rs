//! Paint mask and markers, both in the index space of a reference volume.
//!
//! The mask is shared copy-on-write: [`AnnotationLayer::snapshot`] hands out
//! an immutable view that later edits never tear, so linked viewports can
//! composite from a snapshot while the owning viewport keeps painting.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array3, ArrayView2, Axis, s};
use web_time::SystemTime;

use crate::colormap::LabelPalette;
use crate::enums::{DisplayConvention, ViewDirection};
use crate::error::{Error, Result};
use crate::geometry::VolumeGeometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(u64);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A point landmark. Positions are physical (RAS+), so markers stay put
/// across zoom, pan and slice changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: MarkerId,
    pub position: [f32; 3],
    pub label: u16,
    pub created: SystemTime,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct AnnotationLayer {
    geometry: VolumeGeometry,
    /// Labels indexed `[z, y, x]`, 0 meaning unpainted.
    mask: Arc<Array3<u16>>,
    markers: Vec<Marker>,
    next_id: u64,
    palette: LabelPalette,
    opacity: f32,
    paintable: Option<BTreeSet<u16>>,
    selected: Option<MarkerId>,
}

impl AnnotationLayer {
    /// Empty mask aligned to `geometry`.
    pub fn new(geometry: VolumeGeometry) -> Self {
        let [nx, ny, nz] = geometry.dims;
        Self {
            mask: Arc::new(Array3::zeros((nz, ny, nx))),
            geometry,
            markers: Vec::new(),
            next_id: 0,
            palette: LabelPalette::segmentation(),
            opacity: 1.0,
            paintable: None,
            selected: None,
        }
    }

    pub fn with_palette(mut self, palette: LabelPalette) -> Self {
        self.palette = palette;
        self
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn mask(&self) -> &Array3<u16> {
        &self.mask
    }

    pub fn palette(&self) -> &LabelPalette {
        &self.palette
    }

    pub fn palette_mut(&mut self) -> &mut LabelPalette {
        &mut self.palette
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_nan() {
            0.0
        } else {
            opacity.clamp(0.0, 1.0)
        };
    }

    /// Restricts strokes to voxels that currently hold one of `labels`.
    /// `None` lets strokes overwrite anything.
    pub fn set_paintable_labels(&mut self, labels: Option<BTreeSet<u16>>) {
        self.paintable = labels;
    }

    pub fn paintable_labels(&self) -> Option<&BTreeSet<u16>> {
        self.paintable.as_ref()
    }

    fn can_overwrite(&self, current: u16) -> bool {
        self.paintable
            .as_ref()
            .is_none_or(|labels| labels.contains(&current))
    }

    /// Sets every voxel whose center lies within `radius` physical units of
    /// any stroke point to `label` (0 erases). Either the whole stroke is
    /// applied or, if any point lies outside the volume, nothing is.
    ///
    /// Returns the number of voxels that changed.
    pub fn paint_stroke(&mut self, points: &[[f32; 3]], label: u16, radius: f32) -> Result<usize> {
        let changes = self.stroke_changes(points, label, radius)?;
        apply_changes(&mut self.mask, &changes, label);
        Ok(changes.len())
    }

    fn stroke_changes(&self, points: &[[f32; 3]], label: u16, radius: f32) -> Result<Vec<[usize; 3]>> {
        if let Some(point) = points
            .iter()
            .find(|p| self.geometry.world_to_index(**p).is_none())
        {
            return Err(Error::PositionOutOfBounds(*point));
        }
        let radius = if radius.is_nan() { 0.0 } else { radius.max(0.0) };
        let r2 = radius * radius;
        let dims = self.geometry.dims;
        let spacing = self.geometry.spacing;

        let mut changes = Vec::new();
        for point in points {
            let center = self.geometry.world_to_voxel(*point);
            let bounds: [(usize, usize); 3] = std::array::from_fn(|axis| {
                let reach = radius / spacing[axis];
                let lo = (center[axis] - reach).ceil().max(0.0) as usize;
                let hi = ((center[axis] + reach).floor().max(0.0) as usize).min(dims[axis] - 1);
                (lo, hi)
            });
            for z in bounds[2].0..=bounds[2].1 {
                for y in bounds[1].0..=bounds[1].1 {
                    for x in bounds[0].0..=bounds[0].1 {
                        let d2: f32 = [x, y, z]
                            .iter()
                            .enumerate()
                            .map(|(axis, &i)| ((i as f32 - center[axis]) * spacing[axis]).powi(2))
                            .sum();
                        let current = self.mask[[z, y, x]];
                        if d2 <= r2 && current != label && self.can_overwrite(current) {
                            changes.push([x, y, z]);
                        }
                    }
                }
            }
        }
        changes.sort_unstable();
        changes.dedup();
        Ok(changes)
    }

    pub fn set_voxel(&mut self, index: [isize; 3], label: u16) -> Result<()> {
        let [x, y, z] = self.geometry.check_index(index)?;
        Arc::make_mut(&mut self.mask)[[z, y, x]] = label;
        Ok(())
    }

    pub fn label_at(&self, index: [isize; 3]) -> Result<u16> {
        let [x, y, z] = self.geometry.check_index(index)?;
        Ok(self.mask[[z, y, x]])
    }

    pub fn clear_mask(&mut self) {
        let [nx, ny, nz] = self.geometry.dims;
        self.mask = Arc::new(Array3::zeros((nz, ny, nx)));
    }

    pub fn labelled_voxel_count(&self) -> usize {
        self.mask.iter().filter(|&&label| label != 0).count()
    }

    /// Fails with [`Error::PositionOutOfBounds`] for positions outside the volume.
    pub fn add_marker(&mut self, position: [f32; 3], label: u16) -> Result<MarkerId> {
        self.check_position(position)?;
        let id = MarkerId(self.next_id);
        self.next_id += 1;
        let now = SystemTime::now();
        self.markers.push(Marker {
            id,
            position,
            label,
            created: now,
            modified: now,
        });
        Ok(id)
    }

    pub fn move_marker(&mut self, id: MarkerId, position: [f32; 3]) -> Result<()> {
        self.check_position(position)?;
        let marker = self.marker_mut(id)?;
        marker.position = position;
        marker.modified = SystemTime::now();
        Ok(())
    }

    /// Puts back a marker exactly as it was, timestamps included.
    pub(crate) fn restore_marker(&mut self, saved: Marker) -> Result<()> {
        let marker = self.marker_mut(saved.id)?;
        *marker = saved;
        Ok(())
    }

    /// Idempotent. Returns whether a marker was removed.
    pub fn delete_marker(&mut self, id: MarkerId) -> bool {
        let before = self.markers.len();
        self.markers.retain(|m| m.id != id);
        if self.selected == Some(id) {
            self.selected = None;
        }
        self.markers.len() != before
    }

    pub fn marker(&self, id: MarkerId) -> Result<&Marker> {
        self.markers
            .iter()
            .find(|m| m.id == id)
            .ok_or(Error::MarkerNotFound(id))
    }

    fn marker_mut(&mut self, id: MarkerId) -> Result<&mut Marker> {
        self.markers
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(Error::MarkerNotFound(id))
    }

    /// In creation order.
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn select_marker(&mut self, id: MarkerId) -> Result<()> {
        self.marker(id)?;
        self.selected = Some(id);
        Ok(())
    }

    pub fn selected(&self) -> Option<MarkerId> {
        self.selected
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn clear_markers(&mut self) {
        self.markers.clear();
        self.selected = None;
    }

    /// Markers whose nearest voxel lies on slice `index` of `view`.
    pub fn markers_on_slice(&self, view: ViewDirection, index: usize) -> Vec<&Marker> {
        let axis = view.slice_axis();
        self.markers
            .iter()
            .filter(|m| {
                let voxel = self.geometry.world_to_voxel(m.position);
                voxel[axis].round() == index as f32
            })
            .collect()
    }

    fn check_position(&self, position: [f32; 3]) -> Result<()> {
        match self.geometry.world_to_index(position) {
            Some(_) => Ok(()),
            None => Err(Error::PositionOutOfBounds(position)),
        }
    }

    /// Immutable copy for compositing. Shares the mask until the next edit.
    pub fn snapshot(&self) -> AnnotationSnapshot {
        AnnotationSnapshot {
            geometry: self.geometry.clone(),
            mask: Arc::clone(&self.mask),
            markers: self.markers.clone(),
            palette: self.palette.clone(),
            opacity: self.opacity,
            selected: self.selected,
        }
    }

    /// Snapshot showing `points` painted without touching this layer, used to
    /// preview a stroke that has not been committed yet.
    pub fn snapshot_with_stroke(
        &self,
        points: &[[f32; 3]],
        label: u16,
        radius: f32,
    ) -> Result<AnnotationSnapshot> {
        let changes = self.stroke_changes(points, label, radius)?;
        let mut snapshot = self.snapshot();
        apply_changes(&mut snapshot.mask, &changes, label);
        Ok(snapshot)
    }
}

fn apply_changes(mask: &mut Arc<Array3<u16>>, changes: &[[usize; 3]], label: u16) {
    if changes.is_empty() {
        return;
    }
    let mask = Arc::make_mut(mask);
    for &[x, y, z] in changes {
        mask[[z, y, x]] = label;
    }
}

/// Read-only view of an [`AnnotationLayer`] at one point in time.
#[derive(Debug, Clone)]
pub struct AnnotationSnapshot {
    geometry: VolumeGeometry,
    mask: Arc<Array3<u16>>,
    markers: Vec<Marker>,
    palette: LabelPalette,
    opacity: f32,
    selected: Option<MarkerId>,
}

impl AnnotationSnapshot {
    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn mask(&self) -> &Array3<u16> {
        &self.mask
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn palette(&self) -> &LabelPalette {
        &self.palette
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn selected(&self) -> Option<MarkerId> {
        self.selected
    }

    /// Whether both snapshots read the same mask allocation.
    pub fn shares_mask_with(&self, other: &AnnotationSnapshot) -> bool {
        Arc::ptr_eq(&self.mask, &other.mask)
    }

    /// Mask cross-section laid out like [`VolumeBuffer::oriented_slice`](crate::volume::VolumeBuffer::oriented_slice).
    pub fn oriented_mask(
        &self,
        view: ViewDirection,
        index: usize,
        convention: DisplayConvention,
    ) -> Result<ArrayView2<'_, u16>> {
        self.geometry.check_slice(view, index)?;
        let mut slice = match view {
            ViewDirection::Axial => self.mask.slice(s![index, .., ..]),
            ViewDirection::Coronal => self.mask.slice(s![.., index, ..]),
            ViewDirection::Sagittal => self.mask.slice(s![.., .., index]),
        };
        let plane = self.geometry.plane(view, convention);
        if plane.flip_v {
            slice.invert_axis(Axis(0));
        }
        if plane.flip_u {
            slice.invert_axis(Axis(1));
        }
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Orientation;

    fn layer(dims: [usize; 3]) -> AnnotationLayer {
        AnnotationLayer::new(VolumeGeometry::new(dims, [1.0; 3], Orientation::RAS).unwrap())
    }

    fn painted(layer: &AnnotationLayer) -> Vec<[usize; 3]> {
        layer
            .mask()
            .indexed_iter()
            .filter(|&(_, &label)| label != 0)
            .map(|((z, y, x), _)| [x, y, z])
            .collect()
    }

    #[test]
    fn stroke_sets_exactly_the_voxels_within_radius() {
        let mut ann = layer([5, 5, 5]);
        let changed = ann.paint_stroke(&[[2.0, 2.0, 2.0]], 3, 1.0).unwrap();
        assert_eq!(changed, 7);
        let mut expected = vec![
            [2, 2, 2],
            [1, 2, 2],
            [3, 2, 2],
            [2, 1, 2],
            [2, 3, 2],
            [2, 2, 1],
            [2, 2, 3],
        ];
        expected.sort_unstable();
        let mut got = painted(&ann);
        got.sort_unstable();
        assert_eq!(got, expected);
    }

    #[test]
    fn stroke_radius_is_physical() {
        let geometry = VolumeGeometry::new([5, 5, 5], [2.0, 1.0, 1.0], Orientation::RAS).unwrap();
        let mut ann = AnnotationLayer::new(geometry);
        // radius 1.2 reaches one voxel along y and z but none along x (2 units apart)
        ann.paint_stroke(&[[4.0, 2.0, 2.0]], 1, 1.2).unwrap();
        assert_eq!(ann.labelled_voxel_count(), 5);
        assert_eq!(ann.label_at([1, 2, 2]).unwrap(), 0);
    }

    #[test]
    fn stroke_outside_volume_changes_nothing() {
        let mut ann = layer([4, 4, 4]);
        let err = ann
            .paint_stroke(&[[1.0, 1.0, 1.0], [9.0, 1.0, 1.0]], 2, 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::PositionOutOfBounds(_)));
        assert_eq!(ann.labelled_voxel_count(), 0);
    }

    #[test]
    fn erase_and_paintable_filter() {
        let mut ann = layer([3, 1, 1]);
        ann.set_voxel([0, 0, 0], 1).unwrap();
        ann.set_voxel([1, 0, 0], 2).unwrap();
        ann.set_paintable_labels(Some(BTreeSet::from([0, 1])));
        ann.paint_stroke(&[[1.0, 0.0, 0.0]], 5, 1.0).unwrap();
        assert_eq!(ann.label_at([0, 0, 0]).unwrap(), 5);
        assert_eq!(ann.label_at([1, 0, 0]).unwrap(), 2);
        assert_eq!(ann.label_at([2, 0, 0]).unwrap(), 5);

        ann.set_paintable_labels(None);
        ann.paint_stroke(&[[1.0, 0.0, 0.0]], 0, 1.0).unwrap();
        assert_eq!(ann.labelled_voxel_count(), 0);
    }

    #[test]
    fn voxel_writes_outside_volume_are_rejected() {
        let mut ann = layer([2, 2, 2]);
        assert!(matches!(ann.set_voxel([2, 0, 0], 1), Err(Error::OutOfBounds { .. })));
        assert!(matches!(ann.label_at([0, -1, 0]), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn marker_round_trip() {
        let mut ann = layer([10, 10, 10]);
        let id = ann.add_marker([1.0, 2.0, 3.0], 4).unwrap();
        let marker = ann.marker(id).unwrap();
        assert_eq!(marker.position, [1.0, 2.0, 3.0]);
        assert_eq!(marker.label, 4);
        assert_eq!(marker.created, marker.modified);

        ann.move_marker(id, [5.0, 5.0, 5.0]).unwrap();
        assert_eq!(ann.marker(id).unwrap().position, [5.0, 5.0, 5.0]);

        assert!(ann.delete_marker(id));
        assert!(!ann.delete_marker(id));
        assert!(matches!(
            ann.move_marker(id, [1.0, 1.0, 1.0]),
            Err(Error::MarkerNotFound(_))
        ));
    }

    #[test]
    fn marker_ids_are_never_reused() {
        let mut ann = layer([4, 4, 4]);
        let a = ann.add_marker([0.0; 3], 1).unwrap();
        ann.delete_marker(a);
        let b = ann.add_marker([0.0; 3], 1).unwrap();
        assert_ne!(a, b);
        assert!(ann.add_marker([-3.0, 0.0, 0.0], 1).is_err());
    }

    #[test]
    fn selection_follows_deletion() {
        let mut ann = layer([4, 4, 4]);
        let a = ann.add_marker([1.0; 3], 1).unwrap();
        ann.select_marker(a).unwrap();
        assert_eq!(ann.selected(), Some(a));
        ann.delete_marker(a);
        assert_eq!(ann.selected(), None);
        assert!(ann.select_marker(a).is_err());
    }

    #[test]
    fn markers_on_slice_uses_nearest_voxel() {
        let mut ann = layer([4, 4, 4]);
        let a = ann.add_marker([1.0, 1.0, 2.2], 1).unwrap();
        ann.add_marker([1.0, 1.0, 0.0], 1).unwrap();
        let on_two: Vec<MarkerId> = ann
            .markers_on_slice(ViewDirection::Axial, 2)
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(on_two, vec![a]);
        assert_eq!(ann.markers_on_slice(ViewDirection::Sagittal, 1).len(), 2);
    }

    #[test]
    fn snapshots_are_copy_on_write() {
        let mut ann = layer([3, 3, 3]);
        let before = ann.snapshot();
        let again = ann.snapshot();
        assert!(before.shares_mask_with(&again));

        ann.set_voxel([1, 1, 1], 2).unwrap();
        let after = ann.snapshot();
        assert!(!before.shares_mask_with(&after));
        assert_eq!(before.mask()[[1, 1, 1]], 0);
        assert_eq!(after.mask()[[1, 1, 1]], 2);
    }

    #[test]
    fn stroke_preview_leaves_layer_untouched() {
        let ann = layer([3, 3, 3]);
        let preview = ann.snapshot_with_stroke(&[[1.0, 1.0, 1.0]], 1, 0.0).unwrap();
        assert_eq!(preview.mask()[[1, 1, 1]], 1);
        assert_eq!(ann.labelled_voxel_count(), 0);
    }
}
