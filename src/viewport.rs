//! The object a host GUI drives: owns the layer stack, the active annotation
//! layer and the view state, turns pointer gestures into edits and hands
//! everything to a [`SliceCompositor`] on [`Viewport::render`].
//!
//! Gestures follow a small state machine. Every gesture starts from and ends
//! in [`Interaction::Idle`]; starting one while another is active fails with
//! [`Error::GestureInProgress`]. Cancelling restores the state the gesture
//! started from. Paint strokes are only written to the mask on
//! [`Viewport::end_gesture`], so a cancelled stroke never leaves a trace.

use std::fmt;

use image::RgbaImage;

use crate::annotation::{AnnotationLayer, AnnotationSnapshot, Marker, MarkerId};
use crate::compositor::{SliceCompositor, ViewState};
use crate::config::ViewerConfig;
use crate::enums::ViewDirection;
use crate::error::{Error, Result};
use crate::geometry::VolumeGeometry;
use crate::layer::{Layer, LayerId, LayerStack};
use crate::transfer::Window;

/// What changed, passed to the host's redraw callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedrawReason {
    Slice,
    View,
    Layers,
    Annotation,
    Markers,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Idle,
    /// Physical stroke points collected so far, densified.
    Painting {
        label: u16,
        radius: f32,
        points: Vec<[f32; 3]>,
    },
    /// The marker as it was when the drag started.
    DraggingMarker { original: Marker },
    Panning { start: [f32; 2] },
    Zooming { start: f32 },
}

impl Interaction {
    pub fn name(&self) -> &'static str {
        match self {
            Interaction::Idle => "idle",
            Interaction::Painting { .. } => "painting",
            Interaction::DraggingMarker { .. } => "marker drag",
            Interaction::Panning { .. } => "panning",
            Interaction::Zooming { .. } => "zooming",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Interaction::Idle)
    }
}

/// What lies under the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorReadout {
    pub voxel: [usize; 3],
    /// RAS+ physical position of the voxel center.
    pub world: [f32; 3],
    /// Raw value of every visible layer, bottom first. NaN where a layer
    /// does not cover the position.
    pub values: Vec<f32>,
}

impl fmt::Display for CursorReadout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.voxel;
        write!(f, "x {x:3} y {y:3} z {z:3}  ")?;
        for (value, (pos, neg)) in self.world.iter().zip([('R', 'L'), ('A', 'P'), ('S', 'I')]) {
            let code = if *value < 0.0 { neg } else { pos };
            write!(f, " {code} {:4.1}", value.abs())?;
        }
        let values: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(f, "  [{}]", values.join(", "))
    }
}

type RedrawCallback = Box<dyn FnMut(RedrawReason) + Send>;

pub struct Viewport {
    config: ViewerConfig,
    compositor: SliceCompositor,
    layers: LayerStack,
    annotation: Option<AnnotationLayer>,
    linked: Option<AnnotationSnapshot>,
    state: ViewState,
    interaction: Interaction,
    on_redraw: Option<RedrawCallback>,
}

impl Viewport {
    pub fn new(config: ViewerConfig, view: ViewDirection, width: u32, height: u32) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            compositor: SliceCompositor::new(&config),
            config,
            layers: LayerStack::new(),
            annotation: None,
            linked: None,
            state: ViewState::new(view, width, height),
            interaction: Interaction::Idle,
            on_redraw: None,
        })
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    /// Called after every state change that needs a new frame.
    pub fn set_redraw_callback<F>(&mut self, callback: F)
    where
        F: FnMut(RedrawReason) + Send + 'static,
    {
        self.on_redraw = Some(Box::new(callback));
    }

    fn notify(&mut self, reason: RedrawReason) {
        if let Some(callback) = self.on_redraw.as_mut() {
            callback(reason);
        }
    }

    pub fn render(&self) -> RgbaImage {
        let annotation = self.annotation_snapshot();
        self.compositor
            .composite(&self.state, &self.layers, annotation.as_ref())
    }

    /// Geometry that slice indices and cursor positions refer to: the
    /// bottom visible layer, else the annotation layer.
    pub fn reference_geometry(&self) -> Option<&VolumeGeometry> {
        self.layers
            .reference()
            .map(|entry| entry.layer.volume().geometry())
            .or_else(|| self.annotation.as_ref().map(AnnotationLayer::geometry))
            .or_else(|| self.linked.as_ref().map(AnnotationSnapshot::geometry))
    }

    /// Number of slices along the current view direction.
    pub fn slice_extent(&self) -> usize {
        self.reference_geometry()
            .map_or(0, |geometry| geometry.slice_extent(self.state.view))
    }

    fn center_slice(&mut self) {
        self.state.slice_index = self.slice_extent() / 2;
    }

    pub fn set_view(&mut self, view: ViewDirection) {
        self.state.view = view;
        self.center_slice();
        self.notify(RedrawReason::View);
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.state.width = width;
        self.state.height = height;
        self.notify(RedrawReason::View);
    }

    pub fn goto_slice(&mut self, index: usize) -> Result<()> {
        let extent = self.slice_extent();
        if index >= extent {
            return Err(Error::SliceIndexOutOfRange {
                view: self.state.view,
                index,
                extent,
            });
        }
        self.state.slice_index = index;
        self.notify(RedrawReason::Slice);
        Ok(())
    }

    /// Moves by `delta` slices, clamped to the volume. Returns the new index.
    pub fn scroll(&mut self, delta: isize) -> usize {
        let extent = self.slice_extent();
        if extent == 0 {
            return self.state.slice_index;
        }
        let target = (self.state.slice_index as isize)
            .saturating_add(delta)
            .clamp(0, extent as isize - 1) as usize;
        if target != self.state.slice_index {
            self.state.slice_index = target;
            self.notify(RedrawReason::Slice);
        }
        target
    }

    pub fn set_zoom(&mut self, zoom: f32) -> Result<()> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(Error::InvalidZoom(zoom));
        }
        self.state.zoom = zoom;
        self.notify(RedrawReason::View);
        Ok(())
    }

    /// Pan in output pixels.
    pub fn set_pan(&mut self, pan: [f32; 2]) {
        self.state.pan = pan;
        self.notify(RedrawReason::View);
    }

    /// Zoom 1, no pan.
    pub fn reset_view(&mut self) {
        self.state.zoom = 1.0;
        self.state.pan = [0.0, 0.0];
        self.notify(RedrawReason::View);
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Result<&Layer> {
        self.layers.get(id)
    }

    /// Direct access for edits without a dedicated method. Call
    /// [`request_redraw`](Self::request_redraw) afterwards.
    pub fn layer_mut(&mut self, id: LayerId) -> Result<&mut Layer> {
        self.layers.get_mut(id)
    }

    pub fn request_redraw(&mut self, reason: RedrawReason) {
        self.notify(reason);
    }

    /// Adds on top. The first layer of an empty viewport moves the view to
    /// its middle slice.
    pub fn add_layer(&mut self, layer: Layer) -> LayerId {
        let first = self.layers.reference().is_none();
        let id = self.layers.push(layer);
        if first {
            self.center_slice();
        }
        self.notify(RedrawReason::Layers);
        id
    }

    pub fn replace_layer(&mut self, id: LayerId, layer: Layer) -> Result<Layer> {
        let old = self.layers.replace(id, layer)?;
        self.clamp_slice();
        self.notify(RedrawReason::Layers);
        Ok(old)
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Result<Layer> {
        let old = self.layers.remove(id)?;
        self.clamp_slice();
        self.notify(RedrawReason::Layers);
        Ok(old)
    }

    fn clamp_slice(&mut self) {
        let extent = self.slice_extent();
        if extent > 0 && self.state.slice_index >= extent {
            self.state.slice_index = extent - 1;
        }
    }

    pub fn set_visible(&mut self, id: LayerId, visible: bool) -> Result<()> {
        self.layers.get_mut(id)?.visible = visible;
        self.notify(RedrawReason::Layers);
        Ok(())
    }

    pub fn set_opacity(&mut self, id: LayerId, opacity: f32) -> Result<()> {
        self.layers.get_mut(id)?.set_opacity(opacity);
        self.notify(RedrawReason::Layers);
        Ok(())
    }

    pub fn move_layer_up(&mut self, id: LayerId) -> Result<bool> {
        let moved = self.layers.move_up(id)?;
        if moved {
            self.notify(RedrawReason::Layers);
        }
        Ok(moved)
    }

    pub fn move_layer_down(&mut self, id: LayerId) -> Result<bool> {
        let moved = self.layers.move_down(id)?;
        if moved {
            self.notify(RedrawReason::Layers);
        }
        Ok(moved)
    }

    /// Interactive window/level that shadows the layer's own window.
    pub fn set_window_override(&mut self, id: LayerId, window: Window) -> Result<()> {
        self.layers.entry_mut(id)?.window_override = Some(window);
        self.notify(RedrawReason::Layers);
        Ok(())
    }

    pub fn clear_window_override(&mut self, id: LayerId) -> Result<()> {
        self.layers.entry_mut(id)?.window_override = None;
        self.notify(RedrawReason::Layers);
        Ok(())
    }

    /// Attaches the layer this viewport paints into, returning the previous
    /// one. A paint stroke or marker drag in progress is cancelled first.
    pub fn set_annotation(&mut self, annotation: Option<AnnotationLayer>) -> Option<AnnotationLayer> {
        if matches!(
            self.interaction,
            Interaction::Painting { .. } | Interaction::DraggingMarker { .. }
        ) {
            self.cancel_gesture();
        }
        let old = std::mem::replace(&mut self.annotation, annotation);
        if self.layers.reference().is_none() && old.is_none() {
            self.center_slice();
        }
        self.notify(RedrawReason::Annotation);
        old
    }

    pub fn annotation(&self) -> Option<&AnnotationLayer> {
        self.annotation.as_ref()
    }

    pub fn annotation_mut(&mut self) -> Option<&mut AnnotationLayer> {
        self.annotation.as_mut()
    }

    /// Shows another viewport's annotation read-only. Ignored while this
    /// viewport has its own annotation layer. Pass a fresh snapshot after
    /// every edit on the owning side.
    pub fn link_annotation(&mut self, snapshot: Option<AnnotationSnapshot>) {
        self.linked = snapshot;
        self.notify(RedrawReason::Annotation);
    }

    /// What the next frame shows: the own layer (with any stroke being
    /// painted), else the linked snapshot.
    pub fn annotation_snapshot(&self) -> Option<AnnotationSnapshot> {
        let Some(annotation) = &self.annotation else {
            return self.linked.clone();
        };
        if let Interaction::Painting {
            label,
            radius,
            points,
        } = &self.interaction
        {
            match annotation.snapshot_with_stroke(points, *label, *radius) {
                Ok(snapshot) => return Some(snapshot),
                Err(err) => log::warn!("cannot preview stroke: {err}"),
            }
        }
        Some(annotation.snapshot())
    }

    fn annotation_or_err(&mut self) -> Result<&mut AnnotationLayer> {
        self.annotation.as_mut().ok_or(Error::NoAnnotationLayer)
    }

    /// Physical position under output pixel `(px, py)` on the current slice.
    pub fn screen_to_world(&self, geometry: &VolumeGeometry, px: f32, py: f32) -> Result<[f32; 3]> {
        let transform = self.compositor.transform_for(geometry, &self.state)?;
        let voxel = transform.screen_to_voxel(px, py, self.state.slice_index);
        Ok(geometry.voxel_to_world(voxel))
    }

    /// Voxel drawn under output pixel `(px, py)` on the current slice, or
    /// `None` where `geometry` is not drawn.
    pub fn voxel_at(&self, geometry: &VolumeGeometry, px: f32, py: f32) -> Result<Option<[usize; 3]>> {
        let transform = self.compositor.transform_for(geometry, &self.state)?;
        Ok(transform
            .screen_to_index(px, py, self.state.slice_index)
            .filter(|index| geometry.contains(index.map(|i| i as isize))))
    }

    /// Center of the annotation voxel under `(px, py)`. Fails with
    /// [`Error::PositionOutOfBounds`] where the volume is not drawn.
    fn annotation_world(&self, px: f32, py: f32) -> Result<[f32; 3]> {
        let geometry = self
            .annotation
            .as_ref()
            .map(AnnotationLayer::geometry)
            .ok_or(Error::NoAnnotationLayer)?;
        match self.voxel_at(geometry, px, py)? {
            Some(index) => Ok(geometry.voxel_to_world(index.map(|i| i as f32))),
            None => Err(Error::PositionOutOfBounds(self.screen_to_world(geometry, px, py)?)),
        }
    }

    /// Places a marker at the center of the voxel under `(px, py)`.
    pub fn add_marker_at(&mut self, px: f32, py: f32, label: u16) -> Result<MarkerId> {
        let world = self.annotation_world(px, py)?;
        let id = self.annotation_or_err()?.add_marker(world, label)?;
        self.notify(RedrawReason::Markers);
        Ok(id)
    }

    /// Idempotent, like [`AnnotationLayer::delete_marker`].
    pub fn delete_marker(&mut self, id: MarkerId) -> Result<bool> {
        let removed = self.annotation_or_err()?.delete_marker(id);
        if removed {
            self.notify(RedrawReason::Markers);
        }
        Ok(removed)
    }

    pub fn select_marker(&mut self, id: MarkerId) -> Result<()> {
        self.annotation_or_err()?.select_marker(id)?;
        self.notify(RedrawReason::Markers);
        Ok(())
    }

    pub fn clear_selection(&mut self) -> Result<()> {
        self.annotation_or_err()?.clear_selection();
        self.notify(RedrawReason::Markers);
        Ok(())
    }

    /// Readout for output pixel `(px, py)`, or `None` outside the reference volume.
    pub fn probe(&self, px: f32, py: f32) -> Option<CursorReadout> {
        let geometry = self.reference_geometry()?;
        let [x, y, z] = self.voxel_at(geometry, px, py).ok()??;
        let world = geometry.voxel_to_world([x as f32, y as f32, z as f32]);

        let values = self
            .layers
            .entries()
            .iter()
            .filter(|entry| entry.layer.visible)
            .map(|entry| {
                let volume = entry.layer.volume();
                volume
                    .geometry()
                    .world_to_index(world)
                    .and_then(|[i, j, k]| {
                        volume
                            .sample_channel(i as isize, j as isize, k as isize, entry.layer.channel())
                            .ok()
                    })
                    .unwrap_or(f32::NAN)
            })
            .collect();

        Some(CursorReadout {
            voxel: [x, y, z],
            world,
            values,
        })
    }

    fn begin(&mut self, next: Interaction) -> Result<()> {
        if !self.interaction.is_idle() {
            return Err(Error::GestureInProgress {
                active: self.interaction.name(),
                requested: next.name(),
            });
        }
        self.interaction = next;
        Ok(())
    }

    /// Starts a stroke of `label` (0 erases) with a physical brush radius.
    pub fn begin_paint(&mut self, label: u16, radius: f32) -> Result<()> {
        self.annotation_or_err()?;
        self.begin(Interaction::Painting {
            label,
            radius,
            points: Vec::new(),
        })
    }

    /// Extends the stroke to the voxel under output pixel `(px, py)`. The
    /// segment from the previous point is filled in at half-voxel steps;
    /// positions outside the volume are dropped.
    pub fn paint_to(&mut self, px: f32, py: f32) -> Result<()> {
        if !matches!(self.interaction, Interaction::Painting { .. }) {
            return Err(Error::NoGesture("painting"));
        }
        let world = match self.annotation_world(px, py) {
            Ok(world) => world,
            Err(Error::PositionOutOfBounds(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        let geometry = self
            .annotation
            .as_ref()
            .map(AnnotationLayer::geometry)
            .ok_or(Error::NoAnnotationLayer)?;
        let step = geometry.spacing.iter().copied().fold(f32::INFINITY, f32::min) / 2.0;

        if let Interaction::Painting { points, .. } = &mut self.interaction {
            match points.last().copied() {
                None => points.push(world),
                Some(last) => {
                    let distance = world
                        .iter()
                        .zip(last.iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f32>()
                        .sqrt();
                    let steps = (distance / step).ceil().max(1.0) as usize;
                    points.extend((1..=steps).map(|k| {
                        let t = k as f32 / steps as f32;
                        std::array::from_fn(|axis| last[axis] + (world[axis] - last[axis]) * t)
                    }));
                }
            }
        }
        self.notify(RedrawReason::Annotation);
        Ok(())
    }

    pub fn begin_marker_drag(&mut self, id: MarkerId) -> Result<()> {
        let original = self
            .annotation
            .as_ref()
            .ok_or(Error::NoAnnotationLayer)?
            .marker(id)?
            .clone();
        self.begin(Interaction::DraggingMarker { original })
    }

    /// Moves the dragged marker to the voxel under output pixel `(px, py)`.
    pub fn drag_marker_to(&mut self, px: f32, py: f32) -> Result<()> {
        let Interaction::DraggingMarker { original } = &self.interaction else {
            return Err(Error::NoGesture("marker drag"));
        };
        let id = original.id;
        let world = self.annotation_world(px, py)?;
        self.annotation_or_err()?.move_marker(id, world)?;
        self.notify(RedrawReason::Markers);
        Ok(())
    }

    pub fn begin_pan(&mut self) -> Result<()> {
        self.begin(Interaction::Panning {
            start: self.state.pan,
        })
    }

    /// Shifts the image by `(dx, dy)` output pixels.
    pub fn pan_by(&mut self, dx: f32, dy: f32) -> Result<()> {
        if !matches!(self.interaction, Interaction::Panning { .. }) {
            return Err(Error::NoGesture("panning"));
        }
        self.state.pan[0] += dx;
        self.state.pan[1] += dy;
        self.notify(RedrawReason::View);
        Ok(())
    }

    pub fn begin_zoom(&mut self) -> Result<()> {
        self.begin(Interaction::Zooming {
            start: self.state.zoom,
        })
    }

    /// Multiplies the zoom by `factor`.
    pub fn zoom_by(&mut self, factor: f32) -> Result<()> {
        if !matches!(self.interaction, Interaction::Zooming { .. }) {
            return Err(Error::NoGesture("zooming"));
        }
        let zoom = self.state.zoom * factor;
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(Error::InvalidZoom(zoom));
        }
        self.state.zoom = zoom;
        self.notify(RedrawReason::View);
        Ok(())
    }

    /// Pointer release: commits the gesture and returns to idle. A stroke
    /// is written to the mask here, in one piece. No-op when idle.
    pub fn end_gesture(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.interaction, Interaction::Idle) {
            Interaction::Painting {
                label,
                radius,
                points,
            } => {
                if points.is_empty() {
                    return Ok(());
                }
                let changed = self.annotation_or_err()?.paint_stroke(&points, label, radius)?;
                log::debug!("stroke of {} points set {changed} voxels to {label}", points.len());
                self.notify(RedrawReason::Annotation);
            }
            Interaction::DraggingMarker { .. } => self.notify(RedrawReason::Markers),
            Interaction::Idle | Interaction::Panning { .. } | Interaction::Zooming { .. } => {}
        }
        Ok(())
    }

    /// Aborts the gesture, restoring the state it started from. No-op when idle.
    pub fn cancel_gesture(&mut self) {
        match std::mem::replace(&mut self.interaction, Interaction::Idle) {
            Interaction::Idle => {}
            Interaction::Painting { .. } => self.notify(RedrawReason::Annotation),
            Interaction::DraggingMarker { original } => {
                if let Some(annotation) = self.annotation.as_mut() {
                    if let Err(err) = annotation.restore_marker(original) {
                        log::warn!("cannot restore dragged marker: {err}");
                    }
                }
                self.notify(RedrawReason::Markers);
            }
            Interaction::Panning { start } => {
                self.state.pan = start;
                self.notify(RedrawReason::View);
            }
            Interaction::Zooming { start } => {
                self.state.zoom = start;
                self.notify(RedrawReason::View);
            }
        }
    }
}
