use std::fmt;
use std::sync::Arc;

use ndarray::Array2;

use crate::compositor::ViewState;
use crate::enums::{BlendMode, DisplayConvention, Interpolation, ViewDirection};
use crate::error::{Error, Result};
use crate::geometry::SliceTransform;
use crate::interpolator::Interpolator;
use crate::transfer::{ColorTransferFunction, Window};
use crate::volume::VolumeBuffer;

/// A volume plus the parameters it is displayed with.
///
/// The volume is shared: several layers, possibly in different viewports,
/// may display the same buffer.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    volume: Arc<VolumeBuffer>,
    pub transfer: ColorTransferFunction,
    opacity: f32,
    pub visible: bool,
    pub blend: BlendMode,
    /// `None` defers to the viewer's configured interpolation. Ignored by
    /// discrete transfers, which always resample nearest.
    pub interpolation: Option<Interpolation>,
    channel: usize,
}

impl Layer {
    pub fn new(name: impl Into<String>, volume: Arc<VolumeBuffer>, transfer: ColorTransferFunction) -> Self {
        Self {
            name: name.into(),
            volume,
            transfer,
            opacity: 1.0,
            visible: true,
            blend: BlendMode::Normal,
            interpolation: None,
            channel: 0,
        }
    }

    /// Grayscale layer windowed to the volume's full value range.
    pub fn grayscale(name: impl Into<String>, volume: Arc<VolumeBuffer>) -> Self {
        let (min, max) = volume.value_range();
        let transfer = ColorTransferFunction::grayscale(Window::from_range(min, max));
        Self::new(name, volume, transfer)
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.set_opacity(opacity);
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = Some(interpolation);
        self
    }

    pub fn with_channel(mut self, channel: usize) -> Result<Self> {
        let channels = self.volume.channels();
        if channel >= channels {
            return Err(Error::ChannelOutOfRange { channel, channels });
        }
        self.channel = channel;
        Ok(self)
    }

    pub fn volume(&self) -> &Arc<VolumeBuffer> {
        &self.volume
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Clamped to `[0, 1]`; NaN becomes fully transparent.
    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_nan() {
            0.0
        } else {
            opacity.clamp(0.0, 1.0)
        };
    }

    /// Raw values resampled onto a `width × height` raster, row-major with
    /// shape `(height, width)`. Pixels outside the volume are NaN.
    ///
    /// Nothing is cached: zoom, pan and slice change from frame to frame.
    pub fn extract_slice(
        &self,
        view: ViewDirection,
        slice_index: usize,
        width: u32,
        height: u32,
        zoom: f32,
        pan: [f32; 2],
    ) -> Result<Array2<f32>> {
        let state = ViewState {
            view,
            slice_index,
            zoom,
            pan,
            width,
            height,
        };
        self.extract(&state, DisplayConvention::default(), Interpolation::default())
    }

    /// Like [`extract_slice`](Self::extract_slice) for a full view state.
    /// `fallback` is used when the layer has no interpolation of its own.
    /// Discrete layers are always resampled nearest, so only stored labels
    /// reach the palette.
    pub fn extract(
        &self,
        state: &ViewState,
        convention: DisplayConvention,
        fallback: Interpolation,
    ) -> Result<Array2<f32>> {
        let slice =
            self.volume
                .oriented_slice(state.view, state.slice_index, self.channel, convention)?;
        let plane = self.volume.geometry().plane(state.view, convention);
        let transform = SliceTransform::new(plane, state.width, state.height, state.zoom, state.pan)?;
        let interpolation = match self.transfer {
            ColorTransferFunction::Discrete(_) => Interpolation::Nearest,
            ColorTransferFunction::Continuous(_) => self.interpolation.unwrap_or(fallback),
        };
        Ok(Interpolator::resample(&slice, &transform, interpolation))
    }
}

/// Stable handle to a layer in a [`LayerStack`], unaffected by reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct StackEntry {
    pub id: LayerId,
    pub layer: Layer,
    /// Interactive window/level that shadows the layer's own window.
    pub window_override: Option<Window>,
}

impl StackEntry {
    pub fn effective_window(&self) -> Option<Window> {
        self.window_override.or_else(|| self.layer.transfer.window())
    }
}

/// Ordered layers, bottom first: entry 0 is drawn first and the last entry
/// ends up on top.
#[derive(Debug, Clone, Default)]
pub struct LayerStack {
    entries: Vec<StackEntry>,
    next_id: u64,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds on top of the stack.
    pub fn push(&mut self, layer: Layer) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        self.entries.push(StackEntry {
            id,
            layer,
            window_override: None,
        });
        id
    }

    pub fn remove(&mut self, id: LayerId) -> Result<Layer> {
        let position = self.position(id)?;
        Ok(self.entries.remove(position).layer)
    }

    /// Swaps in a new layer (e.g. a reloaded volume), keeping id, stack
    /// position and any window override. Returns the old layer.
    pub fn replace(&mut self, id: LayerId, layer: Layer) -> Result<Layer> {
        let position = self.position(id)?;
        Ok(std::mem::replace(&mut self.entries[position].layer, layer))
    }

    pub fn position(&self, id: LayerId) -> Result<usize> {
        self.entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(Error::LayerNotFound(id))
    }

    pub fn get(&self, id: LayerId) -> Result<&Layer> {
        self.entry(id).map(|entry| &entry.layer)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Result<&mut Layer> {
        self.entry_mut(id).map(|entry| &mut entry.layer)
    }

    pub fn entry(&self, id: LayerId) -> Result<&StackEntry> {
        let position = self.position(id)?;
        Ok(&self.entries[position])
    }

    pub fn entry_mut(&mut self, id: LayerId) -> Result<&mut StackEntry> {
        let position = self.position(id)?;
        Ok(&mut self.entries[position])
    }

    /// Moves one step toward the top. Returns false if already topmost.
    pub fn move_up(&mut self, id: LayerId) -> Result<bool> {
        let position = self.position(id)?;
        if position + 1 >= self.entries.len() {
            return Ok(false);
        }
        self.entries.swap(position, position + 1);
        Ok(true)
    }

    /// Moves one step toward the bottom. Returns false if already at the bottom.
    pub fn move_down(&mut self, id: LayerId) -> Result<bool> {
        let position = self.position(id)?;
        if position == 0 {
            return Ok(false);
        }
        self.entries.swap(position, position - 1);
        Ok(true)
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<LayerId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    /// Bottom-most visible layer, used as the geometric reference for
    /// scrolling and cursor readout.
    pub fn reference(&self) -> Option<&StackEntry> {
        self.entries.iter().find(|entry| entry.layer.visible)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
