//! The pixel-art document: a stack of layers, the composited data layer,
//! coordinate math, and change notification.
//!
//! All editing goes through this type: each operation records a history
//! session, delegates to the active layer, recomposites the touched region
//! into the data layer, and notifies subscribers. Callers never composite
//! manually.

use crate::color::{BlendMode, Channel, PackedColor};
use crate::error::{MuralError, MuralResult};
use crate::events::{EventBus, PixelsChanged};
use crate::geom::{Grid, Point, Region};
use crate::history::{History, LayerAccess, SessionKind};
use crate::layer::{Layer, LayerId};

/// Arguments for [`Layout::set`]: force a region to one color.
#[derive(Clone, Copy, Debug)]
pub struct SetOp {
    pub color: PackedColor,
    pub region: Option<Region>,
    pub blend: BlendMode,
    pub notify: bool,
}

/// Arguments for [`Layout::set_indexes`]: write a precomputed index list,
/// bypassing coordinate math.
#[derive(Clone, Copy, Debug)]
pub struct SetIndexesOp<'a> {
    pub indexes: &'a [usize],
    pub color: PackedColor,
    pub blend: BlendMode,
    pub notify: bool,
}

/// Arguments for [`Layout::color_replace`]: rewrite exact color matches.
#[derive(Clone, Copy, Debug)]
pub struct ReplaceOp {
    pub old: PackedColor,
    pub new: PackedColor,
    pub region: Option<Region>,
    pub blend: BlendMode,
    pub notify: bool,
}

/// Arguments for [`Layout::set_channel`]: overwrite one channel.
#[derive(Clone, Copy, Debug)]
pub struct ChannelOp {
    pub channel: Channel,
    pub value: u8,
    pub region: Option<Region>,
    pub notify: bool,
}

/// Arguments for [`Layout::fill`]: flood fill from a seed cell.
#[derive(Clone, Copy, Debug)]
pub struct FillOp {
    pub seed: Point,
    pub color: PackedColor,
    pub region: Option<Region>,
    pub blend: BlendMode,
    pub notify: bool,
}

/// A layered pixel-art document of fixed dimensions.
pub struct Layout {
    grid: Grid,
    // Insertion order is the back-to-front compositing order.
    layers: Vec<Layer>,
    active: Option<usize>,
    // Always reflects the merge of all visible layers.
    data: Layer,
    events: EventBus,
    next_layer_id: u64,
    destroyed: bool,
}

impl Layout {
    /// Create an empty document. The data layer is allocated here and its
    /// dimensions never change afterwards.
    pub fn new(width: u32, height: u32) -> MuralResult<Self> {
        let grid = Grid::new(width, height)?;
        let data = Layer::new(LayerId(0), "composite", grid)?;
        Ok(Self {
            grid,
            layers: Vec::new(),
            active: None,
            data,
            events: EventBus::new(),
            next_layer_id: 1,
            destroyed: false,
        })
    }

    fn guard(&self) -> MuralResult<()> {
        if self.destroyed {
            return Err(MuralError::protocol("layout has been destroyed"));
        }
        Ok(())
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn width(&self) -> u32 {
        self.grid.width()
    }

    pub fn height(&self) -> u32 {
        self.grid.height()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Linear offset of a coordinate: `x + y * width`.
    pub fn index_at(&self, p: Point) -> usize {
        self.grid.index_at(p)
    }

    /// Inverse of [`index_at`](Self::index_at).
    pub fn position_from(&self, index: usize) -> Point {
        self.grid.position_from(index)
    }

    /// The bus render collaborators subscribe to.
    pub fn events(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active.map(|i| &self.layers[i])
    }

    /// The composited result of all visible layers.
    pub fn data_layer(&self) -> &Layer {
        &self.data
    }

    /// Create a same-size layer and insert it at `index` (append when
    /// `None`). An out-of-range index is a silent no-op returning
    /// `Ok(None)`. The active layer selection is left on the layer it was
    /// on.
    pub fn insert_layer(&mut self, index: Option<usize>) -> MuralResult<Option<LayerId>> {
        self.guard()?;
        let at = match index {
            None => self.layers.len(),
            Some(i) if i <= self.layers.len() => i,
            Some(_) => return Ok(None),
        };
        let id = LayerId(self.next_layer_id);
        self.next_layer_id += 1;
        let name = format!("Layer {}", self.layers.len() + 1);
        let layer = Layer::new(id, name, self.grid)?;
        self.layers.insert(at, layer);
        if let Some(active) = self.active
            && at <= active
        {
            self.active = Some(active + 1);
        }
        Ok(Some(id))
    }

    /// Duplicate the active layer, inserting the copy directly above it.
    /// The selection stays on the original. No active layer is a silent
    /// no-op returning `Ok(None)`.
    pub fn duplicate_layer(&mut self) -> MuralResult<Option<LayerId>> {
        self.guard()?;
        let Some(active) = self.active else {
            return Ok(None);
        };
        let id = LayerId(self.next_layer_id);
        self.next_layer_id += 1;
        let source = &self.layers[active];
        let name = format!("{} Copy", source.name());
        let mut copy = Layer::from_data(id, name, self.grid, source.clone_data(None))?;
        copy.set_visible(source.visible());
        self.layers.insert(active + 1, copy);
        self.merge_layers(None, true)?;
        Ok(Some(id))
    }

    /// Select which layer receives edits. Out-of-range is a silent no-op.
    pub fn set_active_to(&mut self, index: usize) -> MuralResult<()> {
        self.guard()?;
        if index < self.layers.len() {
            self.active = Some(index);
        }
        Ok(())
    }

    /// Destroy and remove the active layer. No active layer is a silent
    /// no-op.
    pub fn delete_layer(&mut self) -> MuralResult<()> {
        self.guard()?;
        let Some(active) = self.active else {
            return Ok(());
        };
        let mut layer = self.layers.remove(active);
        layer.destroy();
        self.active = None;
        self.merge_layers(None, true)
    }

    /// Destroy and remove every layer.
    pub fn remove_all_layers(&mut self) -> MuralResult<()> {
        self.guard()?;
        for layer in &mut self.layers {
            layer.destroy();
        }
        self.layers.clear();
        self.active = None;
        self.merge_layers(None, true)
    }

    /// Toggle a layer's visibility and recomposite.
    pub fn set_layer_visible(&mut self, index: usize, visible: bool) -> MuralResult<()> {
        self.guard()?;
        let Some(layer) = self.layers.get_mut(index) else {
            return Ok(());
        };
        layer.set_visible(visible);
        self.merge_layers(None, true)
    }

    /// Rename a layer. Out-of-range is a silent no-op.
    pub fn set_layer_name(&mut self, index: usize, name: impl Into<String>) -> MuralResult<()> {
        self.guard()?;
        if let Some(layer) = self.layers.get_mut(index) {
            layer.set_name(name);
        }
        Ok(())
    }

    /// Recomposite `region` (or everything) of the visible layers into the
    /// data layer, back to front: the first visible layer is copied, every
    /// later one is alpha-blended on top, and zero visible layers reset the
    /// region to transparent. Publishes [`PixelsChanged`] when `notify`.
    #[tracing::instrument(skip(self))]
    pub fn merge_layers(&mut self, region: Option<Region>, notify: bool) -> MuralResult<()> {
        self.guard()?;
        let region = match region {
            None => None,
            Some(r) => match r.clamped(self.grid) {
                Some(clamped) => Some(clamped),
                None => return Ok(()),
            },
        };

        let (data, layers) = (&mut self.data, &self.layers);
        let mut first = true;
        for layer in layers.iter().filter(|l| l.visible()) {
            // The first visible layer must be copied, not blended: blending
            // onto the previous composite would keep stale pixels alive.
            let blend = if first {
                BlendMode::Overwrite
            } else {
                BlendMode::Alpha
            };
            data.merge(layer, region, blend, None)?;
            first = false;
        }
        if first {
            match region {
                None => data.reset(),
                Some(r) => data.set(0, Some(r), BlendMode::Overwrite, None),
            }
        }

        if notify {
            self.events.notify(&PixelsChanged { region });
        }
        Ok(())
    }

    /// Force a region of the active layer to one color. Records a static
    /// history session (the whole region is rewritten wholesale), then
    /// recomposites and notifies.
    pub fn set(&mut self, history: &mut History, op: SetOp) -> MuralResult<()> {
        self.guard()?;
        let Some(active) = self.active else {
            return Ok(());
        };
        let region = match op.region {
            None => None,
            Some(r) => match r.clamped(self.grid) {
                Some(clamped) => Some(clamped),
                None => return Ok(()),
            },
        };

        history.record(&self.layers[active], SessionKind::Static)?;
        history.cache_region(&self.layers[active], region)?;
        self.layers[active].set(op.color, region, op.blend, None);
        history.stop()?;
        self.merge_layers(region, op.notify)
    }

    /// Write a precomputed index list on the active layer, the fast path
    /// for plotting strokes whose coordinate math was already done. Records
    /// a dynamic session.
    pub fn set_indexes(&mut self, history: &mut History, op: SetIndexesOp<'_>) -> MuralResult<()> {
        self.guard()?;
        let Some(active) = self.active else {
            return Ok(());
        };
        if op.indexes.is_empty() {
            return Ok(());
        }

        history.record(&self.layers[active], SessionKind::Dynamic)?;
        {
            let layer = &mut self.layers[active];
            let mut tap = |i: usize, c: PackedColor| history.cache_pixel(i, c);
            layer.set_indexes(op.indexes, op.color, op.blend, Some(&mut tap));
        }
        history.stop()?;
        let bounds = self.bounding_region(op.indexes);
        self.merge_layers(bounds, op.notify)
    }

    /// Replace exact matches of `old` with `new` on the active layer.
    /// Records a dynamic session (only matching cells are touched).
    pub fn color_replace(&mut self, history: &mut History, op: ReplaceOp) -> MuralResult<()> {
        self.guard()?;
        let Some(active) = self.active else {
            return Ok(());
        };
        let region = match op.region {
            None => None,
            Some(r) => match r.clamped(self.grid) {
                Some(clamped) => Some(clamped),
                None => return Ok(()),
            },
        };

        history.record(&self.layers[active], SessionKind::Dynamic)?;
        {
            let layer = &mut self.layers[active];
            let mut tap = |i: usize, c: PackedColor| history.cache_pixel(i, c);
            layer.color_replace(op.old, op.new, region, op.blend, Some(&mut tap));
        }
        history.stop()?;
        self.merge_layers(region, op.notify)
    }

    /// Overwrite one channel across a region of the active layer. Records a
    /// static session.
    pub fn set_channel(&mut self, history: &mut History, op: ChannelOp) -> MuralResult<()> {
        self.guard()?;
        let Some(active) = self.active else {
            return Ok(());
        };
        let region = match op.region {
            None => None,
            Some(r) => match r.clamped(self.grid) {
                Some(clamped) => Some(clamped),
                None => return Ok(()),
            },
        };

        history.record(&self.layers[active], SessionKind::Static)?;
        history.cache_region(&self.layers[active], region)?;
        self.layers[active].set_channel(op.channel, op.value, region, None);
        history.stop()?;
        self.merge_layers(region, op.notify)
    }

    /// Flood fill the active layer from `op.seed`. Returns whether anything
    /// changed; a seed outside the bounds or already matching the target
    /// color changes nothing. Records a dynamic session (empty ones are
    /// discarded on stop).
    #[tracing::instrument(skip(self, history))]
    pub fn fill(&mut self, history: &mut History, op: FillOp) -> MuralResult<bool> {
        self.guard()?;
        let Some(active) = self.active else {
            return Ok(false);
        };
        let region = match op.region {
            None => None,
            Some(r) => match r.clamped(self.grid) {
                Some(clamped) => Some(clamped),
                None => return Ok(false),
            },
        };

        history.record(&self.layers[active], SessionKind::Dynamic)?;
        let changed = {
            let layer = &mut self.layers[active];
            let mut tap = |i: usize, c: PackedColor| history.cache_pixel(i, c);
            layer.fill(op.seed, op.color, region, op.blend, Some(&mut tap))
        };
        history.stop()?;
        if changed {
            self.merge_layers(region, op.notify)?;
        }
        Ok(changed)
    }

    /// Step the history back one session and recomposite the rewritten
    /// region. Returns whether anything was undone.
    pub fn undo(&mut self, history: &mut History) -> MuralResult<bool> {
        self.guard()?;
        match history.undo(self)? {
            Some(rewrite) => {
                self.merge_layers(rewrite.region, true)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Step the history forward one session and recomposite.
    pub fn redo(&mut self, history: &mut History) -> MuralResult<bool> {
        self.guard()?;
        match history.redo(self)? {
            Some(rewrite) => {
                self.merge_layers(rewrite.region, true)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The composited pixels: the whole buffer (fast path) or a cropped
    /// copy of `region`.
    pub fn image_data(&self, region: Option<Region>) -> Vec<PackedColor> {
        match region {
            None => self.data.data().to_vec(),
            Some(r) => match r.clamped(self.grid) {
                Some(clamped) => self.data.clone_data(Some(clamped)),
                None => Vec::new(),
            },
        }
    }

    /// Renderable RGBA snapshot of the composite.
    pub fn to_image(&self, region: Option<Region>) -> image::RgbaImage {
        match region {
            None => self.data.to_image(None),
            Some(r) => match r.clamped(self.grid) {
                Some(clamped) => self.data.to_image(Some(clamped)),
                None => image::RgbaImage::new(0, 0),
            },
        }
    }

    /// Tear the document down: destroy the data layer and every stacked
    /// layer, then purge history sessions that point at them. Further
    /// mutating calls fail with a protocol error. Safe to call twice.
    pub fn destroy(&mut self, history: &mut History) {
        if self.destroyed {
            return;
        }
        self.data.destroy();
        for layer in &mut self.layers {
            layer.destroy();
        }
        self.layers.clear();
        self.active = None;
        self.destroyed = true;
        history.clean(&*self);
    }

    fn bounding_region(&self, indexes: &[usize]) -> Option<Region> {
        let mut min = (u32::MAX, u32::MAX);
        let mut max = (0u32, 0u32);
        let mut any = false;
        for &index in indexes {
            if index >= self.grid.len() {
                continue;
            }
            let p = self.grid.position_from(index);
            min = (min.0.min(p.x), min.1.min(p.y));
            max = (max.0.max(p.x), max.1.max(p.y));
            any = true;
        }
        any.then(|| Region::of(min.0, min.1, max.0 - min.0 + 1, max.1 - min.1 + 1))
    }
}

impl LayerAccess for Layout {
    fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers
            .iter_mut()
            .find(|l| l.id() == id && !l.is_destroyed())
    }

    fn layer_alive(&self, id: LayerId) -> bool {
        self.layers
            .iter()
            .any(|l| l.id() == id && !l.is_destroyed())
    }
}

impl std::fmt::Debug for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layout")
            .field("grid", &self.grid)
            .field("layers", &self.layers.len())
            .field("active", &self.active)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
