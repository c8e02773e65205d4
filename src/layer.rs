//! A single editable RGBA buffer: pixel storage plus the bulk mutation
//! algorithms (set, replace, channel write, flood fill, region merge).
//!
//! Layers know nothing about undo history. Every bulk mutator accepts an
//! optional [`PixelTap`] that observes `(index, previous_color)` immediately
//! before a cell is written; the history engine hangs off that callback.

use crate::color::{self, BlendMode, Channel, PackedColor};
use crate::error::{MuralError, MuralResult};
use crate::geom::{Grid, Point, Region};

/// Hard per-layer cell limit. Construction fails beyond this.
pub const MAX_LAYER_CELLS: usize = 2048 * 2048;

/// Stable handle to a layer within one document. Ids are monotonic and never
/// reused, so a stale handle resolves to nothing rather than to a stranger.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(pub(crate) u64);

impl std::fmt::Debug for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LayerId({})", self.0)
    }
}

/// Display metadata carried by a layer.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LayerMeta {
    pub name: String,
    pub visible: bool,
}

/// Observes `(index, previous_color)` immediately before a cell is written.
pub type PixelTap<'a> = &'a mut dyn FnMut(usize, PackedColor);

/// One editable pixel buffer within a [`Layout`](crate::Layout).
pub struct Layer {
    id: LayerId,
    grid: Grid,
    meta: LayerMeta,
    data: Vec<PackedColor>,
    destroyed: bool,
    // Reusable flood-fill stack, cleared between calls.
    fill_scratch: Vec<usize>,
}

impl Layer {
    pub(crate) fn new(id: LayerId, name: impl Into<String>, grid: Grid) -> MuralResult<Self> {
        let cells = grid.len();
        if cells > MAX_LAYER_CELLS {
            return Err(MuralError::capacity(format!(
                "layer of {cells} cells exceeds the {MAX_LAYER_CELLS} cell limit"
            )));
        }
        Ok(Self {
            id,
            grid,
            meta: LayerMeta {
                name: name.into(),
                visible: true,
            },
            data: vec![0; cells],
            destroyed: false,
            fill_scratch: Vec::new(),
        })
    }

    /// Build a layer around an existing buffer. The buffer length must match
    /// the grid.
    pub(crate) fn from_data(
        id: LayerId,
        name: impl Into<String>,
        grid: Grid,
        data: Vec<PackedColor>,
    ) -> MuralResult<Self> {
        if data.len() != grid.len() {
            return Err(MuralError::validation(format!(
                "source buffer has {} cells, grid wants {}",
                data.len(),
                grid.len()
            )));
        }
        let mut layer = Self::new(id, name, grid)?;
        layer.data = data;
        Ok(layer)
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.meta.name = name.into();
    }

    pub fn visible(&self) -> bool {
        self.meta.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.meta.visible = visible;
    }

    pub fn meta(&self) -> &LayerMeta {
        &self.meta
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Raw cell view of the buffer.
    pub fn data(&self) -> &[PackedColor] {
        &self.data
    }

    /// Zero-fill the whole buffer.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Raw copy of `other`'s buffer into this one. Buffers must have equal
    /// length. With `full_meta`, name and visibility are copied too.
    pub fn copy_from(&mut self, other: &Layer, full_meta: bool) -> MuralResult<()> {
        if self.data.len() != other.data.len() {
            return Err(MuralError::validation(
                "copy_from requires equal-length layer buffers",
            ));
        }
        self.data.copy_from_slice(&other.data);
        if full_meta {
            self.meta = other.meta.clone();
        }
        Ok(())
    }

    /// Merge `other` into this layer over `region`: overwrite or
    /// alpha-composite per cell. The whole-buffer overwrite case degenerates
    /// to a raw copy.
    pub fn merge(
        &mut self,
        other: &Layer,
        region: Option<Region>,
        blend: BlendMode,
        mut tap: Option<PixelTap<'_>>,
    ) -> MuralResult<()> {
        if self.destroyed {
            return Ok(());
        }
        if self.data.len() != other.data.len() {
            return Err(MuralError::validation(
                "merge requires equal-length layer buffers",
            ));
        }
        if region.is_none() && blend == BlendMode::Overwrite && tap.is_none() {
            return self.copy_from(other, false);
        }
        for (start, end) in self.grid.row_spans(region.as_ref()) {
            for i in start..end {
                let before = self.data[i];
                if let Some(t) = tap.as_mut() {
                    t(i, before);
                }
                self.data[i] = blend.apply(before, other.data[i]);
            }
        }
        Ok(())
    }

    /// Set every cell of `region` whose color equals `old` exactly to `new`
    /// (optionally composited over the current color).
    pub fn color_replace(
        &mut self,
        old: PackedColor,
        new: PackedColor,
        region: Option<Region>,
        blend: BlendMode,
        mut tap: Option<PixelTap<'_>>,
    ) {
        if self.destroyed {
            return;
        }
        for (start, end) in self.grid.row_spans(region.as_ref()) {
            for i in start..end {
                if self.data[i] == old {
                    if let Some(t) = tap.as_mut() {
                        t(i, old);
                    }
                    self.data[i] = blend.apply(old, new);
                }
            }
        }
    }

    /// Force every cell of `region` to `color` (optionally composited).
    pub fn set(
        &mut self,
        color: PackedColor,
        region: Option<Region>,
        blend: BlendMode,
        mut tap: Option<PixelTap<'_>>,
    ) {
        if self.destroyed {
            return;
        }
        for (start, end) in self.grid.row_spans(region.as_ref()) {
            for i in start..end {
                let before = self.data[i];
                if let Some(t) = tap.as_mut() {
                    t(i, before);
                }
                self.data[i] = blend.apply(before, color);
            }
        }
    }

    /// Write `color` at a precomputed index list, skipping out-of-range
    /// entries. The fast path for plotting when the caller already did the
    /// coordinate math.
    pub fn set_indexes(
        &mut self,
        indexes: &[usize],
        color: PackedColor,
        blend: BlendMode,
        mut tap: Option<PixelTap<'_>>,
    ) {
        if self.destroyed {
            return;
        }
        for &i in indexes {
            if i >= self.data.len() {
                continue;
            }
            let before = self.data[i];
            if let Some(t) = tap.as_mut() {
                t(i, before);
            }
            self.data[i] = blend.apply(before, color);
        }
    }

    /// Overwrite one channel of every cell in `region`, leaving the other
    /// channels untouched.
    pub fn set_channel(
        &mut self,
        channel: Channel,
        value: u8,
        region: Option<Region>,
        mut tap: Option<PixelTap<'_>>,
    ) {
        if self.destroyed {
            return;
        }
        for (start, end) in self.grid.row_spans(region.as_ref()) {
            for i in start..end {
                let before = self.data[i];
                if let Some(t) = tap.as_mut() {
                    t(i, before);
                }
                self.data[i] = color::with_channel(before, channel, value);
            }
        }
    }

    /// Flood fill from `seed`, bounded by `region` (or the whole buffer).
    ///
    /// The target color is `color`, composited over the seed's current color
    /// under [`BlendMode::Alpha`]. Returns `false` without touching the
    /// buffer when the seed is out of bounds or already matches the target:
    /// filling a region that already has the destination color must be a
    /// no-op, never a loop.
    ///
    /// Expansion uses an explicit growable stack (grids up to 2048x2048 make
    /// recursion depth unsafe) and 4-neighbor spread with explicit
    /// row/column bound checks.
    pub fn fill(
        &mut self,
        seed: Point,
        color: PackedColor,
        region: Option<Region>,
        blend: BlendMode,
        mut tap: Option<PixelTap<'_>>,
    ) -> bool {
        if self.destroyed || !self.grid.contains(seed) {
            return false;
        }
        // Fill is triggered from raw pointer positions that may be stale, so
        // the bounds are re-clamped here rather than trusted.
        let bounds = match region {
            None => self.grid.full_region(),
            Some(r) => match r.clamped(self.grid) {
                Some(clamped) => clamped,
                None => return false,
            },
        };
        if !bounds.contains(seed) {
            return false;
        }

        let seed_index = self.grid.index_at(seed);
        let original = self.data[seed_index];
        let target = blend.apply(original, color);
        if target == original {
            return false;
        }

        let width = self.grid.width() as usize;
        let mut stack = std::mem::take(&mut self.fill_scratch);
        stack.clear();

        if let Some(t) = tap.as_mut() {
            t(seed_index, original);
        }
        self.data[seed_index] = target;
        stack.push(seed_index);

        while let Some(index) = stack.pop() {
            let p = self.grid.position_from(index);
            let mut candidates = [None; 4];
            if p.x > bounds.start.x {
                candidates[0] = Some(index - 1);
            }
            if p.x + 1 < bounds.end_x() {
                candidates[1] = Some(index + 1);
            }
            if p.y > bounds.start.y {
                candidates[2] = Some(index - width);
            }
            if p.y + 1 < bounds.end_y() {
                candidates[3] = Some(index + width);
            }
            for next in candidates.into_iter().flatten() {
                if self.data[next] == original {
                    if let Some(t) = tap.as_mut() {
                        t(next, original);
                    }
                    self.data[next] = target;
                    stack.push(next);
                }
            }
        }

        self.fill_scratch = stack;
        true
    }

    /// Whether the cell at `index` holds exactly `color`. Out-of-range
    /// indices compare unequal.
    pub fn compare_at(&self, index: usize, color: PackedColor) -> bool {
        self.data.get(index) == Some(&color)
    }

    /// Cell read by linear index. The index must be in range.
    pub fn pixel_at(&self, index: usize) -> PackedColor {
        self.data[index]
    }

    /// Cell read by coordinate. The coordinate must be inside the grid.
    pub fn pixel_from_position(&self, p: Point) -> PackedColor {
        self.data[self.grid.index_at(p)]
    }

    /// Write `color` at `index` and return the previous value.
    pub fn swap_pixel(&mut self, index: usize, color: PackedColor) -> PackedColor {
        std::mem::replace(&mut self.data[index], color)
    }

    /// Row-major copy of `region` (or the whole buffer). The region must be
    /// clamped to this layer's grid.
    pub fn clone_data(&self, region: Option<Region>) -> Vec<PackedColor> {
        match region {
            None => self.data.clone(),
            Some(r) => {
                let mut out = Vec::with_capacity(r.size.w as usize * r.size.h as usize);
                for (start, end) in self.grid.row_spans(Some(&r)) {
                    out.extend_from_slice(&self.data[start..end]);
                }
                out
            }
        }
    }

    /// Blit a row-major `src` back into `region` (or the whole buffer).
    /// Inverse of [`clone_data`](Self::clone_data).
    pub fn write_data(&mut self, region: Option<Region>, src: &[PackedColor]) -> MuralResult<()> {
        let expected = match region {
            None => self.data.len(),
            Some(r) => r.size.w as usize * r.size.h as usize,
        };
        if src.len() != expected {
            return Err(MuralError::validation(format!(
                "write_data got {} cells, region wants {expected}",
                src.len()
            )));
        }
        let mut offset = 0;
        for (start, end) in self.grid.row_spans(region.as_ref()) {
            let run = end - start;
            self.data[start..end].copy_from_slice(&src[offset..offset + run]);
            offset += run;
        }
        Ok(())
    }

    /// Renderable RGBA snapshot of `region` (or the whole buffer), for view
    /// adapters and exporters. The region must be clamped to the grid.
    pub fn to_image(&self, region: Option<Region>) -> image::RgbaImage {
        let bounds = region.unwrap_or_else(|| self.grid.full_region());
        let mut img = image::RgbaImage::new(bounds.size.w, bounds.size.h);
        for dy in 0..bounds.size.h {
            for dx in 0..bounds.size.w {
                let p = Point::new(bounds.start.x + dx, bounds.start.y + dy);
                let [r, g, b, a] = color::unpack(self.data[self.grid.index_at(p)]);
                img.put_pixel(dx, dy, image::Rgba([r, g, b, a]));
            }
        }
        img
    }

    /// Release the buffer and mark the layer dead. Safe to call twice.
    /// Reading pixels from a destroyed layer is a caller bug; bulk mutators
    /// become no-ops.
    pub fn destroy(&mut self) {
        self.data = Vec::new();
        self.fill_scratch = Vec::new();
        self.meta.visible = false;
        self.destroyed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::pack;

    fn layer(w: u32, h: u32) -> Layer {
        Layer::new(LayerId(1), "test", Grid::new(w, h).unwrap()).unwrap()
    }

    #[test]
    fn oversized_layer_is_rejected() {
        let grid = Grid::new(2049, 2048).unwrap();
        let err = Layer::new(LayerId(1), "too big", grid).unwrap_err();
        assert!(matches!(err, MuralError::Capacity(_)));
    }

    #[test]
    fn max_size_layer_is_accepted() {
        let grid = Grid::new(2048, 2048).unwrap();
        assert!(Layer::new(LayerId(1), "edge", grid).is_ok());
    }

    #[test]
    fn from_data_checks_length() {
        let grid = Grid::new(2, 2).unwrap();
        assert!(Layer::from_data(LayerId(1), "short", grid, vec![0; 3]).is_err());
        let l = Layer::from_data(LayerId(1), "ok", grid, vec![7; 4]).unwrap();
        assert_eq!(l.pixel_at(3), 7);
    }

    #[test]
    fn copy_from_requires_equal_length() {
        let mut a = layer(2, 2);
        let b = layer(3, 2);
        assert!(a.copy_from(&b, false).is_err());
    }

    #[test]
    fn set_respects_region() {
        let mut l = layer(4, 4);
        let red = pack(255, 0, 0, 255);
        l.set(red, Some(Region::of(1, 1, 2, 2)), BlendMode::Overwrite, None);
        assert_eq!(l.pixel_from_position(Point::new(1, 1)), red);
        assert_eq!(l.pixel_from_position(Point::new(2, 2)), red);
        assert_eq!(l.pixel_from_position(Point::new(0, 0)), 0);
        assert_eq!(l.pixel_from_position(Point::new(3, 3)), 0);
    }

    #[test]
    fn set_tap_sees_before_colors() {
        let mut l = layer(2, 1);
        let first = pack(1, 1, 1, 255);
        l.set(first, None, BlendMode::Overwrite, None);

        let mut seen = Vec::new();
        let mut tap = |i: usize, c: PackedColor| seen.push((i, c));
        l.set(pack(2, 2, 2, 255), None, BlendMode::Overwrite, Some(&mut tap));
        assert_eq!(seen, vec![(0, first), (1, first)]);
    }

    #[test]
    fn color_replace_only_touches_exact_matches() {
        let mut l = layer(2, 1);
        let red = pack(255, 0, 0, 255);
        let blue = pack(0, 0, 255, 255);
        l.set_indexes(&[0], red, BlendMode::Overwrite, None);
        l.color_replace(red, blue, None, BlendMode::Overwrite, None);
        assert_eq!(l.pixel_at(0), blue);
        assert_eq!(l.pixel_at(1), 0);
    }

    #[test]
    fn set_channel_leaves_other_channels() {
        let mut l = layer(2, 1);
        l.set(pack(10, 20, 30, 40), None, BlendMode::Overwrite, None);
        l.set_channel(Channel::A, 255, None, None);
        assert_eq!(color::unpack(l.pixel_at(0)), [10, 20, 30, 255]);
        assert_eq!(color::unpack(l.pixel_at(1)), [10, 20, 30, 255]);
    }

    #[test]
    fn set_indexes_skips_out_of_range() {
        let mut l = layer(2, 1);
        let red = pack(255, 0, 0, 255);
        l.set_indexes(&[1, 99], red, BlendMode::Overwrite, None);
        assert_eq!(l.pixel_at(0), 0);
        assert_eq!(l.pixel_at(1), red);
    }

    #[test]
    fn merge_whole_overwrite_degenerates_to_copy() {
        let mut a = layer(2, 2);
        let mut b = layer(2, 2);
        b.set(pack(9, 9, 9, 9), None, BlendMode::Overwrite, None);
        a.merge(&b, None, BlendMode::Overwrite, None).unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn merge_alpha_composites_per_cell() {
        let mut bottom = layer(1, 1);
        let mut top = layer(1, 1);
        bottom.set(pack(0, 0, 0, 255), None, BlendMode::Overwrite, None);
        top.set(pack(255, 255, 255, 128), None, BlendMode::Overwrite, None);
        bottom.merge(&top, None, BlendMode::Alpha, None).unwrap();
        assert_eq!(color::unpack(bottom.pixel_at(0)), [128, 128, 128, 255]);
    }

    #[test]
    fn clone_and_write_data_roundtrip_region() {
        let mut l = layer(4, 4);
        let region = Region::of(1, 1, 2, 2);
        l.set(pack(5, 5, 5, 255), Some(region), BlendMode::Overwrite, None);
        let snapshot = l.clone_data(Some(region));
        assert_eq!(snapshot.len(), 4);

        l.reset();
        l.write_data(Some(region), &snapshot).unwrap();
        assert_eq!(l.pixel_from_position(Point::new(1, 1)), pack(5, 5, 5, 255));
        assert_eq!(l.pixel_from_position(Point::new(0, 0)), 0);
    }

    #[test]
    fn write_data_checks_length() {
        let mut l = layer(4, 4);
        let err = l.write_data(Some(Region::of(0, 0, 2, 2)), &[0; 3]).unwrap_err();
        assert!(matches!(err, MuralError::Validation(_)));
    }

    #[test]
    fn to_image_crops_region() {
        let mut l = layer(4, 4);
        l.set(
            pack(1, 2, 3, 4),
            Some(Region::of(2, 2, 2, 2)),
            BlendMode::Overwrite,
            None,
        );
        let img = l.to_image(Some(Region::of(2, 2, 2, 2)));
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(0, 0).0, [1, 2, 3, 4]);
    }

    #[test]
    fn destroy_is_idempotent_and_stops_mutation() {
        let mut l = layer(2, 2);
        l.destroy();
        l.destroy();
        assert!(l.is_destroyed());
        assert!(!l.visible());
        l.set(pack(1, 1, 1, 1), None, BlendMode::Overwrite, None);
        assert!(l.data().is_empty());
        assert!(!l.fill(Point::new(0, 0), 1, None, BlendMode::Overwrite, None));
    }
}
