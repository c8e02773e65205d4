//! Undo/redo history: recorded sessions over a bounded stack.
//!
//! A session captures the before-state of exactly one layer, either as a
//! sparse per-pixel map ([`SessionKind::Dynamic`]) or as one region snapshot
//! ([`SessionKind::Static`]). Rewriting a session swaps its stored state
//! with the live layer data while capturing what it overwrote, so the same
//! operation serves both undo and redo.
//!
//! The engine knows layers only through the [`LayerAccess`] seam; it never
//! sees the document type that owns them.

use std::collections::BTreeMap;

use crate::color::PackedColor;
use crate::error::{MuralError, MuralResult};
use crate::geom::{Grid, Region};
use crate::layer::{Layer, LayerId};

/// Bound on the undo stack. Pushing past it evicts the oldest session.
pub const MAX_HISTORY_SIZE: usize = 30;

/// How a recording captures before-state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionKind {
    /// Sparse per-pixel before-image, built incrementally from the layer's
    /// pixel tap. Suited to edits that touch scattered cells.
    Dynamic,
    /// One full-region snapshot taken up front. Suited to edits that rewrite
    /// every cell of a region wholesale.
    Static,
}

/// Resolves layer handles for rewrites. Implemented by the document type
/// that owns the layers; destroyed layers must not resolve.
pub trait LayerAccess {
    fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer>;
    fn layer_alive(&self, id: LayerId) -> bool;
}

/// Outcome of a successful undo/redo rewrite: which layer changed and the
/// touched region (`None` means the whole buffer). The caller recomposites
/// from this.
#[derive(Clone, Copy, Debug)]
pub struct Rewrite {
    pub layer: LayerId,
    pub region: Option<Region>,
}

enum Session {
    Dynamic(DynamicSession),
    Static(StaticSession),
}

impl Session {
    fn is_empty(&self) -> bool {
        match self {
            Session::Dynamic(s) => s.before.is_empty(),
            Session::Static(s) => s.data.is_none(),
        }
    }

    fn rewrite(&mut self, layer: &mut Layer) -> MuralResult<Option<Region>> {
        match self {
            Session::Dynamic(s) => Ok(s.rewrite(layer)),
            Session::Static(s) => s.rewrite(layer),
        }
    }
}

struct DynamicSession {
    grid: Grid,
    // index -> before-color; only the first sighting per index is kept.
    before: BTreeMap<usize, PackedColor>,
}

impl DynamicSession {
    fn cache(&mut self, index: usize, before: PackedColor) {
        self.before.entry(index).or_insert(before);
    }

    fn rewrite(&mut self, layer: &mut Layer) -> Option<Region> {
        for (&index, stored) in self.before.iter_mut() {
            *stored = layer.swap_pixel(index, *stored);
        }
        self.bounding_region()
    }

    fn bounding_region(&self) -> Option<Region> {
        let mut min = (u32::MAX, u32::MAX);
        let mut max = (0u32, 0u32);
        for &index in self.before.keys() {
            let p = self.grid.position_from(index);
            min = (min.0.min(p.x), min.1.min(p.y));
            max = (max.0.max(p.x), max.1.max(p.y));
        }
        if self.before.is_empty() {
            return None;
        }
        Some(Region::of(
            min.0,
            min.1,
            max.0 - min.0 + 1,
            max.1 - min.1 + 1,
        ))
    }
}

struct StaticSession {
    region: Option<Region>,
    data: Option<Vec<PackedColor>>,
}

impl StaticSession {
    fn rewrite(&mut self, layer: &mut Layer) -> MuralResult<Option<Region>> {
        let stored = self
            .data
            .as_mut()
            .ok_or_else(|| MuralError::protocol("rewriting a static session that never cached"))?;
        let live = layer.clone_data(self.region);
        layer.write_data(self.region, stored)?;
        *stored = live;
        Ok(self.region)
    }
}

struct ActiveRecording {
    layer: LayerId,
    session: Session,
}

struct Entry {
    layer: LayerId,
    session: Session,
}

/// The bounded undo/redo stack plus the recording state machine
/// (idle -> record -> cache* -> stop -> idle).
pub struct History {
    stack: Vec<Entry>,
    // Sessions below the pointer are undoable; at and above it, redoable.
    pointer: usize,
    capacity: usize,
    recording: Option<ActiveRecording>,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stack: Vec::new(),
            pointer: 0,
            capacity: capacity.max(1),
            recording: None,
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn can_undo(&self) -> bool {
        self.pointer > 0
    }

    pub fn can_redo(&self) -> bool {
        self.pointer < self.stack.len()
    }

    /// Open a recording against `layer`. Recording while another recording
    /// is open is a programming error and fails loudly.
    pub fn record(&mut self, layer: &Layer, kind: SessionKind) -> MuralResult<()> {
        if self.recording.is_some() {
            return Err(MuralError::protocol("record while already recording"));
        }
        if layer.is_destroyed() {
            return Err(MuralError::protocol("record against a destroyed layer"));
        }
        let session = match kind {
            SessionKind::Dynamic => Session::Dynamic(DynamicSession {
                grid: layer.grid(),
                before: BTreeMap::new(),
            }),
            SessionKind::Static => Session::Static(StaticSession {
                region: None,
                data: None,
            }),
        };
        self.recording = Some(ActiveRecording {
            layer: layer.id(),
            session,
        });
        Ok(())
    }

    /// Note a pixel's before-color. No-op unless a dynamic recording is
    /// open; only the first sighting of an index is kept, since that is the
    /// true before-state. This is the funnel for the layer pixel tap.
    pub fn cache_pixel(&mut self, index: usize, before: PackedColor) {
        if let Some(rec) = &mut self.recording
            && let Session::Dynamic(s) = &mut rec.session
        {
            s.cache(index, before);
        }
    }

    /// Snapshot `region` of the recorded layer (or its whole buffer) into
    /// the open static session. Valid at most once per session, and only
    /// for the layer the recording was opened against.
    pub fn cache_region(&mut self, layer: &Layer, region: Option<Region>) -> MuralResult<()> {
        let Some(rec) = &mut self.recording else {
            return Err(MuralError::protocol("cache_region while not recording"));
        };
        if rec.layer != layer.id() {
            return Err(MuralError::protocol(
                "cache_region against a layer other than the recorded one",
            ));
        }
        let Session::Static(s) = &mut rec.session else {
            return Err(MuralError::protocol(
                "cache_region during a dynamic recording",
            ));
        };
        if s.data.is_some() {
            return Err(MuralError::protocol("static session already cached"));
        }
        let clamped = match region {
            None => None,
            Some(r) => Some(r.clamped(layer.grid()).ok_or_else(|| {
                MuralError::validation("cache_region with a region outside the layer")
            })?),
        };
        s.region = clamped;
        s.data = Some(layer.clone_data(clamped));
        Ok(())
    }

    /// Close the open recording. An empty session is discarded; a non-empty
    /// one is pushed, truncating any abandoned redo future and evicting the
    /// oldest session when the stack is at capacity. Returns whether a
    /// session was pushed.
    pub fn stop(&mut self) -> MuralResult<bool> {
        let Some(rec) = self.recording.take() else {
            return Err(MuralError::protocol("stop while not recording"));
        };
        if rec.session.is_empty() {
            return Ok(false);
        }
        self.push(Entry {
            layer: rec.layer,
            session: rec.session,
        });
        Ok(true)
    }

    fn push(&mut self, entry: Entry) {
        self.stack.truncate(self.pointer);
        if self.stack.len() == self.capacity {
            tracing::debug!(capacity = self.capacity, "history full, evicting oldest");
            self.stack.remove(0);
        }
        self.stack.push(entry);
        self.pointer = self.stack.len();
    }

    /// Step one session back. Silent no-op (`Ok(None)`) at the bottom of the
    /// stack. Sessions whose layer no longer resolves are dropped instead of
    /// rewritten.
    #[tracing::instrument(skip(self, layers))]
    pub fn undo(&mut self, layers: &mut dyn LayerAccess) -> MuralResult<Option<Rewrite>> {
        if self.recording.is_some() {
            return Err(MuralError::protocol("undo during an open recording"));
        }
        while self.pointer > 0 {
            let target = self.stack[self.pointer - 1].layer;
            match layers.layer_mut(target) {
                Some(layer) => {
                    let region = self.stack[self.pointer - 1].session.rewrite(layer)?;
                    self.pointer -= 1;
                    return Ok(Some(Rewrite {
                        layer: target,
                        region,
                    }));
                }
                None => {
                    tracing::warn!(layer = ?target, "dropping undo session for a dead layer");
                    self.stack.remove(self.pointer - 1);
                    self.pointer -= 1;
                }
            }
        }
        Ok(None)
    }

    /// Step one session forward. Silent no-op (`Ok(None)`) at the top of the
    /// stack.
    #[tracing::instrument(skip(self, layers))]
    pub fn redo(&mut self, layers: &mut dyn LayerAccess) -> MuralResult<Option<Rewrite>> {
        if self.recording.is_some() {
            return Err(MuralError::protocol("redo during an open recording"));
        }
        while self.pointer < self.stack.len() {
            let target = self.stack[self.pointer].layer;
            match layers.layer_mut(target) {
                Some(layer) => {
                    let region = self.stack[self.pointer].session.rewrite(layer)?;
                    self.pointer += 1;
                    return Ok(Some(Rewrite {
                        layer: target,
                        region,
                    }));
                }
                None => {
                    tracing::warn!(layer = ?target, "dropping redo session for a dead layer");
                    self.stack.remove(self.pointer);
                }
            }
        }
        Ok(None)
    }

    /// Purge sessions whose target layer has been destroyed, repairing the
    /// pointer. The document calls this after tearing layers down.
    pub fn clean(&mut self, layers: &dyn LayerAccess) {
        if let Some(rec) = &self.recording
            && !layers.layer_alive(rec.layer)
        {
            self.recording = None;
        }

        let mut removed_before_pointer = 0;
        let pointer = self.pointer;
        let mut index = 0;
        self.stack.retain(|entry| {
            let keep = layers.layer_alive(entry.layer);
            if !keep && index < pointer {
                removed_before_pointer += 1;
            }
            index += 1;
            keep
        });
        if removed_before_pointer > 0 || self.pointer > self.stack.len() {
            tracing::debug!(
                removed = removed_before_pointer,
                "purged history sessions for dead layers"
            );
        }
        self.pointer = (self.pointer - removed_before_pointer).min(self.stack.len());
    }
}
