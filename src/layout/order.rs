//! OrderAssigner - fractional horizontal order within each layer
//!
//! New nodes go between neighbours (midpoint) or at the tail, so an insert
//! never touches the rest of the layer. When a gap shrinks below
//! [`ORDER_EPSILON`] the layer is renumbered to `0, 1, 2, ...` keeping the
//! relative order (ties by node id).

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Result, StrataError};
use crate::event::{EventEmitter, EventKind};
use crate::model::NodeId;

/// Distance between consecutive orders after a renumber
pub const ORDER_SPACING: f64 = 1.0;

/// Smallest gap still considered splittable
pub const ORDER_EPSILON: f64 = 1e-6;

/// Where to put a node inside its layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// After the current maximum
    Tail,
    /// Between two nodes already in the layer
    Between { prev: usize, next: usize },
    /// As close as possible to a previous order value
    Near(f64),
}

/// A node's slot in a layer
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub node: usize,
    pub id: NodeId,
    pub order: f64,
}

/// Per-layer sorted order lists, plus a node -> (layer, order) index
#[derive(Debug, Clone, Default)]
pub struct OrderAssigner {
    layers: FxHashMap<u32, Vec<Slot>>,
    positions: FxHashMap<usize, (u32, f64)>,
    renumbered: Vec<(u32, usize)>,
}

impl OrderAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place every node at the tail of its layer, in seq order
    ///
    /// `ids[i]` and `layers[i]` describe node `i`.
    pub fn build(ids: &[NodeId], layers: &[u32]) -> Self {
        let mut assigner = Self::new();
        for (node, (id, &layer)) in ids.iter().zip(layers).enumerate() {
            assigner.assign(node, id, layer, Placement::Tail);
        }
        assigner
    }

    /// Current (layer, order) of a node
    #[inline]
    pub fn position(&self, node: usize) -> Option<(u32, f64)> {
        self.positions.get(&node).copied()
    }

    #[inline]
    pub fn order(&self, node: usize) -> Option<f64> {
        self.position(node).map(|(_, order)| order)
    }

    /// Members of a layer sorted by order
    pub fn layer(&self, layer: u32) -> &[Slot] {
        self.layers.get(&layer).map_or(&[], Vec::as_slice)
    }

    /// Layer indices in use (unsorted)
    pub fn layer_keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.layers.keys().copied()
    }

    /// Layers renumbered since the last call, with their sizes
    pub fn take_renumbered(&mut self) -> Vec<(u32, usize)> {
        std::mem::take(&mut self.renumbered)
    }

    /// Emit renumber events and clear the record
    pub fn drain_renumbered(&mut self, emitter: &dyn EventEmitter) -> Vec<u32> {
        self.take_renumbered()
            .into_iter()
            .map(|(layer, size)| {
                emitter.emit(EventKind::LayerRenumbered { layer, size });
                layer
            })
            .collect()
    }

    /// Assign an order to `node` in `layer`; the node must not be placed yet
    pub fn assign(&mut self, node: usize, id: &NodeId, layer: u32, placement: Placement) -> f64 {
        // Renumbering always opens a gap of ORDER_SPACING, so the retry succeeds
        match self.try_assign(node, id, layer, placement) {
            Ok(order) => order,
            Err(_) => {
                self.renumber_layer(layer);
                self.try_assign(node, id, layer, placement)
                    .unwrap_or_else(|_| self.insert_tail(node, id, layer))
            }
        }
    }

    /// Place a node at a known order (hydration); renumbers on a clash
    pub fn insert_at(&mut self, node: usize, id: &NodeId, layer: u32, order: f64) {
        let slots = self.layers.entry(layer).or_default();
        let pos = slots.partition_point(|s| s.order < order);
        let clash = slots
            .get(pos)
            .is_some_and(|s| (s.order - order).abs() < ORDER_EPSILON)
            || pos
                .checked_sub(1)
                .and_then(|p| slots.get(p))
                .is_some_and(|s| (order - s.order).abs() < ORDER_EPSILON);
        slots.insert(
            pos,
            Slot {
                node,
                id: Arc::clone(id),
                order,
            },
        );
        self.positions.insert(node, (layer, order));
        if clash {
            self.renumber_layer(layer);
        }
    }

    /// Remove a node; returns its former (layer, order)
    pub fn remove(&mut self, node: usize) -> Option<(u32, f64)> {
        let (layer, order) = self.positions.remove(&node)?;
        if let Some(slots) = self.layers.get_mut(&layer) {
            slots.retain(|s| s.node != node);
            if slots.is_empty() {
                self.layers.remove(&layer);
            }
        }
        Some((layer, order))
    }

    /// Move a node to another layer, keeping it near its old order
    pub fn move_to(&mut self, node: usize, id: &NodeId, layer: u32) -> f64 {
        match self.remove(node) {
            Some((old_layer, order)) if old_layer == layer => {
                self.insert_at(node, id, layer, order);
                self.order(node).unwrap_or(order)
            }
            Some((_, order)) => self.assign(node, id, layer, Placement::Near(order)),
            None => self.assign(node, id, layer, Placement::Tail),
        }
    }

    /// Reset a layer to `0, 1, 2, ...` by (order, id)
    pub fn renumber_layer(&mut self, layer: u32) {
        let Some(slots) = self.layers.get_mut(&layer) else {
            return;
        };
        slots.sort_by(|a, b| a.order.total_cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.order = i as f64 * ORDER_SPACING;
            self.positions.insert(slot.node, (layer, slot.order));
        }
        tracing::debug!(layer, size = slots.len(), "renumbered layer");
        self.renumbered.push((layer, slots.len()));
    }

    /// Single attempt; `RenumberRequired` when the target gap is exhausted
    fn try_assign(
        &mut self,
        node: usize,
        id: &NodeId,
        layer: u32,
        placement: Placement,
    ) -> Result<f64> {
        match placement {
            Placement::Tail => Ok(self.insert_tail(node, id, layer)),
            Placement::Between { prev, next } => {
                let slots = self.layer(layer);
                let Some(lo_pos) = slots.iter().position(|s| s.node == prev) else {
                    return Ok(self.insert_tail(node, id, layer));
                };
                let lo = slots[lo_pos].order;
                // Use the actual right-hand neighbour so the new order stays unique
                let hi = match slots.get(lo_pos + 1) {
                    Some(s) => {
                        if s.node != next {
                            tracing::debug!(layer, prev, next, "between: neighbours not adjacent");
                        }
                        s.order
                    }
                    None => return Ok(self.insert_tail(node, id, layer)),
                };
                let order = midpoint(layer, lo, hi)?;
                self.insert_at(node, id, layer, order);
                Ok(order)
            }
            Placement::Near(hint) => {
                let slots = self.layer(layer);
                let pos = slots.partition_point(|s| s.order < hint);
                let lo = pos.checked_sub(1).map(|p| slots[p].order);
                let hi = slots.get(pos).map(|s| s.order);

                let clear_lo = lo.is_none_or(|lo| hint - lo >= ORDER_EPSILON);
                let clear_hi = hi.is_none_or(|hi| hi - hint >= ORDER_EPSILON);
                let order = if clear_lo && clear_hi {
                    hint
                } else {
                    match (lo, hi) {
                        (Some(lo), Some(hi)) => {
                            // hi sits on the hint: go between it and its right neighbour
                            if !clear_hi {
                                match slots.get(pos + 1) {
                                    Some(next) => midpoint(layer, hi, next.order)?,
                                    None => hi + ORDER_SPACING,
                                }
                            } else {
                                midpoint(layer, lo, hi)?
                            }
                        }
                        (None, Some(hi)) => match slots.get(pos + 1) {
                            Some(next) => midpoint(layer, hi, next.order)?,
                            None => hi + ORDER_SPACING,
                        },
                        (Some(lo), None) => lo + ORDER_SPACING,
                        (None, None) => hint,
                    }
                };
                self.insert_at(node, id, layer, order);
                Ok(order)
            }
        }
    }

    fn insert_tail(&mut self, node: usize, id: &NodeId, layer: u32) -> f64 {
        let slots = self.layers.entry(layer).or_default();
        let order = slots.last().map_or(0.0, |s| s.order + ORDER_SPACING);
        slots.push(Slot {
            node,
            id: Arc::clone(id),
            order,
        });
        self.positions.insert(node, (layer, order));
        order
    }
}

fn midpoint(layer: u32, lo: f64, hi: f64) -> Result<f64> {
    let mid = (lo + hi) / 2.0;
    if hi - lo < ORDER_EPSILON || mid - lo < ORDER_EPSILON / 2.0 || hi - mid < ORDER_EPSILON / 2.0
    {
        return Err(StrataError::RenumberRequired { layer });
    }
    Ok(mid)
}
