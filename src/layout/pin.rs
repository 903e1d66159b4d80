//! PinConstraintResolver - exclusive levels for pinned nodes
//!
//! Pinned nodes own a level each, above every unpinned node:
//!
//! 1. Explicit levels are claimed in input order (ties by id). A level that
//!    is already held sends the later node to the next free level at or
//!    above its request, and the conflict is reported.
//! 2. Pinned nodes without a level take the smallest free levels, in order.
//! 3. Unpinned nodes map to `layer + offset`, `offset = max pinned level + 1`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::event::{EventEmitter, EventKind};
use crate::model::{NodeId, PinConflict};

/// A pinned node as seen by the resolver
#[derive(Debug, Clone, PartialEq)]
pub struct PinnedNode {
    pub node: usize,
    pub id: NodeId,
    pub level: Option<u32>,
}

/// Resolved pinned levels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PinResolution {
    /// node -> exclusive level
    levels: BTreeMap<usize, u32>,
    conflicts: Vec<PinConflict>,
    offset: u32,
}

impl PinResolution {
    #[inline]
    pub fn level_of(&self, node: usize) -> Option<u32> {
        self.levels.get(&node).copied()
    }

    /// First level available to unpinned nodes
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Level of a node: its pinned level, or `layer + offset`
    #[inline]
    pub fn level(&self, node: usize, layer: u32) -> u32 {
        self.level_of(node).unwrap_or(layer + self.offset)
    }

    pub fn conflicts(&self) -> &[PinConflict] {
        &self.conflicts
    }

    pub fn pinned_count(&self) -> usize {
        self.levels.len()
    }
}

/// Stateless resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct PinConstraintResolver {
    strict: bool,
}

impl PinConstraintResolver {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Resolve pinned levels; `pins` must be in input order
    ///
    /// With `strict` set the first conflict is returned as `PinConflict`.
    pub fn resolve(&self, pins: &[PinnedNode], emitter: &dyn EventEmitter) -> Result<PinResolution> {
        let mut claimed: BTreeMap<u32, NodeId> = BTreeMap::new();
        let mut resolution = PinResolution::default();

        // Input order already, stable sort keeps it; ids only break exact ties
        let mut explicit: Vec<&PinnedNode> = pins.iter().filter(|p| p.level.is_some()).collect();
        explicit.sort_by(|a, b| a.node.cmp(&b.node).then_with(|| a.id.cmp(&b.id)));

        for pin in explicit {
            let Some(requested) = pin.level else {
                continue;
            };
            if let Some(holder) = claimed.get(&requested).cloned() {
                let assigned = next_free(&claimed, requested);
                let conflict = PinConflict {
                    node_id: pin.id.to_string(),
                    holder: holder.to_string(),
                    requested,
                    assigned,
                };
                if self.strict {
                    return Err(StrataError::PinConflict {
                        node_id: conflict.node_id,
                        holder: conflict.holder,
                        requested,
                        assigned,
                    });
                }
                tracing::warn!(
                    node = %pin.id,
                    holder = %holder,
                    requested,
                    assigned,
                    "pinned level already held; reassigned"
                );
                emitter.emit(EventKind::PinConflictResolved {
                    node_id: Arc::clone(&pin.id),
                    holder,
                    requested,
                    assigned,
                });
                resolution.conflicts.push(conflict);
                claimed.insert(assigned, Arc::clone(&pin.id));
                resolution.levels.insert(pin.node, assigned);
            } else {
                claimed.insert(requested, Arc::clone(&pin.id));
                resolution.levels.insert(pin.node, requested);
            }
        }

        let mut cursor = 0;
        for pin in pins.iter().filter(|p| p.level.is_none()) {
            cursor = next_free(&claimed, cursor);
            claimed.insert(cursor, Arc::clone(&pin.id));
            resolution.levels.insert(pin.node, cursor);
        }

        resolution.offset = claimed.keys().next_back().map_or(0, |max| max + 1);
        Ok(resolution)
    }
}

fn next_free(claimed: &BTreeMap<u32, NodeId>, from: u32) -> u32 {
    let mut level = from;
    while claimed.contains_key(&level) {
        level += 1;
    }
    level
}
