//! CollisionResolver - split overcrowded levels into virtual rows
//!
//! Every distinct level starts as one sublevel. A sublevel with more than
//! `T` members (by order, ties by id) is split into `ceil(n / T)` balanced
//! rows, larger rows first. Sublevel ids are then numbered 0.. top-down.

use std::collections::BTreeMap;

use crate::model::NodeId;

/// Input for one node
#[derive(Debug, Clone, PartialEq)]
pub struct SublevelMember {
    pub node: usize,
    pub id: NodeId,
    pub level: u32,
    pub order: f64,
}

/// Where a node ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SublevelSlot {
    pub sublevel_id: u32,
    /// Virtual row within the node's level (0 = first)
    pub row: u32,
}

/// Result of a collision pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionReport {
    slots: BTreeMap<usize, SublevelSlot>,
    /// level -> number of virtual rows
    rows: BTreeMap<u32, u32>,
    split_levels: usize,
}

impl CollisionReport {
    #[inline]
    pub fn slot(&self, node: usize) -> Option<SublevelSlot> {
        self.slots.get(&node).copied()
    }

    pub fn total_sublevels(&self) -> usize {
        self.rows.values().map(|&r| r as usize).sum()
    }

    pub fn total_levels(&self) -> usize {
        self.rows.len()
    }

    /// Levels that had to be split
    pub fn split_levels(&self) -> usize {
        self.split_levels
    }

    /// Rows per level, ascending by level
    pub fn rows(&self) -> &BTreeMap<u32, u32> {
        &self.rows
    }

    /// Extra rows contributed by each level below `level`, cumulative
    ///
    /// Returns `level -> extra rows above it` for every populated level.
    pub fn extra_rows_before(&self) -> BTreeMap<u32, u32> {
        let mut extra = BTreeMap::new();
        let mut acc = 0;
        for (&level, &rows) in &self.rows {
            extra.insert(level, acc);
            acc += rows.saturating_sub(1);
        }
        extra
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CollisionResolver {
    threshold: usize,
}

impl Default for CollisionResolver {
    fn default() -> Self {
        Self { threshold: 10 }
    }
}

impl CollisionResolver {
    /// `threshold` is clamped to at least 1
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Balanced row sizes for `count` members, larger rows first
    pub fn split_sizes(count: usize, threshold: usize) -> Vec<usize> {
        let threshold = threshold.max(1);
        if count == 0 {
            return Vec::new();
        }
        let parts = count.div_ceil(threshold);
        let base = count / parts;
        let larger = count % parts;
        (0..parts)
            .map(|i| if i < larger { base + 1 } else { base })
            .collect()
    }

    pub fn resolve(&self, members: &[SublevelMember]) -> CollisionReport {
        let mut by_level: BTreeMap<u32, Vec<&SublevelMember>> = BTreeMap::new();
        for member in members {
            by_level.entry(member.level).or_default().push(member);
        }

        let mut report = CollisionReport::default();
        let mut next_id: u32 = 0;

        for (level, mut group) in by_level {
            group.sort_by(|a, b| a.order.total_cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
            let sizes = Self::split_sizes(group.len(), self.threshold);
            if sizes.len() > 1 {
                report.split_levels += 1;
                tracing::debug!(level, members = group.len(), rows = sizes.len(), "split level");
            }

            let mut members = group.into_iter();
            for (row, size) in sizes.iter().enumerate() {
                for member in members.by_ref().take(*size) {
                    report.slots.insert(
                        member.node,
                        SublevelSlot {
                            sublevel_id: next_id,
                            row: row as u32,
                        },
                    );
                }
                next_id += 1;
            }
            report.rows.insert(level, sizes.len() as u32);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn member(node: usize, level: u32, order: f64) -> SublevelMember {
        SublevelMember {
            node,
            id: Arc::from(format!("n{:03}", node)),
            level,
            order,
        }
    }

    #[test]
    fn split_sizes_balance_larger_first() {
        assert_eq!(CollisionResolver::split_sizes(15, 10), vec![8, 7]);
        assert_eq!(CollisionResolver::split_sizes(10, 10), vec![10]);
        assert_eq!(CollisionResolver::split_sizes(21, 10), vec![7, 7, 7]);
        assert_eq!(CollisionResolver::split_sizes(7, 3), vec![3, 2, 2]);
        assert!(CollisionResolver::split_sizes(0, 10).is_empty());
    }

    #[test]
    fn sparse_levels_keep_one_sublevel_each() {
        let members = vec![member(0, 0, 0.0), member(1, 4, 0.0), member(2, 4, 1.0)];
        let report = CollisionResolver::new(10).resolve(&members);
        assert_eq!(report.total_levels(), 2);
        assert_eq!(report.total_sublevels(), 2);
        assert_eq!(report.slot(0).unwrap().sublevel_id, 0);
        assert_eq!(report.slot(2).unwrap().sublevel_id, 1);
        assert_eq!(report.split_levels(), 0);
    }

    #[test]
    fn fifteen_blocks_split_eight_seven() {
        let mut members: Vec<SublevelMember> = (0..15).map(|i| member(i, 1, i as f64)).collect();
        members.push(member(15, 2, 0.0));
        let report = CollisionResolver::new(10).resolve(&members);

        let first_row = (0..15).filter(|&i| report.slot(i).unwrap().row == 0).count();
        assert_eq!(first_row, 8);
        assert_eq!(report.slot(7).unwrap(), SublevelSlot { sublevel_id: 0, row: 0 });
        assert_eq!(report.slot(8).unwrap(), SublevelSlot { sublevel_id: 1, row: 1 });
        // Next level continues the numbering
        assert_eq!(report.slot(15).unwrap().sublevel_id, 2);
        assert_eq!(report.total_sublevels(), 3);
        assert_eq!(report.extra_rows_before()[&2], 1);
    }

    #[test]
    fn rows_follow_order_not_input() {
        let members = vec![member(0, 0, 2.0), member(1, 0, 0.0), member(2, 0, 1.0)];
        let report = CollisionResolver::new(2).resolve(&members);
        assert_eq!(report.slot(1).unwrap().row, 0);
        assert_eq!(report.slot(2).unwrap().row, 0);
        assert_eq!(report.slot(0).unwrap().row, 1);
    }

    #[test]
    fn zero_threshold_is_clamped() {
        let resolver = CollisionResolver::new(0);
        assert_eq!(resolver.threshold(), 1);
        let report = resolver.resolve(&[member(0, 0, 0.0), member(1, 0, 1.0)]);
        assert_eq!(report.total_sublevels(), 2);
    }
}
