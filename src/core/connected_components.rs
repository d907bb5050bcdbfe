use crate::types::{AvoidError, AvoidResult, BooleanMask, CellValue, Grid, LabeledRegions};
use serde::{Deserialize, Serialize};

/// Neighborhood used to decide whether two cells touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connectivity {
    /// Edge neighbors only
    Four,
    /// Edge and corner neighbors
    #[default]
    Eight,
}

impl Connectivity {
    /// Neighbors already visited in a row-major scan
    fn backward_offsets(&self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(0, -1), (-1, 0)],
            Connectivity::Eight => &[(0, -1), (-1, -1), (-1, 0), (-1, 1)],
        }
    }
}

/// What to do when a mask handed to the size filter has no true cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmptyMaskPolicy {
    /// Return an all-false mask and log a warning
    #[default]
    AllFalse,
    /// Fail with `EmptyInput`
    Fail,
}

/// Cell count per group label (index 0 is background and always 0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSizeTable {
    counts: Vec<usize>,
}

impl GroupSizeTable {
    pub fn from_labels(labels: &LabeledRegions) -> Self {
        let max_label = labels.data().iter().copied().max().unwrap_or(0) as usize;
        let mut counts = vec![0usize; max_label + 1];
        for &label in labels.data().iter() {
            if label > 0 {
                counts[label as usize] += 1;
            }
        }
        Self { counts }
    }

    /// Cells in group `label`; 0 for background and unknown labels
    pub fn count(&self, label: u32) -> usize {
        match label {
            0 => 0,
            l => self.counts.get(l as usize).copied().unwrap_or(0),
        }
    }

    pub fn group_count(&self) -> usize {
        self.counts.len().saturating_sub(1)
    }

    /// Number of groups with strictly more than `min_size` cells
    pub fn groups_larger_than(&self, min_size: usize) -> usize {
        self.counts.iter().skip(1).filter(|&&n| n > min_size).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .skip(1)
            .map(|(label, &n)| (label as u32, n))
    }
}

/// Disjoint sets over provisional labels; label 0 is reserved for background
struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    fn new() -> Self {
        Self { parent: vec![0] }
    }

    fn make_set(&mut self) -> u32 {
        let id = self.parent.len() as u32;
        self.parent.push(id);
        id
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra < rb {
            self.parent[rb as usize] = ra;
        } else if rb < ra {
            self.parent[ra as usize] = rb;
        }
    }

    fn len(&self) -> usize {
        self.parent.len()
    }
}

/// Label connected groups of true cells.
///
/// Two-pass union-find. Labels are compact (`1..=n`) and numbered in
/// row-major order of each group's first cell. Nodata and 0 cells are
/// background.
pub fn label_components(mask: &BooleanMask, connectivity: Connectivity) -> LabeledRegions {
    let (rows, cols) = mask.dim();
    let mask_nodata = mask.nodata();
    let data = mask.data();
    let is_set = |v: u8| v > 0 && !v.is_nodata(mask_nodata);

    let mut labels: LabeledRegions = Grid::filled(*mask.frame(), 0u32, None);
    let provisional = labels.data_mut();
    let mut sets = UnionFind::new();
    let offsets = connectivity.backward_offsets();

    for r in 0..rows {
        for c in 0..cols {
            if !is_set(data[[r, c]]) {
                continue;
            }

            let mut assigned = 0u32;
            for &(dr, dc) in offsets {
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                if nr < 0 || nc < 0 || nc as usize >= cols {
                    continue;
                }
                let neighbor = provisional[[nr as usize, nc as usize]];
                if neighbor == 0 {
                    continue;
                }
                if assigned == 0 {
                    assigned = neighbor;
                } else {
                    sets.union(assigned, neighbor);
                }
            }

            if assigned == 0 {
                assigned = sets.make_set();
            }
            provisional[[r, c]] = assigned;
        }
    }

    // Resolve roots and renumber compactly in scan order
    let mut compact = vec![0u32; sets.len()];
    let mut next = 0u32;
    for label in provisional.iter_mut() {
        if *label == 0 {
            continue;
        }
        let root = sets.find(*label) as usize;
        if compact[root] == 0 {
            next += 1;
            compact[root] = next;
        }
        *label = compact[root];
    }

    log::debug!("Labeled {} connected groups ({:?})", next, connectivity);
    labels
}

/// Size filter parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentFilterParams {
    pub connectivity: Connectivity,
    /// Groups must have strictly more cells than this to survive
    pub min_size: usize,
    pub empty_policy: EmptyMaskPolicy,
}

impl Default for ComponentFilterParams {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Eight,
            min_size: 5,
            empty_policy: EmptyMaskPolicy::AllFalse,
        }
    }
}

/// Filtered mask plus the labeling it was derived from
#[derive(Debug, Clone)]
pub struct ComponentFilterResult {
    pub mask: BooleanMask,
    pub labels: LabeledRegions,
    pub sizes: GroupSizeTable,
}

impl ComponentFilterResult {
    pub fn groups_kept(&self, min_size: usize) -> usize {
        self.sizes.groups_larger_than(min_size)
    }
}

/// Connected-component size filter
#[derive(Debug, Clone, Default)]
pub struct ComponentFilter {
    params: ComponentFilterParams,
}

impl ComponentFilter {
    pub fn new(params: ComponentFilterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ComponentFilterParams {
        &self.params
    }

    /// Keep only cells whose group has more than `min_size` cells
    pub fn filter(&self, mask: &BooleanMask) -> AvoidResult<ComponentFilterResult> {
        let set_cells = mask.count_where(|v| v > 0);
        if set_cells == 0 {
            match self.params.empty_policy {
                EmptyMaskPolicy::Fail => {
                    return Err(AvoidError::EmptyInput(
                        "Mask has no true cells to group".to_string(),
                    ));
                }
                EmptyMaskPolicy::AllFalse => {
                    log::warn!("Mask has no true cells; size filter yields an all-false mask");
                }
            }
        }

        let labels = label_components(mask, self.params.connectivity);
        let sizes = GroupSizeTable::from_labels(&labels);
        let min_size = self.params.min_size;

        let filtered = labels.map(None, |label| {
            let label = label.unwrap_or(0);
            (sizes.count(label) > min_size) as u8
        });

        log::debug!(
            "Size filter kept {} of {} groups (> {} cells)",
            sizes.groups_larger_than(min_size),
            sizes.group_count(),
            min_size
        );

        Ok(ComponentFilterResult {
            mask: filtered,
            labels,
            sizes,
        })
    }
}

/// 8-connected size filter with the default empty-mask policy
pub fn size_filter(mask: &BooleanMask, min_size: usize) -> AvoidResult<BooleanMask> {
    let filter = ComponentFilter::new(ComponentFilterParams {
        min_size,
        ..ComponentFilterParams::default()
    });
    Ok(filter.filter(mask)?.mask)
}
