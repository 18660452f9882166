//! Watershed region partitioning.

use tracing::debug;

use crate::{
    CompactHeightfield,
    region::{RegionError, RegionId},
};

#[derive(Clone, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance: u16,
}

impl CompactHeightfield {
    /// Partitions the walkable surface into regions by flooding the distance
    /// field from its peaks downwards. Non-null regions consist of connected,
    /// non-overlapping walkable spans that form a single contour.
    ///
    /// Clusters of regions smaller than `min_region_area` spans are removed
    /// unless they touch a grid border. Regions smaller than
    /// `merge_region_area` are merged into neighbors where possible.
    ///
    /// The result is stored in the `region` field of each span and in
    /// [`CompactHeightfield::max_region`].
    ///
    /// Region assignment is deterministic: all scans run row-major over
    /// cells and ascending over span indices, so repeated builds of the same
    /// input yield identical ids.
    ///
    /// The distance field must be built with
    /// [`CompactHeightfield::build_distance_field`] first.
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: usize,
        merge_region_area: usize,
    ) -> Result<(), RegionError> {
        const LOG_NB_STACKS: usize = 3;
        const NB_STACKS: usize = 1 << LOG_NB_STACKS;
        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] = [const { Vec::new() }; NB_STACKS];
        for stack in &mut level_stacks {
            stack.reserve(256);
        }
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let mut region_id = 1_u16;
        let mut level = (self.max_distance + 1) & !1;

        // How much the watershed "overflows" and simplifies the regions per
        // level before new seeds are planted.
        let expand_iters = 8;

        if border_size > 0 {
            // Make sure border will not overflow.
            let border_width = border_size.min(self.width);
            let border_height = border_size.min(self.height);

            // Paint regions
            self.paint_rect_region(
                0,
                border_width,
                0,
                self.height,
                RegionId::from(region_id) | RegionId::BORDER_REGION,
                &mut src_reg,
            );
            region_id += 1;
            self.paint_rect_region(
                self.width - border_width,
                self.width,
                0,
                self.height,
                RegionId::from(region_id) | RegionId::BORDER_REGION,
                &mut src_reg,
            );
            region_id += 1;
            self.paint_rect_region(
                0,
                self.width,
                0,
                border_height,
                RegionId::from(region_id) | RegionId::BORDER_REGION,
                &mut src_reg,
            );
            region_id += 1;
            self.paint_rect_region(
                0,
                self.width,
                self.height - border_height,
                self.height,
                RegionId::from(region_id) | RegionId::BORDER_REGION,
                &mut src_reg,
            );
            region_id += 1;
        }
        self.border_size = border_size;

        let mut s_id = -1_i32;
        while level > 0 {
            level = level.saturating_sub(2);
            s_id = (s_id + 1) & (NB_STACKS as i32 - 1);

            if s_id == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks, 1);
            } else {
                // Copy left overs from last level.
                let (src, dst) = level_stacks.split_at_mut(s_id as usize);
                append_stacks(&src[s_id as usize - 1], &mut dst[0], &src_reg);
            }

            // Expand current regions until no empty connected cells are found.
            self.expand_regions(
                expand_iters,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[s_id as usize],
                false,
            );

            // Mark new regions with ids.
            for entry_index in 0..level_stacks[s_id as usize].len() {
                let entry = level_stacks[s_id as usize][entry_index].clone();
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    continue;
                }
                if self.flood_region(
                    entry.x,
                    entry.z,
                    i,
                    level,
                    RegionId::from(region_id),
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                ) {
                    if region_id == RegionId::MAX {
                        return Err(RegionError::TooManyRegions);
                    }
                    region_id += 1;
                }
            }
        }

        // Expand current regions until no empty connected cells are found.
        self.expand_regions(
            expand_iters * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        if region_id == 1 && src_reg.iter().all(|&region| region == RegionId::NONE) {
            return Err(RegionError::NoWalkableSpans);
        }

        let (max_region, _overlap) = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            RegionId::from(region_id),
            &mut src_reg,
        );
        self.max_region = max_region;
        debug!(
            "Watershed partitioning produced {} regions",
            max_region.bits()
        );

        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>],
        log_levels_per_stack: u16,
    ) {
        let start_level = start_level >> log_levels_per_stack;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // Put all cells in the level range into the appropriate stacks.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    if !self.areas[i].is_walkable() || src_reg[i] != RegionId::NONE {
                        continue;
                    }
                    let level = self.dist[i] >> log_levels_per_stack;
                    let s_id = start_level.saturating_sub(level);
                    if s_id >= stacks.len() as u16 {
                        continue;
                    }
                    stacks[s_id as usize].push(LevelStackEntry {
                        x,
                        z,
                        index: Some(i),
                    });
                }
            }
        }
    }

    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for z in 0..self.height {
                for x in 0..self.width {
                    let cell = self.cell_at(x, z);
                    for i in cell.index_range() {
                        if self.dist[i] >= level
                            && src_reg[i] == RegionId::NONE
                            && self.areas[i].is_walkable()
                        {
                            stack.push(LevelStackEntry {
                                x,
                                z,
                                index: Some(i),
                            });
                        }
                    }
                }
            }
        } else {
            // Use cells in the input stack, skipping those that already
            // got a region.
            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries: Vec<DirtyEntry> = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let x = entry.x;
                let z = entry.z;
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut distance = u16::MAX;
                let area = self.areas[i];
                for dir in 0..4 {
                    let Some(neighbor) = self.con_index(x, z, i, dir) else {
                        continue;
                    };
                    if self.areas[neighbor.index] != area {
                        continue;
                    }
                    let neighbor_region = src_reg[neighbor.index];
                    if neighbor_region == RegionId::NONE || neighbor_region.is_border() {
                        continue;
                    }
                    let neighbor_distance = src_dist[neighbor.index].saturating_add(2);
                    if neighbor_distance < distance {
                        region = neighbor_region;
                        distance = neighbor_distance;
                    }
                }
                if region != RegionId::NONE {
                    // Mark as used.
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance,
                    });
                } else {
                    failed += 1;
                }
            }
            // Copy the dirty entries over in a second step so that earlier
            // assignments within one sweep do not influence later ones.
            for dirty_entry in dirty_entries.iter() {
                src_reg[dirty_entry.index] = dirty_entry.region;
                src_dist[dirty_entry.index] = dirty_entry.distance;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    /// Floods a new region from the given seed span across all connected
    /// spans at or above the current level. Returns whether any span was
    /// claimed. Spans bordering a foreign region (including diagonally) are
    /// given back to stay out of its watershed.
    #[allow(clippy::too_many_arguments)]
    fn flood_region(
        &self,
        x: u16,
        z: u16,
        span_index: usize,
        level: u16,
        region_id: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let area = self.areas[span_index];

        stack.clear();
        stack.push(LevelStackEntry {
            x,
            z,
            index: Some(span_index),
        });
        src_reg[span_index] = region_id;
        src_dist[span_index] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(entry) = stack.pop() {
            let Some(current_index) = entry.index else {
                continue;
            };

            // Check if any of the neighbors already have a valid region set.
            let mut foreign_region = RegionId::NONE;
            'neighbors: for dir in 0..4 {
                let Some(neighbor) = self.con_index(entry.x, entry.z, current_index, dir) else {
                    continue;
                };
                if self.areas[neighbor.index] != area {
                    continue;
                }
                let neighbor_region = src_reg[neighbor.index];
                // Do not take borders into account.
                if neighbor_region.is_border() {
                    continue;
                }
                if neighbor_region != RegionId::NONE && neighbor_region != region_id {
                    foreign_region = neighbor_region;
                    break 'neighbors;
                }

                // Check the diagonal as well for an 8-connected neighborhood.
                let diagonal_dir = (dir + 1) & 0x3;
                let Some(diagonal) =
                    self.con_index(neighbor.x, neighbor.z, neighbor.index, diagonal_dir)
                else {
                    continue;
                };
                if self.areas[diagonal.index] != area {
                    continue;
                }
                let diagonal_region = src_reg[diagonal.index];
                if !diagonal_region.is_border()
                    && diagonal_region != RegionId::NONE
                    && diagonal_region != region_id
                {
                    foreign_region = diagonal_region;
                    break 'neighbors;
                }
            }
            if foreign_region != RegionId::NONE {
                src_reg[current_index] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbors.
            for dir in 0..4 {
                let Some(neighbor) = self.con_index(entry.x, entry.z, current_index, dir) else {
                    continue;
                };
                if self.areas[neighbor.index] != area {
                    continue;
                }
                if self.dist[neighbor.index] >= lev && src_reg[neighbor.index] == RegionId::NONE {
                    src_reg[neighbor.index] = region_id;
                    src_dist[neighbor.index] = 0;
                    stack.push(LevelStackEntry {
                        x: neighbor.x,
                        z: neighbor.z,
                        index: Some(neighbor.index),
                    });
                }
            }
        }

        count > 0
    }
}

fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_reg: &[RegionId],
) {
    for entry in src_stack.iter() {
        let Some(i) = entry.index else {
            continue;
        };
        if src_reg[i] != RegionId::NONE {
            continue;
        }
        dst_stack.push(entry.clone());
    }
}
