//! Layer region partitioning.

use tracing::debug;

use crate::{
    CompactHeightfield,
    region::{RegionData, RegionError, RegionId},
};

impl CompactHeightfield {
    /// Partitions the walkable surface into 2D layer regions. Runs the
    /// monotone sweep first and then merges connected sweep regions that do
    /// not overlap vertically into layers. Useful as input for navmeshes of
    /// multi-story structures.
    ///
    /// The result is stored in the `region` field of each span and in
    /// [`CompactHeightfield::max_region`].
    pub fn build_layer_regions(
        &mut self,
        border_size: u16,
        min_region_area: usize,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let id = self.monotone_sweep(border_size, &mut src_reg)?;

        if id == 1 && src_reg.iter().all(|&region| region == RegionId::NONE) {
            return Err(RegionError::NoWalkableSpans);
        }

        let max_region =
            self.merge_and_filter_layer_regions(min_region_area, RegionId::from(id), &mut src_reg);
        self.max_region = max_region;
        debug!("Layer partitioning produced {} regions", max_region.bits());

        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    /// Merges connected, non-overlapping sweep regions into layers, removes
    /// small layers and compresses the ids. Returns the new maximum region
    /// id.
    fn merge_and_filter_layer_regions(
        &self,
        min_region_area: usize,
        max_region_id: RegionId,
        src_reg: &mut [RegionId],
    ) -> RegionId {
        let region_count = max_region_id.index() as usize + 1;
        let mut regions: Vec<RegionData> = (0..region_count)
            .map(|id| RegionData::new(RegionId::from(id as u16)))
            .collect();

        // Construct regions.
        let mut column_regions: Vec<u16> = Vec::with_capacity(32);
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z).clone();
                column_regions.clear();

                for i in cell.index_range() {
                    let ri = src_reg[i];
                    if ri == RegionId::NONE
                        || ri.is_border()
                        || ri.index() as usize >= region_count
                    {
                        continue;
                    }
                    let span_y = self.spans[i].y;
                    {
                        let region = &mut regions[ri.index() as usize];
                        region.span_count += 1;
                        region.ymin = region.ymin.min(span_y);
                        region.ymax = region.ymax.max(span_y);
                        region.area = self.areas[i];
                    }
                    // Collect all region layers stacked in this column.
                    column_regions.push(ri.bits());

                    // Update neighbors.
                    for dir in 0..4 {
                        let Some(neighbor) = self.con_index(x, z, i, dir) else {
                            continue;
                        };
                        let rai = src_reg[neighbor.index];
                        if rai.is_border() {
                            regions[ri.index() as usize].connects_to_border = true;
                            continue;
                        }
                        if rai != RegionId::NONE
                            && (rai.index() as usize) < region_count
                            && rai != ri
                        {
                            regions[ri.index() as usize].add_unique_connection(rai.bits());
                        }
                    }
                }

                // Update overlapping regions.
                for i in 0..column_regions.len() {
                    for j in (i + 1)..column_regions.len() {
                        if column_regions[i] != column_regions[j] {
                            let (a, b) =
                                (column_regions[i] as usize, column_regions[j] as usize);
                            regions[a].add_unique_floor(column_regions[j]);
                            regions[b].add_unique_floor(column_regions[i]);
                        }
                    }
                }
            }
        }

        // Create 2D layers from regions.
        for region in regions.iter_mut() {
            region.id = RegionId::NONE;
        }

        // Merge monotone regions into non-overlapping layers.
        let mut layer_id = 1_u16;
        let mut stack: Vec<usize> = Vec::with_capacity(32);
        for root_index in 1..region_count {
            if regions[root_index].id != RegionId::NONE {
                continue;
            }

            regions[root_index].id = RegionId::from(layer_id);
            stack.clear();
            stack.push(root_index);

            while !stack.is_empty() {
                let region_index = stack.remove(0);
                let connections = regions[region_index].connections.clone();

                for connection in connections {
                    let neighbor_index = connection as usize;
                    // Skip already visited.
                    if regions[neighbor_index].id != RegionId::NONE {
                        continue;
                    }
                    // Do not connect regions with different area types.
                    if regions[region_index].area != regions[neighbor_index].area {
                        continue;
                    }
                    // Skip if the neighbor overlaps the root region.
                    if regions[root_index].floors.contains(&connection) {
                        continue;
                    }

                    stack.push(neighbor_index);

                    regions[neighbor_index].id = RegionId::from(layer_id);
                    // Merge the neighbor's layers into the root.
                    let neighbor_floors = regions[neighbor_index].floors.clone();
                    for floor in neighbor_floors {
                        regions[root_index].add_unique_floor(floor);
                    }
                    regions[root_index].ymin =
                        regions[root_index].ymin.min(regions[neighbor_index].ymin);
                    regions[root_index].ymax =
                        regions[root_index].ymax.max(regions[neighbor_index].ymax);
                    regions[root_index].span_count += regions[neighbor_index].span_count;
                    regions[neighbor_index].span_count = 0;
                    regions[root_index].connects_to_border = regions[root_index]
                        .connects_to_border
                        || regions[neighbor_index].connects_to_border;
                }
            }

            layer_id += 1;
        }

        // Remove small layers. Layers touching a grid border are kept since
        // their true size is unknown.
        for i in 0..region_count {
            if regions[i].span_count > 0
                && regions[i].span_count < min_region_area
                && !regions[i].connects_to_border
            {
                let removed_id = regions[i].id;
                for region in regions.iter_mut() {
                    if region.id == removed_id {
                        region.id = RegionId::NONE;
                    }
                }
            }
        }

        // Compress region ids.
        for region in regions.iter_mut() {
            region.remap = region.id != RegionId::NONE && !region.id.is_border();
        }
        let mut region_id_generator = 0_u16;
        for i in 0..region_count {
            if !regions[i].remap {
                continue;
            }
            region_id_generator += 1;
            let old_id = regions[i].id;
            let new_id = RegionId::from(region_id_generator);
            for region in regions[i..].iter_mut() {
                if region.id == old_id {
                    region.id = new_id;
                    region.remap = false;
                }
            }
        }

        // Remap the spans.
        for region in src_reg.iter_mut() {
            if !region.is_border() {
                *region = regions[region.index() as usize].id;
            }
        }

        RegionId::from(region_id_generator)
    }
}
