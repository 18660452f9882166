//! Monotone region partitioning.

use tracing::debug;

use crate::{
    CompactHeightfield,
    region::{RegionError, RegionId},
};

/// Sentinel for a sweep run bordering more than one region below.
const NULL_NEIGHBOR: u16 = 0xffff;

/// A horizontal run of spans within one sweep row.
#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Row-local id.
    rid: u16,
    /// Final region id.
    id: u16,
    /// Number of samples bordering the neighbor below.
    ns: u16,
    /// The unique region id below, or [`NULL_NEIGHBOR`].
    nei: u16,
}

impl CompactHeightfield {
    /// Partitions the walkable surface into regions with one row-major sweep.
    /// Each horizontal run of connected spans joins the unique region below
    /// it, or starts a new region. Monotone partitioning never produces
    /// overlapping regions, but tends towards long thin slices.
    ///
    /// The result is stored in the `region` field of each span and in
    /// [`CompactHeightfield::max_region`].
    pub fn build_regions_monotone(
        &mut self,
        border_size: u16,
        min_region_area: usize,
        merge_region_area: usize,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let id = self.monotone_sweep(border_size, &mut src_reg)?;

        if id == 1 && src_reg.iter().all(|&region| region == RegionId::NONE) {
            return Err(RegionError::NoWalkableSpans);
        }

        // Monotone partitioning does not generate overlapping regions.
        let (max_region, _overlap) = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            RegionId::from(id),
            &mut src_reg,
        );
        self.max_region = max_region;
        debug!(
            "Monotone partitioning produced {} regions",
            max_region.bits()
        );

        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    /// Sweeps the grid row by row, assigning a preliminary region id to every
    /// walkable span. Paints border regions first when `border_size` is set.
    /// Returns the next free region id.
    pub(crate) fn monotone_sweep(
        &mut self,
        border_size: u16,
        src_reg: &mut [RegionId],
    ) -> Result<u16, RegionError> {
        let mut id = 1_u16;

        // One slot per possible run in a row, plus one since run ids start at 1.
        let sweep_count = self.width.max(self.height) as usize + 1;
        let mut sweeps = vec![SweepSpan::default(); sweep_count];

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
                RegionId::from(id) | RegionId::BORDER_REGION,
                src_reg,
            );
            id += 1;
            self.paint_rect_region(
                self.width - border_width,
                self.width,
                0,
                self.height,
                RegionId::from(id) | RegionId::BORDER_REGION,
                src_reg,
            );
            id += 1;
            self.paint_rect_region(
                0,
                self.width,
                0,
                border_height,
                RegionId::from(id) | RegionId::BORDER_REGION,
                src_reg,
            );
            id += 1;
            self.paint_rect_region(
                0,
                self.width,
                self.height - border_height,
                self.height,
                RegionId::from(id) | RegionId::BORDER_REGION,
                src_reg,
            );
            id += 1;
        }
        self.border_size = border_size;

        let mut prev: Vec<u32> = Vec::new();

        // Sweep one row at a time.
        for z in border_size..self.height - border_size {
            // Collect spans from this row.
            prev.clear();
            prev.resize(id as usize + 1, 0);
            let mut rid = 1_u16;

            for x in border_size..self.width - border_size {
                let cell = self.cell_at(x, z).clone();
                for i in cell.index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }

                    // -x neighbor
                    let mut previd = 0_u16;
                    if let Some(neighbor) = self.con_index(x, z, i, 0) {
                        if !src_reg[neighbor.index].is_border()
                            && self.areas[i] == self.areas[neighbor.index]
                        {
                            previd = src_reg[neighbor.index].bits();
                        }
                    }

                    if previd == 0 {
                        previd = rid;
                        rid += 1;
                        sweeps[previd as usize].rid = previd;
                        sweeps[previd as usize].ns = 0;
                        sweeps[previd as usize].nei = 0;
                    }

                    // -z neighbor
                    if let Some(neighbor) = self.con_index(x, z, i, 3) {
                        let neighbor_region = src_reg[neighbor.index];
                        if neighbor_region != RegionId::NONE
                            && !neighbor_region.is_border()
                            && self.areas[i] == self.areas[neighbor.index]
                        {
                            let nr = neighbor_region.bits();
                            let sweep = &mut sweeps[previd as usize];
                            if sweep.nei == 0 || sweep.nei == nr {
                                sweep.nei = nr;
                                sweep.ns += 1;
                                prev[nr as usize] += 1;
                            } else {
                                sweep.nei = NULL_NEIGHBOR;
                            }
                        }
                    }

                    src_reg[i] = RegionId::from(previd);
                }
            }

            // Create unique ids.
            for sweep in sweeps[1..rid as usize].iter_mut() {
                if sweep.nei != NULL_NEIGHBOR
                    && sweep.nei != 0
                    && prev[sweep.nei as usize] == sweep.ns as u32
                {
                    sweep.id = sweep.nei;
                } else {
                    if id == RegionId::MAX {
                        return Err(RegionError::TooManyRegions);
                    }
                    sweep.id = id;
                    id += 1;
                }
            }

            // Remap row-local ids to region ids.
            for x in border_size..self.width - border_size {
                let cell = self.cell_at(x, z).clone();
                for i in cell.index_range() {
                    let region = src_reg[i].bits();
                    if region > 0 && region < rid {
                        src_reg[i] = RegionId::from(sweeps[region as usize].id);
                    }
                }
            }
        }

        Ok(id)
    }
}
