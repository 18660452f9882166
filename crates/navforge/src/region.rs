//! Region ids and the merge and filter post-pass shared by all partitioning
//! algorithms.

use thiserror::Error;
use tracing::warn;

use crate::{CompactHeightfield, span::AreaType};

bitflags::bitflags! {
    /// The id of a region of connected walkable spans.
    /// The high bit marks regions painted onto the grid border.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RegionId: u16 {
        /// Spans that do not belong to any region.
        const NONE = 0;
        /// Marker for regions painted onto the grid border.
        const BORDER_REGION = 0x8000;
    }
}

impl RegionId {
    /// The highest possible plain region id.
    pub const MAX: u16 = 0x7fff;

    /// The id without the border marker.
    #[inline]
    pub fn index(self) -> u16 {
        self.bits() & !Self::BORDER_REGION.bits()
    }

    /// Whether this region was painted onto the grid border.
    #[inline]
    pub fn is_border(self) -> bool {
        self.contains(Self::BORDER_REGION)
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        Self::from_bits_retain(value)
    }
}

/// Errors that can occur during region partitioning.
#[derive(Error, Debug)]
pub enum RegionError {
    /// The compact heightfield has no walkable spans to partition.
    #[error("No walkable spans to partition into regions")]
    NoWalkableSpans,
    /// More regions were created than fit into a region id.
    #[error("Region id overflow: more than {max} regions", max = RegionId::MAX)]
    TooManyRegions,
}

/// Bookkeeping for one region during the merge and filter pass.
#[derive(Debug, Clone)]
pub(crate) struct RegionData {
    pub(crate) span_count: usize,
    pub(crate) id: RegionId,
    pub(crate) area: AreaType,
    pub(crate) remap: bool,
    pub(crate) visited: bool,
    pub(crate) overlap: bool,
    pub(crate) connects_to_border: bool,
    pub(crate) ymin: u16,
    pub(crate) ymax: u16,
    /// Region ids encountered while walking this region's contour, in order.
    pub(crate) connections: Vec<u16>,
    /// Region ids stacked above or below this region in some column.
    pub(crate) floors: Vec<u16>,
}

impl RegionData {
    pub(crate) fn new(id: RegionId) -> Self {
        Self {
            span_count: 0,
            id,
            area: AreaType::NOT_WALKABLE,
            remap: false,
            visited: false,
            overlap: false,
            connects_to_border: false,
            ymin: u16::MAX,
            ymax: 0,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn is_connected_to_border(&self) -> bool {
        // Region is connected to border if one of its neighbours is the null id.
        self.connections.contains(&0)
    }

    pub(crate) fn add_unique_floor(&mut self, floor: u16) {
        if !self.floors.contains(&floor) {
            self.floors.push(floor);
        }
    }

    pub(crate) fn add_unique_connection(&mut self, neighbor: u16) {
        if !self.connections.contains(&neighbor) {
            self.connections.push(neighbor);
        }
    }

    fn remove_adjacent_duplicate_connections(&mut self) {
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let next = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[next] {
                self.connections.remove(next);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbor(&mut self, old_id: u16, new_id: u16) {
        let mut connection_changed = false;
        for connection in &mut self.connections {
            if *connection == old_id {
                *connection = new_id;
                connection_changed = true;
            }
        }
        for floor in &mut self.floors {
            if *floor == old_id {
                *floor = new_id;
            }
        }
        if connection_changed {
            self.remove_adjacent_duplicate_connections();
        }
    }
}

/// Both regions keep a single shared edge and no floor overlap, so merging
/// them keeps the result simply connected.
fn can_merge_with_region(a: &RegionData, b: &RegionData) -> bool {
    if a.area != b.area {
        return false;
    }
    let shared_edges = a
        .connections
        .iter()
        .filter(|&&connection| connection == b.id.bits())
        .count();
    if shared_edges != 1 {
        return false;
    }
    if a.floors.contains(&b.id.bits()) {
        return false;
    }
    true
}

/// Concatenates `b`'s contour neighborhood into `a`, rotated so that the
/// shared edge vanishes.
fn merge_regions(regions: &mut [RegionData], a: usize, b: usize) -> bool {
    let a_id = regions[a].id.bits();
    let b_id = regions[b].id.bits();

    let a_connections = regions[a].connections.clone();
    let b_connections = regions[b].connections.clone();

    let Some(insert_a) = a_connections
        .iter()
        .position(|&connection| connection == b_id)
    else {
        return false;
    };
    let Some(insert_b) = b_connections
        .iter()
        .position(|&connection| connection == a_id)
    else {
        return false;
    };

    let mut merged = Vec::with_capacity(a_connections.len() + b_connections.len());
    let n = a_connections.len();
    for i in 0..n.saturating_sub(1) {
        merged.push(a_connections[(insert_a + 1 + i) % n]);
    }
    let n = b_connections.len();
    for i in 0..n.saturating_sub(1) {
        merged.push(b_connections[(insert_b + 1 + i) % n]);
    }
    regions[a].connections = merged;
    regions[a].remove_adjacent_duplicate_connections();

    let b_floors = regions[b].floors.clone();
    for floor in b_floors {
        regions[a].add_unique_floor(floor);
    }
    regions[a].span_count += regions[b].span_count;
    regions[b].span_count = 0;
    regions[b].connections.clear();
    true
}

impl CompactHeightfield {
    /// Whether the edge of span `span_index` in `dir` borders another region.
    pub(crate) fn is_solid_edge(
        &self,
        src_reg: &[RegionId],
        x: u16,
        z: u16,
        span_index: usize,
        dir: u8,
    ) -> bool {
        let neighbor_region = self
            .con_index(x, z, span_index, dir)
            .map(|neighbor| src_reg[neighbor.index])
            .unwrap_or(RegionId::NONE);
        neighbor_region != src_reg[span_index]
    }

    /// Walks the contour of the region containing `span_index` clockwise and
    /// collects the distinct neighbor region ids along the way.
    pub(crate) fn walk_region_contour(
        &self,
        src_reg: &[RegionId],
        mut x: u16,
        mut z: u16,
        mut span_index: usize,
        mut dir: u8,
        contour: &mut Vec<u16>,
    ) {
        let start_dir = dir;
        let start_index = span_index;

        let mut current_region = self
            .con_index(x, z, span_index, dir)
            .map(|neighbor| src_reg[neighbor.index])
            .unwrap_or(RegionId::NONE);
        contour.push(current_region.bits());

        let mut iter = 0;
        while iter < 40000 {
            iter += 1;
            if self.is_solid_edge(src_reg, x, z, span_index, dir) {
                let region = self
                    .con_index(x, z, span_index, dir)
                    .map(|neighbor| src_reg[neighbor.index])
                    .unwrap_or(RegionId::NONE);
                if region != current_region {
                    current_region = region;
                    contour.push(region.bits());
                }
                dir = (dir + 1) & 0x3;
            } else {
                let Some(neighbor) = self.con_index(x, z, span_index, dir) else {
                    // Should not happen, is_solid_edge covers missing connections.
                    return;
                };
                x = neighbor.x;
                z = neighbor.z;
                span_index = neighbor.index;
                dir = (dir + 3) & 0x3;
            }

            if start_index == span_index && start_dir == dir {
                break;
            }
        }

        // Remove adjacent duplicates.
        if contour.len() > 1 {
            let mut j = 0;
            while j < contour.len() {
                let next = (j + 1) % contour.len();
                if contour[j] == contour[next] {
                    contour.remove(next);
                } else {
                    j += 1;
                }
            }
        }
    }

    /// Paints all walkable spans in the rectangle with the given region.
    pub(crate) fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    /// Removes regions smaller than `min_region_area`, merges regions smaller
    /// than `merge_region_area` into suitable neighbors and compresses the
    /// remaining ids. Returns the new maximum region id and whether any
    /// regions overlap vertically.
    pub(crate) fn merge_and_filter_regions(
        &self,
        min_region_area: usize,
        merge_region_area: usize,
        max_region_id: RegionId,
        src_reg: &mut [RegionId],
    ) -> (RegionId, bool) {
        let region_count = max_region_id.index() as usize + 1;
        let mut regions: Vec<RegionData> = (0..region_count)
            .map(|id| RegionData::new(RegionId::from(id as u16)))
            .collect();

        // Find the edge of each region and the connections around its contour.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let r = src_reg[i];
                    if r == RegionId::NONE || r.index() as usize >= region_count || r.is_border() {
                        continue;
                    }
                    regions[r.index() as usize].span_count += 1;

                    // Update floors.
                    for j in cell.index_range() {
                        if i == j {
                            continue;
                        }
                        let floor_id = src_reg[j];
                        if floor_id == RegionId::NONE
                            || floor_id.index() as usize >= region_count
                            || floor_id.is_border()
                        {
                            continue;
                        }
                        if floor_id == r {
                            regions[r.index() as usize].overlap = true;
                        }
                        regions[r.index() as usize].add_unique_floor(floor_id.bits());
                    }

                    // Contour already visited.
                    if !regions[r.index() as usize].connections.is_empty() {
                        continue;
                    }

                    regions[r.index() as usize].area = self.areas[i];

                    // Check if this cell is at the edge of the region.
                    let Some(edge_dir) =
                        (0..4).find(|&dir| self.is_solid_edge(src_reg, x, z, i, dir))
                    else {
                        continue;
                    };
                    let mut connections = Vec::new();
                    self.walk_region_contour(src_reg, x, z, i, edge_dir, &mut connections);
                    regions[r.index() as usize].connections = connections;
                }
            }
        }

        // Remove too small clusters of connected regions. Regions touching a
        // grid border are kept since their true size is unknown.
        let mut stack = Vec::with_capacity(32);
        let mut trace = Vec::with_capacity(32);
        for i in 1..region_count {
            if regions[i].id == RegionId::NONE
                || regions[i].id.is_border()
                || regions[i].span_count == 0
                || regions[i].visited
            {
                continue;
            }

            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();
            regions[i].visited = true;
            stack.push(i);
            while let Some(ri) = stack.pop() {
                span_count += regions[ri].span_count;
                trace.push(ri);
                let connections = regions[ri].connections.clone();
                for connection in connections {
                    if RegionId::from(connection).is_border() {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbor = &mut regions[connection as usize];
                    if neighbor.visited
                        || neighbor.id == RegionId::NONE
                        || neighbor.id.is_border()
                    {
                        continue;
                    }
                    neighbor.visited = true;
                    stack.push(neighbor.id.index() as usize);
                }
            }

            if span_count < min_region_area && !connects_to_border {
                for &traced in &trace {
                    regions[traced].span_count = 0;
                    regions[traced].id = RegionId::NONE;
                }
            }
        }

        // Merge too small regions into neighbor regions.
        loop {
            let mut merge_count = 0;
            for i in 0..region_count {
                if regions[i].id == RegionId::NONE
                    || regions[i].id.is_border()
                    || regions[i].overlap
                    || regions[i].span_count == 0
                {
                    continue;
                }
                if regions[i].span_count > merge_region_area
                    && regions[i].is_connected_to_border()
                {
                    continue;
                }

                // Small region, or a region not connected to a border at all.
                // Find the smallest neighbor region that connects to it.
                let mut smallest = usize::MAX;
                let mut merge_id = regions[i].id;
                for &connection in &regions[i].connections {
                    if RegionId::from(connection).is_border() {
                        continue;
                    }
                    let neighbor = &regions[connection as usize];
                    if neighbor.id == RegionId::NONE
                        || neighbor.id.is_border()
                        || neighbor.overlap
                    {
                        continue;
                    }
                    if neighbor.span_count < smallest
                        && can_merge_with_region(&regions[i], neighbor)
                        && can_merge_with_region(neighbor, &regions[i])
                    {
                        smallest = neighbor.span_count;
                        merge_id = neighbor.id;
                    }
                }
                if merge_id != regions[i].id {
                    let old_id = regions[i].id.bits();
                    let target = merge_id.index() as usize;
                    if merge_regions(&mut regions, target, i) {
                        // Fixup regions pointing to the merged region.
                        for region in regions.iter_mut() {
                            if region.id == RegionId::NONE || region.id.is_border() {
                                continue;
                            }
                            // If another region was already merged into the
                            // current one, redirect it as well.
                            if region.id.bits() == old_id {
                                region.id = merge_id;
                            }
                            region.replace_neighbor(old_id, merge_id.bits());
                        }
                        merge_count += 1;
                    }
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        // Compress region ids.
        for region in regions.iter_mut() {
            region.remap =
                region.id != RegionId::NONE && !region.id.is_border();
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

        let overlap = regions.iter().any(|region| region.overlap);
        if overlap {
            warn!("Region partitioning produced vertically overlapping regions");
        }

        (RegionId::from(region_id_generator), overlap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_id_border_flag() {
        let region = RegionId::from(3) | RegionId::BORDER_REGION;
        assert!(region.is_border());
        assert_eq!(region.index(), 3);
        assert!(!RegionId::from(3).is_border());
    }

    fn region_with_connections(id: u16, connections: &[u16]) -> RegionData {
        let mut region = RegionData::new(RegionId::from(id));
        region.connections = connections.to_vec();
        region.span_count = 1;
        region.area = AreaType(1);
        region
    }

    #[test]
    fn merge_keeps_rotated_connections() {
        let mut regions = vec![
            RegionData::new(RegionId::NONE),
            region_with_connections(1, &[0, 2, 3]),
            region_with_connections(2, &[0, 3, 1]),
            region_with_connections(3, &[0, 1, 2]),
        ];
        assert!(can_merge_with_region(&regions[1], &regions[2]));
        assert!(merge_regions(&mut regions, 1, 2));
        assert_eq!(regions[2].span_count, 0);
        assert!(regions[2].connections.is_empty());
        // The shared edge between 1 and 2 is gone.
        assert!(!regions[1].connections.contains(&2));
    }

    #[test]
    fn cannot_merge_floor_overlap() {
        let mut a = region_with_connections(1, &[0, 2]);
        let b = region_with_connections(2, &[0, 1]);
        a.floors.push(2);
        assert!(!can_merge_with_region(&a, &b));
    }
}
