//! Erosion of the walkable area by the agent radius.

use crate::{
    CompactHeightfield,
    math::{dir_offset_x, dir_offset_z},
    span::AreaType,
};

impl CompactHeightfield {
    /// Erodes the walkable area by `walkable_radius` cells.
    ///
    /// Runs a chamfer distance transform from all unwalkable and boundary
    /// spans and marks every span closer than the radius as unwalkable, so
    /// that the resulting navmesh can be traversed by the center point of an
    /// agent with that radius. Distances are measured in half-cells.
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let mut dist = vec![u8::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z).clone();
                for i in cell.index_range() {
                    if !self.areas[i].is_walkable() {
                        dist[i] = 0;
                        continue;
                    }
                    let connected_walkable_neighbors = self
                        .con_indices(x, z, i)
                        .into_iter()
                        .flatten()
                        .filter(|&neighbor| self.areas[neighbor].is_walkable())
                        .count();
                    // At least one missing or unwalkable neighbor.
                    if connected_walkable_neighbors != 4 {
                        dist[i] = 0;
                    }
                }
            }
        }

        // Pass 1: top-left to bottom-right.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z).clone();
                for i in cell.index_range() {
                    // (-1, 0)
                    if let Some(neighbor) = self.con_index(x, z, i, 0) {
                        dist[i] = dist[i].min(dist[neighbor.index].saturating_add(2));
                        // (-1, -1)
                        if let Some(diagonal) =
                            self.con_index(neighbor.x, neighbor.z, neighbor.index, 3)
                        {
                            dist[i] = dist[i].min(dist[diagonal.index].saturating_add(3));
                        }
                    }
                    // (0, -1)
                    if let Some(neighbor) = self.con_index(x, z, i, 3) {
                        dist[i] = dist[i].min(dist[neighbor.index].saturating_add(2));
                        // (1, -1)
                        if let Some(diagonal) =
                            self.con_index(neighbor.x, neighbor.z, neighbor.index, 2)
                        {
                            dist[i] = dist[i].min(dist[diagonal.index].saturating_add(3));
                        }
                    }
                }
            }
        }

        // Pass 2: bottom-right to top-left.
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                let cell = self.cell_at(x, z).clone();
                for i in cell.index_range() {
                    // (1, 0)
                    if let Some(neighbor) = self.con_index(x, z, i, 2) {
                        dist[i] = dist[i].min(dist[neighbor.index].saturating_add(2));
                        // (1, 1)
                        if let Some(diagonal) =
                            self.con_index(neighbor.x, neighbor.z, neighbor.index, 1)
                        {
                            dist[i] = dist[i].min(dist[diagonal.index].saturating_add(3));
                        }
                    }
                    // (0, 1)
                    if let Some(neighbor) = self.con_index(x, z, i, 1) {
                        dist[i] = dist[i].min(dist[neighbor.index].saturating_add(2));
                        // (-1, 1)
                        if let Some(diagonal) =
                            self.con_index(neighbor.x, neighbor.z, neighbor.index, 0)
                        {
                            dist[i] = dist[i].min(dist[diagonal.index].saturating_add(3));
                        }
                    }
                }
            }
        }

        let threshold = (walkable_radius * 2).min(u8::MAX as u16) as u8;
        for (area, dist) in self.areas.iter_mut().zip(dist.iter()) {
            if *dist < threshold {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }

    /// The connected neighbor of span `span_index` at `(x, z)` in `dir`.
    pub(crate) fn con_index(
        &self,
        x: u16,
        z: u16,
        span_index: usize,
        dir: u8,
    ) -> Option<ConIndex> {
        let con = self.spans[span_index].con(dir)?;
        let neighbor_x = (x as i32 + dir_offset_x(dir) as i32) as u16;
        let neighbor_z = (z as i32 + dir_offset_z(dir) as i32) as u16;
        let neighbor_cell = self.cell_at(neighbor_x, neighbor_z);
        Some(ConIndex {
            x: neighbor_x,
            z: neighbor_z,
            index: neighbor_cell.index() as usize + con as usize,
        })
    }
}

/// A resolved neighbor connection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConIndex {
    pub(crate) x: u16,
    pub(crate) z: u16,
    pub(crate) index: usize,
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{Aabb3d, HeightfieldBuilder, heightfield::SpanInsertion, span::SpanBuilder};

    use super::*;

    fn compact_floor(size: u16) -> CompactHeightfield {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [size as f32, 10.0, size as f32]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                heightfield
                    .add_span(SpanInsertion {
                        x,
                        z,
                        flag_merge_threshold: 0,
                        span: SpanBuilder {
                            min: 0,
                            max: 1,
                            area: AreaType::DEFAULT_WALKABLE,
                            next: None,
                        }
                        .build(),
                    })
                    .unwrap();
            }
        }
        CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap()
    }

    #[test]
    fn erosion_strips_the_border() {
        let mut compact = compact_floor(6);
        compact.erode_walkable_area(1);

        for z in 0..6_u16 {
            for x in 0..6_u16 {
                let cell = compact.cell_at(x, z);
                let on_border = x == 0 || z == 0 || x == 5 || z == 5;
                for i in cell.index_range() {
                    assert_eq!(
                        compact.areas[i].is_walkable(),
                        !on_border,
                        "unexpected area at ({x}, {z})"
                    );
                }
            }
        }
    }

    #[test]
    fn large_radius_erodes_everything() {
        let mut compact = compact_floor(4);
        compact.erode_walkable_area(4);
        assert!(compact.areas.iter().all(|area| !area.is_walkable()));
    }
}
