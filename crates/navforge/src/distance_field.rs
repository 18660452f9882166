//! Distance field used by watershed partitioning.

use crate::CompactHeightfield;

impl CompactHeightfield {
    /// Builds the distance to the nearest area boundary for every walkable
    /// span, in half-cell units, and stores it in
    /// [`CompactHeightfield::dist`] along with
    /// [`CompactHeightfield::max_distance`]. The raw chamfer distances are
    /// smoothed with a box blur.
    pub fn build_distance_field(&mut self) {
        let mut src = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z).clone();
                for i in cell.index_range() {
                    let area = self.areas[i];
                    let same_area_neighbors = self
                        .con_indices(x, z, i)
                        .into_iter()
                        .flatten()
                        .filter(|&neighbor| self.areas[neighbor] == area)
                        .count();
                    if same_area_neighbors != 4 {
                        src[i] = 0;
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
                        src[i] = src[i].min(src[neighbor.index].saturating_add(2));
                        // (-1, -1)
                        if let Some(diagonal) =
                            self.con_index(neighbor.x, neighbor.z, neighbor.index, 3)
                        {
                            src[i] = src[i].min(src[diagonal.index].saturating_add(3));
                        }
                    }
                    // (0, -1)
                    if let Some(neighbor) = self.con_index(x, z, i, 3) {
                        src[i] = src[i].min(src[neighbor.index].saturating_add(2));
                        // (1, -1)
                        if let Some(diagonal) =
                            self.con_index(neighbor.x, neighbor.z, neighbor.index, 2)
                        {
                            src[i] = src[i].min(src[diagonal.index].saturating_add(3));
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
                        src[i] = src[i].min(src[neighbor.index].saturating_add(2));
                        // (1, 1)
                        if let Some(diagonal) =
                            self.con_index(neighbor.x, neighbor.z, neighbor.index, 1)
                        {
                            src[i] = src[i].min(src[diagonal.index].saturating_add(3));
                        }
                    }
                    // (0, 1)
                    if let Some(neighbor) = self.con_index(x, z, i, 1) {
                        src[i] = src[i].min(src[neighbor.index].saturating_add(2));
                        // (-1, 1)
                        if let Some(diagonal) =
                            self.con_index(neighbor.x, neighbor.z, neighbor.index, 0)
                        {
                            src[i] = src[i].min(src[diagonal.index].saturating_add(3));
                        }
                    }
                }
            }
        }

        self.max_distance = src.iter().copied().max().unwrap_or(0);
        self.dist = self.box_blur(1, &src);
    }

    /// Box blurs the distance values. Distances at or below
    /// `threshold * 2` are left untouched to keep boundaries sharp.
    fn box_blur(&self, threshold: u16, src: &[u16]) -> Vec<u16> {
        let threshold = threshold * 2;
        let mut dst = vec![0_u16; src.len()];

        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z).clone();
                for i in cell.index_range() {
                    let center = src[i];
                    if center <= threshold {
                        dst[i] = center;
                        continue;
                    }

                    let mut sum = center as u32;
                    for dir in 0..4_u8 {
                        let Some(neighbor) = self.con_index(x, z, i, dir) else {
                            sum += center as u32 * 2;
                            continue;
                        };
                        sum += src[neighbor.index] as u32;
                        let diagonal_dir = (dir + 1) & 0x3;
                        if let Some(diagonal) =
                            self.con_index(neighbor.x, neighbor.z, neighbor.index, diagonal_dir)
                        {
                            sum += src[diagonal.index] as u32;
                        } else {
                            sum += center as u32;
                        }
                    }
                    dst[i] = ((sum + 5) / 9) as u16;
                }
            }
        }
        dst
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d, HeightfieldBuilder, heightfield::SpanInsertion,
        span::{AreaType, SpanBuilder},
    };

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
    fn distance_grows_towards_the_center() {
        let mut compact = compact_floor(9);
        compact.build_distance_field();

        assert_eq!(compact.dist.len(), compact.spans.len());
        let center = compact.cell_at(4, 4).index() as usize;
        let corner = compact.cell_at(0, 0).index() as usize;
        assert_eq!(compact.dist[corner], 0);
        assert!(compact.dist[center] > compact.dist[corner]);
        assert!(compact.max_distance >= compact.dist[center]);
    }

    #[test]
    fn boundary_spans_have_distance_zero() {
        let mut compact = compact_floor(5);
        compact.build_distance_field();
        for x in 0..5_u16 {
            let top = compact.cell_at(x, 0).index() as usize;
            let bottom = compact.cell_at(x, 4).index() as usize;
            assert_eq!(compact.dist[top], 0);
            assert_eq!(compact.dist[bottom], 0);
        }
    }
}
