//! Rasterization of [`TriMesh`]es into [`Heightfield`]s.

use glam::Vec3A;
use thiserror::Error;

use crate::{
    Heightfield, TriMesh,
    heightfield::{SpanInsertion, SpanInsertionError},
    math::TriangleVertices as _,
    span::{AreaType, SpanBuilder},
};

/// Highest y-coordinate a span may reach, in cell units.
const MAX_SPAN_HEIGHT: u16 = u16::MAX;

impl Heightfield {
    /// Rasterizes all triangles of `trimesh` into the heightfield.
    /// `flag_merge_threshold` is the maximum ceiling difference in cell units
    /// under which overlapping spans merge their area types, usually the
    /// walkable climb.
    pub fn populate_from_trimesh(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        for (triangle, area) in trimesh.indices.iter().zip(trimesh.area_types.iter()) {
            let vertices = [
                trimesh.vertices[triangle.x as usize],
                trimesh.vertices[triangle.y as usize],
                trimesh.vertices[triangle.z as usize],
            ];
            self.rasterize_triangle(&vertices, *area, flag_merge_threshold)?;
        }
        Ok(())
    }

    /// Rasterizes a single triangle into the heightfield.
    /// Triangles completely outside the heightfield AABB are skipped.
    pub(crate) fn rasterize_triangle(
        &mut self,
        vertices: &[Vec3A; 3],
        area: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        let triangle_aabb = vertices.aabb();
        if !triangle_aabb.overlaps(&self.aabb) {
            return Ok(());
        }

        let width = self.width as i32;
        let height = self.height as i32;
        let by = self.aabb.max.y - self.aabb.min.y;
        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;

        // The footprint of the triangle on the grid's z-axis.
        let z0 = ((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size) as i32;
        let z1 = ((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size) as i32;
        // Use -1 rather than 0 to cut the polygon properly at the start of the tile.
        let z0 = z0.clamp(-1, height - 1);
        let z1 = z1.clamp(0, height - 1);

        // Clip the triangle into all grid cells it touches. Each clip leaves
        // the slice below the dividing line in the output buffer and the
        // remainder in the input buffer, ready for the next iteration.
        let mut r#in = [Vec3A::ZERO; 7];
        let mut in_row = [Vec3A::ZERO; 7];
        let mut p1 = [Vec3A::ZERO; 7];
        let mut p2 = [Vec3A::ZERO; 7];

        r#in[..3].copy_from_slice(vertices);
        let mut nv_row;
        let mut nv_in = 3_usize;

        for z in z0..=z1 {
            // Clip polygon to row.
            let cell_z = self.aabb.min.z + z as f32 * self.cell_size;
            (nv_row, nv_in) = divide_poly(
                &mut r#in,
                nv_in,
                &mut in_row,
                cell_z + self.cell_size,
                Axis::Z,
            );
            if nv_row < 3 || z < 0 {
                continue;
            }

            // Find x-axis bounds of the row.
            let mut min_x = in_row[0].x;
            let mut max_x = in_row[0].x;
            for vertex in in_row[1..nv_row].iter() {
                min_x = min_x.min(vertex.x);
                max_x = max_x.max(vertex.x);
            }
            let x0 = ((min_x - self.aabb.min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - self.aabb.min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= width {
                continue;
            }
            let x0 = x0.clamp(-1, width - 1);
            let x1 = x1.clamp(0, width - 1);

            let mut nv;
            let mut nv2 = nv_row;
            p1[..nv_row].copy_from_slice(&in_row[..nv_row]);

            for x in x0..=x1 {
                // Clip polygon to column.
                let cell_x = self.aabb.min.x + x as f32 * self.cell_size;
                (nv, nv2) = divide_poly(&mut p1, nv2, &mut p2, cell_x + self.cell_size, Axis::X);
                if nv < 3 || x < 0 {
                    continue;
                }

                // Calculate the min and max y of the span.
                let mut span_min = p2[0].y;
                let mut span_max = p2[0].y;
                for vertex in p2[1..nv].iter() {
                    span_min = span_min.min(vertex.y);
                    span_max = span_max.max(vertex.y);
                }
                span_min -= self.aabb.min.y;
                span_max -= self.aabb.min.y;
                // Skip the span if it's completely outside the heightfield bounding box.
                if span_max < 0.0 || span_min > by {
                    continue;
                }
                // Clamp the span to the heightfield bounding box.
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(by);

                // Snap the span to the heightfield height grid.
                let span_min_cell = ((span_min * inverse_cell_height).floor() as i32)
                    .clamp(0, MAX_SPAN_HEIGHT as i32) as u16;
                let span_max_cell = ((span_max * inverse_cell_height).ceil() as i32)
                    .clamp(span_min_cell as i32 + 1, MAX_SPAN_HEIGHT as i32)
                    as u16;

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: span_min_cell,
                        max: span_max_cell,
                        area,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Z,
}

/// Divides a convex polygon into two convex polygons across the line
/// `axis = axis_offset`. The part below the line is written to `out1`, the
/// remainder replaces the contents of `buf`. Returns both vertex counts.
fn divide_poly(
    buf: &mut [Vec3A],
    vertex_count_in: usize,
    out1: &mut [Vec3A],
    axis_offset: f32,
    axis: Axis,
) -> (usize, usize) {
    debug_assert!(vertex_count_in <= 7);
    let mut out2 = [Vec3A::ZERO; 12];

    // How far positive or negative away from the separating axis is each vertex.
    let mut deltas = [0.0_f32; 12];
    for (delta, vertex) in deltas.iter_mut().zip(buf[..vertex_count_in].iter()) {
        let value = match axis {
            Axis::X => vertex.x,
            Axis::Z => vertex.z,
        };
        *delta = axis_offset - value;
    }

    let mut poly1_count = 0;
    let mut poly2_count = 0;
    let mut vert_a = vertex_count_in - 1;
    for vert_b in 0..vertex_count_in {
        let same_side = (deltas[vert_a] >= 0.0) == (deltas[vert_b] >= 0.0);
        if !same_side {
            let s = deltas[vert_a] / (deltas[vert_a] - deltas[vert_b]);
            let intersection = buf[vert_a] + (buf[vert_b] - buf[vert_a]) * s;
            out1[poly1_count] = intersection;
            out2[poly2_count] = intersection;
            poly1_count += 1;
            poly2_count += 1;
            // Add the vert_b point to the right polygon. Do NOT add points that are on the dividing line
            // since these were already added above.
            if deltas[vert_b] > 0.0 {
                out1[poly1_count] = buf[vert_b];
                poly1_count += 1;
            } else if deltas[vert_b] < 0.0 {
                out2[poly2_count] = buf[vert_b];
                poly2_count += 1;
            }
        } else {
            // Add the vert_b point to the right polygon. Addition is done even for points on the dividing line.
            if deltas[vert_b] >= 0.0 {
                out1[poly1_count] = buf[vert_b];
                poly1_count += 1;
                if deltas[vert_b] != 0.0 {
                    vert_a = vert_b;
                    continue;
                }
            }
            out2[poly2_count] = buf[vert_b];
            poly2_count += 1;
        }
        vert_a = vert_b;
    }
    buf[..poly2_count].copy_from_slice(&out2[..poly2_count]);

    (poly1_count, poly2_count)
}

/// Errors that can occur during rasterization.
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// Happens when a span is inserted outside the heightfield grid.
    #[error(transparent)]
    SpanInsertion(#[from] SpanInsertionError),
}

#[cfg(test)]
mod tests {
    use crate::{Aabb3d, HeightfieldBuilder};

    use super::*;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [4.0, 4.0, 4.0]),
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn rasterizes_flat_triangle() {
        let mut heightfield = heightfield();
        let vertices = [
            Vec3A::new(0.0, 1.0, 0.0),
            Vec3A::new(4.0, 1.0, 0.0),
            Vec3A::new(0.0, 1.0, 4.0),
        ];
        heightfield
            .rasterize_triangle(&vertices, AreaType::DEFAULT_WALKABLE, 1)
            .unwrap();

        // The cell fully under the hypotenuse-free corner is covered.
        let span = heightfield.span_at(0, 0).unwrap();
        assert_eq!(span.min(), 2);
        assert_eq!(span.max(), 3);
        assert_eq!(span.area(), AreaType::DEFAULT_WALKABLE);
        // The opposite corner cell is not touched by the triangle.
        assert!(heightfield.span_at(3, 3).is_none());
    }

    #[test]
    fn skips_triangle_outside_aabb() {
        let mut heightfield = heightfield();
        let vertices = [
            Vec3A::new(10.0, 0.0, 10.0),
            Vec3A::new(11.0, 0.0, 10.0),
            Vec3A::new(10.0, 0.0, 11.0),
        ];
        heightfield
            .rasterize_triangle(&vertices, AreaType::DEFAULT_WALKABLE, 1)
            .unwrap();
        assert!(heightfield.span_arena.is_empty());
    }

    #[test]
    fn divide_poly_splits_triangle() {
        let mut buf = [Vec3A::ZERO; 7];
        buf[0] = Vec3A::new(0.0, 0.0, 0.0);
        buf[1] = Vec3A::new(2.0, 0.0, 0.0);
        buf[2] = Vec3A::new(0.0, 0.0, 2.0);
        let mut out = [Vec3A::ZERO; 7];
        let (below, above) = divide_poly(&mut buf, 3, &mut out, 1.0, Axis::X);
        // The part left of x=1 is a quad, the part right of it a triangle.
        assert_eq!(below, 4);
        assert_eq!(above, 3);
    }
}
