//! Area marking through user-placed convex volumes.

use glam::{IVec3, Vec3A};

use crate::{Aabb3d, CompactHeightfield, span::AreaType};

/// A convex prism on the xz-plane used to override the area type of the
/// walkable spans it contains, e.g. to mark water or grass.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The vertices of the convex polygon on the xz-plane.
    /// The y components are ignored.
    pub vertices: Vec<Vec3A>,
    /// The lower y bound of the volume in world units.
    pub min_y: f32,
    /// The upper y bound of the volume in world units.
    pub max_y: f32,
    /// The area type to apply.
    pub area: AreaType,
}

impl CompactHeightfield {
    /// Sets the [`AreaType`] of the walkable spans whose cell center lies
    /// within the given convex volume. Unwalkable spans are left alone.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        // Compute the bounding box of the polygon.
        let Some(mut aabb) = Aabb3d::from_verts(&volume.vertices) else {
            // The volume is empty
            return;
        };
        aabb.min.y = volume.min_y;
        aabb.max.y = volume.max_y;

        // Compute the grid footprint of the polygon.
        let mut min = aabb.min - self.aabb.min;
        min.x /= self.cell_size;
        min.y /= self.cell_height;
        min.z /= self.cell_size;
        let mut max = aabb.max - self.aabb.min;
        max.x /= self.cell_size;
        max.y /= self.cell_height;
        max.z /= self.cell_size;
        let mut min = IVec3::new(min.x as i32, min.y as i32, min.z as i32);
        let mut max = IVec3::new(max.x as i32, max.y as i32, max.z as i32);

        // Early-out if the polygon lies entirely outside the grid.
        if max.x < 0 || min.x >= self.width as i32 || max.z < 0 || min.z >= self.height as i32 {
            return;
        }

        // Clamp the polygon footprint to the grid.
        min.x = min.x.max(0);
        max.x = max.x.min(self.width as i32 - 1);
        min.z = min.z.max(0);
        max.z = max.z.min(self.height as i32 - 1);

        for z in min.z..=max.z {
            for x in min.x..=max.x {
                let cell_index = (x + z * self.width as i32) as usize;
                let cell = self.cells[cell_index].clone();
                for i in cell.index_range() {
                    let span = &self.spans[i];

                    // Skip if the span is removed.
                    if !self.areas[i].is_walkable() {
                        continue;
                    }

                    // Skip if y extents don't overlap.
                    if (span.y as i32) < min.y || (span.y as i32) > max.y {
                        continue;
                    }

                    let point = Vec3A::new(
                        self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                        0.0,
                        self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                    );
                    if point_in_poly(point, &volume.vertices) {
                        self.areas[i] = volume.area;
                    }
                }
            }
        }
    }
}

/// Even-odd rule point-in-polygon test on the xz-plane.
fn point_in_poly(point: Vec3A, vertices: &[Vec3A]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let xi = vertices[i].x;
        let zi = vertices[i].z;
        let xj = vertices[j].x;
        let zj = vertices[j].z;
        if ((zi > point.z) != (zj > point.z))
            && (point.x < (xj - xi) * (point.z - zi) / (zj - zi) + xi)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use crate::{HeightfieldBuilder, heightfield::SpanInsertion, span::SpanBuilder};

    use super::*;

    fn square_volume(min: f32, max: f32, area: AreaType) -> ConvexVolume {
        ConvexVolume {
            vertices: vec![
                Vec3A::new(min, 0.0, min),
                Vec3A::new(max, 0.0, min),
                Vec3A::new(max, 0.0, max),
                Vec3A::new(min, 0.0, max),
            ],
            min_y: -1.0,
            max_y: 5.0,
            area,
        }
    }

    #[test]
    fn point_in_poly_square() {
        let square = square_volume(0.0, 2.0, AreaType(1));
        assert!(point_in_poly(Vec3A::new(1.0, 0.0, 1.0), &square.vertices));
        assert!(!point_in_poly(Vec3A::new(3.0, 0.0, 1.0), &square.vertices));
    }

    #[test]
    fn marks_spans_inside_the_volume() {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [4.0, 10.0, 4.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for z in 0..4 {
            for x in 0..4 {
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
        let mut compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1).unwrap();

        compact.mark_convex_poly_area(&square_volume(0.0, 2.0, AreaType(5)));

        for z in 0..4_u16 {
            for x in 0..4_u16 {
                let cell = compact.cell_at(x, z);
                let expected = if x < 2 && z < 2 {
                    AreaType(5)
                } else {
                    AreaType::DEFAULT_WALKABLE
                };
                for i in cell.index_range() {
                    assert_eq!(compact.areas[i], expected, "wrong area at ({x}, {z})");
                }
            }
        }
    }
}
