//! Input geometry for the build pipeline, expressed as [`TriMesh`]es.

use glam::{UVec3, Vec3A};

use crate::{
    Aabb3d,
    math::TriangleIndices as _,
    span::AreaType,
};

/// A triangle mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices of the mesh.
    pub vertices: Vec<Vec3A>,

    /// The triangles of the mesh as indices into [`TriMesh::vertices`].
    pub indices: Vec<UVec3>,

    /// The area types of the mesh. Each index corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Creates a trimesh from vertices and triangle indices.
    /// All triangles start out as [`AreaType::NOT_WALKABLE`]; run
    /// [`TriMesh::mark_walkable_triangles`] to tag walkable ones.
    pub fn new(vertices: Vec<Vec3A>, indices: Vec<UVec3>) -> Self {
        let area_types = vec![AreaType::NOT_WALKABLE; indices.len()];
        Self {
            vertices,
            indices,
            area_types,
        }
    }

    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    pub fn extend(&mut self, other: TriMesh) {
        if self.vertices.len() > u32::MAX as usize {
            panic!("Cannot extend a trimesh with more than 2^32 vertices");
        }
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Sets the area type of all triangles whose slope is within
    /// `walkable_slope_angle` (radians measured from the up axis) to
    /// [`AreaType::DEFAULT_WALKABLE`]. Steeper triangles keep their area type.
    pub fn mark_walkable_triangles(&mut self, walkable_slope_angle: f32) {
        let walkable_threshold = walkable_slope_angle.cos();
        for (triangle, area) in self.indices.iter().zip(self.area_types.iter_mut()) {
            let normal = triangle.normal(&self.vertices);
            if normal.y > walkable_threshold {
                *area = AreaType::DEFAULT_WALKABLE;
            }
        }
    }
}
