//! Convex polygon mesh generation from contours.

use glam::{IVec2, U16Vec3};

use crate::{
    Aabb3d,
    contour::ContourSet,
    math::{in_cone, intersect, intersect_prop, left_on},
    region::RegionId,
    span::AreaType,
};

/// A navmesh of convex polygons generated from a [`ContourSet`].
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonNavmesh {
    /// The vertices of the mesh in cell units relative to [`Self::aabb`].
    pub vertices: Vec<U16Vec3>,
    /// Polygon vertex indices, [`Self::max_vertices_per_polygon`] entries per
    /// polygon, padded with [`Self::NO_INDEX`].
    pub polygons: Vec<u16>,
    /// Neighbor data per polygon edge, laid out like [`Self::polygons`].
    ///
    /// Each entry is the index of the polygon across the edge,
    /// [`Self::NO_INDEX`] for a solid wall, or `0x8000 | direction` for a
    /// portal edge on the grid border.
    pub polygon_neighbors: Vec<u16>,
    /// The region of each polygon, [`RegionId::NONE`] when the polygon
    /// covers multiple regions.
    pub regions: Vec<RegionId>,
    /// User defined flags per polygon. Zeroed.
    pub flags: Vec<u16>,
    /// The area type of each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon.
    pub max_vertices_per_polygon: usize,
    /// The AABB of the mesh in world units.
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The AABB border size used to generate the source data.
    pub border_size: u16,
    /// The maximum deviation of the contour edges from the raw region
    /// boundary, in world units.
    pub max_edge_error: f32,
}

impl PolygonNavmesh {
    /// Padding value in [`Self::polygons`] and the "no neighbor" value in
    /// [`Self::polygon_neighbors`].
    pub const NO_INDEX: u16 = u16::MAX;

    /// Marks a portal edge in [`Self::polygon_neighbors`]. The low two bits
    /// of the entry hold the direction of the grid border.
    pub const PORTAL_FLAG: u16 = 0x8000;

    /// The number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        if self.max_vertices_per_polygon == 0 {
            0
        } else {
            self.polygons.len() / self.max_vertices_per_polygon
        }
    }
}

/// Failed to build a [`PolygonNavmesh`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PolyMeshError {
    /// The contours contain more vertices than a 16 bit index can address.
    #[error("contours contain {vertex_count} vertices, only 65534 can be indexed")]
    TooManyVertices {
        /// The number of contour vertices.
        vertex_count: usize,
    },
    /// A contour could not be triangulated, even with loosened diagonal
    /// tests. The source contour is likely self-intersecting.
    #[error("failed to triangulate the contour of region {region}")]
    ContourTriangulation {
        /// The region whose contour failed to triangulate.
        region: u16,
    },
    /// The hole left by removing a border vertex could not be triangulated.
    #[error("failed to re-triangulate the hole left by removing a border vertex")]
    BorderVertexRemoval,
    /// More polygons than a 16 bit index can address.
    #[error("generated {polygon_count} polygons, only 65535 can be indexed")]
    TooManyPolygons {
        /// The number of generated polygons.
        polygon_count: usize,
    },
}

impl ContourSet {
    /// Builds a convex polygon mesh from the simplified contours.
    ///
    /// Each contour is triangulated and the triangles are greedily merged
    /// into convex polygons of at most `max_vertices_per_polygon` vertices.
    /// Duplicate vertices along shared region boundaries are welded, border
    /// vertices introduced by the AABB border are removed, and polygons
    /// sharing an edge are linked as neighbors.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: usize,
    ) -> Result<PolygonNavmesh, PolyMeshError> {
        let nvp = max_vertices_per_polygon;

        let mut max_vertices = 0;
        let mut max_vertices_per_contour = 0;
        for contour in &self.contours {
            if contour.vertices.len() < 3 {
                continue;
            }
            max_vertices += contour.vertices.len();
            max_vertices_per_contour = max_vertices_per_contour.max(contour.vertices.len());
        }
        if max_vertices >= Mesh::NULL_INDEX as usize - 1 {
            return Err(PolyMeshError::TooManyVertices {
                vertex_count: max_vertices,
            });
        }

        let mut mesh = Mesh {
            nvp,
            vertices: Vec::with_capacity(max_vertices),
            polygons: Vec::new(),
            regions: Vec::new(),
            areas: Vec::new(),
        };
        // Marks mesh vertices that lie on a removable grid border.
        let mut vertex_flags: Vec<bool> = Vec::with_capacity(max_vertices);
        let mut first_vertex = [NO_VERTEX; VERTEX_BUCKET_COUNT];
        let mut next_vertex: Vec<i32> = Vec::with_capacity(max_vertices);

        let mut indices: Vec<u32> = Vec::with_capacity(max_vertices_per_contour);
        let mut mesh_indices: Vec<u16> = Vec::with_capacity(max_vertices_per_contour);
        let mut polys: Vec<u16> = Vec::new();

        for contour in &self.contours {
            if contour.vertices.len() < 3 {
                continue;
            }

            // Triangulate the contour.
            let positions: Vec<IVec2> = contour
                .vertices
                .iter()
                .map(|vertex| {
                    IVec2::new(vertex.position.x as i32, vertex.position.z as i32)
                })
                .collect();
            indices.clear();
            indices.extend(0..positions.len() as u32);
            let triangles = triangulate(&positions, &mut indices).map_err(|()| {
                PolyMeshError::ContourTriangulation {
                    region: contour.region.bits(),
                }
            })?;

            // Add and merge vertices.
            mesh_indices.clear();
            for vertex in &contour.vertices {
                let index = add_vertex(
                    vertex.position,
                    &mut mesh.vertices,
                    &mut first_vertex,
                    &mut next_vertex,
                );
                vertex_flags.resize(mesh.vertices.len(), false);
                if vertex.data.is_border_vertex() {
                    // The vertex should be removed once the mesh is built.
                    vertex_flags[index as usize] = true;
                }
                mesh_indices.push(index);
            }

            // Build the initial triangle polygons.
            polys.clear();
            for triangle in &triangles {
                let [a, b, c] = *triangle;
                if a != b && a != c && b != c {
                    polys.push(mesh_indices[a as usize]);
                    polys.push(mesh_indices[b as usize]);
                    polys.push(mesh_indices[c as usize]);
                    polys.extend(std::iter::repeat_n(Mesh::NULL_INDEX, nvp - 3));
                }
            }
            if polys.is_empty() {
                continue;
            }

            if nvp > 3 {
                merge_polygons(&mut polys, nvp, &mesh.vertices, None);
            }

            // Store the polygons.
            for poly in polys.chunks_exact(nvp) {
                mesh.polygons.extend_from_slice(poly);
                mesh.regions.push(contour.region);
                mesh.areas.push(contour.area);
            }
        }

        // Remove the vertices introduced by the AABB border.
        let mut i = 0;
        while i < mesh.vertices.len() {
            if !vertex_flags[i] {
                i += 1;
                continue;
            }
            if !mesh.can_remove_vertex(i as u16) {
                i += 1;
                continue;
            }
            mesh.remove_vertex(i as u16)?;
            vertex_flags.remove(i);
        }

        let polygon_count = mesh.polygon_count();
        if polygon_count > Mesh::NULL_INDEX as usize {
            return Err(PolyMeshError::TooManyPolygons { polygon_count });
        }

        let mut neighbors = build_adjacency(&mesh.polygons, mesh.vertices.len(), nvp);

        // Mark portal edges along the grid border.
        if self.border_size > 0 {
            let width = self.width as i32;
            let height = self.height as i32;
            for (polygon, polygon_neighbors) in mesh
                .polygons
                .chunks_exact(nvp)
                .zip(neighbors.chunks_exact_mut(nvp))
            {
                for j in 0..nvp {
                    if polygon[j] == Mesh::NULL_INDEX {
                        break;
                    }
                    // Skip connected edges.
                    if polygon_neighbors[j] != Mesh::NULL_INDEX {
                        continue;
                    }
                    let mut nj = j + 1;
                    if nj >= nvp || polygon[nj] == Mesh::NULL_INDEX {
                        nj = 0;
                    }
                    let va = mesh.vertices[polygon[j] as usize];
                    let vb = mesh.vertices[polygon[nj] as usize];
                    if va.x as i32 == 0 && vb.x as i32 == 0 {
                        polygon_neighbors[j] = PolygonNavmesh::PORTAL_FLAG;
                    } else if va.z as i32 == height && vb.z as i32 == height {
                        polygon_neighbors[j] = PolygonNavmesh::PORTAL_FLAG | 1;
                    } else if va.x as i32 == width && vb.x as i32 == width {
                        polygon_neighbors[j] = PolygonNavmesh::PORTAL_FLAG | 2;
                    } else if va.z as i32 == 0 && vb.z as i32 == 0 {
                        polygon_neighbors[j] = PolygonNavmesh::PORTAL_FLAG | 3;
                    }
                }
            }
        }

        Ok(PolygonNavmesh {
            vertices: mesh.vertices,
            polygons: mesh.polygons,
            polygon_neighbors: neighbors,
            regions: mesh.regions,
            flags: vec![0; polygon_count],
            areas: mesh.areas,
            max_vertices_per_polygon: nvp,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
        })
    }
}

/// The polygon mesh under construction.
struct Mesh {
    nvp: usize,
    vertices: Vec<U16Vec3>,
    polygons: Vec<u16>,
    regions: Vec<RegionId>,
    areas: Vec<AreaType>,
}

impl Mesh {
    const NULL_INDEX: u16 = u16::MAX;

    fn polygon_count(&self) -> usize {
        self.polygons.len() / self.nvp
    }

    fn polygon(&self, i: usize) -> &[u16] {
        &self.polygons[i * self.nvp..(i + 1) * self.nvp]
    }

    /// Whether removing the given vertex leaves a hole that can be
    /// re-triangulated: enough edges remain and at most two of the edges
    /// touching the vertex are open.
    fn can_remove_vertex(&self, removed: u16) -> bool {
        let mut touched_vertices = 0;
        let mut remaining_edges = 0_i32;
        for polygon in self.polygons.chunks_exact(self.nvp) {
            let vertex_count = count_polygon_vertices(polygon);
            let removed_count = polygon[..vertex_count]
                .iter()
                .filter(|&&v| v == removed)
                .count();
            if removed_count > 0 {
                touched_vertices += removed_count;
                remaining_edges += vertex_count as i32 - (removed_count as i32 + 1);
            }
        }
        // Too few edges would remain to create a polygon. This happens when
        // only the tip of a single triangle touches the vertex.
        if remaining_edges <= 2 {
            return false;
        }

        // Collect the edges which share the removed vertex, counting how
        // many polygons use each.
        let mut edges: Vec<(u16, u16, u32)> = Vec::with_capacity(touched_vertices * 2);
        for polygon in self.polygons.chunks_exact(self.nvp) {
            let vertex_count = count_polygon_vertices(polygon);
            let mut k = vertex_count - 1;
            for j in 0..vertex_count {
                if polygon[j] == removed || polygon[k] == removed {
                    let (a, b) = if polygon[j] == removed {
                        (polygon[j], polygon[k])
                    } else {
                        (polygon[k], polygon[j])
                    };
                    if let Some(edge) = edges.iter_mut().find(|edge| edge.1 == b) {
                        edge.2 += 1;
                    } else {
                        edges.push((a, b, 1));
                    }
                }
                k = j;
            }
        }

        // More than two open edges means two non-adjacent polygons share the
        // vertex. Removing it would break the mesh topology.
        let open_edges = edges.iter().filter(|edge| edge.2 < 2).count();
        open_edges <= 2
    }

    /// Removes a vertex from the mesh, deletes the polygons using it and
    /// fills the resulting hole with new polygons.
    fn remove_vertex(&mut self, removed: u16) -> Result<(), PolyMeshError> {
        let nvp = self.nvp;

        // Delete the polygons touching the vertex, collecting the hole
        // boundary edges that do not touch it.
        let mut edges: Vec<HoleEdge> = Vec::new();
        let mut i = 0;
        while i < self.polygon_count() {
            let polygon = self.polygon(i);
            let vertex_count = count_polygon_vertices(polygon);
            if !polygon[..vertex_count].contains(&removed) {
                i += 1;
                continue;
            }
            let mut k = vertex_count - 1;
            for j in 0..vertex_count {
                if polygon[j] != removed && polygon[k] != removed {
                    edges.push(HoleEdge {
                        a: polygon[k],
                        b: polygon[j],
                        region: self.regions[i],
                        area: self.areas[i],
                    });
                }
                k = j;
            }
            let last = self.polygon_count() - 1;
            if i != last {
                let (head, tail) = self.polygons.split_at_mut(last * nvp);
                head[i * nvp..(i + 1) * nvp].copy_from_slice(tail);
                self.regions[i] = self.regions[last];
                self.areas[i] = self.areas[last];
            }
            self.polygons.truncate(last * nvp);
            self.regions.truncate(last);
            self.areas.truncate(last);
        }

        // Remove the vertex and adjust all indices past it.
        self.vertices.remove(removed as usize);
        for index in self.polygons.iter_mut() {
            if *index != Self::NULL_INDEX && *index > removed {
                *index -= 1;
            }
        }
        for edge in edges.iter_mut() {
            if edge.a > removed {
                edge.a -= 1;
            }
            if edge.b > removed {
                edge.b -= 1;
            }
        }

        if edges.is_empty() {
            return Ok(());
        }

        // Chain the loose edges into the hole boundary loop, keeping the
        // region and area of the polygon each edge came from.
        let mut hole: Vec<u16> = vec![edges[0].a];
        let mut hole_regions: Vec<RegionId> = vec![edges[0].region];
        let mut hole_areas: Vec<AreaType> = vec![edges[0].area];
        while !edges.is_empty() {
            let mut matched = false;
            let mut i = 0;
            while i < edges.len() {
                let edge = edges[i];
                let attached = if hole[0] == edge.b {
                    hole.insert(0, edge.a);
                    hole_regions.insert(0, edge.region);
                    hole_areas.insert(0, edge.area);
                    true
                } else if hole[hole.len() - 1] == edge.a {
                    hole.push(edge.b);
                    hole_regions.push(edge.region);
                    hole_areas.push(edge.area);
                    true
                } else {
                    false
                };
                if attached {
                    edges.swap_remove(i);
                    matched = true;
                } else {
                    i += 1;
                }
            }
            if !matched {
                break;
            }
        }

        // Triangulate the hole.
        let positions: Vec<IVec2> = hole
            .iter()
            .map(|&index| {
                let vertex = self.vertices[index as usize];
                IVec2::new(vertex.x as i32, vertex.z as i32)
            })
            .collect();
        let mut indices: Vec<u32> = (0..hole.len() as u32).collect();
        let triangles = triangulate(&positions, &mut indices)
            .map_err(|()| PolyMeshError::BorderVertexRemoval)?;

        // Merge the hole triangles back into polygons.
        let mut polys: Vec<u16> = Vec::new();
        let mut regions: Vec<RegionId> = Vec::new();
        let mut areas: Vec<AreaType> = Vec::new();
        for triangle in &triangles {
            let [a, b, c] = triangle.map(|t| t as usize);
            if a == b || a == c || b == c {
                continue;
            }
            polys.push(hole[a]);
            polys.push(hole[b]);
            polys.push(hole[c]);
            polys.extend(std::iter::repeat_n(Self::NULL_INDEX, nvp - 3));
            // A polygon covering multiple regions belongs to none of them.
            if hole_regions[a] != hole_regions[b] || hole_regions[b] != hole_regions[c] {
                regions.push(RegionId::NONE);
            } else {
                regions.push(hole_regions[a]);
            }
            areas.push(hole_areas[a]);
        }
        if polys.is_empty() {
            return Ok(());
        }

        if nvp > 3 {
            merge_polygons(
                &mut polys,
                nvp,
                &self.vertices,
                Some((&mut regions, &mut areas)),
            );
        }

        for (i, poly) in polys.chunks_exact(nvp).enumerate() {
            self.polygons.extend_from_slice(poly);
            self.regions.push(regions[i]);
            self.areas.push(areas[i]);
        }
        Ok(())
    }
}

/// A boundary edge of the hole left by a removed vertex.
#[derive(Debug, Clone, Copy)]
struct HoleEdge {
    a: u16,
    b: u16,
    region: RegionId,
    area: AreaType,
}

const VERTEX_BUCKET_COUNT: usize = 1 << 12;
const NO_VERTEX: i32 = -1;

fn vertex_hash(x: u16, z: u16) -> usize {
    const H1: u32 = 0x8da6b343;
    const H3: u32 = 0xcb1ab31f;
    let n = H1
        .wrapping_mul(x as u32)
        .wrapping_add(H3.wrapping_mul(z as u32));
    n as usize & (VERTEX_BUCKET_COUNT - 1)
}

/// Adds a vertex to the mesh, welding it onto an existing vertex at the
/// same xz-position whose height differs by at most two cells.
fn add_vertex(
    vertex: U16Vec3,
    vertices: &mut Vec<U16Vec3>,
    first_vertex: &mut [i32; VERTEX_BUCKET_COUNT],
    next_vertex: &mut Vec<i32>,
) -> u16 {
    let bucket = vertex_hash(vertex.x, vertex.z);
    let mut i = first_vertex[bucket];
    while i != NO_VERTEX {
        let existing = vertices[i as usize];
        if existing.x == vertex.x
            && existing.z == vertex.z
            && (existing.y as i32 - vertex.y as i32).abs() <= 2
        {
            return i as u16;
        }
        i = next_vertex[i as usize];
    }

    let index = vertices.len();
    vertices.push(vertex);
    next_vertex.push(first_vertex[bucket]);
    first_vertex[bucket] = index as i32;
    index as u16
}

/// The number of vertices in a null-index padded polygon.
#[inline]
fn count_polygon_vertices(polygon: &[u16]) -> usize {
    polygon
        .iter()
        .position(|&index| index == Mesh::NULL_INDEX)
        .unwrap_or(polygon.len())
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i == 0 { n - 1 } else { i - 1 }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 == n { 0 } else { i + 1 }
}

/// The high bit of a triangulation index marks an ear that can be clipped.
const CAN_CLIP: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

#[inline]
fn position(index: usize, vertices: &[IVec2], indices: &[u32]) -> IVec2 {
    vertices[(indices[index] & INDEX_MASK) as usize]
}

/// Whether the segment between vertices `i` and `j` is a proper internal
/// diagonal: it stays inside the polygon and crosses no edge.
fn diagonal(i: usize, j: usize, n: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    in_cone_indexed(i, j, n, vertices, indices) && diagonalie(i, j, n, vertices, indices)
}

fn in_cone_indexed(i: usize, j: usize, n: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    let pi = position(i, vertices, indices);
    let pi1 = position(next(i, n), vertices, indices);
    let pin1 = position(prev(i, n), vertices, indices);
    let pj = position(j, vertices, indices);
    in_cone(pin1, pi, pi1, pj)
}

fn diagonalie(i: usize, j: usize, n: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    let d0 = position(i, vertices, indices);
    let d1 = position(j, vertices, indices);

    // For each edge (k, k + 1) of the polygon.
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j.
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = position(k, vertices, indices);
        let p1 = position(k1, vertices, indices);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

/// Loosened variant of [`diagonal`] that tolerates vertices lying on the
/// diagonal, used as a last resort on degenerate contours.
fn diagonal_loose(i: usize, j: usize, n: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    in_cone_loose(i, j, n, vertices, indices) && diagonalie_loose(i, j, n, vertices, indices)
}

fn in_cone_loose(i: usize, j: usize, n: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    let pi = position(i, vertices, indices);
    let pi1 = position(next(i, n), vertices, indices);
    let pin1 = position(prev(i, n), vertices, indices);
    let pj = position(j, vertices, indices);
    if left_on(pin1, pi, pi1) {
        left_on(pi, pj, pin1) && left_on(pj, pi, pi1)
    } else {
        !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
    }
}

fn diagonalie_loose(i: usize, j: usize, n: usize, vertices: &[IVec2], indices: &[u32]) -> bool {
    let d0 = position(i, vertices, indices);
    let d1 = position(j, vertices, indices);

    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = position(k, vertices, indices);
        let p1 = position(k1, vertices, indices);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        if intersect_prop(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

/// Ear clipping triangulation of a simple polygon. Clips the shortest valid
/// ear first. `indices` maps polygon positions to vertex indices and is
/// consumed by the clipping.
fn triangulate(vertices: &[IVec2], indices: &mut Vec<u32>) -> Result<Vec<[u16; 3]>, ()> {
    let mut n = indices.len();
    let mut triangles = Vec::with_capacity(n.saturating_sub(2));

    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, n, vertices, indices) {
            indices[i1] |= CAN_CLIP;
        }
    }

    while n > 3 {
        // Find the clippable ear whose diagonal is shortest.
        let mut min_len = -1_i64;
        let mut min_index = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & CAN_CLIP != 0 {
                let p0 = position(i, vertices, indices);
                let p2 = position(next(i1, n), vertices, indices);
                let delta = p2 - p0;
                let len = delta.x as i64 * delta.x as i64 + delta.y as i64 * delta.y as i64;
                if min_len < 0 || len < min_len {
                    min_len = len;
                    min_index = Some(i);
                }
            }
        }

        if min_index.is_none() {
            // The contour is messed up. Try the loosened diagonal test to
            // avoid failing entirely, even if the result may be ugly.
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if diagonal_loose(i, i2, n, vertices, indices) {
                    let p0 = position(i, vertices, indices);
                    let p2 = position(i2, vertices, indices);
                    let delta = p2 - p0;
                    let len = delta.x as i64 * delta.x as i64 + delta.y as i64 * delta.y as i64;
                    if min_len < 0 || len < min_len {
                        min_len = len;
                        min_index = Some(i);
                    }
                }
            }
            if min_index.is_none() {
                return Err(());
            }
        }

        let i = min_index.ok_or(())?;
        let i1 = next(i, n);
        let i2 = next(i1, n);

        triangles.push([
            (indices[i] & INDEX_MASK) as u16,
            (indices[i1] & INDEX_MASK) as u16,
            (indices[i2] & INDEX_MASK) as u16,
        ]);

        // Remove the clipped vertex.
        n -= 1;
        indices.copy_within(i1 + 1..=n, i1);

        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);
        // Update the diagonal flags around the clipped ear.
        if diagonal(prev(i, n), i1, n, vertices, indices) {
            indices[i] |= CAN_CLIP;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next(i1, n), n, vertices, indices) {
            indices[i1] |= CAN_CLIP;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    triangles.push([
        (indices[0] & INDEX_MASK) as u16,
        (indices[1] & INDEX_MASK) as u16,
        (indices[2] & INDEX_MASK) as u16,
    ]);
    Ok(triangles)
}

/// Strictly left on the xz-plane with u16 vertices.
#[inline]
fn uleft(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    (b.x as i32 - a.x as i32) * (c.z as i32 - a.z as i32)
        - (c.x as i32 - a.x as i32) * (b.z as i32 - a.z as i32)
        < 0
}

/// The squared length of the edge the two polygons can be merged along, or
/// `None` when merging is impossible: no shared edge, too many vertices, or
/// a non-convex result.
fn polygon_merge_value(
    pa: &[u16],
    pb: &[u16],
    vertices: &[U16Vec3],
) -> Option<(i64, usize, usize)> {
    let na = count_polygon_vertices(pa);
    let nb = count_polygon_vertices(pb);

    // The merged polygon would be too big.
    if na + nb - 2 > pa.len() {
        return None;
    }

    // Check if the polygons share an edge.
    let mut shared = None;
    for i in 0..na {
        let mut va0 = pa[i];
        let mut va1 = pa[next(i, na)];
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let mut vb0 = pb[j];
            let mut vb1 = pb[next(j, nb)];
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break;
            }
        }
    }
    let (ea, eb) = shared?;

    // The merged polygon must remain convex at both ends of the shared edge.
    let va = pa[prev(ea, na)];
    let vb = pa[ea];
    let vc = pb[(eb + 2) % nb];
    if !uleft(
        vertices[va as usize],
        vertices[vb as usize],
        vertices[vc as usize],
    ) {
        return None;
    }
    let va = pb[prev(eb, nb)];
    let vb = pb[eb];
    let vc = pa[(ea + 2) % na];
    if !uleft(
        vertices[va as usize],
        vertices[vb as usize],
        vertices[vc as usize],
    ) {
        return None;
    }

    let va = vertices[pa[ea] as usize];
    let vb = vertices[pa[next(ea, na)] as usize];
    let dx = vb.x as i64 - va.x as i64;
    let dz = vb.z as i64 - va.z as i64;
    Some((dx * dx + dz * dz, ea, eb))
}

/// Greedily merges polygons along their longest shared edge until no valid
/// merge remains. `attributes`, when given, keeps the per-polygon region and
/// area in sync, degrading the region to [`RegionId::NONE`] when polygons of
/// two regions merge.
fn merge_polygons(
    polys: &mut Vec<u16>,
    nvp: usize,
    vertices: &[U16Vec3],
    mut attributes: Option<(&mut Vec<RegionId>, &mut Vec<AreaType>)>,
) {
    loop {
        let polygon_count = polys.len() / nvp;
        let mut best_value = 0_i64;
        let mut best = None;
        for j in 0..polygon_count.saturating_sub(1) {
            for k in j + 1..polygon_count {
                let pj = &polys[j * nvp..(j + 1) * nvp];
                let pk = &polys[k * nvp..(k + 1) * nvp];
                if let Some((value, ea, eb)) = polygon_merge_value(pj, pk, vertices) {
                    if value > best_value {
                        best_value = value;
                        best = Some((j, k, ea, eb));
                    }
                }
            }
        }
        let Some((j, k, ea, eb)) = best else {
            break;
        };

        // Splice the two polygons together, dropping the shared edge.
        let pa = polys[j * nvp..(j + 1) * nvp].to_vec();
        let pb = polys[k * nvp..(k + 1) * nvp].to_vec();
        let na = count_polygon_vertices(&pa);
        let nb = count_polygon_vertices(&pb);
        let mut merged = Vec::with_capacity(nvp);
        for i in 0..na - 1 {
            merged.push(pa[(ea + 1 + i) % na]);
        }
        for i in 0..nb - 1 {
            merged.push(pb[(eb + 1 + i) % nb]);
        }
        merged.resize(nvp, Mesh::NULL_INDEX);
        polys[j * nvp..(j + 1) * nvp].copy_from_slice(&merged);

        if let Some((regions, areas)) = attributes.as_mut() {
            if regions[j] != regions[k] {
                regions[j] = RegionId::NONE;
            }
            regions.swap_remove(k);
            areas.swap_remove(k);
        }
        let last = polygon_count - 1;
        if k != last {
            let last_poly = polys[last * nvp..(last + 1) * nvp].to_vec();
            polys[k * nvp..(k + 1) * nvp].copy_from_slice(&last_poly);
        }
        polys.truncate(last * nvp);
    }
}

/// A shared polygon edge candidate during adjacency construction.
struct Edge {
    vert: [u16; 2],
    poly: [u16; 2],
    poly_edge: [usize; 2],
}

/// Computes the neighbor polygon across each polygon edge. Two polygons are
/// neighbors when they share both vertices of an edge.
fn build_adjacency(polygons: &[u16], vertex_count: usize, nvp: usize) -> Vec<u16> {
    let polygon_count = polygons.len() / nvp;
    let max_edge_count = polygon_count * nvp;
    let mut first_edge = vec![Mesh::NULL_INDEX; vertex_count];
    let mut next_edge = vec![Mesh::NULL_INDEX; max_edge_count];
    let mut edges: Vec<Edge> = Vec::with_capacity(max_edge_count);

    for (i, polygon) in polygons.chunks_exact(nvp).enumerate() {
        for j in 0..nvp {
            if polygon[j] == Mesh::NULL_INDEX {
                break;
            }
            let v0 = polygon[j];
            let v1 = if j + 1 >= nvp || polygon[j + 1] == Mesh::NULL_INDEX {
                polygon[0]
            } else {
                polygon[j + 1]
            };
            if v0 < v1 {
                next_edge[edges.len()] = first_edge[v0 as usize];
                first_edge[v0 as usize] = edges.len() as u16;
                edges.push(Edge {
                    vert: [v0, v1],
                    poly: [i as u16, i as u16],
                    poly_edge: [j, 0],
                });
            }
        }
    }

    for (i, polygon) in polygons.chunks_exact(nvp).enumerate() {
        for j in 0..nvp {
            if polygon[j] == Mesh::NULL_INDEX {
                break;
            }
            let v0 = polygon[j];
            let v1 = if j + 1 >= nvp || polygon[j + 1] == Mesh::NULL_INDEX {
                polygon[0]
            } else {
                polygon[j + 1]
            };
            if v0 > v1 {
                let mut e = first_edge[v1 as usize];
                while e != Mesh::NULL_INDEX {
                    let edge = &mut edges[e as usize];
                    if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                        edge.poly[1] = i as u16;
                        edge.poly_edge[1] = j;
                        break;
                    }
                    e = next_edge[e as usize];
                }
            }
        }
    }

    let mut neighbors = vec![Mesh::NULL_INDEX; polygons.len()];
    for edge in &edges {
        if edge.poly[0] != edge.poly[1] {
            neighbors[edge.poly[0] as usize * nvp + edge.poly_edge[0]] = edge.poly[1];
            neighbors[edge.poly[1] as usize * nvp + edge.poly_edge[1]] = edge.poly[0];
        }
    }
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{Contour, ContourVertex, RegionVertexId};

    // Vertex order matches the output of the boundary walk.
    fn square_contour(min: IVec2, max: IVec2, region: u16) -> Contour {
        let vertices = [
            (min.x, max.y),
            (max.x, max.y),
            (max.x, min.y),
            (min.x, min.y),
        ]
        .iter()
        .map(|&(x, z)| ContourVertex {
            position: U16Vec3::new(x as u16, 0, z as u16),
            data: RegionVertexId::default(),
        })
        .collect::<Vec<_>>();
        Contour {
            vertices: vertices.clone(),
            raw_vertices: vertices,
            region: RegionId::from(region),
            area: AreaType::DEFAULT_WALKABLE,
        }
    }

    fn contour_set(contours: Vec<Contour>) -> ContourSet {
        ContourSet {
            contours,
            aabb: Aabb3d::default(),
            cell_size: 0.3,
            cell_height: 0.2,
            width: 10,
            height: 10,
            border_size: 0,
            max_error: 1.3,
        }
    }

    #[test]
    fn triangulates_a_square() {
        let vertices = [
            IVec2::new(0, 2),
            IVec2::new(2, 2),
            IVec2::new(2, 0),
            IVec2::new(0, 0),
        ];
        let mut indices: Vec<u32> = (0..4).collect();
        let triangles = triangulate(&vertices, &mut indices).unwrap();
        assert_eq!(triangles.len(), 2);
    }

    #[test]
    fn square_becomes_one_polygon() {
        let set = contour_set(vec![square_contour(IVec2::new(0, 0), IVec2::new(4, 4), 1)]);
        let mesh = set.into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.vertices.len(), 4);
        let polygon = &mesh.polygons[..6];
        assert_eq!(count_polygon_vertices(polygon), 4);
        assert_eq!(mesh.regions[0], RegionId::from(1));
        // All edges are solid walls.
        assert!(
            mesh.polygon_neighbors[..4]
                .iter()
                .all(|&n| n == PolygonNavmesh::NO_INDEX)
        );
    }

    #[test]
    fn without_merging_the_square_stays_triangles() {
        let set = contour_set(vec![square_contour(IVec2::new(0, 0), IVec2::new(4, 4), 1)]);
        let mesh = set.into_polygon_mesh(3).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
    }

    #[test]
    fn adjacent_polygons_are_linked_symmetrically() {
        let set = contour_set(vec![
            square_contour(IVec2::new(0, 0), IVec2::new(2, 2), 1),
            square_contour(IVec2::new(2, 0), IVec2::new(4, 2), 2),
        ]);
        let nvp = 6;
        let mesh = set.into_polygon_mesh(nvp).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        // The shared edge links both ways.
        let neighbors_a = &mesh.polygon_neighbors[..nvp];
        let neighbors_b = &mesh.polygon_neighbors[nvp..2 * nvp];
        assert!(neighbors_a.contains(&1));
        assert!(neighbors_b.contains(&0));
    }

    #[test]
    fn shared_vertices_are_welded() {
        let set = contour_set(vec![
            square_contour(IVec2::new(0, 0), IVec2::new(2, 2), 1),
            square_contour(IVec2::new(2, 0), IVec2::new(4, 2), 2),
        ]);
        let mesh = set.into_polygon_mesh(6).unwrap();
        // 8 corners, 2 shared.
        assert_eq!(mesh.vertices.len(), 6);
    }

    #[test]
    fn merged_polygons_are_convex() {
        let set = contour_set(vec![square_contour(IVec2::new(0, 0), IVec2::new(6, 4), 7)]);
        let mesh = set.into_polygon_mesh(6).unwrap();
        let nvp = mesh.max_vertices_per_polygon;
        for polygon in mesh.polygons.chunks_exact(nvp) {
            let n = count_polygon_vertices(polygon);
            for i in 0..n {
                let a = mesh.vertices[polygon[i] as usize];
                let b = mesh.vertices[polygon[(i + 1) % n] as usize];
                let c = mesh.vertices[polygon[(i + 2) % n] as usize];
                assert!(uleft(a, b, c), "polygon is not convex at vertex {i}");
            }
        }
    }
}
