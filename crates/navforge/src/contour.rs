//! Contour tracing and simplification.

use glam::{IVec2, U16Vec3};
use tracing::warn;

use crate::{
    Aabb3d, CompactHeightfield,
    math::{in_cone, intersect},
    region::RegionId,
    span::AreaType,
};

bitflags::bitflags! {
    /// Controls which contour edges get split when they exceed the maximum
    /// edge length.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct BuildContoursFlags: u8 {
        /// Split outer wall edges.
        const TESSELLATE_SOLID_WALL_EDGES = 0x1;
        /// Split edges between areas.
        const TESSELLATE_AREA_EDGES = 0x2;
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::TESSELLATE_SOLID_WALL_EDGES
    }
}

bitflags::bitflags! {
    /// The per-vertex annotation of a contour vertex: the neighbor region id
    /// in the low bits plus border flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RegionVertexId: u32 {
        /// Masks the neighbor region id, including its border marker.
        const REGION_MASK = 0xffff;
        /// The vertex sits on a removable grid border.
        const BORDER_VERTEX = 0x10000;
        /// The edge starting at this vertex separates two area types.
        const AREA_BORDER = 0x20000;
    }
}

impl RegionVertexId {
    /// The neighbor region across the edge starting at this vertex.
    #[inline]
    pub fn region(self) -> RegionId {
        RegionId::from((self.bits() & Self::REGION_MASK.bits()) as u16)
    }

    /// Whether the vertex sits on a removable grid border.
    #[inline]
    pub fn is_border_vertex(self) -> bool {
        self.contains(Self::BORDER_VERTEX)
    }

    /// Whether the edge starting at this vertex separates two area types.
    #[inline]
    pub fn is_area_border(self) -> bool {
        self.contains(Self::AREA_BORDER)
    }
}

/// A vertex of a simplified or raw contour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourVertex {
    /// Position in cell units relative to the contour set's AABB.
    pub position: U16Vec3,
    /// Neighbor region and border annotations.
    pub data: RegionVertexId,
}

/// A simplified polygon outline of one region.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// The simplified vertices of the contour.
    pub vertices: Vec<ContourVertex>,
    /// The raw vertices collected while walking the region boundary.
    pub raw_vertices: Vec<ContourVertex>,
    /// The region this contour outlines.
    pub region: RegionId,
    /// The area type of the region.
    pub area: AreaType,
}

/// All contours of a partitioned compact heightfield.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// The contours, at most one outline per region.
    pub contours: Vec<Contour>,
    /// The AABB of the contour set, without the border padding.
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The width of the set along the x-axis in cell units, without borders
    pub width: u16,
    /// The height of the set along the z-axis in cell units, without borders
    pub height: u16,
    /// The AABB border size used to generate the source data.
    pub border_size: u16,
    /// The maximum allowed deviation from the raw contour, in world units.
    pub max_error: f32,
}

/// A raw contour point in cell units with its annotation data.
#[derive(Debug, Clone, Copy)]
struct RawPoint {
    x: i32,
    y: i32,
    z: i32,
    data: u32,
}

/// A simplified point referencing the raw point it was taken from.
#[derive(Debug, Clone, Copy)]
struct SimplifiedPoint {
    x: i32,
    y: i32,
    z: i32,
    raw_index: usize,
}

impl CompactHeightfield {
    /// Traces and simplifies the boundaries of all regions.
    ///
    /// Simplified vertices deviate at most `max_error` world units from the
    /// raw region boundary. Edges longer than `max_edge_len` cells are split
    /// when the matching [`BuildContoursFlags`] bit is set. Holes in a
    /// region are merged into its outline so each contour is a simple
    /// polygon. Contours that collapse below 3 vertices are dropped.
    ///
    /// Requires regions to be built first.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let mut aabb = self.aabb;
        if self.border_size > 0 {
            // Remove the offset introduced by the border padding.
            let pad = self.border_size as f32 * self.cell_size;
            aabb.min.x += pad;
            aabb.min.z += pad;
            aabb.max.x -= pad;
            aabb.max.z -= pad;
        }

        let mut contour_set = ContourSet {
            contours: Vec::with_capacity(self.max_region.index().max(8) as usize),
            aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width - self.border_size * 2,
            height: self.height - self.border_size * 2,
            border_size: self.border_size,
            max_error,
        };

        // Mark region boundaries: bit per direction where the neighbor
        // belongs to a different region.
        let mut flags = vec![0_u8; self.spans.len()];
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let region = self.spans[i].region;
                    if region == RegionId::NONE || region.is_border() {
                        flags[i] = 0;
                        continue;
                    }
                    let mut res = 0_u8;
                    for dir in 0..4 {
                        let neighbor_region = self
                            .con_index(x, z, i, dir)
                            .map(|neighbor| self.spans[neighbor.index].region)
                            .unwrap_or(RegionId::NONE);
                        if neighbor_region == region {
                            res |= 1 << dir;
                        }
                    }
                    // Inverse, mark non connected edges.
                    flags[i] = res ^ 0xf;
                }
            }
        }

        let mut raw_points: Vec<RawPoint> = Vec::with_capacity(256);
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if region == RegionId::NONE || region.is_border() {
                        continue;
                    }
                    let area = self.areas[i];

                    raw_points.clear();
                    self.walk_boundary(x, z, i, &mut flags, &mut raw_points);
                    let mut simplified =
                        simplify_contour(&raw_points, max_error, max_edge_len, build_flags);
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() < 3 {
                        warn!(
                            "Dropping degenerate contour of region {} with {} vertices",
                            region.bits(),
                            simplified.len()
                        );
                        continue;
                    }

                    let border = self.border_size as u32;
                    let edge_bits = RegionVertexId::REGION_MASK.bits()
                        | RegionVertexId::AREA_BORDER.bits();
                    let vertices = simplified
                        .iter()
                        .map(|point| {
                            // The neighbor region of the edge starting here is
                            // carried by the next raw point, the border vertex
                            // flag by the point itself.
                            let next = raw_points[(point.raw_index + 1) % raw_points.len()];
                            let own = raw_points[point.raw_index];
                            let data = (next.data & edge_bits)
                                | (own.data & RegionVertexId::BORDER_VERTEX.bits());
                            ContourVertex {
                                position: U16Vec3::new(
                                    (point.x as u32 - border) as u16,
                                    point.y as u16,
                                    (point.z as u32 - border) as u16,
                                ),
                                data: RegionVertexId::from_bits_retain(data),
                            }
                        })
                        .collect();
                    let raw_vertices = raw_points
                        .iter()
                        .map(|point| ContourVertex {
                            position: U16Vec3::new(
                                (point.x as u32 - border) as u16,
                                point.y as u16,
                                (point.z as u32 - border) as u16,
                            ),
                            data: RegionVertexId::from_bits_retain(point.data),
                        })
                        .collect();
                    contour_set.contours.push(Contour {
                        vertices,
                        raw_vertices,
                        region,
                        area,
                    });
                }
            }
        }

        merge_region_holes(&mut contour_set.contours, self.max_region);
        contour_set
    }

    /// Walks the boundary of a region clockwise, collecting a raw vertex at
    /// every traced edge. Visited edges are cleared from `flags`.
    fn walk_boundary(
        &self,
        mut x: u16,
        mut z: u16,
        mut span_index: usize,
        flags: &mut [u8],
        points: &mut Vec<RawPoint>,
    ) {
        // Choose the first non-connected edge.
        let mut dir = 0_u8;
        while flags[span_index] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_index = span_index;
        let area = self.areas[span_index];

        const MAX_ITERATIONS: u32 = 40000;

        let mut iter = 0;
        while iter < MAX_ITERATIONS {
            iter += 1;
            if flags[span_index] & (1 << dir) != 0 {
                // Choose the edge corner.
                let (height, is_border_vertex) = self.corner_height(x, z, span_index, dir);
                let mut px = x as i32;
                let py = height;
                let mut pz = z as i32;
                match dir {
                    0 => pz += 1,
                    1 => {
                        px += 1;
                        pz += 1;
                    }
                    2 => px += 1,
                    _ => {}
                }
                let mut data = 0_u32;
                if let Some(neighbor) = self.con_index(x, z, span_index, dir) {
                    data = self.spans[neighbor.index].region.bits() as u32;
                    if area != self.areas[neighbor.index] {
                        data |= RegionVertexId::AREA_BORDER.bits();
                    }
                }
                if is_border_vertex {
                    data |= RegionVertexId::BORDER_VERTEX.bits();
                }
                points.push(RawPoint {
                    x: px,
                    y: py,
                    z: pz,
                    data,
                });

                // Remove visited edges.
                flags[span_index] &= !(1 << dir);
                dir = (dir + 1) & 0x3;
            } else {
                let Some(neighbor) = self.con_index(x, z, span_index, dir) else {
                    // Should not happen, the flag marks connected edges.
                    return;
                };
                x = neighbor.x;
                z = neighbor.z;
                span_index = neighbor.index;
                dir = (dir + 3) & 0x3;
            }

            if start_index == span_index && start_dir == dir {
                return;
            }
        }
        warn!("Contour walk did not close after {MAX_ITERATIONS} iterations");
    }

    /// The height of the corner between `dir` and the next direction, taken
    /// as the maximum floor of the surrounding spans. Also reports whether
    /// the corner is a removable border vertex.
    fn corner_height(&self, x: u16, z: u16, span_index: usize, dir: u8) -> (i32, bool) {
        let dir_p = (dir + 1) & 0x3;
        let mut height = self.spans[span_index].y as i32;

        // Combine region and area codes so that border vertices between two
        // areas are kept.
        let reg_code = |index: usize| {
            self.spans[index].region.bits() as u32 | ((self.areas[index].0 as u32) << 16)
        };
        let mut regs = [0_u32; 4];
        regs[0] = reg_code(span_index);

        if let Some(neighbor) = self.con_index(x, z, span_index, dir) {
            height = height.max(self.spans[neighbor.index].y as i32);
            regs[1] = reg_code(neighbor.index);
            if let Some(diagonal) = self.con_index(neighbor.x, neighbor.z, neighbor.index, dir_p) {
                height = height.max(self.spans[diagonal.index].y as i32);
                regs[2] = reg_code(diagonal.index);
            }
        }
        if let Some(neighbor) = self.con_index(x, z, span_index, dir_p) {
            height = height.max(self.spans[neighbor.index].y as i32);
            regs[3] = reg_code(neighbor.index);
            if let Some(diagonal) = self.con_index(neighbor.x, neighbor.z, neighbor.index, dir) {
                height = height.max(self.spans[diagonal.index].y as i32);
                regs[2] = reg_code(diagonal.index);
            }
        }

        // The vertex is a removable border vertex when two same exterior
        // cells in a row are followed by two interior cells of the same area
        // and none of the cells is missing.
        let border_bits = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = j;
            let b = (j + 1) & 0x3;
            let c = (j + 2) & 0x3;
            let d = (j + 3) & 0x3;
            let two_same_exteriors =
                (regs[a] & regs[b] & border_bits) != 0 && regs[a] == regs[b];
            let two_interiors = ((regs[c] | regs[d]) & border_bits) == 0;
            let interiors_same_area = (regs[c] >> 16) == (regs[d] >> 16);
            let no_zeros = regs[a] != 0 && regs[b] != 0 && regs[c] != 0 && regs[d] != 0;
            two_same_exteriors && two_interiors && interiors_same_area && no_zeros
        });

        (height, is_border_vertex)
    }
}

/// Squared distance of `(x, z)` from the segment `(ax, az)` to `(bx, bz)`.
fn distance_point_segment_squared(x: i32, z: i32, ax: i32, az: i32, bx: i32, bz: i32) -> f32 {
    let dx = (bx - ax) as f32;
    let dz = (bz - az) as f32;
    let mut t = 0.0;
    let d = dx * dx + dz * dz;
    if d > 0.0 {
        let px = (x - ax) as f32;
        let pz = (z - az) as f32;
        t = ((dx * px + dz * pz) / d).clamp(0.0, 1.0);
    }
    let nx = ax as f32 + t * dx - x as f32;
    let nz = az as f32 + t * dz - z as f32;
    nx * nx + nz * nz
}

fn simplify_contour(
    points: &[RawPoint],
    max_error: f32,
    max_edge_len: u16,
    build_flags: BuildContoursFlags,
) -> Vec<SimplifiedPoint> {
    let region_mask = RegionVertexId::REGION_MASK.bits();
    let area_border = RegionVertexId::AREA_BORDER.bits();
    let mut simplified: Vec<SimplifiedPoint> = Vec::with_capacity(64);

    // The contour has portals to other regions if any point carries a
    // neighbor region.
    let has_connections = points.iter().any(|point| point.data & region_mask != 0);
    if has_connections {
        // Add a new point at every location where the region changes.
        let n = points.len();
        for i in 0..n {
            let ii = (i + 1) % n;
            let different_regions =
                points[i].data & region_mask != points[ii].data & region_mask;
            let area_borders = points[i].data & area_border != points[ii].data & area_border;
            if different_regions || area_borders {
                simplified.push(SimplifiedPoint {
                    x: points[i].x,
                    y: points[i].y,
                    z: points[i].z,
                    raw_index: i,
                });
            }
        }
    }

    if simplified.is_empty() {
        // The contour is one region with solid walls all around. Seed the
        // simplification with the lower-left and upper-right vertices.
        let mut lower_left = 0;
        let mut upper_right = 0;
        for (i, point) in points.iter().enumerate() {
            let ll = &points[lower_left];
            let ur = &points[upper_right];
            if point.x < ll.x || (point.x == ll.x && point.z < ll.z) {
                lower_left = i;
            }
            if point.x > ur.x || (point.x == ur.x && point.z > ur.z) {
                upper_right = i;
            }
        }
        for raw_index in [lower_left, upper_right] {
            simplified.push(SimplifiedPoint {
                x: points[raw_index].x,
                y: points[raw_index].y,
                z: points[raw_index].z,
                raw_index,
            });
        }
    }

    // Add points until all raw points are within error tolerance of the
    // simplified shape.
    let pn = points.len();
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();

        let mut ax = simplified[i].x;
        let mut az = simplified[i].z;
        let ai = simplified[i].raw_index;

        let mut bx = simplified[ii].x;
        let mut bz = simplified[ii].z;
        let bi = simplified[ii].raw_index;

        // Find the raw point with the maximum deviation from the segment.
        let mut max_deviation = 0.0_f32;
        let mut max_index = None;
        let mut ci;
        let cinc;
        let endi;

        // Traverse the segment in lexicographic order so that the max
        // deviation is calculated the same way for both edge directions.
        if bx > ax || (bx == ax && bz > az) {
            cinc = 1;
            ci = (ai + cinc) % pn;
            endi = bi;
        } else {
            cinc = pn - 1;
            ci = (bi + cinc) % pn;
            endi = ai;
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
        }

        // Tessellate only outer edges or edges between areas.
        if points[ci].data & region_mask == 0 || points[ci].data & area_border != 0 {
            while ci != endi {
                let d = distance_point_segment_squared(points[ci].x, points[ci].z, ax, az, bx, bz);
                if d > max_deviation {
                    max_deviation = d;
                    max_index = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        // If the max deviation is larger than the accepted error, add the
        // point, else continue to the next segment.
        match max_index {
            Some(max_index) if max_deviation > max_error * max_error => {
                simplified.insert(
                    i + 1,
                    SimplifiedPoint {
                        x: points[max_index].x,
                        y: points[max_index].y,
                        z: points[max_index].z,
                        raw_index: max_index,
                    },
                );
            }
            _ => {
                i += 1;
            }
        }
    }

    // Split too long edges.
    if max_edge_len > 0
        && build_flags.intersects(
            BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES
                | BuildContoursFlags::TESSELLATE_AREA_EDGES,
        )
    {
        let max_edge_len_squared = max_edge_len as i32 * max_edge_len as i32;
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();

            let ax = simplified[i].x;
            let az = simplified[i].z;
            let ai = simplified[i].raw_index;

            let bx = simplified[ii].x;
            let bz = simplified[ii].z;
            let bi = simplified[ii].raw_index;

            let mut max_index = None;
            let ci = (ai + 1) % pn;

            // Tessellate only outer edges or edges between areas.
            let is_wall = points[ci].data & region_mask == 0;
            let is_area_edge = points[ci].data & area_border != 0;
            let tessellate = (build_flags
                .contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES)
                && is_wall)
                || (build_flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES)
                    && is_area_edge);

            if tessellate {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len_squared {
                    // Round based on lexicographic order so that the split is
                    // consistent for both edge directions.
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        if bx > ax || (bx == ax && bz > az) {
                            max_index = Some((ai + n / 2) % pn);
                        } else {
                            max_index = Some((ai + (n + 1) / 2) % pn);
                        }
                    }
                }
            }

            match max_index {
                Some(max_index) => {
                    simplified.insert(
                        i + 1,
                        SimplifiedPoint {
                            x: points[max_index].x,
                            y: points[max_index].y,
                            z: points[max_index].z,
                            raw_index: max_index,
                        },
                    );
                }
                None => {
                    i += 1;
                }
            }
        }
    }

    simplified
}

/// Removes adjacent simplified points that are equal on the xz-plane. The
/// triangulator cannot handle zero length segments.
fn remove_degenerate_segments(simplified: &mut Vec<SimplifiedPoint>) {
    let mut i = 0;
    while i < simplified.len() {
        let next = (i + 1) % simplified.len();
        if simplified[i].x == simplified[next].x && simplified[i].z == simplified[next].z {
            simplified.remove(next);
        } else {
            i += 1;
        }
    }
}

/// The signed area of the polygon on the xz-plane. Positive for outlines
/// in boundary walk order, negative for holes.
fn polygon_area_2d(vertices: &[ContourVertex]) -> i32 {
    let mut area = 0_i32;
    let n = vertices.len();
    for i in 0..n {
        let vi = vertices[i].position;
        let vj = vertices[(i + 1) % n].position;
        area += vj.x as i32 * vi.z as i32 - vi.x as i32 * vj.z as i32;
    }
    (area + 1) / 2
}

fn vertex_xz(vertex: &ContourVertex) -> IVec2 {
    IVec2::new(vertex.position.x as i32, vertex.position.z as i32)
}

/// Index and position of the leftmost vertex of a contour.
fn find_left_most_vertex(contour: &Contour) -> (usize, i32, i32) {
    let mut leftmost = 0;
    let mut min_x = contour.vertices[0].position.x as i32;
    let mut min_z = contour.vertices[0].position.z as i32;
    for (i, vertex) in contour.vertices.iter().enumerate().skip(1) {
        let x = vertex.position.x as i32;
        let z = vertex.position.z as i32;
        if x < min_x || (x == min_x && z < min_z) {
            min_x = x;
            min_z = z;
            leftmost = i;
        }
    }
    (leftmost, min_x, min_z)
}

/// Whether the segment from `d0` to `d1` crosses any edge of the contour.
/// Edges touching vertex `skip_vertex` or sharing an endpoint are ignored.
fn intersect_seg_contour(
    d0: IVec2,
    d1: IVec2,
    skip_vertex: Option<usize>,
    vertices: &[ContourVertex],
) -> bool {
    let n = vertices.len();
    for k in 0..n {
        let k1 = (k + 1) % n;
        if skip_vertex == Some(k) || skip_vertex == Some(k1) {
            continue;
        }
        let p0 = vertex_xz(&vertices[k]);
        let p1 = vertex_xz(&vertices[k1]);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

/// Splices the hole contour into the outline via the diagonal between
/// outline vertex `outline_index` and hole vertex `hole_index`.
fn merge_contours(outline: &mut Contour, hole: &mut Contour, outline_index: usize, hole_index: usize) {
    let outline_count = outline.vertices.len();
    let hole_count = hole.vertices.len();
    let mut merged = Vec::with_capacity(outline_count + hole_count + 2);

    // Copy the outline up to and including the diagonal start, then the
    // whole hole, then back.
    for i in 0..=outline_count {
        merged.push(outline.vertices[(outline_index + i) % outline_count]);
    }
    for i in 0..=hole_count {
        merged.push(hole.vertices[(hole_index + i) % hole_count]);
    }

    outline.vertices = merged;
    hole.vertices.clear();
}

#[derive(Debug, Clone, Copy)]
struct HoleInfo {
    contour_index: usize,
    min_x: i32,
    min_z: i32,
    leftmost: usize,
}

/// Merges all negatively wound contours (holes) into the outline contour of
/// their region so that every remaining contour is a simple polygon.
fn merge_region_holes(contours: &mut Vec<Contour>, max_region: RegionId) {
    let windings: Vec<i8> = contours
        .iter()
        .map(|contour| {
            if polygon_area_2d(&contour.vertices) < 0 {
                -1
            } else {
                1
            }
        })
        .collect();
    if !windings.contains(&-1) {
        return;
    }

    let region_count = max_region.index() as usize + 1;
    let mut outlines: Vec<Option<usize>> = vec![None; region_count];
    let mut holes: Vec<Vec<HoleInfo>> = vec![Vec::new(); region_count];

    for (i, contour) in contours.iter().enumerate() {
        let region = contour.region.index() as usize;
        if region >= region_count {
            continue;
        }
        if windings[i] > 0 {
            if outlines[region].is_some() {
                warn!("Region {region} has multiple outlines");
            } else {
                outlines[region] = Some(i);
            }
        } else {
            let (leftmost, min_x, min_z) = find_left_most_vertex(contour);
            holes[region].push(HoleInfo {
                contour_index: i,
                min_x,
                min_z,
                leftmost,
            });
        }
    }

    for region in 0..region_count {
        if holes[region].is_empty() {
            continue;
        }
        let Some(outline_index) = outlines[region] else {
            warn!(
                "Bad outline for region {region}, contour simplification is likely too aggressive"
            );
            continue;
        };

        // Merge holes left to right.
        holes[region].sort_by(|a, b| a.min_x.cmp(&b.min_x).then(a.min_z.cmp(&b.min_z)));

        for hole_position in 0..holes[region].len() {
            let hole = holes[region][hole_position];
            let mut merge = None;

            let mut best_vertex = hole.leftmost;
            let hole_vertex_count = contours[hole.contour_index].vertices.len();
            'candidates: for _ in 0..hole_vertex_count {
                // Collect the outline vertices from which the hole vertex is
                // visible, closest first.
                let corner = vertex_xz(&contours[hole.contour_index].vertices[best_vertex]);
                let outline = &contours[outline_index];
                let mut diagonals: Vec<(usize, i32)> = (0..outline.vertices.len())
                    .filter(|&j| {
                        let n = outline.vertices.len();
                        let previous = vertex_xz(&outline.vertices[(j + n - 1) % n]);
                        let current = vertex_xz(&outline.vertices[j]);
                        let next = vertex_xz(&outline.vertices[(j + 1) % n]);
                        in_cone(previous, current, next, corner)
                    })
                    .map(|j| {
                        let delta = vertex_xz(&outline.vertices[j]) - corner;
                        (j, delta.x * delta.x + delta.y * delta.y)
                    })
                    .collect();
                diagonals.sort_by_key(|&(_, distance)| distance);

                // Find a diagonal that does not cross the outline or any of
                // the remaining holes.
                for (outline_vertex, _) in diagonals {
                    let point = vertex_xz(&contours[outline_index].vertices[outline_vertex]);
                    let mut intersects = intersect_seg_contour(
                        point,
                        corner,
                        Some(outline_vertex),
                        &contours[outline_index].vertices,
                    );
                    for remaining in holes[region][hole_position..].iter() {
                        if intersects {
                            break;
                        }
                        intersects |= intersect_seg_contour(
                            point,
                            corner,
                            None,
                            &contours[remaining.contour_index].vertices,
                        );
                    }
                    if !intersects {
                        merge = Some((outline_vertex, best_vertex));
                        break 'candidates;
                    }
                }
                // All diagonals of this vertex intersect, try the next one.
                best_vertex = (best_vertex + 1) % hole_vertex_count;
            }

            let Some((outline_vertex, hole_vertex)) = merge else {
                warn!("Failed to find merge point for hole in region {region}");
                continue;
            };
            let (outline, hole_contour) = if outline_index < hole.contour_index {
                let (a, b) = contours.split_at_mut(hole.contour_index);
                (&mut a[outline_index], &mut b[0])
            } else {
                let (a, b) = contours.split_at_mut(outline_index);
                (&mut b[0], &mut a[hole.contour_index])
            };
            merge_contours(outline, hole_contour, outline_vertex, hole_vertex);
        }
    }

    // Merged holes are left empty.
    contours.retain(|contour| !contour.vertices.is_empty());
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn vertex(x: u16, z: u16) -> ContourVertex {
        ContourVertex {
            position: U16Vec3::new(x, 0, z),
            data: RegionVertexId::default(),
        }
    }

    #[test]
    fn winding_of_square() {
        // The boundary walk of a 2x2 cell region emits this vertex order.
        let outline = vec![
            vertex(0, 1),
            vertex(0, 2),
            vertex(1, 2),
            vertex(2, 2),
            vertex(2, 1),
            vertex(2, 0),
            vertex(1, 0),
            vertex(0, 0),
        ];
        let hole: Vec<_> = outline.iter().rev().copied().collect();
        assert!(polygon_area_2d(&outline) > 0);
        assert!(polygon_area_2d(&hole) < 0);
    }

    #[test]
    fn distance_to_segment() {
        assert_relative_eq!(distance_point_segment_squared(1, 1, 0, 0, 2, 0), 1.0);
        assert_relative_eq!(distance_point_segment_squared(1, 0, 0, 0, 2, 0), 0.0);
        // Off the diagonal, the projection lands between the endpoints.
        assert_relative_eq!(distance_point_segment_squared(1, 0, 0, 0, 2, 2), 0.5);
        // Beyond the endpoint, distance to the endpoint itself.
        assert_relative_eq!(distance_point_segment_squared(3, 0, 0, 0, 2, 0), 1.0);
    }

    #[test]
    fn degenerate_segments_are_removed() {
        let mut simplified = vec![
            SimplifiedPoint {
                x: 0,
                y: 0,
                z: 0,
                raw_index: 0,
            },
            SimplifiedPoint {
                x: 0,
                y: 5,
                z: 0,
                raw_index: 1,
            },
            SimplifiedPoint {
                x: 2,
                y: 0,
                z: 0,
                raw_index: 2,
            },
            SimplifiedPoint {
                x: 0,
                y: 0,
                z: 2,
                raw_index: 3,
            },
        ];
        remove_degenerate_segments(&mut simplified);
        assert_eq!(simplified.len(), 3);
    }

    #[test]
    fn leftmost_vertex_prefers_lower_z() {
        let contour = Contour {
            vertices: vec![vertex(3, 1), vertex(0, 4), vertex(0, 1), vertex(2, 0)],
            ..Default::default()
        };
        let (leftmost, min_x, min_z) = find_left_most_vertex(&contour);
        assert_eq!(leftmost, 2);
        assert_eq!((min_x, min_z), (0, 1));
    }
}
