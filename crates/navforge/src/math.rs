use glam::{IVec2, Vec3A};

/// A 3-dimensional axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner of the box.
    pub min: Vec3A,
    /// The maximum corner of the box.
    pub max: Vec3A,
}

impl Aabb3d {
    /// Creates a new AABB from the given corners.
    pub fn new(min: impl Into<Vec3A>, max: impl Into<Vec3A>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Computes the AABB enclosing the given vertices.
    /// Returns `None` if the slice is empty.
    pub fn from_verts(vertices: &[Vec3A]) -> Option<Self> {
        let (first, rest) = vertices.split_first()?;
        let mut aabb = Self {
            min: *first,
            max: *first,
        };
        for vertex in rest {
            aabb.min = aabb.min.min(*vertex);
            aabb.max = aabb.max.max(*vertex);
        }
        Some(aabb)
    }

    #[inline]
    pub(crate) fn overlaps(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }
}

pub(crate) trait TriangleIndices {
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A;
}

impl TriangleIndices for glam::UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A {
        let a = vertices[self[0] as usize];
        let b = vertices[self[1] as usize];
        let c = vertices[self[2] as usize];
        let ab = b - a;
        let ac = c - a;
        ab.cross(ac).normalize_or_zero()
    }
}

pub(crate) trait TriangleVertices {
    fn aabb(&self) -> Aabb3d;
}

impl TriangleVertices for [Vec3A; 3] {
    #[inline]
    fn aabb(&self) -> Aabb3d {
        let min = self[0].min(self[1]).min(self[2]);
        let max = self[0].max(self[1]).max(self[2]);
        Aabb3d { min, max }
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard height (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

// Exact 2D predicates on the xz-plane, used by contour hole merging and
// polygon triangulation. All of them treat the y component as ignored.

/// Twice the signed area of the triangle `(a, b, c)`.
#[inline]
pub(crate) fn area2(a: IVec2, b: IVec2, c: IVec2) -> i32 {
    (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)
}

#[inline]
pub(crate) fn left(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) == 0
}

/// Proper intersection of segments `ab` and `cd`: they cross at a point
/// interior to both. Shared endpoints and collinear overlap do not count.
pub(crate) fn intersect_prop(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// `c` lies on the closed segment `ab`.
pub(crate) fn between(a: IVec2, b: IVec2, c: IVec2) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab is not vertical, check betweenness on x, else on y.
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.y <= c.y && c.y <= b.y) || (a.y >= c.y && c.y >= b.y)
    }
}

/// `point` lies in the cone described by the vertex `current` and its
/// neighbors `previous` and `next`.
pub(crate) fn in_cone(previous: IVec2, current: IVec2, next: IVec2, point: IVec2) -> bool {
    // Convex corner.
    if left_on(previous, current, next) {
        return left(current, point, previous) && left(point, current, next);
    }
    // Reflex corner, assumes the corner is not collinear.
    !(left_on(current, point, next) && left_on(point, current, previous))
}

/// Segments `ab` and `cd` intersect, properly or improperly.
pub(crate) fn intersect(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_from_verts() {
        let verts = [
            Vec3A::new(1.0, 2.0, 3.0),
            Vec3A::new(-1.0, 5.0, 0.0),
            Vec3A::new(0.0, 0.0, 4.0),
        ];
        let aabb = Aabb3d::from_verts(&verts).unwrap();
        assert_eq!(aabb.min, Vec3A::new(-1.0, 0.0, 0.0));
        assert_eq!(aabb.max, Vec3A::new(1.0, 5.0, 4.0));
        assert!(Aabb3d::from_verts(&[]).is_none());
    }

    #[test]
    fn segment_intersection() {
        let a = IVec2::new(0, 0);
        let b = IVec2::new(4, 4);
        let c = IVec2::new(0, 4);
        let d = IVec2::new(4, 0);
        assert!(intersect_prop(a, b, c, d));
        assert!(intersect(a, b, c, d));
        // Shared endpoint is an improper intersection.
        assert!(!intersect_prop(a, b, a, c));
        assert!(intersect(a, b, a, c));
        // Disjoint parallel segments.
        assert!(!intersect(a, c, d, b));
    }
}
