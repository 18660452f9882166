use crate::{Aabb3d, BuildContoursFlags, ConvexVolume};

/// The algorithm used to partition the walkable surface into regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PartitionKind {
    /// Partitions via a distance field and watershed flooding. The slowest
    /// option, but produces the nicest region shapes. The best choice for
    /// offline builds of arbitrary geometry.
    #[default]
    Watershed,
    /// Partitions with a single row-major sweep. Fast and free of overlaps,
    /// but tends to produce long thin regions.
    Monotone,
    /// Monotone sweep followed by merging the sweep regions into 2D layers.
    /// A good middle ground for multi-story geometry.
    Layers,
}

/// Specifies a configuration to use when building a navmesh.
/// Usually built using [`NavmeshConfigBuilder`].
///
/// This is an aggregation of parameters used at different stages of the
/// build process. Units are either voxels (vx) or world units (wu). The
/// units for voxels and grid sizes are derived from
/// [`Self::cell_size`] and [`Self::cell_height`].
///
/// > Note:
/// >
/// > First you should decide the size of your agent's logical cylinder.
/// > If your game world uses meters as units, a reasonable starting point
/// > for a human-sized agent might be a radius of 0.4 and a height of 2.0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The width of the field along the x-axis. `[Limit: >= 0] [Units: vx]`
    pub width: u16,

    /// The height of the field along the z-axis. `[Limit: >= 0] [Units: vx]`
    pub height: u16,

    /// The size of the non-navigable border around the heightfield.
    /// `[Limit: >=0] [Units: vx]`
    ///
    /// This value represents the closest the walkable area of the
    /// heightfield should come to the xz-plane AABB of the field. It has no
    /// impact on the borders around internal obstructions.
    pub border_size: u16,

    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// This value is usually derived from the agent radius `r`, with `r / 2`
    /// or `r / 3` as recommended starting values. Smaller values increase
    /// rasterization resolution and navmesh detail, but total generation
    /// time grows steeply. Use as large a value as you can get away with.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// Defined separately from [`Self::cell_size`] to allow greater
    /// precision in height tests. A good starting point is half the cell
    /// size. If small holes appear around stairs or curbs, decrease this
    /// value.
    pub cell_height: f32,

    /// The field's AABB. `[Units: wu]`
    pub aabb: Aabb3d,

    /// The maximum slope that is considered walkable.
    /// `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    ///
    /// The angle the surface normal of a triangle may differ from the
    /// world's up vector. The practical upper limit is usually around
    /// `85.0_f32.to_radians()`.
    pub walkable_slope_angle: f32,

    /// Minimum floor to ceiling height that will still allow the floor area
    /// to be considered walkable. `[Limit: >= 3] [Units: vx]`
    ///
    /// Usually the maximum agent height, calculated as
    /// `(agent_height / cell_height).ceil()`.
    pub walkable_height: u16,

    /// Maximum ledge height that is considered to still be traversable.
    /// `[Limit: >=0] [Units: vx]`
    ///
    /// Allows the mesh to flow over low lying obstructions such as curbs and
    /// up/down stairways. Usually how far up/down an agent can step,
    /// calculated as `(max_climb / cell_height).floor()`.
    pub walkable_climb: u16,

    /// The distance to erode/shrink the walkable area of the heightfield
    /// away from obstructions. `[Limit: >=0] [Units: vx]`
    ///
    /// Usually the maximum agent radius, calculated as
    /// `(agent_radius / cell_size).ceil()`. With a non-zero radius, runtime
    /// navigation only needs to check that the agent's center stays within
    /// the navmesh. A radius of zero is allowed but not recommended.
    pub walkable_radius: u16,

    /// The maximum allowed length for contour edges along the border of the
    /// mesh. `[Limit: >=0] [Units: vx]`
    ///
    /// Long outer edges can produce very long thin triangles. A good value
    /// is around `walkable_radius * 8`. Zero disables the feature.
    pub max_edge_len: u16,

    /// The maximum distance a simplified contour's border edges should
    /// deviate from the original raw contour. `[Limit: >=0] [Units: vx]`
    ///
    /// Good values are in the range `[1.1, 1.5]`. Below 1.1 sawtoothing
    /// starts to appear; above 1.5 the simplification starts to cut corners
    /// it shouldn't. Only applies to the xz-plane.
    pub max_simplification_error: f32,

    /// The minimum number of cells allowed to form isolated island regions.
    /// `[Limit: >=0] [Units: vx]`
    ///
    /// Smaller regions are removed. Useful against useless regions forming
    /// on geometry such as table tops and box tops.
    pub min_region_area: u16,

    /// Any regions with a span count smaller than this value will, if
    /// possible, be merged with larger regions. `[Limit: >=0] [Units: vx]`
    pub merge_region_area: u16,

    /// The maximum number of vertices allowed for polygons generated during
    /// the contour to polygon conversion process. `[Limit: >= 3]`
    pub max_vertices_per_polygon: u16,

    /// The partitioning algorithm to use.
    pub partition: PartitionKind,

    /// Whether spans behind a low obstruction should be marked walkable.
    pub filter_low_hanging_obstacles: bool,

    /// Whether spans at the edge of a ledge should be marked unwalkable.
    pub filter_ledge_spans: bool,

    /// Whether spans with too little headroom should be marked unwalkable.
    pub filter_walkable_low_height_spans: bool,

    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation
    /// process.
    pub contour_flags: BuildContoursFlags,

    /// Volumes that override the area type of the spans they enclose.
    pub area_volumes: Vec<ConvexVolume>,

    /// Whether the intermediate build artifacts should be kept in the
    /// [`NavmeshArtifacts`](crate::NavmeshArtifacts) for debugging.
    pub keep_intermediates: bool,
}

/// A builder for [`NavmeshConfig`]. The config has lots of interdependent
/// parameters, so this builder provides a convenient way to derive them all
/// from agent-centric world unit values. The defaults are reasonable for an
/// agent resembling an adult human.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size. `[Limit: > 0] [Units: wu]`
    pub cell_size: f32,
    /// The y-axis cell size. `[Limit: > 0] [Units: wu]`
    pub cell_height: f32,
    /// The height of the agent. `[Limit: > 0] [Units: wu]`
    ///
    /// It's often a good idea to add a little bit of padding. An agent that
    /// is 1.8 world units tall might want to set this value to 2.0 units.
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: > 0] [Units: wu]`
    pub agent_radius: f32,
    /// How high the agent can step. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// The maximum walkable slope. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    pub agent_max_slope: f32,
    /// Regions smaller than the square of this value are removed. `[Units: vx]`
    pub region_min_size: f32,
    /// Regions smaller than the square of this value are merged. `[Units: vx]`
    pub region_merge_size: f32,
    /// The maximum contour edge length. `[Units: wu]`
    pub edge_max_len: f32,
    /// The maximum contour simplification error. `[Units: vx]`
    pub edge_max_error: f32,
    /// The maximum number of vertices per polygon. `[Limit: >= 3]`
    pub verts_per_poly: u16,
    /// The size of the non-navigable border around the heightfield. `[Units: vx]`
    pub border_size: u16,
    /// The field's AABB. `[Units: wu]`
    pub aabb: Aabb3d,
    /// The partitioning algorithm to use.
    pub partition: PartitionKind,
    /// Whether spans behind a low obstruction should be marked walkable.
    pub filter_low_hanging_obstacles: bool,
    /// Whether spans at the edge of a ledge should be marked unwalkable.
    pub filter_ledge_spans: bool,
    /// Whether spans with too little headroom should be marked unwalkable.
    pub filter_walkable_low_height_spans: bool,
    /// Flags controlling the contour generation process.
    pub contour_flags: BuildContoursFlags,
    /// Volumes that override the area type of the spans they enclose.
    pub area_volumes: Vec<ConvexVolume>,
    /// Whether the intermediate build artifacts should be kept.
    pub keep_intermediates: bool,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            border_size: 0,
            aabb: Aabb3d::default(),
            partition: PartitionKind::default(),
            filter_low_hanging_obstacles: true,
            filter_ledge_spans: true,
            filter_walkable_low_height_spans: true,
            contour_flags: BuildContoursFlags::default(),
            area_volumes: Vec::new(),
            keep_intermediates: false,
        }
    }
}

impl NavmeshConfigBuilder {
    /// Builds a [`NavmeshConfig`] from the current configuration.
    pub fn build(self) -> NavmeshConfig {
        NavmeshConfig {
            width: ((self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5) as u16,
            height: ((self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5) as u16,
            border_size: self.border_size,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb: self.aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius: (self.agent_radius / self.cell_size).ceil() as u16,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u16,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u16,
            max_vertices_per_polygon: self.verts_per_poly,
            partition: self.partition,
            filter_low_hanging_obstacles: self.filter_low_hanging_obstacles,
            filter_ledge_spans: self.filter_ledge_spans,
            filter_walkable_low_height_spans: self.filter_walkable_low_height_spans,
            contour_flags: self.contour_flags,
            area_volumes: self.area_volumes,
            keep_intermediates: self.keep_intermediates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3A;

    #[test]
    fn derives_voxel_units_from_agent_profile() {
        let config = NavmeshConfigBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, Vec3A::new(30.0, 4.0, 30.0)),
            ..Default::default()
        }
        .build();
        assert_eq!(config.width, 100);
        assert_eq!(config.height, 100);
        // ceil(2.0 / 0.2)
        assert_eq!(config.walkable_height, 10);
        // floor(0.9 / 0.2)
        assert_eq!(config.walkable_climb, 4);
        // ceil(0.6 / 0.3)
        assert_eq!(config.walkable_radius, 2);
        assert_eq!(config.min_region_area, 64);
        assert_eq!(config.merge_region_area, 400);
        assert_eq!(config.max_edge_len, 40);
    }
}
