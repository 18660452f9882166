//! The navmesh build pipeline.

use thiserror::Error;
use tracing::debug;

use crate::{
    CompactHeightfield, CompactHeightfieldError, ContourSet, Heightfield, HeightfieldBuilder,
    HeightfieldBuilderError, NavmeshConfig, PartitionKind, PolyMeshError, PolygonNavmesh, TriMesh,
    rasterize::RasterizationError, region::RegionError,
};

/// Drives the full navmesh build: rasterization, filtering, partitioning,
/// contour tracing and polygonization, as configured by a [`NavmeshConfig`].
#[derive(Debug, Clone)]
pub struct NavmeshBuilder {
    config: NavmeshConfig,
}

/// The output of a [`NavmeshBuilder`] run.
///
/// The intermediate stages are only present when
/// [`NavmeshConfig::keep_intermediates`] is set.
#[derive(Debug, Clone, Default)]
pub struct NavmeshArtifacts {
    /// The final polygon mesh.
    pub polygon_mesh: PolygonNavmesh,
    /// The voxelized input geometry.
    pub heightfield: Option<Heightfield>,
    /// The compacted walkable surface with regions assigned.
    pub compact_heightfield: Option<CompactHeightfield>,
    /// The simplified region outlines.
    pub contours: Option<ContourSet>,
}

/// Failed to build a navmesh.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The configured AABB spans no cells on the xz-plane.
    #[error("the configured AABB spans a {width}x{height} cell grid")]
    DegenerateBounds {
        /// The grid width derived from the AABB.
        width: u16,
        /// The grid height derived from the AABB.
        height: u16,
    },
    /// Failed to allocate the heightfield grid.
    #[error("failed to build heightfield: {0}")]
    Heightfield(#[from] HeightfieldBuilderError),
    /// Failed to rasterize the input geometry.
    #[error("failed to rasterize triangle mesh: {0}")]
    Rasterization(#[from] RasterizationError),
    /// Failed to compact the heightfield.
    #[error("failed to build compact heightfield: {0}")]
    CompactHeightfield(#[from] CompactHeightfieldError),
    /// Failed to partition the walkable surface.
    #[error("failed to partition walkable surface: {0}")]
    Region(#[from] RegionError),
    /// Failed to build the polygon mesh.
    #[error("failed to build polygon mesh: {0}")]
    PolyMesh(#[from] PolyMeshError),
}

impl NavmeshBuilder {
    /// Creates a builder for the given configuration.
    pub fn new(config: NavmeshConfig) -> Self {
        Self { config }
    }

    /// Runs the full build pipeline on the given geometry.
    ///
    /// The stages run in order: walkable triangle marking, rasterization
    /// into a heightfield, span filtering, compaction, erosion by the agent
    /// radius, area volume marking, region partitioning, contour tracing and
    /// polygonization.
    pub fn build(&self, mut trimesh: TriMesh) -> Result<NavmeshArtifacts, BuildError> {
        let config = &self.config;
        if config.width == 0 || config.height == 0 {
            return Err(BuildError::DegenerateBounds {
                width: config.width,
                height: config.height,
            });
        }

        trimesh.mark_walkable_triangles(config.walkable_slope_angle);

        let mut heightfield = HeightfieldBuilder {
            aabb: config.aabb,
            cell_size: config.cell_size,
            cell_height: config.cell_height,
        }
        .build()?;
        heightfield.populate_from_trimesh(&trimesh, config.walkable_climb)?;
        debug!(
            "Rasterized {} triangles into a {}x{} heightfield",
            trimesh.indices.len(),
            heightfield.width,
            heightfield.height
        );

        if config.filter_low_hanging_obstacles {
            heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
        }
        if config.filter_ledge_spans {
            heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
        }
        if config.filter_walkable_low_height_spans {
            heightfield.filter_walkable_low_height_spans(config.walkable_height);
        }

        let mut compact = CompactHeightfield::from_heightfield(
            &heightfield,
            config.walkable_height,
            config.walkable_climb,
        )?;
        compact.erode_walkable_area(config.walkable_radius);
        for volume in &config.area_volumes {
            compact.mark_convex_poly_area(volume);
        }

        match config.partition {
            PartitionKind::Watershed => {
                compact.build_distance_field();
                compact.build_regions(
                    config.border_size,
                    config.min_region_area as usize,
                    config.merge_region_area as usize,
                )?;
            }
            PartitionKind::Monotone => {
                compact.build_regions_monotone(
                    config.border_size,
                    config.min_region_area as usize,
                    config.merge_region_area as usize,
                )?;
            }
            PartitionKind::Layers => {
                compact.build_layer_regions(config.border_size, config.min_region_area as usize)?;
            }
        }

        let contours = compact.build_contours(
            config.max_simplification_error,
            config.max_edge_len,
            config.contour_flags,
        );
        debug!("Traced {} contours", contours.contours.len());

        let keep_contours = config.keep_intermediates.then(|| contours.clone());
        let polygon_mesh = contours.into_polygon_mesh(config.max_vertices_per_polygon as usize)?;
        debug!(
            "Built polygon mesh with {} polygons and {} vertices",
            polygon_mesh.polygon_count(),
            polygon_mesh.vertices.len()
        );

        Ok(NavmeshArtifacts {
            polygon_mesh,
            heightfield: config.keep_intermediates.then_some(heightfield),
            compact_heightfield: config.keep_intermediates.then_some(compact),
            contours: keep_contours,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NavmeshConfigBuilder;

    #[test]
    fn degenerate_bounds_are_an_error() {
        let config = NavmeshConfigBuilder::default().build();
        let builder = NavmeshBuilder::new(config);
        let error = builder.build(TriMesh::default()).unwrap_err();
        assert!(matches!(error, BuildError::DegenerateBounds { .. }));
    }
}
