#![doc = include_str!("../../../readme.md")]

mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod contour;
mod convex_volume;
mod distance_field;
mod erosion;
mod filter;
mod heightfield;
mod layers;
pub(crate) mod math;
mod monotone;
mod pipeline;
mod poly_mesh;
mod rasterize;
mod region;
mod span;
mod trimesh;
mod watershed;

pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{NavmeshConfig, NavmeshConfigBuilder, PartitionKind};
pub use contour::{BuildContoursFlags, Contour, ContourSet, ContourVertex, RegionVertexId};
pub use convex_volume::ConvexVolume;
pub use heightfield::{Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError};
pub use math::Aabb3d;
pub use pipeline::{BuildError, NavmeshArtifacts, NavmeshBuilder};
pub use poly_mesh::{PolyMeshError, PolygonNavmesh};
pub use rasterize::RasterizationError;
pub use region::{RegionError, RegionId};
pub use span::{AreaType, Span, SpanKey, Spans};
pub use trimesh::TriMesh;
