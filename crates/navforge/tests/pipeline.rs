//! End-to-end builds of small synthetic scenes.

use glam::{U16Vec3, UVec3, Vec3A};
use navforge::{
    AreaType, BuildError, CompactHeightfield, CompactHeightfieldError, ConvexVolume,
    NavmeshBuilder, NavmeshConfig, NavmeshConfigBuilder, PartitionKind, PolygonNavmesh, RegionId,
    TriMesh,
};

/// A flat horizontal square of two triangles with an upward normal.
fn flat_square(min_x: f32, size: f32) -> TriMesh {
    TriMesh::new(
        vec![
            Vec3A::new(min_x, 0.0, 0.0),
            Vec3A::new(min_x + size, 0.0, 0.0),
            Vec3A::new(min_x + size, 0.0, size),
            Vec3A::new(min_x, 0.0, size),
        ],
        vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
    )
}

fn config_for(trimesh: &TriMesh) -> NavmeshConfigBuilder {
    let mut aabb = trimesh.compute_aabb().unwrap();
    aabb.min.y -= 0.5;
    aabb.max.y += 0.5;
    NavmeshConfigBuilder {
        aabb,
        keep_intermediates: true,
        ..Default::default()
    }
}

fn count_polygon_vertices(polygon: &[u16]) -> usize {
    polygon
        .iter()
        .position(|&index| index == PolygonNavmesh::NO_INDEX)
        .unwrap_or(polygon.len())
}

/// The number of connected components of the polygon adjacency graph.
fn adjacency_components(mesh: &PolygonNavmesh) -> usize {
    let nvp = mesh.max_vertices_per_polygon;
    let polygon_count = mesh.polygon_count();
    let mut visited = vec![false; polygon_count];
    let mut components = 0;
    for start in 0..polygon_count {
        if visited[start] {
            continue;
        }
        components += 1;
        let mut stack = vec![start];
        visited[start] = true;
        while let Some(polygon) = stack.pop() {
            for &neighbor in &mesh.polygon_neighbors[polygon * nvp..(polygon + 1) * nvp] {
                if neighbor == PolygonNavmesh::NO_INDEX
                    || neighbor & PolygonNavmesh::PORTAL_FLAG != 0
                {
                    continue;
                }
                let neighbor = neighbor as usize;
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    stack.push(neighbor);
                }
            }
        }
    }
    components
}

fn assert_mesh_is_well_formed(mesh: &PolygonNavmesh) {
    let nvp = mesh.max_vertices_per_polygon;
    for (i, polygon) in mesh.polygons.chunks_exact(nvp).enumerate() {
        let n = count_polygon_vertices(polygon);
        assert!(n >= 3, "polygon {i} has only {n} vertices");

        // Convex, allowing collinear vertices.
        for j in 0..n {
            let a = mesh.vertices[polygon[j] as usize];
            let b = mesh.vertices[polygon[(j + 1) % n] as usize];
            let c = mesh.vertices[polygon[(j + 2) % n] as usize];
            let cross = (b.x as i32 - a.x as i32) * (c.z as i32 - a.z as i32)
                - (c.x as i32 - a.x as i32) * (b.z as i32 - a.z as i32);
            assert!(cross <= 0, "polygon {i} is concave at vertex {j}");
        }

        // Neighbor links are symmetric.
        let neighbors = &mesh.polygon_neighbors[i * nvp..(i + 1) * nvp];
        for &neighbor in neighbors {
            if neighbor == PolygonNavmesh::NO_INDEX || neighbor & PolygonNavmesh::PORTAL_FLAG != 0
            {
                continue;
            }
            let other = neighbor as usize;
            let back_links = &mesh.polygon_neighbors[other * nvp..(other + 1) * nvp];
            assert!(
                back_links.contains(&(i as u16)),
                "polygon {other} does not link back to polygon {i}"
            );
        }
    }
}

fn assert_every_walkable_span_has_a_region(compact: &CompactHeightfield) {
    for (i, span) in compact.spans.iter().enumerate() {
        if compact.areas[i].is_walkable() {
            assert_ne!(span.region, RegionId::NONE, "span {i} has no region");
        }
    }
}

/// Squared xz-plane distance of `point` from the segment `a` to `b`.
fn distance_to_segment_squared(point: U16Vec3, a: U16Vec3, b: U16Vec3) -> f32 {
    let (px, pz) = (point.x as f32, point.z as f32);
    let (ax, az) = (a.x as f32, a.z as f32);
    let dx = b.x as f32 - ax;
    let dz = b.z as f32 - az;
    let d = dx * dx + dz * dz;
    let mut t = 0.0;
    if d > 0.0 {
        t = ((dx * (px - ax) + dz * (pz - az)) / d).clamp(0.0, 1.0);
    }
    let nx = ax + t * dx - px;
    let nz = az + t * dz - pz;
    nx * nx + nz * nz
}

#[test]
fn flat_square_becomes_a_single_region_navmesh() {
    let trimesh = flat_square(0.0, 10.0);
    let config = config_for(&trimesh).build();
    let artifacts = NavmeshBuilder::new(config).build(trimesh).unwrap();

    let compact = artifacts.compact_heightfield.as_ref().unwrap();
    assert_eq!(compact.max_region, RegionId::from(1));
    assert_every_walkable_span_has_a_region(compact);

    let mesh = &artifacts.polygon_mesh;
    assert!(mesh.polygon_count() > 0);
    assert!(mesh.regions.iter().all(|&region| region == RegionId::from(1)));
    assert_mesh_is_well_formed(mesh);
    assert_eq!(adjacency_components(mesh), 1);

    // Contour vertices stay within the grid.
    let contours = artifacts.contours.as_ref().unwrap();
    assert!(!contours.contours.is_empty());
    for contour in &contours.contours {
        for vertex in &contour.vertices {
            assert!(vertex.position.x <= contours.width);
            assert!(vertex.position.z <= contours.height);
        }
    }
}

#[test]
fn convex_volume_overrides_the_area_type() {
    let trimesh = flat_square(0.0, 10.0);
    let mut builder = config_for(&trimesh);
    builder.area_volumes.push(ConvexVolume {
        vertices: vec![
            Vec3A::new(2.0, 0.0, 2.0),
            Vec3A::new(5.0, 0.0, 2.0),
            Vec3A::new(5.0, 0.0, 5.0),
            Vec3A::new(2.0, 0.0, 5.0),
        ],
        min_y: -1.0,
        max_y: 2.0,
        area: AreaType(5),
    });
    let artifacts = NavmeshBuilder::new(builder.build()).build(trimesh).unwrap();

    let mesh = &artifacts.polygon_mesh;
    assert!(mesh.areas.contains(&AreaType(5)));
    assert!(mesh.areas.contains(&AreaType::DEFAULT_WALKABLE));
    assert_mesh_is_well_formed(mesh);
}

#[test]
fn steep_ramp_has_no_walkable_surface() {
    // A 60 degree ramp with the default 45 degree slope limit.
    let height = 10.0 * 60.0_f32.to_radians().tan();
    let trimesh = TriMesh::new(
        vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(10.0, 0.0, 0.0),
            Vec3A::new(10.0, height, 10.0),
            Vec3A::new(0.0, height, 10.0),
        ],
        vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
    );
    let config = config_for(&trimesh).build();
    let error = NavmeshBuilder::new(config).build(trimesh).unwrap_err();
    assert!(matches!(
        error,
        BuildError::CompactHeightfield(CompactHeightfieldError::NoWalkableSpans)
    ));
}

#[test]
fn disjoint_islands_become_disjoint_regions() {
    let mut trimesh = flat_square(0.0, 5.0);
    trimesh.extend(flat_square(10.0, 5.0));
    let config = config_for(&trimesh).build();
    let artifacts = NavmeshBuilder::new(config).build(trimesh).unwrap();

    let compact = artifacts.compact_heightfield.as_ref().unwrap();
    assert_eq!(compact.max_region, RegionId::from(2));

    let mesh = &artifacts.polygon_mesh;
    assert_mesh_is_well_formed(mesh);
    assert_eq!(adjacency_components(mesh), 2);
}

#[test]
fn monotone_partitioning_covers_every_walkable_span() {
    let trimesh = flat_square(0.0, 10.0);
    let mut builder = config_for(&trimesh);
    builder.partition = PartitionKind::Monotone;
    let artifacts = NavmeshBuilder::new(builder.build()).build(trimesh).unwrap();

    assert_every_walkable_span_has_a_region(artifacts.compact_heightfield.as_ref().unwrap());
    let mesh = &artifacts.polygon_mesh;
    assert!(mesh.polygon_count() > 0);
    assert_mesh_is_well_formed(mesh);
    assert_eq!(adjacency_components(mesh), 1);
}

#[test]
fn monotone_partitioning_keeps_islands_disjoint() {
    let mut trimesh = flat_square(0.0, 5.0);
    trimesh.extend(flat_square(10.0, 5.0));
    let mut builder = config_for(&trimesh);
    builder.partition = PartitionKind::Monotone;
    let artifacts = NavmeshBuilder::new(builder.build()).build(trimesh).unwrap();

    assert_every_walkable_span_has_a_region(artifacts.compact_heightfield.as_ref().unwrap());
    assert_mesh_is_well_formed(&artifacts.polygon_mesh);
    assert_eq!(adjacency_components(&artifacts.polygon_mesh), 2);
}

#[test]
fn layer_partitioning_covers_every_walkable_span() {
    let trimesh = flat_square(0.0, 10.0);
    let mut builder = config_for(&trimesh);
    builder.partition = PartitionKind::Layers;
    let artifacts = NavmeshBuilder::new(builder.build()).build(trimesh).unwrap();

    assert_every_walkable_span_has_a_region(artifacts.compact_heightfield.as_ref().unwrap());
    let mesh = &artifacts.polygon_mesh;
    assert!(mesh.polygon_count() > 0);
    assert_mesh_is_well_formed(mesh);
    assert_eq!(adjacency_components(mesh), 1);
}

#[test]
fn layer_partitioning_keeps_islands_disjoint() {
    let mut trimesh = flat_square(0.0, 5.0);
    trimesh.extend(flat_square(10.0, 5.0));
    let mut builder = config_for(&trimesh);
    builder.partition = PartitionKind::Layers;
    let artifacts = NavmeshBuilder::new(builder.build()).build(trimesh).unwrap();

    assert_every_walkable_span_has_a_region(artifacts.compact_heightfield.as_ref().unwrap());
    assert_mesh_is_well_formed(&artifacts.polygon_mesh);
    assert_eq!(adjacency_components(&artifacts.polygon_mesh), 2);
}

#[test]
fn simplified_contours_respect_error_and_edge_bounds() {
    // An L-shaped floor: the concave corner forces the simplifier to track
    // the raw boundary instead of collapsing to a rectangle.
    let mut trimesh = flat_square(0.0, 10.0);
    trimesh.extend(TriMesh::new(
        vec![
            Vec3A::new(10.0, 0.0, 0.0),
            Vec3A::new(15.0, 0.0, 0.0),
            Vec3A::new(15.0, 0.0, 5.0),
            Vec3A::new(10.0, 0.0, 5.0),
        ],
        vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
    ));
    let mut builder = config_for(&trimesh);
    // Low enough that the outline edges actually get split.
    builder.edge_max_len = 3.0;
    let config = builder.build();
    let max_error = config.max_simplification_error;
    let max_edge_len = config.max_edge_len as i32;
    assert!(max_edge_len > 0);
    let artifacts = NavmeshBuilder::new(config).build(trimesh).unwrap();

    let contours = artifacts.contours.as_ref().unwrap();
    assert!(!contours.contours.is_empty());
    for contour in &contours.contours {
        let simplified = &contour.vertices;
        let n = simplified.len();

        // Raw vertices on solid walls stay within the error tolerance of
        // the simplified outline. Portal edges between regions are exempt
        // from simplification, so their raw vertices are too.
        for raw in &contour.raw_vertices {
            if raw.data.region() != RegionId::NONE {
                continue;
            }
            let deviation_squared = (0..n)
                .map(|i| {
                    distance_to_segment_squared(
                        raw.position,
                        simplified[i].position,
                        simplified[(i + 1) % n].position,
                    )
                })
                .fold(f32::MAX, f32::min);
            assert!(
                deviation_squared <= max_error * max_error + 1e-3,
                "raw vertex {raw:?} deviates {deviation_squared} from the outline"
            );
        }

        // Wall edges are split down to the maximum edge length. The vertex
        // data names the region across the edge starting at the vertex.
        for i in 0..n {
            if simplified[i].data.region() != RegionId::NONE {
                continue;
            }
            let a = simplified[i].position;
            let b = simplified[(i + 1) % n].position;
            let dx = b.x as i32 - a.x as i32;
            let dz = b.z as i32 - a.z as i32;
            assert!(
                dx * dx + dz * dz <= max_edge_len * max_edge_len,
                "edge {a:?} -> {b:?} exceeds the maximum edge length"
            );
        }
    }
}

#[test]
fn repeated_builds_are_bit_identical() {
    let build = || {
        let trimesh = flat_square(0.0, 10.0);
        let config: NavmeshConfig = config_for(&trimesh).build();
        NavmeshBuilder::new(config).build(trimesh).unwrap()
    };
    let first = build();
    let second = build();

    let a = &first.polygon_mesh;
    let b = &second.polygon_mesh;
    assert_eq!(a.vertices, b.vertices);
    assert_eq!(a.polygons, b.polygons);
    assert_eq!(a.polygon_neighbors, b.polygon_neighbors);
    assert_eq!(a.regions, b.regions);
    assert_eq!(a.areas, b.areas);

    let compact_a = first.compact_heightfield.as_ref().unwrap();
    let compact_b = second.compact_heightfield.as_ref().unwrap();
    assert_eq!(compact_a.max_region, compact_b.max_region);
    assert_eq!(compact_a.dist, compact_b.dist);
    assert!(
        compact_a
            .spans
            .iter()
            .zip(compact_b.spans.iter())
            .all(|(a, b)| a.region == b.region)
    );
}
