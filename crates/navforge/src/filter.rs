//! Filter passes that run on a [`Heightfield`] after rasterization and
//! before compaction. All of them only change span area types.

use crate::{Heightfield, span::AreaType};

/// Sentinel for "no ceiling above this span".
const MAX_HEIGHT: i32 = u16::MAX as i32;

impl Heightfield {
    /// Marks unwalkable spans as walkable when a walkable span lies directly
    /// below them and the step between their ceilings is within
    /// `walkable_climb`. This allows the agent to walk over low obstacles
    /// such as curbs or stair steps.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        let walkable_climb = walkable_climb as i32;
        for column in 0..self.columns.len() {
            let mut previous_was_walkable = false;
            let mut previous_area = AreaType::NOT_WALKABLE;
            let mut previous_max = 0_i32;

            let mut span_key_iter = self.columns[column];
            while let Some(span_key) = span_key_iter {
                let span = self.span(span_key);
                let walkable = span.area().is_walkable();
                let max = span.max() as i32;
                let next = span.next();

                if !walkable
                    && previous_was_walkable
                    && (max - previous_max).abs() <= walkable_climb
                {
                    self.span_mut(span_key).set_area(previous_area);
                }

                // Copy the original walkable value regardless of whether we changed it.
                previous_was_walkable = walkable;
                previous_area = self.span(span_key).area();
                previous_max = max;
                span_key_iter = next;
            }
        }
    }

    /// Marks spans that sit on ledges as unwalkable.
    /// A span is a ledge when the drop to its lowest traversable neighbor
    /// exceeds `walkable_climb`, or when the accessible neighbor floors span
    /// a band higher than `walkable_climb`, as on steep slopes.
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb as i32;

        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();
                    if !span.area().is_walkable() {
                        continue;
                    }

                    let bot = span.max() as i32;
                    let top = span
                        .next()
                        .map(|next| self.span(next).min() as i32)
                        .unwrap_or(MAX_HEIGHT);

                    // The lowest relative neighbor floor, and the floor band
                    // reachable within the climb.
                    let mut min_neighbor_height = MAX_HEIGHT;
                    let mut accessible_min = span.max() as i32;
                    let mut accessible_max = span.max() as i32;

                    for dir in 0..4 {
                        let dx = x as i32 + crate::math::dir_offset_x(dir) as i32;
                        let dz = z as i32 + crate::math::dir_offset_z(dir) as i32;
                        if !self.contains(dx, dz) {
                            // Grid edges count as unclimbable drops.
                            min_neighbor_height = min_neighbor_height.min(-walkable_climb - bot);
                            continue;
                        }

                        // The gap under the lowest neighbor span acts as a
                        // virtual neighbor floor at the bottom of the climb.
                        let mut neighbor_key_iter = self.span_key_at(dx as u16, dz as u16);
                        let mut neighbor_bot = -walkable_climb;
                        let mut neighbor_top = neighbor_key_iter
                            .map(|key| self.span(key).min() as i32)
                            .unwrap_or(MAX_HEIGHT);
                        if top.min(neighbor_top) - bot.max(neighbor_bot) > walkable_height {
                            min_neighbor_height = min_neighbor_height.min(neighbor_bot - bot);
                        }

                        while let Some(neighbor_key) = neighbor_key_iter {
                            let neighbor = self.span(neighbor_key);
                            neighbor_key_iter = neighbor.next();
                            neighbor_bot = neighbor.max() as i32;
                            neighbor_top = neighbor
                                .next()
                                .map(|next| self.span(next).min() as i32)
                                .unwrap_or(MAX_HEIGHT);
                            // Only consider neighbors with enough clearance.
                            if top.min(neighbor_top) - bot.max(neighbor_bot) > walkable_height {
                                min_neighbor_height = min_neighbor_height.min(neighbor_bot - bot);
                                if (neighbor_bot - bot).abs() <= walkable_climb {
                                    accessible_min = accessible_min.min(neighbor_bot);
                                    accessible_max = accessible_max.max(neighbor_bot);
                                }
                            }
                        }
                    }

                    if min_neighbor_height < -walkable_climb
                        || accessible_max - accessible_min > walkable_climb
                    {
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    /// Marks walkable spans with less than `walkable_height` clearance to
    /// the span above as unwalkable. The agent cannot stand there.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        let walkable_height = walkable_height as i32;
        for column in 0..self.columns.len() {
            let mut span_key_iter = self.columns[column];
            while let Some(span_key) = span_key_iter {
                let span = self.span(span_key);
                span_key_iter = span.next();
                let bot = span.max() as i32;
                let top = span
                    .next()
                    .map(|next| self.span(next).min() as i32)
                    .unwrap_or(MAX_HEIGHT);
                if top - bot < walkable_height {
                    self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d, HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::SpanBuilder,
    };

    use super::*;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [3.0, 20.0, 3.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn insert(heightfield: &mut Heightfield, x: u16, z: u16, min: u16, max: u16, area: AreaType) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 0,
                span: SpanBuilder {
                    min,
                    max,
                    area,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    #[test]
    fn low_hanging_obstacle_becomes_walkable() {
        let mut heightfield = heightfield();
        insert(&mut heightfield, 1, 1, 0, 2, AreaType(1));
        // An unwalkable obstacle one cell above the walkable floor.
        insert(&mut heightfield, 1, 1, 2, 3, AreaType::NOT_WALKABLE);

        heightfield.filter_low_hanging_walkable_obstacles(1);

        let floor = heightfield.span_at(1, 1).unwrap();
        let obstacle = heightfield.span(floor.next().unwrap());
        assert_eq!(obstacle.area(), AreaType(1));
    }

    #[test]
    fn high_obstacle_stays_unwalkable() {
        let mut heightfield = heightfield();
        insert(&mut heightfield, 1, 1, 0, 2, AreaType(1));
        insert(&mut heightfield, 1, 1, 4, 8, AreaType::NOT_WALKABLE);

        heightfield.filter_low_hanging_walkable_obstacles(1);

        let floor = heightfield.span_at(1, 1).unwrap();
        let obstacle = heightfield.span(floor.next().unwrap());
        assert_eq!(obstacle.area(), AreaType::NOT_WALKABLE);
    }

    #[test]
    fn ledge_span_becomes_unwalkable() {
        let mut heightfield = heightfield();
        // A pillar towering over its neighbors.
        insert(&mut heightfield, 1, 1, 0, 10, AreaType(1));
        for (x, z) in [(0, 1), (2, 1), (1, 0), (1, 2)] {
            insert(&mut heightfield, x, z, 0, 1, AreaType(1));
        }

        heightfield.filter_ledge_spans(3, 2);

        let pillar = heightfield.span_at(1, 1).unwrap();
        assert_eq!(pillar.area(), AreaType::NOT_WALKABLE);
    }

    #[test]
    fn flat_interior_is_not_a_ledge() {
        let mut heightfield = heightfield();
        for z in 0..3 {
            for x in 0..3 {
                insert(&mut heightfield, x, z, 0, 1, AreaType(1));
            }
        }

        heightfield.filter_ledge_spans(3, 2);

        // The center has flat neighbors on all sides.
        assert!(heightfield.span_at(1, 1).unwrap().area().is_walkable());
        // Spans at the grid edge drop off the grid and are ledges.
        assert!(!heightfield.span_at(0, 0).unwrap().area().is_walkable());
    }

    #[test]
    fn low_clearance_becomes_unwalkable() {
        let mut heightfield = heightfield();
        insert(&mut heightfield, 1, 1, 0, 2, AreaType(1));
        // Ceiling two cells above the floor.
        insert(&mut heightfield, 1, 1, 4, 6, AreaType(1));

        heightfield.filter_walkable_low_height_spans(3);

        let floor = heightfield.span_at(1, 1).unwrap();
        assert_eq!(floor.area(), AreaType::NOT_WALKABLE);
        // The top span has no ceiling above it and stays walkable.
        let ceiling = heightfield.span(floor.next().unwrap());
        assert!(ceiling.area().is_walkable());
    }
}
