//! Uniform grid used to find candidate neighbors without comparing every pair.
//!
//! Buckets are keyed by the planar cell `(floor(x / cell), floor(y / cell))`;
//! z never participates. The grid is thrown away and rebuilt every frame since
//! nearly every particle moves every frame anyway.

use std::collections::HashMap;

use glam::Vec3;
use log::debug;

use crate::error::PhysicsError;

/// Default edge length of a grid cell, in world units.
pub const DEFAULT_CELL_SIZE: f32 = 80.0;

/// Integer planar cell coordinate.
pub type CellKey = (i32, i32);

#[derive(Debug, Clone)]
pub struct SpatialIndex<T> {
    cell_size: f32,
    buckets: HashMap<CellKey, Vec<T>>,
    len: usize,
}

impl<T: Copy + PartialEq> SpatialIndex<T> {
    pub fn new(cell_size: f32) -> Result<Self, PhysicsError> {
        validate_cell_size(cell_size)?;
        Ok(SpatialIndex {
            cell_size,
            buckets: HashMap::new(),
            len: 0,
        })
    }

    /// Changes the cell size. Existing buckets are dropped because their keys
    /// no longer mean anything; the next `rebuild` repopulates them.
    pub fn configure(&mut self, cell_size: f32) -> Result<(), PhysicsError> {
        validate_cell_size(cell_size)?;
        debug!("Spatial index cell size {} -> {}", self.cell_size, cell_size);
        self.cell_size = cell_size;
        self.clear();
        Ok(())
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Get the grid cell coordinates for a position
    #[inline]
    pub fn cell_of(&self, position: Vec3) -> CellKey {
        (
            (position.x / self.cell_size).floor() as i32,
            (position.y / self.cell_size).floor() as i32,
        )
    }

    pub fn insert(&mut self, item: T, position: Vec3) {
        let cell = self.cell_of(position);
        self.buckets.entry(cell).or_default().push(item);
        self.len += 1;
    }

    /// Clears every bucket and re-inserts all items.
    pub fn rebuild<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = (T, Vec3)>,
    {
        self.clear();
        for (item, position) in items {
            self.insert(item, position);
        }
    }

    /// Everything stored in the 3×3 block of cells around `position`.
    ///
    /// This is a block query, not a radius query: interactions reaching
    /// further than about one cell width can be missed.
    pub fn query(&self, position: Vec3) -> Vec<T> {
        let mut found = Vec::new();
        self.query_into(position, &mut found);
        found
    }

    /// Same as [`query`](Self::query) but appends into a caller-owned buffer.
    pub fn query_into(&self, position: Vec3, found: &mut Vec<T>) {
        let (cx, cy) = self.cell_of(position);
        for x in cx.saturating_sub(1)..=cx.saturating_add(1) {
            for y in cy.saturating_sub(1)..=cy.saturating_add(1) {
                if let Some(bucket) = self.buckets.get(&(x, y)) {
                    found.extend_from_slice(bucket);
                }
            }
        }
    }

    /// Evicts `item`. `position` is a hint for where it was bucketed; when the
    /// item has moved since the last rebuild every bucket is searched.
    pub fn remove(&mut self, item: T, position: Vec3) -> bool {
        let hinted = self.cell_of(position);
        if Self::remove_from(&mut self.buckets, hinted, item) {
            self.len -= 1;
            return true;
        }
        let cell = self
            .buckets
            .iter()
            .find(|(_, bucket)| bucket.contains(&item))
            .map(|(cell, _)| *cell);
        match cell {
            Some(cell) if Self::remove_from(&mut self.buckets, cell, item) => {
                self.len -= 1;
                true
            }
            _ => false,
        }
    }

    fn remove_from(buckets: &mut HashMap<CellKey, Vec<T>>, cell: CellKey, item: T) -> bool {
        let Some(bucket) = buckets.get_mut(&cell) else {
            return false;
        };
        let Some(position) = bucket.iter().position(|stored| *stored == item) else {
            return false;
        };
        bucket.remove(position);
        if bucket.is_empty() {
            buckets.remove(&cell);
        }
        true
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of populated cells.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Contents of one cell in insertion order; empty for unpopulated cells.
    pub fn bucket(&self, cell: CellKey) -> &[T] {
        self.buckets.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn validate_cell_size(cell_size: f32) -> Result<(), PhysicsError> {
    if cell_size > 0.0 && cell_size.is_finite() {
        Ok(())
    } else {
        Err(PhysicsError::config(format!(
            "cell size must be a positive finite number, got {}",
            cell_size
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut items: Vec<u32>) -> Vec<u32> {
        items.sort_unstable();
        items
    }

    #[test]
    fn rejects_non_positive_cell_size() {
        assert!(SpatialIndex::<u32>::new(0.0).is_err());
        assert!(SpatialIndex::<u32>::new(-3.0).is_err());
        assert!(SpatialIndex::<u32>::new(f32::NAN).is_err());

        let mut index = SpatialIndex::<u32>::new(10.0).unwrap();
        assert!(matches!(index.configure(0.0), Err(PhysicsError::Configuration(_))));
        assert_eq!(index.cell_size(), 10.0);
    }

    #[test]
    fn cells_floor_negative_coordinates() {
        let index = SpatialIndex::<u32>::new(10.0).unwrap();
        assert_eq!(index.cell_of(Vec3::new(1.0, 9.9, 500.0)), (0, 0));
        assert_eq!(index.cell_of(Vec3::new(-0.1, -10.0, 0.0)), (-1, -1));
        assert_eq!(index.cell_of(Vec3::new(-10.1, 25.0, 0.0)), (-2, 2));
    }

    #[test]
    fn block_query_includes_same_cell_and_excludes_far_cells() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.rebuild([
            (0u32, Vec3::new(1.0, 1.0, 0.0)),
            (1, Vec3::new(9.0, 9.0, 0.0)),
            (2, Vec3::new(21.0, 21.0, 0.0)),
        ]);

        let found = index.query(Vec3::new(1.0, 1.0, 0.0));
        assert!(found.contains(&0));
        assert!(found.contains(&1));
        assert!(!found.contains(&2));
    }

    #[test]
    fn query_covers_diagonal_neighbors_and_ignores_z() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.rebuild([
            (0u32, Vec3::new(5.0, 5.0, 0.0)),
            (1, Vec3::new(15.0, 15.0, -900.0)),
            (2, Vec3::new(-5.0, -5.0, 900.0)),
        ]);

        assert_eq!(sorted(index.query(Vec3::new(5.0, 5.0, 0.0))), vec![0, 1, 2]);
    }

    #[test]
    fn query_always_contains_the_queried_item() {
        let mut index = SpatialIndex::new(7.5).unwrap();
        let points: Vec<(u32, Vec3)> = (0..50)
            .map(|i| {
                let f = i as f32;
                (i, Vec3::new(f * 3.7 - 60.0, f * -2.3 + 11.0, f))
            })
            .collect();
        index.rebuild(points.iter().copied());

        for (item, position) in &points {
            assert!(index.query(*position).contains(item));
        }
    }

    #[test]
    fn empty_rebuild_and_unpopulated_query() {
        let mut index = SpatialIndex::<u32>::new(10.0).unwrap();
        index.rebuild(std::iter::empty());
        assert!(index.is_empty());
        assert_eq!(index.bucket_count(), 0);
        assert!(index.query(Vec3::new(1000.0, -1000.0, 0.0)).is_empty());
    }

    #[test]
    fn result_is_independent_of_insertion_order() {
        let points = [
            (0u32, Vec3::new(1.0, 1.0, 0.0)),
            (1, Vec3::new(12.0, 3.0, 0.0)),
            (2, Vec3::new(-4.0, 8.0, 0.0)),
            (3, Vec3::new(30.0, 30.0, 0.0)),
        ];
        let mut forward = SpatialIndex::new(10.0).unwrap();
        forward.rebuild(points.iter().copied());
        let mut backward = SpatialIndex::new(10.0).unwrap();
        backward.rebuild(points.iter().rev().copied());

        let probe = Vec3::new(2.0, 2.0, 0.0);
        assert_eq!(sorted(forward.query(probe)), sorted(backward.query(probe)));
    }

    #[test]
    fn rebuild_is_idempotent() {
        let points = [
            (0u32, Vec3::new(1.0, 1.0, 0.0)),
            (1, Vec3::new(9.0, 9.0, 0.0)),
            (2, Vec3::new(21.0, 21.0, 0.0)),
        ];
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.rebuild(points.iter().copied());
        let first: Vec<Vec<u32>> = [(0, 0), (2, 2)].iter().map(|c| index.bucket(*c).to_vec()).collect();
        let count = index.bucket_count();

        index.rebuild(points.iter().copied());
        let second: Vec<Vec<u32>> = [(0, 0), (2, 2)].iter().map(|c| index.bucket(*c).to_vec()).collect();

        assert_eq!(first, second);
        assert_eq!(count, index.bucket_count());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn remove_finds_moved_items() {
        let mut index = SpatialIndex::new(10.0).unwrap();
        index.rebuild([(0u32, Vec3::new(1.0, 1.0, 0.0)), (1, Vec3::new(2.0, 2.0, 0.0))]);

        // Stale position hint: item 1 is bucketed at (0, 0).
        assert!(index.remove(1, Vec3::new(55.0, 55.0, 0.0)));
        assert!(!index.remove(1, Vec3::new(2.0, 2.0, 0.0)));
        assert_eq!(index.len(), 1);
        assert_eq!(index.query(Vec3::new(1.0, 1.0, 0.0)), vec![0]);
    }
}
