// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pooled scratch buffers
//!
//! Cutting a mesh needs a dozen working buffers sized to the vertex and index
//! counts. Allocating them per cut would churn the allocator every frame, so
//! they are checked out of a [`BufferPool`] and handed back when the
//! [`Pooled`] guard drops, including when a cut unwinds.
//!
//! Buffers are bucketed by power-of-two capacity. A checkout of `n` elements
//! is served by the class `n.next_power_of_two()`, and only idle buffers of
//! exactly that class are reused.

use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

use nalgebra::{Point2, Point3, Vector2, Vector3};
use rustc_hash::FxHashMap;

use crate::plane::Side;
use crate::snapshot::BoneWeight;

/// Idle buffers kept per pool unless configured otherwise
pub const DEFAULT_POOL_SIZE: usize = 32;

/// A collection that can be emptied and reused
pub trait Recycle: Default + Send {
    fn with_capacity(capacity: usize) -> Self;
    fn capacity(&self) -> usize;
    fn clear(&mut self);
    fn shrink_to(&mut self, capacity: usize);
}

impl<T: Send> Recycle for Vec<T> {
    #[inline]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }

    #[inline]
    fn capacity(&self) -> usize {
        Vec::capacity(self)
    }

    #[inline]
    fn clear(&mut self) {
        Vec::clear(self)
    }

    #[inline]
    fn shrink_to(&mut self, capacity: usize) {
        Vec::shrink_to(self, capacity)
    }
}

impl<K: Eq + Hash + Send, V: Send> Recycle for FxHashMap<K, V> {
    #[inline]
    fn with_capacity(capacity: usize) -> Self {
        FxHashMap::with_capacity_and_hasher(capacity, Default::default())
    }

    #[inline]
    fn capacity(&self) -> usize {
        std::collections::HashMap::capacity(self)
    }

    #[inline]
    fn clear(&mut self) {
        std::collections::HashMap::clear(self)
    }

    #[inline]
    fn shrink_to(&mut self, capacity: usize) {
        std::collections::HashMap::shrink_to(self, capacity)
    }
}

/// Smallest power of two that holds `n` elements
#[inline]
pub fn size_class(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Lock-guarded table of idle buffers
pub struct BufferPool<C: Recycle> {
    idle: Mutex<Vec<(usize, C)>>,
    pool_size: usize,
}

impl<C: Recycle> BufferPool<C> {
    pub fn new(pool_size: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(pool_size)),
            pool_size,
        }
    }

    /// Check out an empty buffer able to hold `n` elements
    pub fn get(&self, n: usize) -> Pooled<'_, C> {
        let class = size_class(n);
        let reused = {
            let mut idle = self.lock();
            idle.iter()
                .position(|(c, _)| *c == class)
                .map(|slot| idle.swap_remove(slot).1)
        };
        Pooled {
            pool: self,
            class,
            buffer: reused.unwrap_or_else(|| C::with_capacity(class)),
        }
    }

    /// Number of buffers waiting to be reused
    pub fn idle_count(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, class: usize, mut buffer: C) {
        buffer.clear();
        // A buffer that doubled while checked out moves up to its new class;
        // any other growth is given back.
        let grown = buffer.capacity();
        let class = if grown > class && grown.is_power_of_two() {
            grown
        } else {
            if grown > class {
                buffer.shrink_to(class);
            }
            class
        };

        let mut idle = self.lock();
        if idle.len() < self.pool_size {
            idle.push((class, buffer));
        } else if let Some(slot) = idle
            .iter()
            .enumerate()
            .filter(|(_, (c, _))| *c < class)
            .min_by_key(|(_, (c, _))| *c)
            .map(|(slot, _)| slot)
        {
            idle[slot] = (class, buffer);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(usize, C)>> {
        // A panic elsewhere never leaves the table half-written.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Recycle> Default for BufferPool<C> {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

/// Scoped checkout; returns the buffer to its pool on drop
pub struct Pooled<'a, C: Recycle> {
    pool: &'a BufferPool<C>,
    class: usize,
    buffer: C,
}

impl<C: Recycle> Pooled<'_, C> {
    /// Capacity class this buffer was checked out under
    #[inline]
    pub fn class(&self) -> usize {
        self.class
    }
}

impl<C: Recycle> Deref for Pooled<'_, C> {
    type Target = C;

    #[inline]
    fn deref(&self) -> &C {
        &self.buffer
    }
}

impl<C: Recycle> DerefMut for Pooled<'_, C> {
    #[inline]
    fn deref_mut(&mut self) -> &mut C {
        &mut self.buffer
    }
}

impl<C: Recycle> Drop for Pooled<'_, C> {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.release(self.class, buffer);
    }
}

/// Every scratch pool a cut draws from.
///
/// One arena is shared by all jobs; each pool has its own lock.
pub struct SliceArena {
    pub points: BufferPool<Vec<Point3<f32>>>,
    pub vectors: BufferPool<Vec<Vector3<f32>>>,
    pub uvs: BufferPool<Vec<Vector2<f32>>>,
    pub weights: BufferPool<Vec<BoneWeight>>,
    pub indices: BufferPool<Vec<u32>>,
    pub scalars: BufferPool<Vec<f32>>,
    pub flags: BufferPool<Vec<bool>>,
    pub sides: BufferPool<Vec<Side>>,
    pub projected: BufferPool<Vec<Point2<f32>>>,
    pub edges: BufferPool<FxHashMap<(u32, u32), u32>>,
}

impl SliceArena {
    pub fn new(pool_size: usize) -> Self {
        Self {
            points: BufferPool::new(pool_size),
            vectors: BufferPool::new(pool_size),
            uvs: BufferPool::new(pool_size),
            weights: BufferPool::new(pool_size),
            indices: BufferPool::new(pool_size),
            scalars: BufferPool::new(pool_size),
            flags: BufferPool::new(pool_size),
            sides: BufferPool::new(pool_size),
            projected: BufferPool::new(pool_size),
            edges: BufferPool::new(pool_size),
        }
    }
}

impl Default for SliceArena {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_capacity_is_power_of_two() {
        let pool: BufferPool<Vec<u32>> = BufferPool::new(4);
        for (n, class) in [(0, 1), (1, 1), (3, 4), (9, 16), (64, 64), (65, 128)] {
            let buffer = pool.get(n);
            assert_eq!(buffer.class(), class);
            assert!(buffer.capacity() >= class);
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_buffer_is_reused_and_cleared() {
        let pool: BufferPool<Vec<u32>> = BufferPool::new(4);
        let address = {
            let mut buffer = pool.get(10);
            buffer.extend([1, 2, 3]);
            buffer.as_ptr() as usize
        };
        assert_eq!(pool.idle_count(), 1);

        let buffer = pool.get(12);
        assert!(buffer.is_empty());
        assert_eq!(buffer.as_ptr() as usize, address);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_doubled_buffer_moves_up_a_class() {
        let pool: BufferPool<Vec<u32>> = BufferPool::new(4);
        {
            let mut buffer = pool.get(4);
            buffer.extend(0..5);
            assert_eq!(buffer.capacity(), 8);
        }
        let buffer = pool.get(8);
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_odd_growth_is_shrunk_back() {
        let pool: BufferPool<Vec<u32>> = BufferPool::new(4);
        {
            let mut buffer = pool.get(64);
            buffer.reserve_exact(100);
            assert_eq!(buffer.capacity(), 100);
        }
        let buffer = pool.get(64);
        assert_eq!(buffer.capacity(), 64);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_other_class_is_not_reused() {
        let pool: BufferPool<Vec<u32>> = BufferPool::new(4);
        drop(pool.get(100));
        let small = pool.get(4);
        assert_eq!(small.class(), 4);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_full_pool_keeps_larger_buffers() {
        let pool: BufferPool<Vec<u32>> = BufferPool::new(1);
        let small = pool.get(2);
        let large = pool.get(200);
        drop(small);
        drop(large);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.get(200).class(), 256);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_concurrent_checkouts_are_distinct() {
        let pool: Arc<BufferPool<Vec<u64>>> = Arc::new(BufferPool::new(8));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for round in 0..200u64 {
                        let mut buffer = pool.get(32);
                        assert!(buffer.is_empty());
                        buffer.extend(std::iter::repeat(worker * 1000 + round).take(32));
                        std::thread::yield_now();
                        assert!(buffer.iter().all(|v| *v == worker * 1000 + round));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.idle_count() <= 8);
    }

    #[test]
    fn test_released_on_unwind() {
        let pool: BufferPool<Vec<u8>> = BufferPool::new(2);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _buffer = pool.get(5);
            panic!("cut failed");
        }));
        assert!(result.is_err());
        assert_eq!(pool.idle_count(), 1);
    }
}
