//! Allocation strategies for operation shells.
//!
//! Loading churns through thousands of short lived operations. Where those
//! shells come from is pluggable: the default strategy keeps emptied shells
//! in per shape pools and hands them back out, so a steady loading workload
//! stops allocating altogether.

use std::collections::HashMap;

use super::operation::{Operation, OperationType};

/// Decides where operation shells come from and where they go once the
/// engine is done with them. Shells arrive at `release` already wiped.
pub trait AllocationStrategy {
    fn allocate(&mut self, ty: OperationType) -> Operation;
    fn release(&mut self, ty: OperationType, op: Operation);
}

/// Allocates every shell fresh and drops released ones. Mostly useful as a
/// baseline when profiling pooling behaviour.
#[derive(Debug, Default)]
pub struct HeapAllocationStrategy;

impl AllocationStrategy for HeapAllocationStrategy {
    fn allocate(&mut self, ty: OperationType) -> Operation {
        Operation::blank(ty)
    }

    fn release(&mut self, _ty: OperationType, _op: Operation) {}
}

/// Pools released shells per operation shape, most recently released first.
///
/// Emptied pool vectors are themselves retired into a bounded cache and
/// recycled when a shape becomes active again, so bursty workloads do not
/// reallocate their bookkeeping either.
pub struct LruAllocationStrategy {
    pool_max_size: usize,
    pool_initial_capacity: usize,
    pool_cache_max_size: usize,
    pools: HashMap<OperationType, Vec<Operation>>,
    retired: Vec<Vec<Operation>>,
}

impl LruAllocationStrategy {
    pub fn new(
        pool_max_size: usize,
        pool_initial_capacity: usize,
        pool_cache_max_size: usize,
        initial_pool_cache_capacity: usize,
    ) -> Self {
        LruAllocationStrategy {
            pool_max_size,
            pool_initial_capacity,
            pool_cache_max_size,
            pools: HashMap::new(),
            retired: Vec::with_capacity(initial_pool_cache_capacity),
        }
    }

    /// The number of shells currently pooled for `ty`.
    pub fn pooled_count(&self, ty: OperationType) -> usize {
        self.pools.get(&ty).map(|v| v.len()).unwrap_or(0)
    }
}

impl Default for LruAllocationStrategy {
    fn default() -> Self {
        LruAllocationStrategy::new(1000, 1000, 100, 10)
    }
}

impl AllocationStrategy for LruAllocationStrategy {
    fn allocate(&mut self, ty: OperationType) -> Operation {
        let (op, emptied) = match self.pools.get_mut(&ty) {
            Some(pool) => match pool.pop() {
                Some(op) => (Some(op), pool.is_empty()),
                None => (None, true),
            },
            None => (None, false),
        };

        if emptied {
            if let Some(pool) = self.pools.remove(&ty) {
                if self.retired.len() < self.pool_cache_max_size {
                    self.retired.push(pool);
                }
            }
        }

        op.unwrap_or_else(|| Operation::blank(ty))
    }

    fn release(&mut self, ty: OperationType, op: Operation) {
        let retired = &mut self.retired;
        let capacity = self.pool_initial_capacity;
        let pool = self
            .pools
            .entry(ty)
            .or_insert_with(|| retired.pop().unwrap_or_else(|| Vec::with_capacity(capacity)));

        if pool.len() < self.pool_max_size {
            pool.push(op);
        }
    }
}
