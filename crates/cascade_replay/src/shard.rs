//! Sharding and pacing arithmetic.

use crate::driver::DriverError;
use std::time::Duration;

/// Split `items` into `shards` contiguous lanes whose sizes differ by at most one
///
/// Always returns exactly `shards` lanes (some may be empty); order within
/// and across lanes follows `items`.
#[must_use]
pub fn partition<T: Clone>(items: &[T], shards: usize) -> Vec<Vec<T>> {
    let shards = shards.max(1);
    let base = items.len() / shards;
    let extra = items.len() % shards;

    let mut lanes = Vec::with_capacity(shards);
    let mut offset = 0;
    for lane in 0..shards {
        let size = base + usize::from(lane < extra);
        lanes.push(items[offset..offset + size].to_vec());
        offset += size;
    }
    lanes
}

/// Interval between sends within one shard for aggregate `rate` per second
///
/// # Errors
///
/// Returns error if there are no shards, or if the rate is not a positive
/// finite number whose interval fits a nonzero [`Duration`]
pub fn shard_interval(rate: f64, shards: usize) -> Result<Duration, DriverError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(DriverError::InvalidRate { rate });
    }
    if shards == 0 {
        return Err(DriverError::NoShards);
    }
    let per_shard = rate / shards as f64;
    Duration::try_from_secs_f64(1.0 / per_shard)
        .ok()
        .filter(|interval| !interval.is_zero())
        .ok_or(DriverError::InvalidRate { rate })
}
