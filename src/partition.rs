//! Splits the shared term dataset into per-round shards.
//!
//! The first `n % round_count` rounds get one extra item; shards are
//! contiguous, in dataset order, and together cover the dataset exactly once.
//!
//! ```
//! use zlehcito_client::partition::partition;
//!
//! let data = [0, 1, 2, 3, 4, 5, 6];
//! assert_eq!(partition(&data, 3, 1), &[0, 1, 2]);
//! assert_eq!(partition(&data, 3, 2), &[3, 4]);
//! assert_eq!(partition(&data, 3, 3), &[5, 6]);
//! assert!(partition(&data, 3, 4).is_empty());
//! ```

/// The shard of `dataset` for the 1-based `round_index` out of `round_count` rounds.
///
/// A `round_count` of zero or less is treated as one round. An index below 1
/// or past the data yields an empty slice.
pub fn partition<T>(dataset: &[T], round_count: i32, round_index: i32) -> &[T] {
    if round_index < 1 {
        return &[];
    }
    let rounds = usize::try_from(round_count).unwrap_or(0).max(1);
    let Ok(index) = usize::try_from(round_index) else {
        return &[];
    };

    let n = dataset.len();
    let base = n / rounds;
    let extra = n % rounds;

    let start = (index - 1)
        .saturating_mul(base)
        .saturating_add((index - 1).min(extra));
    let end = index
        .saturating_mul(base)
        .saturating_add(index.min(extra))
        .min(n);

    if start >= end {
        return &[];
    }
    dataset.get(start..end).unwrap_or(&[])
}
