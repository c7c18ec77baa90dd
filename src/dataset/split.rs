use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;

/// Seed used when no explicit split seed is configured.
pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Indices assigned to each partition, both sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Partition {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
}

/// Number of items that go to training: `floor(n * fraction)`, at least one when `n > 0`.
pub fn train_partition_size(n: usize, train_fraction: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let fraction = if train_fraction.is_finite() {
        train_fraction.clamp(0.0, 1.0)
    } else {
        0.8
    };
    ((n as f64 * fraction).floor() as usize).clamp(1, n)
}

/// Pick the training indices with a fixed-seed PRNG; the rest validate.
///
/// The same `(n, train_fraction, seed)` always yields the same partition.
pub fn split_indices(n: usize, train_fraction: f64, seed: u64) -> Partition {
    let k = train_partition_size(n, train_fraction);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = index::sample(&mut rng, n, k).into_vec();
    train.sort_unstable();
    let mut in_train = vec![false; n];
    for &idx in &train {
        in_train[idx] = true;
    }
    let val = (0..n).filter(|idx| !in_train[*idx]).collect();
    Partition { train, val }
}
