//! Synthetic unit-vector dataset.

use coherepedia_index::{Dataset, Result};
use coherepedia_vector::l2_normalize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random unit vector with components drawn from `[-1, 1)`.
pub fn random_unit_vector(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    l2_normalize(&mut v);
    v
}

/// Rows generated on the fly, reproducible per shard.
pub struct RandomDataset {
    rows: usize,
    shards: usize,
    dimension: usize,
    seed: u64,
}

impl RandomDataset {
    pub fn new(rows: usize, shards: usize, dimension: usize, seed: u64) -> Self {
        Self {
            rows,
            shards: shards.max(1),
            dimension,
            seed,
        }
    }

    fn shard_rows(&self, shard: usize) -> usize {
        let base = self.rows / self.shards;
        if shard < self.rows % self.shards {
            base + 1
        } else {
            base
        }
    }
}

impl Dataset for RandomDataset {
    fn shard_count(&self) -> usize {
        self.shards
    }

    fn row_hint(&self) -> usize {
        self.rows
    }

    fn for_each_row(
        &self,
        shard: usize,
        f: &mut dyn FnMut(Vec<u8>, &[f32]) -> Result<()>,
    ) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(shard as u64));
        for row in 0..self.shard_rows(shard) {
            let embedding = random_unit_vector(&mut rng, self.dimension);
            f(format!("shard-{}-row-{}", shard, row).into_bytes(), &embedding)?;
        }
        Ok(())
    }
}
