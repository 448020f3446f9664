/// Batch selection
///
/// A batch is a uniform random sample, without replacement, of the whole
/// library. It is fixed once drawn; only the cursor into it moves.

use rand::Rng;
use std::collections::HashSet;

use crate::state::data::AssetRef;

/// Ordered, duplicate-free selection of library assets for one session
#[derive(Debug, Clone, Default)]
pub struct Batch {
    assets: Vec<AssetRef>,
}

impl Batch {
    /// Draw `min(batch_size, library.len())` distinct assets.
    ///
    /// Uses rejection sampling: draw a uniform index, keep it if unseen,
    /// repeat. Exact and cheap while the batch is small next to the
    /// library; retries grow as the batch approaches the library size.
    pub fn sample<R: Rng + ?Sized>(library: &[AssetRef], batch_size: usize, rng: &mut R) -> Self {
        let k = batch_size.min(library.len());
        let mut seen = HashSet::with_capacity(k);
        let mut order = Vec::with_capacity(k);

        while order.len() < k {
            let index = rng.gen_range(0..library.len());
            if seen.insert(index) {
                order.push(index);
            }
        }

        Self {
            assets: order.into_iter().map(|i| library[i].clone()).collect(),
        }
    }

    pub fn from_assets(assets: Vec<AssetRef>) -> Self {
        Self { assets }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AssetRef> {
        self.assets.get(index)
    }

    pub fn assets(&self) -> &[AssetRef] {
        &self.assets
    }

    /// Up to `len` assets starting at `start`, clamped to the batch
    pub fn window(&self, start: usize, len: usize) -> &[AssetRef] {
        let start = start.min(self.assets.len());
        let end = start.saturating_add(len).min(self.assets.len());
        &self.assets[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn library(n: usize) -> Vec<AssetRef> {
        (0..n).map(|i| AssetRef::new(format!("photo-{}", i), Utc::now())).collect()
    }

    #[test]
    fn test_sample_is_distinct_members() {
        let lib = library(100);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let batch = Batch::sample(&lib, 10, &mut rng);
            assert_eq!(batch.len(), 10);

            let ids: HashSet<_> = batch.assets().iter().map(|a| a.id.clone()).collect();
            assert_eq!(ids.len(), 10);
            assert!(batch.assets().iter().all(|a| lib.contains(a)));
        }
    }

    #[test]
    fn test_small_library_takes_everything() {
        let lib = library(3);
        let batch = Batch::sample(&lib, 10, &mut StdRng::seed_from_u64(1));

        assert_eq!(batch.len(), 3);
        let ids: HashSet<_> = batch.assets().iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_empty_library() {
        let batch = Batch::sample(&[], 10, &mut StdRng::seed_from_u64(1));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_window_clamps() {
        let batch = Batch::from_assets(library(5));

        assert_eq!(batch.window(0, 3).len(), 3);
        assert_eq!(batch.window(3, 5).len(), 2);
        assert!(batch.window(5, 3).is_empty());
        assert!(batch.window(9, 3).is_empty());
    }
}
