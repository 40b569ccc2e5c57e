use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::bundle::{BundleOrigin, ModelBundle};

/// How the serving bundle was obtained in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelOrigin {
    /// Read back from the model store.
    Loaded,
    /// Fitted on market data during this run.
    Trained,
    /// Fitted on the minimal fallback dataset.
    Fallback,
}

impl ModelOrigin {
    /// Origin of a bundle produced by training in this process.
    #[must_use]
    pub const fn from_bundle(origin: BundleOrigin) -> Self {
        match origin {
            BundleOrigin::Trained => Self::Trained,
            BundleOrigin::Fallback => Self::Fallback,
        }
    }
}

/// A bundle together with its position in the replacement history.
#[derive(Debug)]
pub struct ServingBundle {
    /// Monotonically increasing replacement counter, starting at 1.
    pub generation: u64,
    /// How the bundle was obtained.
    pub origin: ModelOrigin,
    /// The immutable bundle.
    pub bundle: Arc<ModelBundle>,
}

/// Slot holding the bundle served to predictions.
///
/// Readers clone the `Arc` and keep using that snapshot for the whole
/// request; a replacement swaps the pointer under a short write lock.
#[derive(Debug)]
pub struct BundleRegistry {
    slot: RwLock<Arc<ServingBundle>>,
}

impl BundleRegistry {
    /// Creates the registry with its first bundle at generation 1.
    #[must_use]
    pub fn new(bundle: ModelBundle, origin: ModelOrigin) -> Self {
        Self {
            slot: RwLock::new(Arc::new(ServingBundle {
                generation: 1,
                origin,
                bundle: Arc::new(bundle),
            })),
        }
    }

    /// Snapshot of the current bundle.
    #[must_use]
    pub fn current(&self) -> Arc<ServingBundle> {
        Arc::clone(&self.slot.read())
    }

    /// Atomically installs a new bundle and returns its generation.
    pub fn replace(&self, bundle: ModelBundle, origin: ModelOrigin) -> u64 {
        let mut slot = self.slot.write();
        let generation = slot.generation + 1;
        *slot = Arc::new(ServingBundle {
            generation,
            origin,
            bundle: Arc::new(bundle),
        });
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::tests::constant_bundle;
    use std::thread;

    #[test]
    fn replace_bumps_generation_and_keeps_old_snapshots() {
        let registry = BundleRegistry::new(constant_bundle(1_000.0, None), ModelOrigin::Loaded);
        let before = registry.current();
        assert_eq!(before.generation, 1);

        let generation = registry.replace(constant_bundle(2_000.0, None), ModelOrigin::Trained);
        assert_eq!(generation, 2);
        let after = registry.current();
        assert_eq!(after.origin, ModelOrigin::Trained);
        assert_ne!(before.bundle.id(), after.bundle.id());
        // old snapshot is still complete
        assert_eq!(before.origin, ModelOrigin::Loaded);
        assert_eq!(before.generation, 1);
    }

    #[test]
    fn concurrent_readers_see_whole_bundles() {
        let registry = Arc::new(BundleRegistry::new(
            constant_bundle(1_000.0, None),
            ModelOrigin::Loaded,
        ));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..200 {
                        let snapshot = registry.current();
                        assert!(snapshot.generation >= last);
                        last = snapshot.generation;
                        snapshot.bundle.validate().unwrap();
                    }
                })
            })
            .collect();
        for value in [2_000.0, 3_000.0, 4_000.0] {
            registry.replace(constant_bundle(value, None), ModelOrigin::Trained);
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.current().generation, 4);
    }
}
