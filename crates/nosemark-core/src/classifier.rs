//! Classifier seam and the shared slot that publishes a classifier once it
//! has loaded.

use crate::frame::GrayView;
use crate::types::{DetectParams, Rect};
use std::sync::{Arc, OnceLock};

/// An object detector over grayscale images.
///
/// Implementations are read-only after construction; one instance is shared
/// by every frame.
pub trait Classifier: Send + Sync {
    /// Regions in `image`'s own coordinates, in no particular order.
    fn detect(&self, image: GrayView<'_>, params: &DetectParams) -> Vec<Rect>;
}

/// A named, write-once holder for a classifier that may still be loading.
///
/// Readers call [`ClassifierSlot::get`] without locking; until a classifier is
/// installed it returns `None` and the caller skips that detection pass.
pub struct ClassifierSlot {
    name: String,
    inner: OnceLock<Arc<dyn Classifier>>,
}

impl ClassifierSlot {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: OnceLock::new(),
        }
    }

    /// A slot that is ready from the start.
    pub fn ready(name: impl Into<String>, classifier: Arc<dyn Classifier>) -> Self {
        let slot = Self::empty(name);
        slot.install(classifier);
        slot
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish `classifier`. The first install wins; later calls return
    /// `false` and leave the slot unchanged.
    pub fn install(&self, classifier: Arc<dyn Classifier>) -> bool {
        let installed = self.inner.set(classifier).is_ok();
        if !installed {
            tracing::warn!(slot = %self.name, "classifier already installed; ignoring");
        }
        installed
    }

    pub fn get(&self) -> Option<&Arc<dyn Classifier>> {
        self.inner.get()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.get().is_some()
    }
}

impl std::fmt::Debug for ClassifierSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierSlot")
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}
