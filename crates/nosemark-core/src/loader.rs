//! Cascade loading into classifier slots, inline or on a startup thread.

use crate::cascade::{CascadeError, HaarCascade};
use crate::classifier::ClassifierSlot;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Load `path` and publish it in `slot`. On error the slot stays empty.
pub fn load_into(slot: &ClassifierSlot, path: &Path) -> Result<(), CascadeError> {
    let cascade = HaarCascade::load(path)?;
    slot.install(Arc::new(cascade));
    Ok(())
}

/// One cascade file destined for one slot.
pub struct LoadJob {
    pub slot: Arc<ClassifierSlot>,
    pub path: PathBuf,
}

/// What happened to one [`LoadJob`].
#[derive(Debug)]
pub struct LoadOutcome {
    pub slot: String,
    pub path: PathBuf,
    pub result: Result<(), CascadeError>,
}

/// Load every job on a background thread, in order.
///
/// Frames processed meanwhile see empty slots and pass through
/// unannotated. Failures are logged and reported in the outcomes; they
/// never abort the remaining jobs.
pub fn spawn_loader(jobs: Vec<LoadJob>) -> std::io::Result<JoinHandle<Vec<LoadOutcome>>> {
    std::thread::Builder::new()
        .name("nosemark-loader".into())
        .spawn(move || {
            jobs.into_iter()
                .map(|job| {
                    let result = load_into(&job.slot, &job.path);
                    match &result {
                        Ok(()) => tracing::info!(
                            slot = job.slot.name(),
                            path = %job.path.display(),
                            "classifier ready"
                        ),
                        Err(e) => tracing::error!(
                            slot = job.slot.name(),
                            path = %job.path.display(),
                            error = %e,
                            "classifier unavailable; its detection pass will be skipped"
                        ),
                    }
                    LoadOutcome {
                        slot: job.slot.name().to_string(),
                        path: job.path,
                        result,
                    }
                })
                .collect()
        })
}
