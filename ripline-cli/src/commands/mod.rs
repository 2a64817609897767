//! CLI subcommand implementations.

pub mod internal;
pub mod plan;
pub mod run;
pub mod status;

use ripline::config::Settings;
use ripline::marker::MarkerStore;
use ripline::queue::QueueEngine;
use ripline::storage::Storage;

/// Shared wiring for commands that read the data root.
pub(crate) struct Context {
    pub storage: Storage,
    pub queue: QueueEngine,
}

pub(crate) fn context(settings: &Settings) -> Context {
    let paths = settings.paths();
    Context {
        storage: Storage::new(paths.clone()),
        queue: QueueEngine::new(MarkerStore::new(paths)),
    }
}
