use std::sync::Arc;

use common::{
    storage::{kv::StateStore, store::BlobStore},
    utils::clock::Clock,
};
use inference_pipeline::RecordGenerator;

/// Collaborators shared by the job service, the worker and the task runner.
#[derive(Clone)]
pub struct EngineContext {
    pub state: Arc<dyn StateStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub generator: Arc<dyn RecordGenerator>,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn new(
        state: Arc<dyn StateStore>,
        blobs: Arc<dyn BlobStore>,
        generator: Arc<dyn RecordGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            blobs,
            generator,
            clock,
        }
    }
}
