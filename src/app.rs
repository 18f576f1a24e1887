use std::sync::Arc;

use uuid::Uuid;

use crate::{config::Config, model::Model};

/// Contains the state shared by every HTTP connection task: the resolved
/// configuration and a handle to the model. One `App` exists per process.
pub struct App {
    config: Config,
    model: Arc<Model>,

    /// Validator for the single-page application index. The UI is static
    /// for the lifetime of the process, so a per-process random tag is a
    /// correct (and cheap) ETag for it.
    index_etag: String,
}

impl App {
    pub fn new(config: Config, model: Arc<Model>) -> Self {
        App {
            config,
            model,
            index_etag: format!("\"{}\"", Uuid::new_v4()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn index_etag(&self) -> &str {
        &self.index_etag
    }
}
