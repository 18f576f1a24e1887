pub mod cli;
pub mod config;
pub mod logging;

mod amqpserver;
mod app;
mod events;
mod model;
mod persist;
mod web;

pub use app::App;
pub use config::{Config, ConfigError};
pub use events::{EventReceiver, EventSender, ObjectUpdate};
pub use model::{DataError, LoadError, Model, ModelError, NodeView, RootView};
pub use persist::SaveWorker;
