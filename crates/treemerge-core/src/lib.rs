pub mod config;
pub mod inputs;
pub mod logging;

pub use config::Settings;
pub use inputs::{load_tree, BatchManifest, ScenarioEntry};
