pub mod settings;

pub use settings::{ModelsConfig, PipelineConfig, ServerConfig, Settings, UpstreamConfig};
