pub mod settings;

pub use settings::{
    LocalConfig, MistralConfig, ModelTier, PromptsConfig, RagConfig, ServerConfig, Settings,
};
