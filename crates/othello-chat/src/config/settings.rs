use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub rag: RagConfig,
    pub mistral: MistralConfig,
    pub local: LocalConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RagConfig {
    /// UTF-8 text the index is built from
    pub source_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_top_k: usize,
    pub embedding_batch_size: usize,
    /// Characters of each source fragment shown under an answer
    pub source_preview_chars: usize,
    /// Characters of the first question used as conversation title
    pub title_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("othello.txt"),
            chunk_size: 500,
            chunk_overlap: 100,
            retrieval_top_k: 3,
            embedding_batch_size: 32,
            source_preview_chars: 200,
            title_chars: 30,
        }
    }
}

/// One selectable completion model, with the blurb shown on the comparison page.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModelTier {
    pub name: String,
    pub strength: String,
    pub usage: String,
}

impl ModelTier {
    fn new(name: &str, strength: &str, usage: &str) -> Self {
        Self {
            name: name.to_string(),
            strength: strength.to_string(),
            usage: usage.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MistralConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub index_dir: PathBuf,
    pub timeout_seconds: u64,
    pub models: Vec<ModelTier>,
}

impl Default for MistralConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mistral.ai".to_string(),
            embedding_model: "mistral-embed".to_string(),
            index_dir: PathBuf::from("./index_mistral"),
            timeout_seconds: 120,
            models: vec![
                ModelTier::new(
                    "mistral-small-latest",
                    "Speed & efficiency",
                    "Simple questions",
                ),
                ModelTier::new(
                    "mistral-large-latest",
                    "Complex reasoning & nuance",
                    "In-depth literary analysis",
                ),
            ],
        }
    }
}

/// Locally hosted OpenAI-compatible server (ollama, llama-server).
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LocalConfig {
    pub base_url: String,
    pub embedding_path: String,
    pub embedding_model: String,
    pub index_dir: PathBuf,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub models: Vec<ModelTier>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embedding_path: "/v1/embeddings".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            index_dir: PathBuf::from("./index_local"),
            timeout_seconds: 300,
            max_tokens: 1024,
            models: vec![
                ModelTier::new("mistral", "Speed & efficiency", "Simple questions"),
                ModelTier::new(
                    "llama3.1",
                    "Complex reasoning & nuance",
                    "In-depth literary analysis",
                ),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    /// Rewrites a follow-up into a standalone question. Placeholders: {{HISTORY}}, {{QUESTION}}
    pub condense_question_prompt: String,
    /// System prompt for the final answer. Placeholder: {{CONTEXT}}
    pub answer_system_prompt: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            condense_question_prompt: "Given the following conversation and a follow up question, \
                rephrase the follow up question to be a standalone question, in its original language.\n\n\
                Chat History:\n{{HISTORY}}\nFollow Up Input: {{QUESTION}}\nStandalone question:"
                .to_string(),
            answer_system_prompt: "Use the following pieces of context to answer the user's question. \
                If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
                ----------------\n{{CONTEXT}}"
                .to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("OTHELLO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
