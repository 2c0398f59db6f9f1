pub mod settings;

pub use settings::{MessagesConfig, RelayConfig, Settings, SlackConfig, WikipediaConfig};
