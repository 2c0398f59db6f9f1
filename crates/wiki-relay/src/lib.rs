//! Slack relay bot: greets the channel, uploads a folder of images, then
//! answers `Wikipedia:<topic>` messages with a one-sentence summary.

pub mod config;
pub mod error;
pub mod relay;
pub mod slack;
pub mod wikipedia;

pub use relay::{PollOutcome, Relay, UploadReport};
