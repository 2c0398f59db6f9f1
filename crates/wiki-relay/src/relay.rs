//! The relay bot: startup greeting, one-shot mention reply, image upload
//! pass and the encyclopedia polling loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{MessagesConfig, RelayConfig};
use crate::error::{LookupError, SlackError, UploadError};
use crate::slack::ChatPlatform;
use crate::wikipedia::Encyclopedia;

/// What one polling cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    NoMessage,
    AlreadyProcessed,
    FromBot,
    NoTrigger,
    Replied { topic: String },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Relay {
    platform: Arc<dyn ChatPlatform>,
    encyclopedia: Arc<dyn Encyclopedia>,
    config: RelayConfig,
    messages: MessagesConfig,
    last_processed_ts: Option<String>,
}

impl Relay {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        encyclopedia: Arc<dyn Encyclopedia>,
        config: RelayConfig,
        messages: MessagesConfig,
    ) -> Self {
        Self {
            platform,
            encyclopedia,
            config,
            messages,
            last_processed_ts: None,
        }
    }

    pub fn last_processed_ts(&self) -> Option<&str> {
        self.last_processed_ts.as_deref()
    }

    /// Greeting, mention reply and image pass. Failures are logged; none of
    /// them stops the relay.
    pub async fn startup(&self) {
        match self.post_greeting().await {
            Ok(()) => info!("✅ Greeting posted"),
            Err(e) => error!("Slack error while posting greeting: {}", e),
        }

        match self.reply_to_mention().await {
            Ok(true) => info!("✅ Replied to mention"),
            Ok(false) => debug!("Latest message needs no mention reply"),
            Err(e) => error!("Mention check failed: {}", e),
        }

        match self.upload_images().await {
            Ok(report) => info!(
                "🖼️ Image pass done: {} uploaded, {} skipped, {} failed",
                report.uploaded.len(),
                report.skipped.len(),
                report.failed.len()
            ),
            Err(e) => error!("{}", e),
        }
    }

    pub async fn post_greeting(&self) -> Result<(), SlackError> {
        self.platform.post_message(&self.messages.greeting).await
    }

    /// Reply once to the latest message if it mentions the trigger word.
    /// Messages carrying the encyclopedia trigger are left to the loop.
    pub async fn reply_to_mention(&self) -> Result<bool, SlackError> {
        let Some(message) = self.platform.latest_message().await? else {
            return Ok(false);
        };
        debug!("Latest message: {}", message.text);

        let mentions = message
            .text
            .to_uppercase()
            .contains(&self.config.mention_trigger.to_uppercase());

        if !mentions || message.is_from_bot() || message.text.contains(&self.config.wiki_trigger) {
            return Ok(false);
        }

        let user = message.user.as_deref().unwrap_or("someone");
        let reply = self.messages.mention_reply.replace("{{USER}}", user);
        self.platform.post_message(&reply).await?;
        Ok(true)
    }

    /// Upload every image of the configured folder, in name order.
    pub async fn upload_images(&self) -> Result<UploadReport, UploadError> {
        let dir = &self.config.image_dir;
        let names = list_files(dir).await?;
        info!("Scanning {}: {} files found", dir.display(), names.len());

        let mut report = UploadReport::default();
        for name in names {
            if !self.is_image(&name) {
                report.skipped.push(name);
                continue;
            }

            info!("Uploading {}", name);
            let caption = self.messages.image_caption.replace("{{NAME}}", &name);
            match self.platform.upload_file(&dir.join(&name), &caption).await {
                Ok(()) => report.uploaded.push(name),
                Err(e) => {
                    warn!("Upload of {} failed: {}", name, e);
                    report.failed.push(name);
                }
            }
        }

        Ok(report)
    }

    fn is_image(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.config
                    .image_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }

    /// One check of the channel. A reply is posted at most once per message
    /// timestamp; the timestamp is recorded only after the post succeeds.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, SlackError> {
        let Some(message) = self.platform.latest_message().await? else {
            return Ok(PollOutcome::NoMessage);
        };

        if self.last_processed_ts.as_deref() == Some(message.ts.as_str()) {
            return Ok(PollOutcome::AlreadyProcessed);
        }
        if message.is_from_bot() {
            return Ok(PollOutcome::FromBot);
        }
        let Some(topic) = extract_topic(&message.text, &self.config.wiki_trigger) else {
            return Ok(PollOutcome::NoTrigger);
        };

        info!("Request detected: {}", message.text);
        let reply = self.lookup_reply(&topic).await;
        self.platform.post_message(&reply).await?;
        self.last_processed_ts = Some(message.ts);
        info!("Reply sent for '{}'", topic);

        Ok(PollOutcome::Replied { topic })
    }

    async fn lookup_reply(&self, topic: &str) -> String {
        if topic.is_empty() {
            return self.messages.not_found_reply.replace("{{TOPIC}}", topic);
        }

        match self.encyclopedia.summary(topic).await {
            Ok(summary) => self
                .messages
                .summary_reply
                .replace("{{TOPIC}}", topic)
                .replace("{{SUMMARY}}", &summary),
            Err(LookupError::Disambiguation(_)) => {
                self.messages.disambiguation_reply.replace("{{TOPIC}}", topic)
            }
            Err(LookupError::PageNotFound(_)) => {
                self.messages.not_found_reply.replace("{{TOPIC}}", topic)
            }
            Err(LookupError::Other(e)) => {
                warn!("Lookup of '{}' failed: {}", topic, e);
                self.messages.error_reply.clone()
            }
        }
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        info!(
            "📚 WikiBot active! Write '{}[title]' in Slack...",
            self.config.wiki_trigger
        );

        loop {
            match self.poll_once().await {
                Ok(outcome) => debug!(?outcome, "poll cycle"),
                Err(e) => error!("Polling failed: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Bot stopped.");
    }
}

/// Text between the first trigger and the next one (or the end), trimmed.
pub fn extract_topic(text: &str, trigger: &str) -> Option<String> {
    let (_, rest) = text.split_once(trigger)?;
    let topic = rest.split(trigger).next().unwrap_or_default();
    Some(topic.trim().to_string())
}

async fn list_files(dir: &Path) -> Result<Vec<String>, UploadError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            UploadError::MissingFolder(dir.to_path_buf())
        } else {
            UploadError::Io {
                path: dir.to_path_buf(),
                source,
            }
        }
    })?;

    let io_error = |source: std::io::Error| UploadError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        if entry.file_type().await.map_err(io_error)?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
