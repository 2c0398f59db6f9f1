//! Slack side of the relay: read the latest channel message, post a
//! message, upload a file. Backed by `slack-morphism`'s hyper client.

use async_trait::async_trait;
use slack_morphism::prelude::*;
use std::path::Path;
use tracing::debug;

use crate::config::SlackConfig;
use crate::error::SlackError;

#[derive(Debug, Clone, PartialEq)]
pub struct SlackMessage {
    pub text: String,
    pub ts: String,
    pub user: Option<String>,
    pub bot_id: Option<String>,
}

impl SlackMessage {
    pub fn is_from_bot(&self) -> bool {
        self.bot_id.is_some()
    }
}

impl From<SlackHistoryMessage> for SlackMessage {
    fn from(message: SlackHistoryMessage) -> Self {
        Self {
            text: message.content.text.unwrap_or_default(),
            ts: message.origin.ts.0,
            user: message.sender.user.map(|user| user.0),
            bot_id: message.sender.bot_id.map(|bot| bot.0),
        }
    }
}

/// The channel the relay reads from and writes to.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Most recent message of the channel, if any.
    async fn latest_message(&self) -> Result<Option<SlackMessage>, SlackError>;

    async fn post_message(&self, text: &str) -> Result<(), SlackError>;

    async fn upload_file(&self, path: &Path, comment: &str) -> Result<(), SlackError>;
}

/// One bot token bound to one channel.
pub struct SlackChannelClient {
    client: SlackHyperClient,
    token: SlackApiToken,
    channel: SlackChannelId,
}

impl SlackChannelClient {
    pub fn new(config: &SlackConfig) -> Result<Self, SlackError> {
        let connector = SlackClientHyperConnector::new()
            .map_err(|e| SlackError::Unavailable(e.to_string()))?
            .with_slack_api_url(&config.api_url());

        Ok(Self {
            client: SlackClient::new(connector),
            token: SlackApiToken::new(config.bot_token.clone().into()),
            channel: SlackChannelId(config.channel_id.clone()),
        })
    }
}

/// MIME type sent with the raw upload.
fn content_type(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

fn upload_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

#[async_trait]
impl ChatPlatform for SlackChannelClient {
    async fn latest_message(&self) -> Result<Option<SlackMessage>, SlackError> {
        let session = self.client.open_session(&self.token);
        let request = SlackApiConversationsHistoryRequest::new()
            .with_channel(self.channel.clone())
            .with_limit(1);

        let response = session.conversations_history(&request).await?;
        Ok(response.messages.into_iter().next().map(SlackMessage::from))
    }

    async fn post_message(&self, text: &str) -> Result<(), SlackError> {
        let session = self.client.open_session(&self.token);
        let request = SlackApiChatPostMessageRequest::new(
            self.channel.clone(),
            SlackMessageContent::new().with_text(text.to_string()),
        );

        session.chat_post_message(&request).await?;
        debug!("Posted message to {}", self.channel.0);
        Ok(())
    }

    async fn upload_file(&self, path: &Path, comment: &str) -> Result<(), SlackError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| SlackError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = upload_name(path);
        let session = self.client.open_session(&self.token);

        // reserve an upload slot, send the bytes, then share it in the channel
        let slot = session
            .get_upload_url_external(&SlackApiFilesGetUploadUrlExternalRequest::new(
                filename.clone(),
                bytes.len(),
            ))
            .await?;

        session
            .files_upload_via_url(&SlackApiFilesUploadViaUrlRequest::new(
                slot.upload_url,
                bytes,
                content_type(path),
            ))
            .await?;

        let complete = SlackApiFilesCompleteUploadExternalRequest::new(vec![
            SlackApiFilesComplete::new(slot.file_id.clone()).with_title(filename.clone()),
        ])
        .with_channel_id(self.channel.clone())
        .with_initial_comment(comment.to_string());
        session.files_complete_upload_external(&complete).await?;

        debug!("Uploaded {} as {}", filename, slot.file_id.0);
        Ok(())
    }
}
