use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender};

use crate::config::Config;
use crate::types::ObjectEntry;
use crate::types::token::PipelineCancellationToken;

/// Result of sending an entry to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    Success,
    Closed,
}

/// Shared context passed to each pipeline stage.
///
/// Channels connect stages: the listing producer only has a `sender`, the
/// workers only have a `receiver`. Each stage takes ownership of its
/// `Stage`; dropping the producer's stage closes the item channel.
pub struct Stage {
    pub config: Config,
    pub receiver: Option<Receiver<ObjectEntry>>,
    pub sender: Option<Sender<ObjectEntry>>,
    pub cancellation_token: PipelineCancellationToken,
}

impl Stage {
    pub fn new(
        config: Config,
        receiver: Option<Receiver<ObjectEntry>>,
        sender: Option<Sender<ObjectEntry>>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            config,
            receiver,
            sender,
            cancellation_token,
        }
    }

    /// Send an entry to the next stage via the sender channel.
    ///
    /// Returns `SendResult::Closed` if the downstream channel has been closed
    /// or the pipeline was cancelled while waiting for room in the channel.
    pub async fn send(&self, entry: ObjectEntry) -> Result<SendResult> {
        let sender = self.sender.as_ref().unwrap();

        let result = tokio::select! {
            result = sender.send(entry) => result.context("async_channel::Sender::send() failed."),
            _ = self.cancellation_token.cancelled() => return Ok(SendResult::Closed),
        };

        if let Err(e) = result {
            return if !self.is_channel_closed() {
                Err(anyhow!(e))
            } else {
                Ok(SendResult::Closed)
            };
        }

        Ok(SendResult::Success)
    }

    /// Check if the sender channel has been closed by the receivers.
    pub fn is_channel_closed(&self) -> bool {
        self.sender.as_ref().unwrap().is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::token::create_pipeline_cancellation_token;

    fn entry(key: &str) -> ObjectEntry {
        ObjectEntry::object(key, 0, None)
    }

    #[tokio::test]
    async fn send_delivers_entries() {
        let (sender, receiver) = async_channel::bounded(1);
        let stage = Stage::new(
            Config::default(),
            None,
            Some(sender),
            create_pipeline_cancellation_token(),
        );

        assert_eq!(stage.send(entry("a")).await.unwrap(), SendResult::Success);
        assert_eq!(receiver.recv().await.unwrap().key, "a");
    }

    #[tokio::test]
    async fn send_to_closed_channel() {
        let (sender, receiver) = async_channel::bounded(1);
        let stage = Stage::new(
            Config::default(),
            None,
            Some(sender),
            create_pipeline_cancellation_token(),
        );
        drop(receiver);

        assert!(stage.is_channel_closed());
        assert_eq!(stage.send(entry("a")).await.unwrap(), SendResult::Closed);
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_full_channel() {
        let (sender, _receiver) = async_channel::bounded(1);
        let token = create_pipeline_cancellation_token();
        let stage = Stage::new(Config::default(), None, Some(sender), token.clone());

        assert_eq!(stage.send(entry("a")).await.unwrap(), SendResult::Success);
        token.cancel();
        assert_eq!(stage.send(entry("b")).await.unwrap(), SendResult::Closed);
    }
}
