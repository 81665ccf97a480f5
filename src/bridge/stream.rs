//! Token streams produced by an invocation

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::error::BridgeError;

/// A piece of an agent's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeChunk {
    /// Text to append to the assistant message
    Token(String),
}

impl BridgeChunk {
    pub fn text(&self) -> &str {
        match self {
            BridgeChunk::Token(text) => text,
        }
    }
}

/// Ordered stream of chunks, ending normally or with one error
pub struct BridgeStream {
    receiver: mpsc::Receiver<Result<BridgeChunk, BridgeError>>,
}

impl BridgeStream {
    /// Create a channel pair for building a stream
    pub fn channel(buffer: usize) -> (BridgeStreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (BridgeStreamSender { sender: tx }, Self { receiver: rx })
    }

    /// A stream that yields the given items and ends
    pub fn from_items(items: Vec<Result<BridgeChunk, BridgeError>>) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            // capacity covers every item
            let _ = tx.try_send(item);
        }
        Self { receiver: rx }
    }

    /// Concatenate all tokens, stopping at the first error
    pub async fn collect_text(mut self) -> Result<String, BridgeError> {
        let mut text = String::new();
        while let Some(item) = self.receiver.recv().await {
            text.push_str(item?.text());
        }
        Ok(text)
    }
}

impl Stream for BridgeStream {
    type Item = Result<BridgeChunk, BridgeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Sender half for building a stream
#[derive(Clone)]
pub struct BridgeStreamSender {
    sender: mpsc::Sender<Result<BridgeChunk, BridgeError>>,
}

impl BridgeStreamSender {
    /// Send a token; fails once the receiver is gone
    pub async fn send_token(&self, text: impl Into<String>) -> Result<(), BridgeError> {
        self.sender
            .send(Ok(BridgeChunk::Token(text.into())))
            .await
            .map_err(|_| BridgeError::Streaming("receiver dropped".to_string()))
    }

    /// Send an error
    pub async fn send_error(&self, error: BridgeError) {
        let _ = self.sender.send(Err(error)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_from_items_yields_in_order() {
        let mut stream = BridgeStream::from_items(vec![
            Ok(BridgeChunk::Token("a".to_string())),
            Ok(BridgeChunk::Token("b".to_string())),
        ]);
        assert_eq!(stream.next().await.unwrap().unwrap().text(), "a");
        assert_eq!(stream.next().await.unwrap().unwrap().text(), "b");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_stops_at_error() {
        let stream = BridgeStream::from_items(vec![
            Ok(BridgeChunk::Token("partial".to_string())),
            Err(BridgeError::Streaming("boom".to_string())),
        ]);
        assert!(stream.collect_text().await.is_err());
    }
}
