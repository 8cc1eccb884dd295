use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::context::{CancelHandle, CancelSignal, cancel_pair};
use crate::error::RpcError;

/// One transport callback invocation: either a message or end-of-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent<T> {
  Message(T),
  End,
}

/// Producer half of the push-to-pull adapter.
///
/// The transport feeds it one [`StreamEvent`] per callback; the paired
/// [`BridgeStream`] exposes those events as an ordered stream of messages
/// ending in success or a single [`RpcError`].
///
/// The channel is unbounded on purpose: pacing message delivery is the
/// transport's job, the bridge is a FIFO pass-through with no backpressure
/// signal upstream. A bridge carries exactly one terminal event; anything
/// received after it is dropped with a warning.
pub struct MessageBridge<T> {
  tx: Option<mpsc::UnboundedSender<Result<T, RpcError>>>,
  cancel: CancelSignal,
}

impl<T> MessageBridge<T> {
  /// Create a linked bridge/stream pair for one call.
  pub fn channel() -> (MessageBridge<T>, BridgeStream<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (handle, signal) = cancel_pair();
    (
      MessageBridge {
        tx: Some(tx),
        cancel: signal,
      },
      BridgeStream {
        rx,
        cancel: Some(handle),
        done: false,
      },
    )
  }

  /// Feed one transport event into the sequence.
  pub fn receive(&mut self, event: StreamEvent<T>) {
    match event {
      StreamEvent::Message(message) => match &self.tx {
        Some(tx) => {
          // A closed receiver means the consumer cancelled; the cancellation
          // signal already covers that, so the send result is irrelevant.
          let _ = tx.send(Ok(message));
        }
        None => {
          tracing::warn!(
            target: "grpc_reactive",
            "Message received after stream terminated; dropping"
          );
        }
      },
      StreamEvent::End => {
        if self.tx.take().is_none() {
          tracing::warn!(
            target: "grpc_reactive",
            "Duplicate terminal event on bridge; ignoring"
          );
        }
      }
    }
  }

  /// Close the sequence with a failure.
  pub fn fail(&mut self, error: RpcError) {
    match self.tx.take() {
      Some(tx) => {
        let _ = tx.send(Err(error));
      }
      None => {
        tracing::warn!(
          target: "grpc_reactive",
          code = ?error.code(),
          "Failure received after stream terminated; dropping"
        );
      }
    }
  }

  pub fn is_terminated(&self) -> bool {
    self.tx.is_none()
  }

  /// Signal that fires when the consumer abandons the stream before its
  /// terminal event. The transport should stop delivering events once it does.
  pub fn cancellation(&self) -> CancelSignal {
    self.cancel.clone()
  }
}

/// Consumer half of the bridge: an ordered, fused stream of messages.
///
/// Yields every message in receive order, then either clean completion or a
/// single `Err` item. Once terminated it only ever yields `None`. Dropping it
/// before the terminal event signals cancellation to the producer exactly once.
pub struct BridgeStream<T> {
  rx: mpsc::UnboundedReceiver<Result<T, RpcError>>,
  cancel: Option<CancelHandle>,
  done: bool,
}

impl<T> BridgeStream<T> {
  fn finish(&mut self) {
    self.done = true;
    // Terminal observed: dropping the stream is no longer a cancellation.
    self.cancel.take();
  }
}

impl<T> Stream for BridgeStream<T> {
  type Item = Result<T, RpcError>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    if this.done {
      return Poll::Ready(None);
    }
    match this.rx.poll_recv(cx) {
      Poll::Ready(Some(Ok(message))) => Poll::Ready(Some(Ok(message))),
      Poll::Ready(Some(Err(error))) => {
        this.finish();
        Poll::Ready(Some(Err(error)))
      }
      Poll::Ready(None) => {
        this.finish();
        Poll::Ready(None)
      }
      Poll::Pending => Poll::Pending,
    }
  }
}

impl<T> Drop for BridgeStream<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.cancel.take() {
      handle.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::StreamExt;

  #[tokio::test]
  async fn test_messages_arrive_in_order_then_complete() {
    let (mut bridge, mut stream) = MessageBridge::channel();
    for n in 1..=5 {
      bridge.receive(StreamEvent::Message(n));
    }
    bridge.receive(StreamEvent::End);

    let mut seen = Vec::new();
    while let Some(item) = stream.next().await {
      seen.push(item.expect("no failure expected"));
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
  }

  #[tokio::test]
  async fn test_empty_sequence_completes_cleanly() {
    let (mut bridge, mut stream) = MessageBridge::<u32>::channel();
    bridge.receive(StreamEvent::End);
    assert!(stream.next().await.is_none());
  }

  #[tokio::test]
  async fn test_failure_terminates_the_sequence() {
    let (mut bridge, mut stream) = MessageBridge::channel();
    bridge.receive(StreamEvent::Message("one"));
    bridge.fail(RpcError::unavailable("backend down"));

    assert_eq!(stream.next().await.unwrap().unwrap(), "one");
    let error = stream.next().await.unwrap().unwrap_err();
    assert_eq!(error.code(), tonic::Code::Unavailable);
    assert!(stream.next().await.is_none());
  }

  #[tokio::test]
  async fn test_events_after_terminal_are_no_ops() {
    let (mut bridge, mut stream) = MessageBridge::channel();
    bridge.receive(StreamEvent::Message(1));
    bridge.receive(StreamEvent::End);
    assert!(bridge.is_terminated());

    bridge.receive(StreamEvent::Message(2));
    bridge.receive(StreamEvent::End);
    bridge.fail(RpcError::internal("late failure"));

    assert_eq!(stream.next().await.unwrap().unwrap(), 1);
    assert!(stream.next().await.is_none());
    // Fused: a completed sequence never re-opens.
    assert!(stream.next().await.is_none());
  }

  #[tokio::test]
  async fn test_dropping_consumer_before_terminal_signals_cancellation() {
    let (mut bridge, stream) = MessageBridge::<u32>::channel();
    bridge.receive(StreamEvent::Message(1));
    let cancel = bridge.cancellation();
    assert!(!cancel.is_cancelled());

    drop(stream);
    assert!(cancel.is_cancelled());
  }

  #[tokio::test]
  async fn test_dropping_consumer_after_terminal_does_not_cancel() {
    let (mut bridge, mut stream) = MessageBridge::<u32>::channel();
    bridge.receive(StreamEvent::End);
    let cancel = bridge.cancellation();

    assert!(stream.next().await.is_none());
    drop(stream);
    assert!(!cancel.is_cancelled());
  }
}
