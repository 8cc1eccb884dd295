use tokio::sync::watch;
use tonic::metadata::MetadataMap;

/// Create a linked cancellation pair.
///
/// The handle side fires at most once; the signal side can be cloned freely
/// and observed from any task.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
  let (tx, rx) = watch::channel(false);
  (CancelHandle { tx }, CancelSignal { rx })
}

/// Producer half of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

impl CancelHandle {
  pub fn cancel(&self) {
    let _ = self.tx.send(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.tx.borrow()
  }
}

/// Consumer half of a cancellation pair.
///
/// `cancelled()` is intended for use inside `tokio::select!`: it resolves when
/// the handle fires and stays pending forever otherwise, including when the
/// handle is dropped without cancelling.
#[derive(Debug, Clone)]
pub struct CancelSignal {
  rx: watch::Receiver<bool>,
}

impl CancelSignal {
  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  pub async fn cancelled(&mut self) {
    if *self.rx.borrow() {
      return;
    }
    while self.rx.changed().await.is_ok() {
      if *self.rx.borrow() {
        return;
      }
    }
    // Handle dropped without firing: the call completed normally.
    std::future::pending::<()>().await
  }
}

/// Per-call view handed to server handlers: request headers plus the
/// transport's cancellation signal.
#[derive(Debug)]
pub struct CallContext {
  metadata: MetadataMap,
  cancel: CancelSignal,
}

impl CallContext {
  /// Build a context from request metadata, returning the transport-side
  /// cancellation handle alongside it.
  pub fn new(metadata: MetadataMap) -> (Self, CancelHandle) {
    let (handle, signal) = cancel_pair();
    (
      Self {
        metadata,
        cancel: signal,
      },
      handle,
    )
  }

  /// Request headers as sent by the peer.
  pub fn metadata(&self) -> &MetadataMap {
    &self.metadata
  }

  /// Look up a single ASCII header value.
  pub fn header(&self, name: &str) -> Option<&str> {
    self.metadata.get(name).and_then(|value| value.to_str().ok())
  }

  pub fn cancellation(&self) -> CancelSignal {
    self.cancel.clone()
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }
}
