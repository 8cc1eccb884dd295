use thiserror::Error;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

pub type RpcResult<T> = Result<T, RpcError>;

/// Unified RPC failure: status code, human-readable message, trailing metadata.
///
/// Every failure in this library, on both the client and server side, is
/// represented by this type. Handler failures, transport-reported statuses,
/// timeouts and cancellations are all normalized to an `RpcError` before they
/// cross a call boundary; at the transport edge it converts losslessly to and
/// from `tonic::Status`.
///
/// The status code vocabulary is `tonic::Code` itself — the library never
/// invents codes of its own.
#[derive(Error, Debug, Clone)]
#[error("rpc failed with {code:?}: {message}")]
pub struct RpcError {
  code: Code,
  message: String,
  metadata: MetadataMap,
}

impl RpcError {
  pub fn new(code: Code, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
      metadata: MetadataMap::new(),
    }
  }

  /// Append one trailing-metadata entry.
  ///
  /// Invalid keys or values (non-ASCII) are dropped with a warning rather
  /// than failing the error construction itself.
  pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
    crate::options::append_metadata(&mut self.metadata, key, value);
    self
  }

  pub fn code(&self) -> Code {
    self.code
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  /// Trailing metadata attached to the terminal status.
  pub fn metadata(&self) -> &MetadataMap {
    &self.metadata
  }

  pub fn cancelled(message: impl Into<String>) -> Self {
    Self::new(Code::Cancelled, message)
  }

  pub fn deadline_exceeded(message: impl Into<String>) -> Self {
    Self::new(Code::DeadlineExceeded, message)
  }

  pub fn failed_precondition(message: impl Into<String>) -> Self {
    Self::new(Code::FailedPrecondition, message)
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::new(Code::Internal, message)
  }

  pub fn invalid_argument(message: impl Into<String>) -> Self {
    Self::new(Code::InvalidArgument, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(Code::NotFound, message)
  }

  pub fn unauthenticated(message: impl Into<String>) -> Self {
    Self::new(Code::Unauthenticated, message)
  }

  pub fn unavailable(message: impl Into<String>) -> Self {
    Self::new(Code::Unavailable, message)
  }
}

impl From<Status> for RpcError {
  fn from(status: Status) -> Self {
    Self {
      code: status.code(),
      message: status.message().to_string(),
      metadata: status.metadata().clone(),
    }
  }
}

impl From<RpcError> for Status {
  fn from(error: RpcError) -> Self {
    Status::with_metadata(error.code, error.message, error.metadata)
  }
}
