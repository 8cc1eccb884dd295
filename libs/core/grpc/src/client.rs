//! Client-side call-shape dispatch: the `call` family.
//!
//! [`ClientCall`] wraps one transport stub method behind a unified reactive
//! return contract: unary-response shapes resolve to a single value or an
//! [`RpcError`], streaming-response shapes yield a [`BridgeStream`] of
//! responses closed by success or a single failure. Options (timeout, retry,
//! metadata) attach independently of the request — configure once, invoke
//! many times.
//!
//! ## Example
//! ```ignore
//! use grpc_reactive::{CallOptions, ClientCall, RetryPolicy};
//! use std::time::Duration;
//! use tonic::Code;
//!
//! let mut stub = tasks_client.clone();
//! let list = ClientCall::new(move |request| {
//!     let mut stub = stub.clone();
//!     async move { stub.list(request).await }
//! })
//! .with_options(
//!     CallOptions::new()
//!         .with_timeout(Duration::from_secs(2))
//!         .with_retry(RetryPolicy::fixed(3, Duration::from_millis(50), &[Code::Unavailable])),
//! );
//!
//! let response = list.unary(ListRequest::default()).await?;
//! ```

use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::{sleep, timeout};
use tonic::{Request, Response, Status};

use crate::bridge::{BridgeStream, MessageBridge, StreamEvent};
use crate::error::{RpcError, RpcResult};
use crate::options::{CallOptions, merge_metadata};
use crate::retry::RetryDecision;

/// A transport stub method wrapped with per-call options.
#[derive(Clone)]
pub struct ClientCall<F> {
  stub: F,
  options: CallOptions,
}

impl<F> ClientCall<F> {
  pub fn new(stub: F) -> Self {
    Self {
      stub,
      options: CallOptions::new(),
    }
  }

  /// Merge further options into this call (right-biased, see
  /// [`CallOptions::merge`]). Order relative to supplying the request does
  /// not matter; the configured call remains reusable.
  pub fn with_options(mut self, options: CallOptions) -> Self {
    self.options = self.options.merge(&options);
    self
  }

  pub fn options(&self) -> &CallOptions {
    &self.options
  }

  /// Unary request, unary response.
  ///
  /// Applies option metadata and the per-attempt timeout; failed attempts are
  /// re-issued per the retry policy, and only the final outcome is delivered.
  pub async fn unary<Req, Res, Fut>(&self, request: Req) -> RpcResult<Res>
  where
    F: Fn(Request<Req>) -> Fut,
    Fut: Future<Output = Result<Response<Res>, Status>>,
    Req: Clone,
  {
    let mut attempt = 1u32;
    loop {
      match self.invoke_once(request.clone()).await {
        Ok(response) => return Ok(response.into_inner()),
        Err(error) => match retry_delay(&self.options, attempt, &error) {
          // Dropping the call future cancels a pending backoff timer here.
          Some(delay) => {
            sleep(delay).await;
            attempt += 1;
          }
          None => return Err(error),
        },
      }
    }
  }

  /// Unary request, streaming response.
  ///
  /// A spawned driver issues the call and pumps the transport's response
  /// stream through a [`MessageBridge`]. The retry policy applies only while
  /// no message has been delivered yet; once the consumer has seen a message,
  /// a later failure is terminal (delivered messages are retained).
  pub fn server_streaming<Req, Res, Fut, S>(&self, request: Req) -> BridgeStream<Res>
  where
    F: Fn(Request<Req>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<S>, Status>> + Send + 'static,
    S: Stream<Item = Result<Res, Status>> + Send + 'static,
    Req: Clone + Send + 'static,
    Res: Send + 'static,
  {
    let (bridge, responses) = MessageBridge::channel();
    let stub = self.stub.clone();
    let options = self.options.clone();
    tokio::spawn(drive_streaming(stub, options, request, bridge));
    responses
  }

  /// Streaming request, unary response.
  ///
  /// Never retried: the request stream is consumed by the attempt and cannot
  /// be replayed. The timeout bounds the whole call.
  pub async fn client_streaming<OutS, Res, Fut>(&self, requests: OutS) -> RpcResult<Res>
  where
    F: Fn(Request<OutS>) -> Fut,
    Fut: Future<Output = Result<Response<Res>, Status>>,
  {
    let response = self.invoke_once(requests).await?;
    Ok(response.into_inner())
  }

  /// Streaming request, streaming response.
  ///
  /// Never retried, for the same reason as [`Self::client_streaming`]; the
  /// timeout bounds call establishment only.
  pub fn bidi<OutS, Res, Fut, S>(&self, requests: OutS) -> BridgeStream<Res>
  where
    F: Fn(Request<OutS>) -> Fut,
    Fut: Future<Output = Result<Response<S>, Status>> + Send + 'static,
    S: Stream<Item = Result<Res, Status>> + Send + 'static,
    OutS: Send + 'static,
    Res: Send + 'static,
  {
    let (mut bridge, responses) = MessageBridge::channel();
    let call = (self.stub)(self.build_request(requests));
    let limit = self.options.timeout;
    tokio::spawn(async move {
      let mut cancel = bridge.cancellation();
      let connect = async {
        match limit {
          Some(limit) => match timeout(limit, call).await {
            Ok(outcome) => outcome.map_err(RpcError::from),
            Err(_) => Err(RpcError::deadline_exceeded(format!(
              "call not established within {limit:?}"
            ))),
          },
          None => call.await.map_err(RpcError::from),
        }
      };
      let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        outcome = connect => outcome,
      };
      match connected {
        Ok(response) => pump_responses(response.into_inner(), &mut bridge).await,
        Err(error) => bridge.fail(error),
      }
    });
    responses
  }

  async fn invoke_once<Req, Res, Fut>(&self, request: Req) -> Result<Response<Res>, RpcError>
  where
    F: Fn(Request<Req>) -> Fut,
    Fut: Future<Output = Result<Response<Res>, Status>>,
  {
    let call = (self.stub)(self.build_request(request));
    let outcome = match self.options.timeout {
      Some(limit) => match timeout(limit, call).await {
        Ok(outcome) => outcome,
        Err(_) => {
          return Err(RpcError::deadline_exceeded(format!(
            "call exceeded timeout of {limit:?}"
          )));
        }
      },
      None => call.await,
    };
    outcome.map_err(RpcError::from)
  }

  fn build_request<Req>(&self, message: Req) -> Request<Req> {
    let mut request = Request::new(message);
    merge_metadata(request.metadata_mut(), &self.options.metadata);
    request
  }
}

/// Consult the retry policy; when the call will be re-issued, notify the
/// attempt listener and report the backoff delay. Sleeping it out is the
/// caller's job so the timer can be raced against cancellation.
fn retry_delay(options: &CallOptions, attempt: u32, error: &RpcError) -> Option<Duration> {
  let policy = options.retry.as_ref()?;
  match policy.decide(attempt, error) {
    RetryDecision::RetryAfter(delay) => {
      policy.note_attempt(attempt, error);
      tracing::debug!(
        target: "grpc_reactive",
        attempt,
        code = ?error.code(),
        delay_ms = delay.as_millis() as u64,
        "Retrying call"
      );
      Some(delay)
    }
    RetryDecision::GiveUp => None,
  }
}

async fn drive_streaming<F, Fut, S, Req, Res>(
  stub: F,
  options: CallOptions,
  request: Req,
  mut bridge: MessageBridge<Res>,
) where
  F: Fn(Request<Req>) -> Fut,
  Fut: Future<Output = Result<Response<S>, Status>>,
  S: Stream<Item = Result<Res, Status>>,
  Req: Clone,
{
  let mut attempt = 1u32;
  let mut cancel = bridge.cancellation();
  'attempts: loop {
    let mut outbound = Request::new(request.clone());
    merge_metadata(outbound.metadata_mut(), &options.metadata);
    let call = stub(outbound);
    let connect = async {
      match options.timeout {
        Some(limit) => match timeout(limit, call).await {
          Ok(outcome) => outcome.map_err(RpcError::from),
          Err(_) => Err(RpcError::deadline_exceeded(format!(
            "call not established within {limit:?}"
          ))),
        },
        None => call.await.map_err(RpcError::from),
      }
    };
    let connected = tokio::select! {
      _ = cancel.cancelled() => return,
      outcome = connect => outcome,
    };
    let body = match connected {
      Ok(response) => response.into_inner(),
      Err(error) => {
        match retry_delay(&options, attempt, &error) {
          Some(delay) => {
            // The backoff timer must not outlive the consumer: a dropped
            // stream cancels it without firing another attempt.
            tokio::select! {
              _ = cancel.cancelled() => return,
              _ = sleep(delay) => {}
            }
            attempt += 1;
            continue 'attempts;
          }
          None => {
            bridge.fail(error);
            return;
          }
        }
      }
    };

    let mut body = pin!(body);
    let mut delivered = false;
    loop {
      tokio::select! {
        _ = cancel.cancelled() => return,
        item = body.next() => match item {
          Some(Ok(message)) => {
            delivered = true;
            bridge.receive(StreamEvent::Message(message));
          }
          Some(Err(status)) => {
            let error = RpcError::from(status);
            if delivered {
              bridge.fail(error);
              return;
            }
            match retry_delay(&options, attempt, &error) {
              Some(delay) => {
                tokio::select! {
                  _ = cancel.cancelled() => return,
                  _ = sleep(delay) => {}
                }
                attempt += 1;
                continue 'attempts;
              }
              None => {
                bridge.fail(error);
                return;
              }
            }
          }
          None => {
            bridge.receive(StreamEvent::End);
            return;
          }
        },
      }
    }
  }
}

async fn pump_responses<S, Res>(body: S, bridge: &mut MessageBridge<Res>)
where
  S: Stream<Item = Result<Res, Status>>,
{
  let mut body = pin!(body);
  let mut cancel = bridge.cancellation();
  loop {
    tokio::select! {
      _ = cancel.cancelled() => return,
      item = body.next() => match item {
        Some(Ok(message)) => bridge.receive(StreamEvent::Message(message)),
        Some(Err(status)) => {
          bridge.fail(status.into());
          return;
        }
        None => {
          bridge.receive(StreamEvent::End);
          return;
        }
      },
    }
  }
}
