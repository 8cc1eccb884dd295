//! Server-side call-shape dispatch: the `handle` family.
//!
//! Each entry point wires a reactive handler into the completion contract a
//! tonic service method must satisfy for its call shape. Handlers consume a
//! [`CallContext`] plus a request (or request stream) and produce a stream of
//! `Result<Res, RpcError>`; the dispatcher subscribes exactly once,
//! immediately, and maps the handler's terminal into the transport status.
//!
//! ## Example
//! ```ignore
//! use grpc_reactive::{handle_unary, RpcError};
//! use futures::stream;
//!
//! async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
//!     handle_unary(request, |ctx, req| {
//!         stream::once(async move { self.service.get(req.id).await })
//!     })
//!     .await
//! }
//! ```

use std::pin::{Pin, pin};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tonic::{Request, Response, Status};

use crate::bridge::{BridgeStream, MessageBridge, StreamEvent};
use crate::context::{CallContext, CancelHandle};
use crate::error::RpcError;

/// Boxed response stream in the shape tonic streaming service methods return.
pub type ResponseStream<Res> = Pin<Box<dyn Stream<Item = Result<Res, Status>> + Send>>;

/// Fires the handler's cancellation signal if the dispatcher is dropped
/// before the call reached its terminal.
struct CancelOnDrop {
  handle: Option<CancelHandle>,
}

impl CancelOnDrop {
  fn new(handle: CancelHandle) -> Self {
    Self {
      handle: Some(handle),
    }
  }

  fn disarm(mut self) {
    self.handle.take();
  }
}

impl Drop for CancelOnDrop {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.cancel();
    }
  }
}

/// Unary request, unary response.
///
/// The first value the handler emits becomes the response. A failure maps to
/// its status plus trailing metadata; a handler stream that completes without
/// emitting anything violates the contract and is reported as `internal`.
pub async fn handle_unary<Req, Res, S, H>(
  request: Request<Req>,
  handler: H,
) -> Result<Response<Res>, Status>
where
  H: FnOnce(CallContext, Req) -> S,
  S: Stream<Item = Result<Res, RpcError>>,
{
  let (metadata, _extensions, message) = request.into_parts();
  let (ctx, cancel) = CallContext::new(metadata);
  let guard = CancelOnDrop::new(cancel);
  let outcome = first_response(handler(ctx, message)).await;
  guard.disarm();
  outcome.map(Response::new)
}

/// Unary request, streaming response.
///
/// Every value the handler emits is forwarded in arrival order; the handler's
/// terminal becomes the call's terminal status. A handler that never
/// terminates leaves the call open, bounded only by transport deadlines.
pub async fn handle_server_streaming<Req, Res, S, H>(
  request: Request<Req>,
  handler: H,
) -> Result<Response<ResponseStream<Res>>, Status>
where
  H: FnOnce(CallContext, Req) -> S,
  S: Stream<Item = Result<Res, RpcError>> + Send + 'static,
  Res: Send + 'static,
{
  let (metadata, _extensions, message) = request.into_parts();
  let (ctx, cancel) = CallContext::new(metadata);
  let responses = handler(ctx, message).map(|item| item.map_err(Status::from));
  Ok(Response::new(guarded(Box::pin(responses), cancel)))
}

/// Streaming request, unary response.
///
/// The transport's request body is pumped through a [`MessageBridge`] so the
/// handler sees an ordered [`BridgeStream`] of requests; completion mapping
/// matches [`handle_unary`].
pub async fn handle_client_streaming<Req, Res, RS, S, H>(
  request: Request<RS>,
  handler: H,
) -> Result<Response<Res>, Status>
where
  RS: Stream<Item = Result<Req, Status>> + Send + 'static,
  Req: Send + 'static,
  H: FnOnce(CallContext, BridgeStream<Req>) -> S,
  S: Stream<Item = Result<Res, RpcError>>,
{
  let (metadata, _extensions, body) = request.into_parts();
  let (ctx, cancel) = CallContext::new(metadata);
  let guard = CancelOnDrop::new(cancel);
  let outcome = first_response(handler(ctx, bridge_requests(body))).await;
  guard.disarm();
  outcome.map(Response::new)
}

/// Streaming request, streaming response.
///
/// Responses are forwarded as the handler produces them, never buffered until
/// the request stream completes, so both directions interleave freely.
pub async fn handle_bidi<Req, Res, RS, S, H>(
  request: Request<RS>,
  handler: H,
) -> Result<Response<ResponseStream<Res>>, Status>
where
  RS: Stream<Item = Result<Req, Status>> + Send + 'static,
  Req: Send + 'static,
  H: FnOnce(CallContext, BridgeStream<Req>) -> S,
  S: Stream<Item = Result<Res, RpcError>> + Send + 'static,
  Res: Send + 'static,
{
  let (metadata, _extensions, body) = request.into_parts();
  let (ctx, cancel) = CallContext::new(metadata);
  let responses = handler(ctx, bridge_requests(body)).map(|item| item.map_err(Status::from));
  Ok(Response::new(guarded(Box::pin(responses), cancel)))
}

async fn first_response<Res, S>(responses: S) -> Result<Res, Status>
where
  S: Stream<Item = Result<Res, RpcError>>,
{
  let mut responses = pin!(responses);
  match responses.next().await {
    Some(Ok(value)) => Ok(value),
    Some(Err(error)) => Err(error.into()),
    None => Err(Status::internal("handler completed without emitting a response")),
  }
}

/// Spawn the pump that feeds the transport's request body into a bridge,
/// stopping as soon as the handler abandons the request stream.
fn bridge_requests<Req, RS>(body: RS) -> BridgeStream<Req>
where
  RS: Stream<Item = Result<Req, Status>> + Send + 'static,
  Req: Send + 'static,
{
  let (mut bridge, requests) = MessageBridge::channel();
  tokio::spawn(async move {
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
  });
  requests
}

fn guarded<Res>(inner: ResponseStream<Res>, cancel: CancelHandle) -> ResponseStream<Res>
where
  Res: Send + 'static,
{
  Box::pin(GuardedStream {
    inner,
    cancel: Some(cancel),
  })
}

/// Response stream wrapper that fires the handler's cancellation signal when
/// the transport drops the stream before its terminal.
struct GuardedStream<Res> {
  inner: ResponseStream<Res>,
  cancel: Option<CancelHandle>,
}

impl<Res> Stream for GuardedStream<Res> {
  type Item = Result<Res, Status>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    match this.inner.as_mut().poll_next(cx) {
      Poll::Ready(None) => {
        this.cancel.take();
        Poll::Ready(None)
      }
      Poll::Ready(Some(item)) => {
        if item.is_err() {
          this.cancel.take();
        }
        Poll::Ready(Some(item))
      }
      Poll::Pending => Poll::Pending,
    }
  }
}

impl<Res> Drop for GuardedStream<Res> {
  fn drop(&mut self) {
    if let Some(handle) = self.cancel.take() {
      handle.cancel();
    }
  }
}
