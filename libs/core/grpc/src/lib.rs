//! # Reactive gRPC Bridge
//!
//! Bridges tonic's callback/completion-driven call shapes to a declarative
//! stream programming model: server handlers are pure transformations from a
//! request (or request stream) to a response stream, and client calls come
//! back as observable sequences with composable timeout/retry policies.
//!
//! ## Features
//!
//! - **Message Bridge**: push-to-pull adapter turning per-event transport
//!   callbacks into an ordered, cancellable stream with a single terminal
//! - **Unified errors**: every failure is an [`RpcError`] carrying a status
//!   code and trailing metadata, converting losslessly to/from `tonic::Status`
//! - **Call-shape dispatch**: `handle_*` wires one handler signature family
//!   into all four tonic method shapes; [`ClientCall`] does the same on the
//!   client side
//! - **Retry policies**: pure decision functions over (attempt, error) with
//!   fixed-delay and jittered exponential-backoff constructors
//!
//! ## Quick Start
//!
//! ### Server side
//! ```ignore
//! use grpc_reactive::{handle_server_streaming, RpcError};
//! use async_stream::stream;
//!
//! async fn list_stream(
//!     &self,
//!     request: Request<ListRequest>,
//! ) -> Result<Response<Self::ListStreamStream>, Status> {
//!     handle_server_streaming(request, |_ctx, req| {
//!         stream! {
//!             for task in load_tasks(req).await? {
//!                 yield Ok::<_, RpcError>(task.into());
//!             }
//!         }
//!     })
//!     .await
//! }
//! ```
//!
//! ### Client side
//! ```ignore
//! use grpc_reactive::{CallOptions, ClientCall, RetryPolicy};
//! use std::time::Duration;
//! use tonic::Code;
//!
//! let get = ClientCall::new(move |request| {
//!     let mut stub = stub.clone();
//!     async move { stub.get(request).await }
//! })
//! .with_options(
//!     CallOptions::new()
//!         .with_timeout(Duration::from_millis(500))
//!         .with_retry(RetryPolicy::fixed(3, Duration::from_millis(50), &[Code::Unavailable])),
//! );
//!
//! let task = get.unary(GetRequest { id }).await?;
//! ```

pub mod bridge;
pub mod client;
pub mod context;
pub mod error;
pub mod options;
pub mod retry;
pub mod server;

// Re-export main types and functions for convenience
pub use bridge::{BridgeStream, MessageBridge, StreamEvent};
pub use client::ClientCall;
pub use context::{CallContext, CancelHandle, CancelSignal, cancel_pair};
pub use error::{RpcError, RpcResult};
pub use options::CallOptions;
pub use retry::{BackoffConfig, RetryDecision, RetryPolicy};
pub use server::{
  ResponseStream, handle_bidi, handle_client_streaming, handle_server_streaming, handle_unary,
};
