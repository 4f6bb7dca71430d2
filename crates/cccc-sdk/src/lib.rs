//! Client SDK for the cccc daemon
//!
//! The daemon speaks newline-delimited JSON over a Unix domain socket or a
//! TCP loopback port. This crate finds it, sends requests, and subscribes to
//! its event stream.
//!
//! ## Architecture
//!
//! ```text
//! discover_endpoint() ------------------------> Endpoint
//!                                                  |
//! CcccClient::call() ------> call_daemon() ------> one line ------> Response
//! CcccClient::subscribe() -> open_events_stream()
//!                                |  handshake + residual bytes
//!                                v
//!                            LineReader ---------> StreamItem (EventStream)
//! ```
//!
//! - `endpoint`: home directory and address descriptor discovery; never fails
//! - `transport`: connection setup, request/response exchange, stream handshake
//! - `lines`: splits a byte stream into trimmed, non-blank lines
//! - `events`: stream item decoding and the `EventStream` subscription
//! - `client`: `CcccClient`, error translation and compatibility checks
//! - `ops`: one convenience method per daemon operation
//!
//! ## Example
//!
//! ```ignore
//! let client = CcccClient::new(ClientOptions::default());
//! client.assert_compatible(&CompatibilityOptions::default()).await?;
//!
//! let mut events = client.events_stream(&EventsStreamOptions::new("g1")).await?;
//! while let Some(item) = events.next_item().await? {
//!     println!("{}", item.to_value());
//! }
//! ```

mod client;
mod endpoint;
mod error;
mod events;
mod lines;
mod ops;
mod transport;
mod types;

pub use client::{CcccClient, ClientOptions, CompatibilityOptions, DEFAULT_BY};
pub use endpoint::{
    default_home, descriptor_path, discover_endpoint, endpoint_from_descriptor,
    fallback_socket_path, normalize_tcp_host, CCCC_HOME_ENV, DAEMON_NAME, DEFAULT_HOME,
};
pub use error::{ClientError, DaemonApiError};
pub use events::{Event, EventStream, StreamItem};
pub use lines::{lines, LineReader};
pub use ops::{
    ActorAddOptions, ActorEnvPrivateUpdateOptions, ActorUpdateOptions, ContextSyncOptions,
    EventsStreamOptions, GroupAutomationManageOptions, GroupAutomationUpdateOptions,
    GroupCreateOptions, GroupState, InboxListOptions, MessageOptions,
};
pub use transport::{
    call_daemon, connect, exchange, handshake, open_events_stream, DaemonIo, DaemonSocket,
    StreamConnection, DEFAULT_TIMEOUT, MAX_LINE_SIZE,
};
pub use types::{AddressDescriptor, Endpoint, ErrorPayload, Request, Response, Transport, IPC_VERSION};
