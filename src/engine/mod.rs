//! The interface to an asynchronous Channel Access engine.
//!
//! An engine owns the network I/O and its own thread(s). Requests made through
//! [`Engine`] are queued and only guaranteed to be sent after
//! [`Engine::flush_requests`]. Results, and any unsolicited connection or
//! subscription updates, come back through the [`ChannelEvents`] registered
//! when the channel was created, called from the engine's thread. Replies to
//! gets and puts carry the [`RequestId`] the request was made with, so a reply
//! can be matched to whoever is waiting for it.
//!
//! [`local::LocalEngine`] is an in-process implementation serving records held
//! in memory.

use std::{fmt::Display, io, sync::Arc, time::Duration};

use thiserror::Error;

use crate::dbr::{AccessRights, Dbr, Events, FieldType, Value};

pub mod local;

pub use local::{LocalEngine, LocalEngineBuilder, RecordBuilder, RecordHandle};

/// Engine-side identity of a channel
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cid:{}", self.0)
    }
}

/// Caller-chosen tag for a get or put, echoed back with its reply
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("The engine context has not been initialized")]
    NotInitialized,
    #[error("The engine context is already initialized")]
    AlreadyInitialized,
    #[error("Unknown channel {0}")]
    UnknownChannel(ChannelId),
    #[error("Channel is not connected")]
    Disconnected,
    #[error("Channel is not an enumeration")]
    NotEnumerated,
    #[error("This engine only supports preemptive callbacks")]
    NonPreemptiveUnsupported,
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
}

/// What a get or subscription should deliver
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ReadRequest {
    /// Number of elements; zero means the native count of the channel
    pub count: usize,
    /// Also deliver precision, units, enumeration strings and limits
    pub metadata: bool,
    /// Deliver the value formatted as strings
    pub as_string: bool,
}

/// Callbacks an engine makes for one channel
///
/// All of these are called on the engine's own thread, never from inside a
/// call to the [`Engine`] itself.
pub trait ChannelEvents: Send + Sync {
    /// The channel connected, or lost its connection
    fn connection_changed(&self, connected: bool);
    /// A put finished
    fn put_complete(&self, id: RequestId, success: bool);
    /// The reply to a get or an enumeration strings request
    fn get_complete(&self, id: RequestId, dbr: Dbr);
    /// A subscription update
    fn monitor_event(&self, dbr: Dbr);
}

/// An asynchronous Channel Access engine
pub trait Engine: Send + Sync + 'static {
    /// Start the engine context. Only one context may be live at once.
    fn initialize(&self, preemptive: bool) -> Result<(), EngineError>;
    /// Stop the engine context, dropping every channel
    fn finalize(&self) -> Result<(), EngineError>;
    /// Send every queued request without waiting for replies
    fn flush_requests(&self) -> Result<(), EngineError>;
    /// Flush, then give the engine `timeout` to process events
    fn pend_events(&self, timeout: Duration) -> Result<(), EngineError>;

    /// Create a channel. Connection is reported through `events`.
    fn create_channel(
        &self,
        name: &str,
        events: Arc<dyn ChannelEvents>,
    ) -> Result<ChannelId, EngineError>;
    /// Tear a channel down. No further callbacks are made for it.
    fn clear_channel(&self, channel: ChannelId) -> Result<(), EngineError>;

    fn is_connected(&self, channel: ChannelId) -> Result<bool, EngineError>;
    /// Native element count
    fn element_count(&self, channel: ChannelId) -> Result<usize, EngineError>;
    fn field_type(&self, channel: ChannelId) -> Result<FieldType, EngineError>;
    fn access_rights(&self, channel: ChannelId) -> Result<AccessRights, EngineError>;
    /// Name of the host serving the channel
    fn host_name(&self, channel: ChannelId) -> Result<String, EngineError>;

    fn request_get(
        &self,
        channel: ChannelId,
        id: RequestId,
        request: ReadRequest,
    ) -> Result<(), EngineError>;
    fn request_put(
        &self,
        channel: ChannelId,
        id: RequestId,
        value: Value,
    ) -> Result<(), EngineError>;
    /// Start a subscription, replacing any existing one on the channel
    fn request_subscribe(
        &self,
        channel: ChannelId,
        trigger: Events,
        request: ReadRequest,
    ) -> Result<(), EngineError>;
    fn request_unsubscribe(&self, channel: ChannelId) -> Result<(), EngineError>;
    /// Request the enumeration strings, delivered through
    /// [`ChannelEvents::get_complete`]
    fn request_enum_strings(&self, channel: ChannelId, id: RequestId) -> Result<(), EngineError>;
}
