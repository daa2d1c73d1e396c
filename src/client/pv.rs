use std::{
    fmt, mem,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, debug_span, trace, warn};

use crate::{
    client::{
        client::Registry,
        handlers::{Handler, HandlerSet},
        rendezvous::{Countdown, Rendezvous, Wait},
    },
    dbr::{AccessRights, AlarmStatus, Dbr, Events, FieldType, Limits, Severity, Text, Value},
    engine::{ChannelEvents, ChannelId, Engine, EngineError, ReadRequest, RequestId},
    values::{self, Charset, EncodeError, PrepareError, Values},
};

#[derive(Debug, Error)]
pub enum PvError {
    #[error("PV is not connected")]
    NotConnected,
    #[error("PV has been disconnected and cannot be used")]
    ChannelClosed,
    #[error("Could not ensure connection")]
    ConnectTimeout,
    #[error("String values need a charset to be written")]
    NoCharset,
    #[error(transparent)]
    Unencodable(#[from] EncodeError),
    #[error("PV value is invalid")]
    InvalidValue,
    #[error("PV value is unknown")]
    NoValue,
    #[error("Engine error: {0}")]
    Engine(EngineError),
}

impl From<EngineError> for PvError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Disconnected => PvError::NotConnected,
            EngineError::UnknownChannel(_) => PvError::ChannelClosed,
            e => PvError::Engine(e),
        }
    }
}

impl From<PrepareError> for PvError {
    fn from(value: PrepareError) -> Self {
        match value {
            PrepareError::NoCharset => PvError::NoCharset,
            PrepareError::Unencodable(e) => PvError::Unencodable(e),
        }
    }
}

/// Outcome of a request that may not have been waited for
///
/// `Pending` means nothing arrived: either the request was not waited for, or
/// the wait ran out. A reply that arrived but carried nothing is `Done(None)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Pending,
    Done(T),
}

impl<T> Reply<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Reply::Done(_))
    }
    pub fn done(self) -> Option<T> {
        match self {
            Reply::Done(v) => Some(v),
            Reply::Pending => None,
        }
    }
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Reply::Done(v) => Reply::Done(f(v)),
            Reply::Pending => Reply::Pending,
        }
    }
}

impl<T> From<Option<T>> for Reply<T> {
    fn from(value: Option<T>) -> Self {
        value.map(Reply::Done).unwrap_or(Reply::Pending)
    }
}

/// What to read automatically whenever the PV connects
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum InitData {
    None,
    /// Value, alarm and timestamp
    Data,
    /// As `Data`, plus precision, units, limits and enumeration strings
    #[default]
    Control,
}

/// Shape of a get or subscription
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Number of elements. `None` reads the native count of the channel.
    pub count: Option<usize>,
    /// Also read precision, units, limits and enumeration strings
    pub metadata: bool,
    /// Have the server format the value as strings
    pub as_string: bool,
}

impl ReadOptions {
    pub fn with_metadata() -> Self {
        ReadOptions {
            metadata: true,
            ..Default::default()
        }
    }

    fn request(&self) -> ReadRequest {
        ReadRequest {
            count: self.count.unwrap_or(0),
            metadata: self.metadata,
            as_string: self.as_string,
        }
    }
}

/// Construction-time configuration of a [`Pv`]
#[derive(Clone)]
pub struct PvOptions {
    charset: Option<Charset>,
    connect: bool,
    monitor: bool,
    initialize: InitData,
    connection_handler: Option<Handler<Pv, bool>>,
    monitor_handler: Option<Handler<Pv, Values>>,
}

impl Default for PvOptions {
    fn default() -> Self {
        Self {
            charset: Some(Charset::Utf8),
            connect: true,
            monitor: true,
            initialize: InitData::Control,
            connection_handler: None,
            monitor_handler: None,
        }
    }
}

impl PvOptions {
    pub fn new() -> Self {
        Self::default()
    }
    /// Charset for string values, units and enumeration strings. `None` keeps
    /// them as raw bytes.
    pub fn charset(mut self, charset: Option<Charset>) -> Self {
        self.charset = charset;
        self
    }
    /// Start connecting as soon as the PV is created
    pub fn connect(mut self, connect: bool) -> Self {
        self.connect = connect;
        self
    }
    /// Subscribe with the default trigger whenever the PV connects
    pub fn monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }
    pub fn initialize(mut self, initialize: InitData) -> Self {
        self.initialize = initialize;
        self
    }
    /// Add a connection handler from the start. Implies `connect(true)`.
    pub fn on_connection(mut self, handler: Handler<Pv, bool>) -> Self {
        self.connection_handler = Some(handler);
        self.connect = true;
        self
    }
    /// Add a monitor handler from the start. Implies `monitor(true)`.
    pub fn on_monitor(mut self, handler: Handler<Pv, Values>) -> Self {
        self.monitor_handler = Some(handler);
        self.monitor = true;
        self
    }
    pub(crate) fn auto_connect(&self) -> bool {
        self.connect
    }
}

/// A reply cell that only takes the reply to the request being waited for
///
/// Replies to anything else, such as the automatic reads made on connection or
/// requests whose wait already ran out, are left for the snapshot alone.
struct Exchange<T> {
    awaited: Mutex<Option<RequestId>>,
    cell: Rendezvous<T>,
}

impl<T> Exchange<T> {
    fn new() -> Self {
        Self {
            awaited: Mutex::new(None),
            cell: Rendezvous::new(),
        }
    }

    /// Wait for `id` from now on, dropping any uncollected reply
    fn expect(&self, id: RequestId) {
        let mut awaited = self.awaited.lock();
        *awaited = Some(id);
        self.cell.clear();
    }

    fn deliver(&self, id: RequestId, value: T) {
        let mut awaited = self.awaited.lock();
        if *awaited == Some(id) {
            *awaited = None;
            self.cell.set(value);
        } else {
            trace!("Nobody is waiting for {id}");
        }
    }

    fn wait(&self, id: RequestId, wait: Wait) -> Option<T> {
        let reply = self.cell.get(wait);
        let mut awaited = self.awaited.lock();
        if *awaited == Some(id) {
            *awaited = None;
        }
        reply
    }

    fn close(&self) {
        self.cell.close();
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ChannelSlot {
    /// No channel has been created yet
    Unconnected,
    Open(ChannelId),
    /// Torn down for good
    Closed,
}

pub(crate) struct PvInner {
    name: String,
    engine: Arc<dyn Engine>,
    charset: Option<Charset>,
    auto_monitor: bool,
    initialize: InitData,
    connection_timeout: Duration,
    channel: Mutex<ChannelSlot>,
    connect_cell: Rendezvous<bool>,
    gets: Exchange<Values>,
    puts: Exchange<bool>,
    next_request: AtomicU64,
    subscribed: AtomicBool,
    data: Mutex<Values>,
    connection_handlers: HandlerSet<Pv, bool>,
    monitor_handlers: HandlerSet<Pv, Values>,
    registry: Weak<Registry>,
}

impl Drop for PvInner {
    fn drop(&mut self) {
        if let ChannelSlot::Open(cid) = mem::replace(self.channel.get_mut(), ChannelSlot::Closed) {
            debug!("Last reference to {} dropped, clearing {cid}", self.name);
            if let Err(e) = self.engine.clear_channel(cid) {
                trace!("Could not clear {cid}: {e}");
            }
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(&self.name);
        }
    }
}

/// Engine callbacks for one PV. Does not keep the PV alive.
struct PvEvents(Weak<PvInner>);

impl PvEvents {
    fn pv(&self) -> Option<Pv> {
        self.0.upgrade().map(|inner| Pv { inner })
    }
}

impl ChannelEvents for PvEvents {
    fn connection_changed(&self, connected: bool) {
        if let Some(pv) = self.pv() {
            pv.on_connection(connected);
        }
    }
    fn put_complete(&self, id: RequestId, success: bool) {
        if let Some(pv) = self.pv() {
            pv.on_put(id, success);
        }
    }
    fn get_complete(&self, id: RequestId, dbr: Dbr) {
        if let Some(pv) = self.pv() {
            pv.on_get(id, dbr);
        }
    }
    fn monitor_event(&self, dbr: Dbr) {
        if let Some(pv) = self.pv() {
            pv.on_monitor(dbr);
        }
    }
}

/// A handle to a remote process variable
///
/// Every method is thread-safe. Methods taking a [`Wait`] either queue their
/// request and return [`Reply::Pending`] at once ([`Wait::NoWait`]), or flush
/// the engine and block for the reply. Queued requests are sent on the next
/// flush, whether explicit ([`crate::Client::flush`]) or from any blocking call.
///
/// Clones share the same state. The channel is torn down when the last clone
/// is dropped.
///
/// Handlers run on the engine thread. Blocking on a reply from inside a handler
/// would wait on that same thread, so handlers should only queue requests.
#[derive(Clone)]
pub struct Pv {
    pub(crate) inner: Arc<PvInner>,
}

impl fmt::Debug for Pv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pv")
            .field("name", &self.inner.name)
            .field("channel", &*self.inner.channel.lock())
            .field("monitored", &self.monitored())
            .finish()
    }
}

impl Pv {
    pub(crate) fn new(
        name: &str,
        engine: Arc<dyn Engine>,
        options: &PvOptions,
        connection_timeout: Duration,
        registry: Weak<Registry>,
    ) -> Self {
        let pv = Pv {
            inner: Arc::new(PvInner {
                name: name.to_string(),
                engine,
                charset: options.charset,
                auto_monitor: options.monitor,
                initialize: options.initialize,
                connection_timeout,
                channel: Mutex::new(ChannelSlot::Unconnected),
                connect_cell: Rendezvous::new(),
                gets: Exchange::new(),
                puts: Exchange::new(),
                next_request: AtomicU64::new(1),
                subscribed: AtomicBool::new(false),
                data: Mutex::new(Values::default()),
                connection_handlers: HandlerSet::new(),
                monitor_handlers: HandlerSet::new(),
                registry,
            }),
        };
        if let Some(handler) = &options.connection_handler {
            pv.add_connection_handler(handler.clone());
        }
        if let Some(handler) = &options.monitor_handler {
            pv.add_monitor_handler(handler.clone());
        }
        pv
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether two handles refer to the same PV
    pub fn ptr_eq(&self, other: &Pv) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The channel, if one has been created and not torn down
    fn channel_id(&self) -> Result<ChannelId, PvError> {
        match *self.inner.channel.lock() {
            ChannelSlot::Open(cid) => Ok(cid),
            ChannelSlot::Unconnected => Err(PvError::NotConnected),
            ChannelSlot::Closed => Err(PvError::ChannelClosed),
        }
    }

    fn is_open(&self) -> bool {
        matches!(*self.inner.channel.lock(), ChannelSlot::Open(_))
    }

    /// Create the channel and start connecting
    ///
    /// Waiting returns the first connection state reported after the call, or
    /// `Done(true)` at once if the channel is already connected.
    pub fn connect(&self, wait: Wait) -> Result<Reply<bool>, PvError> {
        let cid = {
            let mut slot = self.inner.channel.lock();
            match *slot {
                ChannelSlot::Closed => return Err(PvError::ChannelClosed),
                ChannelSlot::Open(cid) => cid,
                ChannelSlot::Unconnected => {
                    self.inner.connect_cell.clear();
                    let events = Arc::new(PvEvents(Arc::downgrade(&self.inner)));
                    let cid = self.inner.engine.create_channel(&self.inner.name, events)?;
                    debug!("Created channel {cid} for {}", self.inner.name);
                    *slot = ChannelSlot::Open(cid);
                    cid
                }
            }
        };
        if !wait.is_blocking() {
            return Ok(Reply::Pending);
        }
        if self.inner.engine.is_connected(cid)? {
            return Ok(Reply::Done(true));
        }
        // Drop any stale disconnection, then look again in case we raced a connect
        self.inner.connect_cell.clear();
        if self.inner.engine.is_connected(cid)? {
            return Ok(Reply::Done(true));
        }
        self.inner.engine.flush_requests()?;
        self.collect(self.inner.connect_cell.get(wait))
    }

    /// Tear down the channel, cancelling any subscription
    ///
    /// No request can be made on this PV afterwards. Calling this again does
    /// nothing.
    pub fn disconnect(&self) -> Result<(), PvError> {
        let previous = mem::replace(&mut *self.inner.channel.lock(), ChannelSlot::Closed);
        self.inner.subscribed.store(false, Ordering::SeqCst);
        // Nothing will call back any more, so wake anyone still waiting
        self.inner.connect_cell.close();
        self.inner.gets.close();
        self.inner.puts.close();
        if let ChannelSlot::Open(cid) = previous {
            debug!("Disconnecting {} ({cid})", self.inner.name);
            match self.inner.engine.clear_channel(cid) {
                Ok(()) | Err(EngineError::UnknownChannel(_)) => (),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Block until the channel is connected
    ///
    /// A PV that was never asked to connect starts connecting. `None` waits
    /// forever.
    pub fn ensure_connected(&self, timeout: Option<Duration>) -> Result<(), PvError> {
        let connected = match self.connected() {
            Ok(connected) => connected,
            Err(PvError::NotConnected) => {
                self.connect(Wait::NoWait)?;
                self.inner.engine.flush_requests()?;
                false
            }
            Err(e) => return Err(e),
        };
        if connected || self.wait_connected(self.channel_id()?, Wait::from(timeout).start())? {
            Ok(())
        } else {
            Err(PvError::ConnectTimeout)
        }
    }

    /// [`Pv::ensure_connected`] with the connection timeout of the client
    /// (`EPICS_CA_CONN_TMO`, or 30 seconds)
    pub fn ensure_connected_default(&self) -> Result<(), PvError> {
        self.ensure_connected(Some(self.inner.connection_timeout))
    }

    /// Wait for a connection, spending part of `countdown`
    fn wait_connected(&self, cid: ChannelId, countdown: Countdown) -> Result<bool, PvError> {
        let mut flushed = false;
        loop {
            if self.inner.engine.is_connected(cid)? {
                return Ok(true);
            }
            if !countdown.is_blocking() {
                return Ok(false);
            }
            self.inner.connect_cell.clear();
            if self.inner.engine.is_connected(cid)? {
                return Ok(true);
            }
            if !flushed {
                self.inner.engine.flush_requests()?;
                flushed = true;
            }
            match self.inner.connect_cell.get(countdown.remaining()) {
                Some(true) => return Ok(true),
                // Lost again before we woke; keep waiting
                Some(false) => continue,
                None => {
                    self.channel_id()?;
                    return Ok(false);
                }
            }
        }
    }

    /// Before a blocking request goes out, the channel must be connected. A
    /// bounded wait may spend its budget on connecting first, an unbounded one
    /// fails at once.
    fn ready_for_request(&self, cid: ChannelId, countdown: Countdown) -> Result<bool, PvError> {
        if countdown.remaining() == Wait::Forever {
            return match self.inner.engine.is_connected(cid)? {
                true => Ok(true),
                false => Err(PvError::NotConnected),
            };
        }
        self.wait_connected(cid, countdown)
    }

    /// Turn the outcome of a wait into a reply. Waking empty-handed because
    /// the PV was torn down is an error, not a timeout.
    fn collect<T>(&self, reply: Option<T>) -> Result<Reply<T>, PvError> {
        if reply.is_none() {
            self.channel_id()?;
        }
        Ok(reply.into())
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.inner.next_request.fetch_add(1, Ordering::Relaxed))
    }

    /// Issue a request answered through the get cell, and wait for the answer
    fn read(
        &self,
        wait: Wait,
        request: impl FnOnce(ChannelId, RequestId) -> Result<(), EngineError>,
    ) -> Result<Reply<Values>, PvError> {
        let cid = self.channel_id()?;
        let id = self.next_request_id();
        if !wait.is_blocking() {
            request(cid, id)?;
            return Ok(Reply::Pending);
        }
        let countdown = wait.start();
        if !self.ready_for_request(cid, countdown)? {
            return Ok(Reply::Pending);
        }
        self.inner.gets.expect(id);
        request(cid, id)?;
        self.inner.engine.flush_requests()?;
        self.collect(self.inner.gets.wait(id, countdown.remaining()))
    }

    /// Read the value from the server
    ///
    /// A blocking read returns the `value` of the reply, which also updates the
    /// cached snapshot. A read that is not waited for still updates the snapshot
    /// when its reply arrives.
    pub fn get(&self, wait: Wait, options: ReadOptions) -> Result<Reply<Option<Value>>, PvError> {
        let engine = &self.inner.engine;
        let reply = self.read(wait, |cid, id| {
            engine.request_get(cid, id, options.request())
        })?;
        Ok(reply.map(|values| values.value))
    }

    /// Read the enumeration strings from the server
    pub fn get_enum_strings(&self, wait: Wait) -> Result<Reply<Option<Vec<Text>>>, PvError> {
        let engine = &self.inner.engine;
        let reply = self.read(wait, |cid, id| engine.request_enum_strings(cid, id))?;
        Ok(reply.map(|values| values.enum_strings))
    }

    /// Write a value
    ///
    /// Strings are encoded with the charset of the PV before anything is sent,
    /// so writing a [`Text::Str`] without a charset fails up front. A blocking
    /// write returns whether the server accepted it.
    pub fn put(&self, value: impl Into<Value>, wait: Wait) -> Result<Reply<bool>, PvError> {
        let value = values::encode(value.into(), self.inner.charset)?;
        let cid = self.channel_id()?;
        let id = self.next_request_id();
        if !wait.is_blocking() {
            self.inner.engine.request_put(cid, id, value)?;
            return Ok(Reply::Pending);
        }
        let countdown = wait.start();
        if !self.ready_for_request(cid, countdown)? {
            return Ok(Reply::Pending);
        }
        self.inner.puts.expect(id);
        self.inner.engine.request_put(cid, id, value)?;
        self.inner.engine.flush_requests()?;
        self.collect(self.inner.puts.wait(id, countdown.remaining()))
    }

    /// Queue a write without waiting for it
    pub fn set_value(&self, value: impl Into<Value>) -> Result<(), PvError> {
        self.put(value, Wait::NoWait).map(|_| ())
    }

    /// Start a subscription. Updates merge into the snapshot and reach the
    /// monitor handlers.
    ///
    /// The request is only queued; it goes out with the next flush.
    pub fn subscribe(&self, trigger: Events, options: ReadOptions) -> Result<(), PvError> {
        let cid = self.channel_id()?;
        self.inner
            .engine
            .request_subscribe(cid, trigger, options.request())?;
        self.inner.subscribed.store(true, Ordering::SeqCst);
        debug!("Subscribed to {} with {trigger:?}", self.inner.name);
        Ok(())
    }

    pub fn unsubscribe(&self) -> Result<(), PvError> {
        let cid = self.channel_id()?;
        self.inner.subscribed.store(false, Ordering::SeqCst);
        self.inner.engine.request_unsubscribe(cid)?;
        debug!("Unsubscribed from {}", self.inner.name);
        Ok(())
    }

    pub fn monitored(&self) -> bool {
        self.inner.subscribed.load(Ordering::SeqCst)
    }

    /// Whether the channel is currently connected
    pub fn connected(&self) -> Result<bool, PvError> {
        Ok(self.inner.engine.is_connected(self.channel_id()?)?)
    }

    /// As [`Pv::connected`], treating every error as "no"
    pub fn is_connected(&self) -> bool {
        self.connected().unwrap_or(false)
    }

    /// Name of the host serving this PV
    pub fn host(&self) -> Result<String, PvError> {
        Ok(self.inner.engine.host_name(self.channel_id()?)?)
    }

    /// Native element count
    pub fn count(&self) -> Result<usize, PvError> {
        Ok(self.inner.engine.element_count(self.channel_id()?)?)
    }

    pub fn field_type(&self) -> Result<FieldType, PvError> {
        Ok(self.inner.engine.field_type(self.channel_id()?)?)
    }

    pub fn access_rights(&self) -> Result<AccessRights, PvError> {
        Ok(self.inner.engine.access_rights(self.channel_id()?)?)
    }

    pub fn is_enum(&self) -> Result<bool, PvError> {
        Ok(self.field_type()? == FieldType::Enum)
    }

    pub fn add_connection_handler(&self, handler: Handler<Pv, bool>) {
        self.inner.connection_handlers.add(handler);
    }
    pub fn remove_connection_handler(&self, handler: &Handler<Pv, bool>) {
        self.inner.connection_handlers.remove(handler);
    }
    pub fn add_monitor_handler(&self, handler: Handler<Pv, Values>) {
        self.inner.monitor_handlers.add(handler);
    }
    pub fn remove_monitor_handler(&self, handler: &Handler<Pv, Values>) {
        self.inner.monitor_handlers.remove(handler);
    }

    /// A copy of everything received so far
    pub fn data(&self) -> Values {
        self.inner.data.lock().clone()
    }
    pub fn value(&self) -> Option<Value> {
        self.inner.data.lock().value.clone()
    }
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.data.lock().timestamp
    }
    pub fn status(&self) -> Option<AlarmStatus> {
        self.inner.data.lock().status
    }
    pub fn severity(&self) -> Option<Severity> {
        self.inner.data.lock().severity
    }
    pub fn precision(&self) -> Option<i16> {
        self.inner.data.lock().precision
    }
    pub fn unit(&self) -> Option<Text> {
        self.inner.data.lock().unit.clone()
    }
    pub fn enum_strings(&self) -> Option<Vec<Text>> {
        self.inner.data.lock().enum_strings.clone()
    }
    pub fn display_limits(&self) -> Option<Limits> {
        self.inner.data.lock().display_limits
    }
    pub fn control_limits(&self) -> Option<Limits> {
        self.inner.data.lock().control_limits
    }
    pub fn warning_limits(&self) -> Option<Limits> {
        self.inner.data.lock().warning_limits
    }
    pub fn alarm_limits(&self) -> Option<Limits> {
        self.inner.data.lock().alarm_limits
    }

    /// The current value, provided the PV is connected, its severity is not
    /// INVALID, and a value has been received
    pub fn valid_value(&self) -> Result<Value, PvError> {
        if !self.connected()? {
            return Err(PvError::NotConnected);
        }
        let data = self.inner.data.lock();
        if data.severity == Some(Severity::Invalid) {
            return Err(PvError::InvalidValue);
        }
        data.value.clone().ok_or(PvError::NoValue)
    }

    fn on_connection(&self, connected: bool) {
        if !self.is_open() {
            return;
        }
        let span = debug_span!("pv", name = %self.inner.name);
        let _enter = span.enter();
        debug!("Connection changed: {connected}");
        self.inner.connect_cell.set(connected);
        if connected && let Err(e) = self.initialize_connection() {
            warn!("Could not set up connection: {e}");
        }
        if let Err(e) = self.inner.connection_handlers.dispatch(self, &connected) {
            warn!("Connection handler failed: {e}");
        }
    }

    /// Follow-up requests made every time the channel connects
    fn initialize_connection(&self) -> Result<(), PvError> {
        let cid = self.channel_id()?;
        let engine = &self.inner.engine;
        let mut issued = false;
        match self.inner.initialize {
            InitData::None => (),
            InitData::Data => {
                engine.request_get(
                    cid,
                    self.next_request_id(),
                    ReadOptions::default().request(),
                )?;
                issued = true;
            }
            InitData::Control => {
                engine.request_get(
                    cid,
                    self.next_request_id(),
                    ReadOptions::with_metadata().request(),
                )?;
                if self.is_enum()? {
                    engine.request_enum_strings(cid, self.next_request_id())?;
                }
                issued = true;
            }
        }
        // An existing subscription survives reconnection in the engine
        if self.inner.auto_monitor && !self.monitored() {
            self.subscribe(Events::default(), ReadOptions::default())?;
            issued = true;
        }
        if issued {
            engine.flush_requests()?;
        }
        Ok(())
    }

    fn on_put(&self, id: RequestId, success: bool) {
        trace!("Put {id} to {} completed: {success}", self.inner.name);
        self.inner.puts.deliver(id, success);
    }

    /// Decode a reply and merge it into the snapshot
    fn merge(&self, dbr: Dbr) -> Values {
        let values = values::decode(dbr, self.inner.charset);
        trace!("Merging {values:?}");
        self.inner.data.lock().merge(&values);
        values
    }

    fn on_get(&self, id: RequestId, dbr: Dbr) {
        if !self.is_open() {
            return;
        }
        let span = debug_span!("pv", name = %self.inner.name);
        let _enter = span.enter();
        let values = self.merge(dbr);
        self.inner.gets.deliver(id, values.clone());
        self.notify_monitors(&values);
    }

    fn on_monitor(&self, dbr: Dbr) {
        if !self.is_open() {
            return;
        }
        let span = debug_span!("pv", name = %self.inner.name);
        let _enter = span.enter();
        let values = self.merge(dbr);
        self.notify_monitors(&values);
    }

    fn notify_monitors(&self, values: &Values) {
        if let Err(e) = self.inner.monitor_handlers.dispatch(self, values) {
            warn!("Monitor handler failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_pv_errors() {
        assert!(matches!(
            PvError::from(EngineError::Disconnected),
            PvError::NotConnected
        ));
        assert!(matches!(
            PvError::from(EngineError::UnknownChannel(ChannelId(4))),
            PvError::ChannelClosed
        ));
        assert!(matches!(
            PvError::from(EngineError::NotEnumerated),
            PvError::Engine(EngineError::NotEnumerated)
        ));
        assert!(matches!(
            PvError::from(PrepareError::NoCharset),
            PvError::NoCharset
        ));
    }

    #[test]
    fn replies() {
        let pending: Reply<u8> = None.into();
        assert_eq!(pending, Reply::Pending);
        assert!(!pending.is_done());
        let empty: Reply<Option<u8>> = Some(None).into();
        assert_eq!(empty, Reply::Done(None));
        assert_eq!(Reply::Done(2).map(|v| v * 2).done(), Some(4));
    }

    #[test]
    fn read_options_default_to_native_count() {
        assert_eq!(ReadOptions::default().request(), ReadRequest::default());
        let request = ReadOptions {
            count: Some(3),
            as_string: true,
            ..ReadOptions::with_metadata()
        }
        .request();
        assert_eq!(
            request,
            ReadRequest {
                count: 3,
                metadata: true,
                as_string: true
            }
        );
    }

    #[test]
    fn option_defaults() {
        let options = PvOptions::default();
        assert_eq!(options.charset, Some(Charset::Utf8));
        assert!(options.connect && options.monitor);
        assert_eq!(options.initialize, InitData::Control);
        let options = PvOptions::new()
            .connect(false)
            .monitor(false)
            .on_connection(crate::client::handler(|_, _| Ok(())));
        assert!(options.auto_connect());
        assert!(!options.monitor);
    }
}
