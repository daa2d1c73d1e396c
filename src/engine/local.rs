//! An in-process engine that serves records held in memory.
//!
//! This behaves like a Channel Access client library talking to a server, without
//! any network: requests are queued until [`Engine::flush_requests`], then handled
//! in order on a dedicated I/O thread running a single-threaded tokio runtime, and
//! every [`ChannelEvents`] callback is made from that thread.
//!
//! The served records are driven from the "server side" through a
//! [`RecordHandle`]: storing values, raising alarms, and taking records offline
//! to exercise disconnection and reconnection.

use std::{
    collections::HashMap,
    mem,
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    dbr::{
        AccessRights, AlarmStatus, ConvertError, Dbr, EpicsTime, Events, FieldType, Limits,
        Severity, Text, Value,
    },
    engine::{ChannelEvents, ChannelId, Engine, EngineError, ReadRequest, RequestId},
    utils::wrapping_inplace_add,
};

#[derive(Debug)]
enum Request {
    Connect(ChannelId),
    Get(ChannelId, RequestId, ReadRequest),
    Put(ChannelId, RequestId, Value),
    Subscribe(ChannelId, Events, ReadRequest),
    Unsubscribe(ChannelId),
    EnumStrings(ChannelId, RequestId),
}

impl Request {
    fn channel(&self) -> ChannelId {
        match self {
            Request::Connect(cid)
            | Request::Get(cid, _, _)
            | Request::Put(cid, _, _)
            | Request::Subscribe(cid, _, _)
            | Request::Unsubscribe(cid)
            | Request::EnumStrings(cid, _) => *cid,
        }
    }
}

/// Server-side changes to a record, to be posted to channels
#[derive(Debug)]
enum RecordEvent {
    Changed(String, Events),
    Online(String),
}

#[derive(Clone, Debug)]
struct Record {
    value: Value,
    timestamp: EpicsTime,
    status: AlarmStatus,
    severity: Severity,
    precision: i16,
    unit: String,
    enum_strings: Vec<String>,
    display_limits: Limits,
    control_limits: Limits,
    warning_limits: Limits,
    alarm_limits: Limits,
    writable: bool,
    online: bool,
}

/// Strings go out as raw bytes, the way they would arrive off the wire
fn to_wire(value: Value) -> Value {
    match value {
        Value::String(items) => Value::String(
            items
                .into_iter()
                .map(|t| match t {
                    Text::Str(s) => Text::Raw(s.into_bytes()),
                    raw => raw,
                })
                .collect(),
        ),
        value => value,
    }
}

impl Record {
    fn is_enum(&self) -> bool {
        matches!(self.value, Value::Enum(_))
    }

    fn enum_bytes(&self) -> Vec<Vec<u8>> {
        self.enum_strings
            .iter()
            .map(|s| s.clone().into_bytes())
            .collect()
    }

    fn strings(&self) -> Vec<String> {
        match self.value {
            Value::Enum(index) => vec![
                self.enum_strings
                    .get(index as usize)
                    .cloned()
                    .unwrap_or_else(|| index.to_string()),
            ],
            ref value => value.to_strings(Some(self.precision)),
        }
    }

    fn read(&self, request: &ReadRequest) -> Dbr {
        let mut value = if request.as_string {
            Value::String(self.strings().into_iter().map(Text::Str).collect())
        } else {
            self.value.clone()
        };
        value.truncate(request.count);
        let mut dbr = Dbr {
            timestamp: Some(self.timestamp),
            status: Some(self.status),
            severity: Some(self.severity),
            value: Some(to_wire(value)),
            ..Default::default()
        };
        if !request.metadata {
            return dbr;
        }
        match self.value {
            Value::Enum(_) => dbr.enum_strings = Some(self.enum_bytes()),
            Value::String(_) => (),
            ref numeric => {
                if matches!(numeric, Value::Float(_) | Value::Double(_)) {
                    dbr.precision = Some(self.precision);
                }
                dbr.unit = Some(self.unit.clone().into_bytes());
                dbr.display_limits = Some(self.display_limits);
                dbr.control_limits = Some(self.control_limits);
                dbr.warning_limits = Some(self.warning_limits);
                dbr.alarm_limits = Some(self.alarm_limits);
            }
        }
        dbr
    }

    /// Convert an incoming value to the native type of this record
    fn coerce(&self, value: &Value) -> Result<Value, ConvertError> {
        if self.is_enum()
            && let Value::String(items) = value
            && let [label] = items.as_slice()
            && let Some(index) = self
                .enum_strings
                .iter()
                .position(|s| s.as_bytes() == label.as_bytes())
        {
            return Ok(Value::Enum(index as u16));
        }
        let converted = value.parse_into(self.value.get_type())?;
        if let Value::Enum(index) = converted
            && !self.enum_strings.is_empty()
            && index as usize >= self.enum_strings.len()
        {
            return Err(ConvertError::NoConvert {
                from: value.get_type(),
                to: FieldType::Enum,
            });
        }
        Ok(converted)
    }

    /// Apply a client write. Returns whether it was accepted.
    fn write(&mut self, value: &Value) -> bool {
        if !self.writable {
            debug!("Refusing write to read-only record");
            return false;
        }
        match self.coerce(value) {
            Ok(value) => {
                self.value = value;
                self.timestamp = EpicsTime::now();
                true
            }
            Err(e) => {
                debug!("Refusing write: {e}");
                false
            }
        }
    }
}

/// Describe a record to serve from a [`LocalEngine`]
#[derive(Clone, Debug)]
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    /// A writable, online record with the native type of `value`
    pub fn new(value: impl Into<Value>) -> Self {
        RecordBuilder {
            record: Record {
                value: value.into(),
                timestamp: EpicsTime::now(),
                status: AlarmStatus::NoAlarm,
                severity: Severity::NoAlarm,
                precision: 0,
                unit: String::new(),
                enum_strings: Vec::new(),
                display_limits: Limits::default(),
                control_limits: Limits::default(),
                warning_limits: Limits::default(),
                alarm_limits: Limits::default(),
                writable: true,
                online: true,
            },
        }
    }
    pub fn read_only(mut self) -> Self {
        self.record.writable = false;
        self
    }
    /// Start with the record unreachable
    pub fn offline(mut self) -> Self {
        self.record.online = false;
        self
    }
    pub fn precision(mut self, precision: i16) -> Self {
        self.record.precision = precision;
        self
    }
    pub fn units(mut self, unit: &str) -> Self {
        self.record.unit = unit.to_string();
        self
    }
    /// Labels for the states of an enum record
    pub fn enum_strings<S: Into<String>>(mut self, strings: impl IntoIterator<Item = S>) -> Self {
        self.record.enum_strings = strings.into_iter().map(Into::into).collect();
        self
    }
    pub fn alarm(mut self, status: AlarmStatus, severity: Severity) -> Self {
        self.record.status = status;
        self.record.severity = severity;
        self
    }
    pub fn display_limits(mut self, limits: impl Into<Limits>) -> Self {
        self.record.display_limits = limits.into();
        self
    }
    pub fn control_limits(mut self, limits: impl Into<Limits>) -> Self {
        self.record.control_limits = limits.into();
        self
    }
    pub fn warning_limits(mut self, limits: impl Into<Limits>) -> Self {
        self.record.warning_limits = limits.into();
        self
    }
    pub fn alarm_limits(mut self, limits: impl Into<Limits>) -> Self {
        self.record.alarm_limits = limits.into();
        self
    }
}

struct Channel {
    name: String,
    events: Arc<dyn ChannelEvents>,
    connected: bool,
    subscription: Option<(Events, ReadRequest)>,
}

struct Context {
    requests_tx: mpsc::UnboundedSender<Vec<Request>>,
    triggers_tx: mpsc::UnboundedSender<RecordEvent>,
    cancel: CancellationToken,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    context: Option<Context>,
    queued: Vec<Request>,
    next_cid: u32,
    channels: HashMap<ChannelId, Channel>,
    records: HashMap<String, Arc<Mutex<Record>>>,
}

impl State {
    fn channel(&self, cid: ChannelId) -> Result<&Channel, EngineError> {
        self.channels
            .get(&cid)
            .ok_or(EngineError::UnknownChannel(cid))
    }

    /// The record behind a channel, if the channel is connected
    fn connected_record(&self, cid: ChannelId) -> Result<Arc<Mutex<Record>>, EngineError> {
        let channel = self.channel(cid)?;
        if !channel.connected {
            return Err(EngineError::Disconnected);
        }
        self.records
            .get(&channel.name)
            .cloned()
            .ok_or(EngineError::Disconnected)
    }

    fn queue(&mut self, request: Request) -> Result<(), EngineError> {
        if self.context.is_none() {
            return Err(EngineError::NotInitialized);
        }
        self.queued.push(request);
        Ok(())
    }

    fn notify(&self, event: RecordEvent) {
        match &self.context {
            Some(context) => {
                let _ = context.triggers_tx.send(event);
            }
            None => trace!("No engine context, not posting {event:?}"),
        }
    }
}

struct Shared {
    host_name: String,
    state: Mutex<State>,
}

impl Shared {
    /// Run `f` against the record of a connected channel, if there is one
    fn with_record<R>(
        &self,
        cid: ChannelId,
        f: impl FnOnce(&Channel, &mut Record) -> R,
    ) -> Option<(Arc<dyn ChannelEvents>, R)> {
        let state = self.state.lock();
        let Some(channel) = state.channels.get(&cid) else {
            debug!("Dropping request for cleared channel {cid}");
            return None;
        };
        if !channel.connected {
            debug!("Dropping request for disconnected channel {cid}");
            return None;
        }
        let record = state.records.get(&channel.name)?;
        let result = f(channel, &mut record.lock());
        Some((channel.events.clone(), result))
    }

    fn process(&self, request: Request) {
        let cid = request.channel();
        trace!("Processing {request:?}");
        match request {
            Request::Connect(_) => {
                let events = {
                    let mut state = self.state.lock();
                    let State {
                        channels, records, ..
                    } = &mut *state;
                    let Some(channel) = channels.get_mut(&cid) else {
                        return;
                    };
                    match records.get(&channel.name) {
                        Some(record) if record.lock().online && !channel.connected => {
                            channel.connected = true;
                            channel.events.clone()
                        }
                        Some(_) => return,
                        None => {
                            debug!("No record named {}, {cid} stays unconnected", channel.name);
                            return;
                        }
                    }
                };
                events.connection_changed(true);
            }
            Request::Get(_, id, request) => {
                if let Some((events, dbr)) = self.with_record(cid, |_, r| r.read(&request)) {
                    events.get_complete(id, dbr);
                }
            }
            Request::EnumStrings(_, id) => {
                if let Some((events, strings)) = self.with_record(cid, |_, r| r.enum_bytes()) {
                    events.get_complete(
                        id,
                        Dbr {
                            enum_strings: Some(strings),
                            ..Default::default()
                        },
                    );
                }
            }
            Request::Put(_, id, value) => {
                let Some((events, (name, success))) =
                    self.with_record(cid, |c, r| (c.name.clone(), r.write(&value)))
                else {
                    return;
                };
                if success {
                    self.post_monitors(&name, Events::VALUE | Events::ARCHIVE);
                }
                events.put_complete(id, success);
            }
            Request::Subscribe(_, trigger, request) => {
                let initial = {
                    let mut state = self.state.lock();
                    let State {
                        channels, records, ..
                    } = &mut *state;
                    let Some(channel) = channels.get_mut(&cid) else {
                        return;
                    };
                    channel.subscription = Some((trigger, request));
                    debug!("{cid} subscribed to {} with {trigger:?}", channel.name);
                    match records.get(&channel.name) {
                        Some(record) if channel.connected => {
                            Some((channel.events.clone(), record.lock().read(&request)))
                        }
                        _ => None,
                    }
                };
                if let Some((events, dbr)) = initial {
                    events.monitor_event(dbr);
                }
            }
            Request::Unsubscribe(_) => {
                if let Some(channel) = self.state.lock().channels.get_mut(&cid) {
                    channel.subscription = None;
                    debug!("{cid} unsubscribed from {}", channel.name);
                }
            }
        }
    }

    /// Send an update to every subscription of `name` interested in `mask`
    fn post_monitors(&self, name: &str, mask: Events) {
        let updates: Vec<_> = {
            let state = self.state.lock();
            let Some(record) = state.records.get(name) else {
                return;
            };
            let record = record.lock();
            state
                .channels
                .values()
                .filter(|c| c.connected && c.name == name)
                .filter_map(|c| {
                    let (trigger, request) = c.subscription?;
                    trigger
                        .intersects(mask)
                        .then(|| (c.events.clone(), record.read(&request)))
                })
                .collect()
        };
        for (events, dbr) in updates {
            events.monitor_event(dbr);
        }
    }

    /// Bring the connection state of every channel on `name` in line with the record
    fn post_online(&self, name: &str) {
        let mut changed = Vec::new();
        let mut initial = Vec::new();
        let online = {
            let mut state = self.state.lock();
            let State {
                channels, records, ..
            } = &mut *state;
            let record = records.get(name).map(|r| r.lock().clone());
            let online = record.as_ref().is_some_and(|r| r.online);
            for channel in channels.values_mut().filter(|c| c.name == name) {
                if channel.connected == online {
                    continue;
                }
                channel.connected = online;
                changed.push(channel.events.clone());
                if let (Some((_, request)), Some(record)) = (channel.subscription, &record)
                    && online
                {
                    initial.push((channel.events.clone(), record.read(&request)));
                }
            }
            online
        };
        debug!(
            "Record {name} is {}, {} channels changed",
            if online { "online" } else { "offline" },
            changed.len()
        );
        for events in changed {
            events.connection_changed(online);
        }
        for (events, dbr) in initial {
            events.monitor_event(dbr);
        }
    }

    fn process_record_event(&self, event: RecordEvent) {
        match event {
            RecordEvent::Changed(name, mask) => self.post_monitors(&name, mask),
            RecordEvent::Online(name) => self.post_online(&name),
        }
    }
}

/// The I/O side of a running engine context
struct IoLoop {
    shared: Weak<Shared>,
    requests_rx: mpsc::UnboundedReceiver<Vec<Request>>,
    triggers_rx: mpsc::UnboundedReceiver<RecordEvent>,
    cancel: CancellationToken,
}

impl IoLoop {
    async fn run(mut self) {
        debug!("Local engine I/O loop started");
        loop {
            select! {
                _ = self.cancel.cancelled() => break,
                batch = self.requests_rx.recv() => {
                    let (Some(batch), Some(shared)) = (batch, self.shared.upgrade()) else {
                        break;
                    };
                    for request in batch {
                        shared.process(request);
                    }
                },
                event = self.triggers_rx.recv() => {
                    let (Some(event), Some(shared)) = (event, self.shared.upgrade()) else {
                        break;
                    };
                    shared.process_record_event(event);
                }
            }
        }
        debug!("Local engine I/O loop stopped");
    }
}

/// Build a [`LocalEngine`]
#[derive(Default)]
pub struct LocalEngineBuilder {
    host_name: Option<String>,
    records: Vec<(String, RecordBuilder)>,
}

impl LocalEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    /// Host name reported for every channel. Defaults to this machine's.
    pub fn host_name(mut self, name: &str) -> Self {
        self.host_name = Some(name.to_string());
        self
    }
    /// Serve a record from the start
    pub fn record(mut self, name: &str, record: RecordBuilder) -> Self {
        self.records.push((name.to_string(), record));
        self
    }
    pub fn build(self) -> LocalEngine {
        let host_name = self
            .host_name
            .or_else(|| whoami::fallible::hostname().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let records = self
            .records
            .into_iter()
            .map(|(name, builder)| (name, Arc::new(Mutex::new(builder.record))))
            .collect();
        LocalEngine {
            shared: Arc::new(Shared {
                host_name,
                state: Mutex::new(State {
                    records,
                    ..Default::default()
                }),
            }),
        }
    }
}

/// An [`Engine`] serving in-memory records
///
/// Clones share the same records and context.
#[derive(Clone)]
pub struct LocalEngine {
    shared: Arc<Shared>,
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEngine {
    pub fn new() -> Self {
        LocalEngineBuilder::new().build()
    }

    /// Serve a record, or replace the contents of an existing one
    ///
    /// Channels already waiting on `name` connect once it is online.
    pub fn add_record(&self, name: &str, record: RecordBuilder) -> RecordHandle {
        let mut state = self.shared.state.lock();
        let record = match state.records.get(name) {
            Some(existing) => {
                *existing.lock() = record.record;
                state.notify(RecordEvent::Changed(name.to_string(), Events::ALL));
                existing.clone()
            }
            None => {
                let record = Arc::new(Mutex::new(record.record));
                state.records.insert(name.to_string(), record.clone());
                record
            }
        };
        state.notify(RecordEvent::Online(name.to_string()));
        debug!("Serving record {name}");
        RecordHandle {
            name: name.to_string(),
            record,
            shared: self.shared.clone(),
        }
    }

    /// A handle to a record that is already served
    pub fn record(&self, name: &str) -> Option<RecordHandle> {
        let state = self.shared.state.lock();
        state.records.get(name).map(|record| RecordHandle {
            name: name.to_string(),
            record: record.clone(),
            shared: self.shared.clone(),
        })
    }
}

impl Engine for LocalEngine {
    fn initialize(&self, preemptive: bool) -> Result<(), EngineError> {
        if !preemptive {
            return Err(EngineError::NonPreemptiveUnsupported);
        }
        let mut state = self.shared.state.lock();
        if state.context.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (triggers_tx, triggers_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let io = IoLoop {
            shared: Arc::downgrade(&self.shared),
            requests_rx,
            triggers_rx,
            cancel: cancel.clone(),
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let thread = thread::Builder::new()
            .name("ca-local-io".to_string())
            .spawn(move || runtime.block_on(io.run()))?;
        state.context = Some(Context {
            requests_tx,
            triggers_tx,
            cancel,
            thread,
        });
        debug!("Local engine context started");
        Ok(())
    }

    fn finalize(&self) -> Result<(), EngineError> {
        let (context, channels) = {
            let mut state = self.shared.state.lock();
            let context = state.context.take().ok_or(EngineError::NotInitialized)?;
            state.queued.clear();
            (context, mem::take(&mut state.channels))
        };
        debug!("Stopping local engine context, dropping {} channels", channels.len());
        drop(channels);
        context.cancel.cancel();
        // Called from a callback, the loop exits on its own once this returns
        if context.thread.thread().id() != thread::current().id()
            && context.thread.join().is_err()
        {
            warn!("Local engine I/O thread panicked");
        }
        Ok(())
    }

    fn flush_requests(&self) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        let State {
            context, queued, ..
        } = &mut *state;
        let context = context.as_ref().ok_or(EngineError::NotInitialized)?;
        if queued.is_empty() {
            return Ok(());
        }
        let batch = mem::take(queued);
        trace!("Flushing {} requests", batch.len());
        context
            .requests_tx
            .send(batch)
            .map_err(|_| EngineError::NotInitialized)
    }

    fn pend_events(&self, timeout: Duration) -> Result<(), EngineError> {
        self.flush_requests()?;
        thread::sleep(timeout);
        Ok(())
    }

    fn create_channel(
        &self,
        name: &str,
        events: Arc<dyn ChannelEvents>,
    ) -> Result<ChannelId, EngineError> {
        let mut state = self.shared.state.lock();
        if state.context.is_none() {
            return Err(EngineError::NotInitialized);
        }
        let cid = ChannelId(wrapping_inplace_add(&mut state.next_cid));
        state.channels.insert(
            cid,
            Channel {
                name: name.to_string(),
                events,
                connected: false,
                subscription: None,
            },
        );
        state.queue(Request::Connect(cid))?;
        debug!("Created channel {cid} for {name}");
        Ok(cid)
    }

    fn clear_channel(&self, channel: ChannelId) -> Result<(), EngineError> {
        let removed = self.shared.state.lock().channels.remove(&channel);
        let removed = removed.ok_or(EngineError::UnknownChannel(channel))?;
        debug!("Cleared channel {channel} for {}", removed.name);
        Ok(())
    }

    fn is_connected(&self, channel: ChannelId) -> Result<bool, EngineError> {
        Ok(self.shared.state.lock().channel(channel)?.connected)
    }

    fn element_count(&self, channel: ChannelId) -> Result<usize, EngineError> {
        let record = self.shared.state.lock().connected_record(channel)?;
        Ok(record.lock().value.get_count())
    }

    fn field_type(&self, channel: ChannelId) -> Result<FieldType, EngineError> {
        let record = self.shared.state.lock().connected_record(channel)?;
        Ok(record.lock().value.get_type())
    }

    fn access_rights(&self, channel: ChannelId) -> Result<AccessRights, EngineError> {
        let record = self.shared.state.lock().connected_record(channel)?;
        Ok(if record.lock().writable {
            AccessRights::READ_WRITE
        } else {
            AccessRights::READ
        })
    }

    fn host_name(&self, channel: ChannelId) -> Result<String, EngineError> {
        self.shared.state.lock().connected_record(channel)?;
        Ok(self.shared.host_name.clone())
    }

    fn request_get(
        &self,
        channel: ChannelId,
        id: RequestId,
        request: ReadRequest,
    ) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        state.connected_record(channel)?;
        state.queue(Request::Get(channel, id, request))
    }

    fn request_put(
        &self,
        channel: ChannelId,
        id: RequestId,
        value: Value,
    ) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        state.connected_record(channel)?;
        state.queue(Request::Put(channel, id, value))
    }

    fn request_subscribe(
        &self,
        channel: ChannelId,
        trigger: Events,
        request: ReadRequest,
    ) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        state.channel(channel)?;
        state.queue(Request::Subscribe(channel, trigger, request))
    }

    fn request_unsubscribe(&self, channel: ChannelId) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        state.channel(channel)?;
        state.queue(Request::Unsubscribe(channel))
    }

    fn request_enum_strings(&self, channel: ChannelId, id: RequestId) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        if !state.connected_record(channel)?.lock().is_enum() {
            return Err(EngineError::NotEnumerated);
        }
        state.queue(Request::EnumStrings(channel, id))
    }
}

/// Server-side access to a record served by a [`LocalEngine`]
#[derive(Clone)]
pub struct RecordHandle {
    name: String,
    record: Arc<Mutex<Record>>,
    shared: Arc<Shared>,
}

impl RecordHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn load(&self) -> Value {
        self.record.lock().value.clone()
    }

    /// Store a new value, converted to the type of the record
    pub fn store(&self, value: impl Into<Value>) -> Result<(), ConvertError> {
        {
            let mut record = self.record.lock();
            record.value = record.coerce(&value.into())?;
            record.timestamp = EpicsTime::now();
        }
        self.shared
            .state
            .lock()
            .notify(RecordEvent::Changed(self.name.clone(), Events::VALUE | Events::ARCHIVE));
        Ok(())
    }

    /// Change the alarm state, notifying alarm subscribers if it changed
    pub fn set_alarm(&self, status: AlarmStatus, severity: Severity) {
        {
            let mut record = self.record.lock();
            if record.status == status && record.severity == severity {
                return;
            }
            record.status = status;
            record.severity = severity;
            record.timestamp = EpicsTime::now();
        }
        self.shared
            .state
            .lock()
            .notify(RecordEvent::Changed(self.name.clone(), Events::ALARM));
    }

    pub fn alarm(&self) -> (AlarmStatus, Severity) {
        let record = self.record.lock();
        (record.status, record.severity)
    }

    /// Make the record reachable or not. Channels follow on the I/O thread.
    pub fn set_online(&self, online: bool) {
        self.record.lock().online = online;
        self.shared
            .state
            .lock()
            .notify(RecordEvent::Online(self.name.clone()));
    }

    pub fn is_online(&self) -> bool {
        self.record.lock().online
    }
}
