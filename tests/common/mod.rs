#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use casync::{
    dbr::{AccessRights, Dbr, Events, FieldType, Value},
    engine::{ChannelEvents, ChannelId, Engine, EngineError, ReadRequest, RequestId},
};
use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::TestWriter;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_writer(TestWriter::new())
        .try_init();
}

/// A request made of the [`FakeEngine`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(String),
    Clear(ChannelId),
    Get(ChannelId, ReadRequest),
    Put(ChannelId, Value),
    Subscribe(ChannelId, Events, ReadRequest),
    Unsubscribe(ChannelId),
    EnumStrings(ChannelId),
    Flush,
}

struct FakeChannel {
    name: String,
    events: Arc<dyn ChannelEvents>,
    connected: bool,
}

#[derive(Default)]
struct Inner {
    initialized: bool,
    calls: Vec<Call>,
    next_cid: u32,
    channels: HashMap<ChannelId, FakeChannel>,
    field_types: HashMap<String, (FieldType, usize)>,
    /// Ids of get and enumeration string requests, oldest first
    gets: Vec<(ChannelId, RequestId)>,
    puts: Vec<(ChannelId, RequestId)>,
}

impl Inner {
    fn channel(&self, cid: ChannelId) -> Result<&FakeChannel, EngineError> {
        self.channels
            .get(&cid)
            .ok_or(EngineError::UnknownChannel(cid))
    }
    fn connected(&self, cid: ChannelId) -> Result<&FakeChannel, EngineError> {
        let channel = self.channel(cid)?;
        if channel.connected {
            Ok(channel)
        } else {
            Err(EngineError::Disconnected)
        }
    }
    fn shape(&self, cid: ChannelId) -> Result<(FieldType, usize), EngineError> {
        let channel = self.connected(cid)?;
        Ok(self
            .field_types
            .get(&channel.name)
            .copied()
            .unwrap_or((FieldType::Double, 1)))
    }
}

/// An engine that records every request and only calls back when told to
///
/// Callbacks are made from a separate thread, like a real engine's, but the
/// `fire_*` methods wait for them to finish so tests stay deterministic.
#[derive(Clone, Default)]
pub struct FakeEngine {
    inner: Arc<Mutex<Inner>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.inner.lock().calls)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    /// The live channel for a PV name
    pub fn channel(&self, name: &str) -> Option<ChannelId> {
        self.inner
            .lock()
            .channels
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(cid, _)| *cid)
    }

    /// Make the channels of `name` report this type and count once connected
    pub fn set_shape(&self, name: &str, field_type: FieldType, count: usize) {
        self.inner
            .lock()
            .field_types
            .insert(name.to_string(), (field_type, count));
    }

    /// Poll until a matching call shows up
    pub fn wait_for_call(&self, matches: impl Fn(&Call) -> bool) -> Option<Call> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(call) = self.inner.lock().calls.iter().find(|c| matches(c)) {
                return Some(call.clone());
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    /// Ids of the gets made on the live channel of `name`, oldest first
    pub fn get_requests(&self, name: &str) -> Vec<RequestId> {
        let cid = self.channel(name);
        self.inner
            .lock()
            .gets
            .iter()
            .filter(|(c, _)| Some(*c) == cid)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Ids of the puts made on the live channel of `name`, oldest first
    pub fn put_requests(&self, name: &str) -> Vec<RequestId> {
        let cid = self.channel(name);
        self.inner
            .lock()
            .puts
            .iter()
            .filter(|(c, _)| Some(*c) == cid)
            .map(|(_, id)| *id)
            .collect()
    }

    fn latest(
        &self,
        name: &str,
        requests: impl Fn(&Inner) -> &Vec<(ChannelId, RequestId)>,
    ) -> RequestId {
        let cid = self.channel(name);
        let inner = self.inner.lock();
        requests(&inner)
            .iter()
            .rev()
            .find(|(c, _)| Some(*c) == cid)
            .map(|(_, id)| *id)
            .unwrap_or_default()
    }

    fn events(&self, name: &str) -> Arc<dyn ChannelEvents> {
        let inner = self.inner.lock();
        inner
            .channels
            .values()
            .find(|c| c.name == name)
            .map(|c| c.events.clone())
            .unwrap_or_else(|| panic!("No channel for {name}"))
    }

    fn on_engine_thread(&self, name: &str, f: impl FnOnce(&dyn ChannelEvents) + Send + 'static) {
        let events = self.events(name);
        thread::spawn(move || f(events.as_ref()))
            .join()
            .expect("Callback panicked");
    }

    pub fn fire_connection(&self, name: &str, connected: bool) {
        for channel in self.inner.lock().channels.values_mut() {
            if channel.name == name {
                channel.connected = connected;
            }
        }
        self.on_engine_thread(name, move |events| events.connection_changed(connected));
    }

    /// Answer the most recent get on `name`
    pub fn fire_get(&self, name: &str, dbr: Dbr) {
        let id = self.latest(name, |inner| &inner.gets);
        self.fire_get_for(name, id, dbr);
    }

    pub fn fire_get_for(&self, name: &str, id: RequestId, dbr: Dbr) {
        self.on_engine_thread(name, move |events| events.get_complete(id, dbr));
    }

    pub fn fire_monitor(&self, name: &str, dbr: Dbr) {
        self.on_engine_thread(name, move |events| events.monitor_event(dbr));
    }

    /// Answer the most recent put on `name`
    pub fn fire_put(&self, name: &str, success: bool) {
        let id = self.latest(name, |inner| &inner.puts);
        self.fire_put_for(name, id, success);
    }

    pub fn fire_put_for(&self, name: &str, id: RequestId, success: bool) {
        self.on_engine_thread(name, move |events| events.put_complete(id, success));
    }

    fn record(&self, call: Call) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        if !inner.initialized {
            return Err(EngineError::NotInitialized);
        }
        inner.calls.push(call);
        Ok(())
    }
}

impl Engine for FakeEngine {
    fn initialize(&self, _preemptive: bool) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        if inner.initialized {
            return Err(EngineError::AlreadyInitialized);
        }
        inner.initialized = true;
        Ok(())
    }

    fn finalize(&self) -> Result<(), EngineError> {
        let channels = {
            let mut inner = self.inner.lock();
            if !inner.initialized {
                return Err(EngineError::NotInitialized);
            }
            inner.initialized = false;
            std::mem::take(&mut inner.channels)
        };
        drop(channels);
        Ok(())
    }

    fn flush_requests(&self) -> Result<(), EngineError> {
        self.record(Call::Flush)
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
        self.record(Call::Create(name.to_string()))?;
        let mut inner = self.inner.lock();
        let cid = ChannelId(inner.next_cid);
        inner.next_cid += 1;
        inner.channels.insert(
            cid,
            FakeChannel {
                name: name.to_string(),
                events,
                connected: false,
            },
        );
        Ok(cid)
    }

    fn clear_channel(&self, channel: ChannelId) -> Result<(), EngineError> {
        let removed = self.inner.lock().channels.remove(&channel);
        removed.ok_or(EngineError::UnknownChannel(channel))?;
        self.inner.lock().calls.push(Call::Clear(channel));
        Ok(())
    }

    fn is_connected(&self, channel: ChannelId) -> Result<bool, EngineError> {
        Ok(self.inner.lock().channel(channel)?.connected)
    }

    fn element_count(&self, channel: ChannelId) -> Result<usize, EngineError> {
        Ok(self.inner.lock().shape(channel)?.1)
    }

    fn field_type(&self, channel: ChannelId) -> Result<FieldType, EngineError> {
        Ok(self.inner.lock().shape(channel)?.0)
    }

    fn access_rights(&self, channel: ChannelId) -> Result<AccessRights, EngineError> {
        self.inner.lock().connected(channel)?;
        Ok(AccessRights::READ_WRITE)
    }

    fn host_name(&self, channel: ChannelId) -> Result<String, EngineError> {
        self.inner.lock().connected(channel)?;
        Ok("fake-host:5064".to_string())
    }

    fn request_get(
        &self,
        channel: ChannelId,
        id: RequestId,
        request: ReadRequest,
    ) -> Result<(), EngineError> {
        self.inner.lock().connected(channel)?;
        self.record(Call::Get(channel, request))?;
        self.inner.lock().gets.push((channel, id));
        Ok(())
    }

    fn request_put(
        &self,
        channel: ChannelId,
        id: RequestId,
        value: Value,
    ) -> Result<(), EngineError> {
        self.inner.lock().connected(channel)?;
        self.record(Call::Put(channel, value))?;
        self.inner.lock().puts.push((channel, id));
        Ok(())
    }

    fn request_subscribe(
        &self,
        channel: ChannelId,
        trigger: Events,
        request: ReadRequest,
    ) -> Result<(), EngineError> {
        self.inner.lock().channel(channel)?;
        self.record(Call::Subscribe(channel, trigger, request))
    }

    fn request_unsubscribe(&self, channel: ChannelId) -> Result<(), EngineError> {
        self.inner.lock().channel(channel)?;
        self.record(Call::Unsubscribe(channel))
    }

    fn request_enum_strings(&self, channel: ChannelId, id: RequestId) -> Result<(), EngineError> {
        if self.inner.lock().shape(channel)?.0 != FieldType::Enum {
            return Err(EngineError::NotEnumerated);
        }
        self.record(Call::EnumStrings(channel))?;
        self.inner.lock().gets.push((channel, id));
        Ok(())
    }
}
