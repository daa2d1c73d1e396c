use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    client::{
        pv::{Pv, PvError, PvInner, PvOptions},
        rendezvous::Wait,
    },
    engine::{Engine, EngineError},
    utils::get_default_connection_timeout,
};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("The Client has been shut down")]
    ShutDown,
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Pv(#[from] PvError),
}

/// Live PVs by name. Holds no strong references.
#[derive(Default)]
pub(crate) struct Registry {
    pvs: Mutex<HashMap<String, Weak<PvInner>>>,
}

impl Registry {
    /// Drop the entry for `name`, unless it has been replaced by a live PV
    pub(crate) fn forget(&self, name: &str) {
        let mut pvs = self.pvs.lock();
        if pvs.get(name).is_some_and(|pv| pv.strong_count() == 0) {
            pvs.remove(name);
        }
    }

    fn live(&self) -> Vec<Pv> {
        self.pvs
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .map(|inner| Pv { inner })
            .collect()
    }
}

/// Owner of an engine context, and the place PVs are created
///
/// A `Client` initializes its engine on creation and finalizes it on
/// [`Client::shutdown`], or when dropped. Engines only allow one live context,
/// so only one `Client` can be running per engine at a time.
///
/// PVs are cached by name for as long as anything holds them: asking for the
/// same name twice gives the same [`Pv`].
pub struct Client {
    engine: Arc<dyn Engine>,
    registry: Arc<Registry>,
    shut_down: AtomicBool,
    connection_timeout: Duration,
}

impl Client {
    /// Start a client on an engine
    pub fn new(engine: impl Engine) -> Result<Client, ClientError> {
        Self::new_with(Arc::new(engine))
    }

    /// Start a client on an engine that is shared elsewhere
    pub fn new_with(engine: Arc<dyn Engine>) -> Result<Client, ClientError> {
        engine.initialize(true)?;
        let connection_timeout = get_default_connection_timeout();
        debug!("Client started, connection timeout {connection_timeout:?}");
        Ok(Client {
            engine,
            registry: Default::default(),
            shut_down: AtomicBool::new(false),
            connection_timeout,
        })
    }

    /// The timeout used by [`Pv::ensure_connected_default`]
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Override the connection timeout for PVs created from now on
    pub fn set_connection_timeout(&mut self, timeout: Duration) {
        self.connection_timeout = timeout;
    }

    fn check_running(&self) -> Result<(), ClientError> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(ClientError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Get the PV called `name`, with the default options
    pub fn create_pv(&self, name: &str) -> Result<Pv, ClientError> {
        self.create_pv_with(name, PvOptions::default())
    }

    /// Get the PV called `name`, creating it with `options` if there is no live
    /// PV of that name
    ///
    /// An existing PV is returned as is; `options` only apply to new ones.
    pub fn create_pv_with(&self, name: &str, options: PvOptions) -> Result<Pv, ClientError> {
        self.check_running()?;
        let pv = {
            let mut pvs = self.registry.pvs.lock();
            if let Some(inner) = pvs.get(name).and_then(Weak::upgrade) {
                return Ok(Pv { inner });
            }
            let pv = Pv::new(
                name,
                self.engine.clone(),
                &options,
                self.connection_timeout,
                Arc::downgrade(&self.registry),
            );
            pvs.insert(name.to_string(), Arc::downgrade(&pv.inner));
            pv
        };
        debug!("Created PV {name}");
        if options.auto_connect() {
            pv.connect(Wait::NoWait)?;
        }
        Ok(pv)
    }

    /// Send queued requests
    ///
    /// With a timeout, also give the engine that long to process events.
    pub fn flush(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.check_running()?;
        match timeout {
            Some(timeout) => self.engine.pend_events(timeout)?,
            None => self.engine.flush_requests()?,
        }
        Ok(())
    }

    /// Disconnect every live PV and stop the engine context
    ///
    /// Only the first call does anything. Afterwards no PV from this client can
    /// be used, and no new PV can be created.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let pvs = self.registry.live();
        debug!("Shutting down client, disconnecting {} PVs", pvs.len());
        for pv in &pvs {
            if let Err(e) = pv.disconnect() {
                warn!("Could not disconnect {}: {e}", pv.name());
            }
        }
        drop(pvs);
        self.engine.flush_requests()?;
        self.engine.finalize()?;
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Number of PVs currently alive
    pub fn live_pvs(&self) -> usize {
        self.registry.live().len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error shutting down client: {e}");
        }
    }
}
