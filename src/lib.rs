//! Thread-safe blocking and batched access to EPICS process variables.
//!
//! Channel Access client libraries are asynchronous: requests are queued, sent
//! when flushed, and their results arrive later through callbacks on the
//! library's own thread. This crate puts a synchronous face on that, so that any
//! thread can either block on a request (optionally with a timeout) or queue
//! many requests and flush them in one go.
//!
//! The layers are:
//!
//! - [`engine::Engine`], the interface to the asynchronous library, with
//!   [`engine::LocalEngine`] as an in-process implementation serving records
//!   held in memory.
//! - [`Client`], which owns the engine context and hands out [`Pv`]s, one per
//!   name for as long as anything holds it.
//! - [`Pv`], a handle to one remote value. It keeps a snapshot of everything
//!   received ([`values::Values`]), runs connection and monitor handlers, and
//!   turns callbacks back into return values for blocked callers.
//! - Representation of the data itself, in [`dbr`].
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use casync::{Client, ReadOptions, Wait};
//! use casync::engine::{LocalEngineBuilder, RecordBuilder};
//!
//! let engine = LocalEngineBuilder::new()
//!     .record("TEMPERATURE", RecordBuilder::new(21.5).units("C"))
//!     .build();
//! let client = Client::new(engine).unwrap();
//! let pv = client.create_pv("TEMPERATURE").unwrap();
//! pv.ensure_connected(Some(Duration::from_secs(5))).unwrap();
//!
//! let value = pv.get(Wait::Forever, ReadOptions::default()).unwrap();
//! println!("Temperature is {value:?}");
//!
//! // Queue a write, then send it along with anything else queued
//! pv.set_value(22.0).unwrap();
//! client.flush(None).unwrap();
//! client.shutdown().unwrap();
//! ```

pub mod client;
pub mod dbr;
pub mod engine;
mod utils;
pub mod values;

pub use crate::client::{Client, ClientError, InitData, Pv, PvError, PvOptions, ReadOptions, Reply, Wait};
pub use crate::values::{Charset, Values};
