#[allow(clippy::module_inception)]
mod client;
mod handlers;
mod pv;
mod rendezvous;

pub use client::{Client, ClientError};
pub use handlers::{Handler, HandlerError, HandlerResult, HandlerSet, handler};
pub use pv::{InitData, Pv, PvError, PvOptions, ReadOptions, Reply};
pub use rendezvous::{Countdown, Rendezvous, Wait};
