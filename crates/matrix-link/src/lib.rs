//! Live status synchronization for an LED-matrix display device.
//!
//! `core::SyncCore` is the single owner of all mutable state; everything
//! else in this crate is either a pure state machine it drives or a network
//! task it spawns.

pub mod controls;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod playback;
pub mod reconcile;
pub mod sse;
pub mod status;
pub mod target;
pub mod transport;

pub use crate::core::{spawn, SyncCore, SyncEvent, SyncHandle, UiEvent};
