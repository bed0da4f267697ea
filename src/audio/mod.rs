//! # Audio Module
//!
//! Per-guild playback orchestration.
//!
//! ## Architecture
//!
//! ### [`engine`] - Playback Engine
//! - Single task owning every guild's [`queue::TenantQueue`]
//! - Applies control commands and worker events one at a time
//! - Dispatches workers, prefetches and disconnects as spawned tasks
//!
//! ### [`queue`] - Queue State Machine
//! - FIFO of pending songs plus `Idle`/`Playing`/`Paused`/`Disconnecting`
//! - Pure and synchronous: returns what the engine must do next
//!
//! ### [`worker`] - Playback Worker
//! - Connects, resolves through the song cache and streams one song
//! - Reports exactly one outcome per dispatch, even when aborted
//!
//! ### [`transport`] - Voice Output
//! - [`transport::Transport`] trait, implemented on songbird by
//!   [`songbird_transport::SongbirdTransport`]
//!
//! ## Concurrency
//!
//! Queue state is only ever touched by the engine task. Workers receive an
//! immutable [`queue::PlayRequest`] and talk back through a channel, and a
//! new worker for a guild is only dispatched after the previous one's
//! completion has been processed.

pub mod engine;
pub mod queue;
pub mod song;
pub mod songbird_transport;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub mod testing;
