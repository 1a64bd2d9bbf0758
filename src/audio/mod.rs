//! # Audio Module
//!
//! Core playback engine for the bot: one playback lane, one song at a time.
//!
//! The engine is built around four components:
//!
//! ### [`player`] - Playback Controller
//! - Owns the queue and the current song, drives the Idle/Playing/Paused
//!   state machine and the auto-advance policy
//! - Serializes every transition; duplicate termination signals collapse
//!   into a single advance
//!
//! ### [`queue`] - Queue
//! - Plain FIFO of resolved songs, unbounded, insertion order preserved
//!
//! ### [`transport`] - Transport Bridge
//! - One external transcode process per song (compressed stdin → PCM
//!   s16le 48 kHz stereo stdout, linear gain applied)
//! - Guaranteed teardown on every exit path and exactly one end-of-audio
//!   notification per session
//!
//! ### [`events`] - Event Bus
//! - Broadcast channel with a closed topic set for the API layer and the
//!   voice client

pub mod events;
pub mod player;
pub mod queue;
pub mod transport;
