//! Polls a source channel and re-broadcasts each newly captured message to
//! a set of destination channels on a timed cycle.
//!
//! Each destination receives its own lightly varied copy of the text,
//! attached media is uploaded once per cycle and reused across sends, and
//! per-destination delivery failures (rate limits, permission loss,
//! invalid destinations) are classified and absorbed without aborting the
//! batch. Shells drive everything through [`engine::Engine`], which owns
//! the single background execution context the chat-protocol client is
//! serialized on.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod media;
pub mod mutate;
pub mod poll;
pub mod transport;
