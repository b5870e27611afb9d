//! Core types for the subcal service.
//!
//! This crate provides everything the HTTP server builds on:
//! - `event` - the normalized event record and the upstream-payload mapping
//! - `dates` - tolerant parsing of the date formats the upstream emits
//! - `ics` - the iCal feed encoder
//! - `policy` - graduated cache staleness schedule and cache-key versioning
//! - `cache` - cache entry shapes and the store port

pub mod cache;
pub mod dates;
pub mod error;
pub mod event;
pub mod ics;
pub mod policy;

pub use error::{CoreError, CoreResult};
pub use event::{EventRecord, Location, normalize_calendar_name};
