//! iCal feed generation.
//!
//! This module writes RFC 5545 calendar documents from normalized events.
//! Output is generated line by line rather than through a calendar crate:
//! the feed must stay byte-stable across refreshes so that subscribed
//! clients do not see spurious changes.

mod generate;

pub use generate::{DEFAULT_TIMEZONE, escape_ical_text, generate_ical};
