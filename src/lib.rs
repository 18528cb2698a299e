//! Location Relay - periodic location texts over SMS
//!
//! A long-running service that subscribes to location fixes and texts each
//! one, with a map link, to a configured phone number while a foreground
//! notice keeps it alive.

pub mod config;
pub mod error;
pub mod foreground;
pub mod location;
pub mod phone;
pub mod sms;
pub mod tracker;

pub use error::{Error, Result};
