#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for packline.
//!
//! Pure helpers with no logging dependencies; the core and dev crates own
//! all tracing.

pub mod fs;
pub mod hash;
