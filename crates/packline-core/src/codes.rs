//! Stable error codes.
//!
//! All codes are SCREAMING_SNAKE_CASE and stable across versions; they are
//! what the dev client and `--json` output key on.

/// An import specifier could not be resolved.
pub const PACKLINE_RESOLVE_FAILED: &str = "PACKLINE_RESOLVE_FAILED";

/// Adjacent transforms disagree on artifact kind.
pub const PACKLINE_TRANSFORM_CHAIN: &str = "PACKLINE_TRANSFORM_CHAIN";

/// A transform failed while building a module.
pub const PACKLINE_MODULE_BUILD_FAILED: &str = "PACKLINE_MODULE_BUILD_FAILED";

/// A module source could not be read (missing, unreadable or timed out).
pub const PACKLINE_READ_FAILED: &str = "PACKLINE_READ_FAILED";

/// The incremental cache was discarded.
pub const PACKLINE_CACHE_INVALIDATED: &str = "PACKLINE_CACHE_INVALIDATED";

/// A notification could not be delivered to a dev client.
pub const PACKLINE_DELIVERY_FAILED: &str = "PACKLINE_DELIVERY_FAILED";

/// A rebuild was superseded by a newer change.
pub const PACKLINE_BUILD_CANCELLED: &str = "PACKLINE_BUILD_CANCELLED";

/// Two modules emit different content under one output file name.
pub const PACKLINE_ASSET_CONFLICT: &str = "PACKLINE_ASSET_CONFLICT";

/// A chunk was not emitted because it contains a failed module.
pub const PACKLINE_CHUNK_SKIPPED: &str = "PACKLINE_CHUNK_SKIPPED";

/// The configuration file is missing, malformed or inconsistent.
pub const PACKLINE_CONFIG_INVALID: &str = "PACKLINE_CONFIG_INVALID";

/// Any other build failure (I/O on output, transform initialisation).
pub const PACKLINE_BUILD_FAILED: &str = "PACKLINE_BUILD_FAILED";
