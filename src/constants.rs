pub const MIB: u64 = 1024 * 1024;

/// Job queue capacity is `workers * CHANNEL_CAPACITY_MULTIPLIER`, at least `MIN_CHANNEL_CAPACITY`.
pub const CHANNEL_CAPACITY_MULTIPLIER: usize = 2;
pub const MIN_CHANNEL_CAPACITY: usize = 4;

/// The sliding window needs this many non-ASCII characters before its ratio is trusted.
pub const MIN_WINDOW_SAMPLE_CHARS: u64 = 64;
/// Non-ASCII characters covered by the invalid-character window.
pub const INVALID_WINDOW_CHARS: u64 = 4096;

/// Maximum characters of an offending statement kept in error messages.
pub const STATEMENT_PREVIEW_CHARS: usize = 160;

pub const DEFAULT_TARGET_VERB: &str = "INSERT";
