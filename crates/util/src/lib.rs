//! Helpers shared by the claimchain engine, API client, and CLI.

pub mod duration;
pub mod interpolation;
pub mod path_processing;
pub mod text_processing;

pub use duration::{DurationParseError, format_duration, parse_duration};
pub use interpolation::{InterpolationError, interpolate_string};
pub use path_processing::expand_tilde;
pub use text_processing::{SUMMARY_LIMIT, redact_sensitive, truncate_for_summary};
