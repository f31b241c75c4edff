//! Version-string handling.
//!
//! Kernel releases within one major.minor series share a single build
//! configuration, so most call sites only care about the series pair.

use crate::error::BuildError;

/// Derive the major.minor series from a release version.
///
/// `"6.9.2"` -> `"6.9"`, `"4.9"` -> `"4.9"`. A version without any dot has
/// no series and is rejected.
pub fn series_of(version: &str) -> Result<String, BuildError> {
    let Some(major_end) = version.find('.') else {
        return Err(BuildError::MalformedVersion(version.to_string()));
    };
    let rest = &version[major_end + 1..];
    let minor = match rest.find('.') {
        Some(idx) => &rest[..idx],
        None => rest,
    };
    Ok(format!("{}.{}", &version[..major_end], minor))
}

/// Version string with an explicit sublevel, as used in package names.
///
/// The upstream feed publishes the first release of a series as bare
/// major.minor, while the toolchain names its packages with a trailing
/// `.0`. Matches the feed's convention of only looking past the second
/// byte for the sublevel dot.
pub fn normalized_version(version: &str) -> String {
    let has_sublevel = version.get(2..).is_some_and(|rest| rest.contains('.'));
    if has_sublevel {
        version.to_string()
    } else {
        format!("{version}.0")
    }
}
