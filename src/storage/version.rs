//! Definition version ordering.
//!
//! Versions are dotted strings (`"1"`, `"1.4"`, `"2.0.3"`). Numeric
//! components compare numerically; anything else falls back to text order.

use std::cmp::Ordering;

/// Version assigned to the first save of a definition without one.
pub const INITIAL_VERSION: &str = "1.0";

fn components(version: &str) -> Option<Vec<u64>> {
    version
        .trim()
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Compares two version strings, numerically where possible.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (components(a), components(b)) {
        (Some(left), Some(right)) => {
            let len = left.len().max(right.len());
            for i in 0..len {
                let l = left.get(i).copied().unwrap_or(0);
                let r = right.get(i).copied().unwrap_or(0);
                match l.cmp(&r) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            Ordering::Equal
        }
        _ => a.cmp(b),
    }
}

/// Bumps the minor component of `latest`, dropping any patch component.
///
/// `None` yields [`INITIAL_VERSION`]; a non-numeric version, or one whose
/// minor component cannot grow, gets `.1` appended.
pub fn next_minor_version(latest: Option<&str>) -> String {
    let Some(latest) = latest else {
        return INITIAL_VERSION.to_string();
    };

    match components(latest).as_deref() {
        Some([major]) => format!("{}.1", major),
        Some([major, minor, ..]) => match minor.checked_add(1) {
            Some(next) => format!("{}.{}", major, next),
            None => format!("{}.1", latest.trim()),
        },
        _ => format!("{}.1", latest.trim()),
    }
}

/// Returns the highest version in `versions`.
pub fn latest_version<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions.into_iter().max_by(|a, b| compare_versions(a, b))
}
