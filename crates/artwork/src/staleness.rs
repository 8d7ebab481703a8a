//! Decides whether applied artwork predates the provider's revision.

use chrono::{DateTime, Utc};
use tracing::warn;

/// Returns true iff `last_applied` (RFC 3339) is strictly earlier than
/// `remote_updated_at`.
///
/// An unparseable `last_applied` yields `false`: malformed local state must not
/// turn every sweep into a re-download.
pub fn is_stale(last_applied: &str, remote_updated_at: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(last_applied.trim()) {
        Ok(applied) => applied.with_timezone(&Utc) < remote_updated_at,
        Err(err) => {
            warn!(
                last_applied = %last_applied,
                error = %err,
                "unparseable last-applied timestamp, treating as fresh"
            );
            false
        }
    }
}
