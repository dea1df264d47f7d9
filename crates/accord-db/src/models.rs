/// Database row types that have no counterpart in accord-types.
/// Domain records are mapped straight into accord-types in `rows.rs`.
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownRow {
    pub fid_low: i64,
    pub fid_high: i64,
    pub triggered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
