use serde::Serialize;

/// Result of a mutating lifecycle operation that did not fail.
///
/// Double submissions are normal (two taps, two tabs, retries), so landing on
/// a record that is already where the caller wanted it, or already finished,
/// is reported here rather than as an error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome<T> {
    /// This call performed the transition.
    Changed { record: T },
    /// Nothing to do; the record already reflects the request.
    Unchanged { record: T },
    /// The record reached a terminal status before this call.
    AlreadyTerminal { status: String, record: T },
}

impl<T> Outcome<T> {
    pub fn record(&self) -> &T {
        match self {
            Self::Changed { record }
            | Self::Unchanged { record }
            | Self::AlreadyTerminal { record, .. } => record,
        }
    }

    pub fn into_record(self) -> T {
        match self {
            Self::Changed { record }
            | Self::Unchanged { record }
            | Self::AlreadyTerminal { record, .. } => record,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }

    pub fn is_already_terminal(&self) -> bool {
        matches!(self, Self::AlreadyTerminal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_outcome_tag() {
        let o = Outcome::AlreadyTerminal {
            status: "declined".to_string(),
            record: 42,
        };
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["outcome"], "already_terminal");
        assert_eq!(json["status"], "declined");
        assert_eq!(json["record"], 42);
    }
}
