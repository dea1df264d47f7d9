use std::sync::Arc;

use accord_db::Database;
use accord_types::models::{Fid, ParticipantCard, UserProfile};
use tracing::warn;

/// Read-only lookup of participant profiles.
pub trait UserDirectory: Send + Sync {
    fn lookup(&self, fid: Fid) -> anyhow::Result<Option<UserProfile>>;
}

/// Directory backed by the local `users` table.
pub struct DbDirectory {
    db: Arc<Database>,
}

impl DbDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl UserDirectory for DbDirectory {
    fn lookup(&self, fid: Fid) -> anyhow::Result<Option<UserProfile>> {
        self.db.get_user(fid)
    }
}

/// Display card for `fid`. A miss or a directory failure degrades to a bare
/// card rather than failing the caller.
pub(crate) fn card(directory: &dyn UserDirectory, fid: Fid) -> ParticipantCard {
    match directory.lookup(fid) {
        Ok(Some(profile)) => profile.into(),
        Ok(None) => ParticipantCard::unknown(fid),
        Err(e) => {
            warn!("Directory lookup for {} failed: {}", fid, e);
            ParticipantCard::unknown(fid)
        }
    }
}

/// Name used in system messages.
pub(crate) fn display_name(directory: &dyn UserDirectory, fid: Fid) -> String {
    let card = card(directory, fid);
    card.display_name
        .or(card.username)
        .unwrap_or_else(|| format!("#{}", fid))
}

/// Whether `fid` is known to the directory. Lookup failures count as
/// registered so a flaky directory never parks a proposal.
pub(crate) fn is_registered(directory: &dyn UserDirectory, fid: Fid) -> bool {
    match directory.lookup(fid) {
        Ok(found) => found.is_some(),
        Err(e) => {
            warn!("Directory lookup for {} failed, assuming registered: {}", fid, e);
            true
        }
    }
}
