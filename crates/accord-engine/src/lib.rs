/// Accord lifecycle engine.
///
/// Pairs two participants on request, negotiates mutual consent, opens a
/// time-boxed conversation room and rewards participation with points:
/// - `cooldown`: pairwise throttle after a decline
/// - `matches`: direct proposals and their accept/decline/cancel state machine
/// - `suggestions`: third-party introductions that materialize into matches
/// - `rooms`: conversation rooms with a TTL anchored at first join
/// - `achievements`: idempotent point awards recomputed from source data
/// - `scheduler`: self-throttling entry point for periodic maintenance
///
/// Every mutation is a conditional write whose affected-row count decides
/// the outcome; nothing here holds a lock across calls.
pub mod achievements;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod directory;
pub mod error;
pub mod matches;
pub mod notify;
pub mod rooms;
pub mod scheduler;
pub mod suggestions;

use std::sync::Arc;

use accord_db::Database;
use accord_types::events::LifecycleEvent;
use accord_types::models::{Fid, UserProfile};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub use achievements::AchievementEngine;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use cooldown::CooldownLedger;
pub use directory::{DbDirectory, UserDirectory};
pub use error::{LifecycleError, Result};
pub use matches::MatchRegistry;
pub use notify::{Dispatcher, Notifier, NullNotifier};
pub use rooms::RoomManager;
pub use scheduler::PeriodicGate;
pub use suggestions::SuggestionRegistry;

pub struct Engine {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    directory: Arc<dyn UserDirectory>,
    config: EngineConfig,
}

impl Engine {
    /// Engine on the system clock, with the database as user directory and no
    /// notification outlet.
    pub fn new(db: Arc<Database>, config: EngineConfig) -> Self {
        Self {
            directory: Arc::new(DbDirectory::new(db.clone())),
            db,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(NullNotifier),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn cooldowns(&self) -> CooldownLedger<'_> {
        CooldownLedger::new(self)
    }

    pub fn matches(&self) -> MatchRegistry<'_> {
        MatchRegistry::new(self)
    }

    pub fn suggestions(&self) -> SuggestionRegistry<'_> {
        SuggestionRegistry::new(self)
    }

    pub fn rooms(&self) -> RoomManager<'_> {
        RoomManager::new(self)
    }

    pub fn achievements(&self) -> AchievementEngine<'_> {
        AchievementEngine::new(self)
    }

    pub fn scheduler(&self) -> PeriodicGate<'_> {
        PeriodicGate::new(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Register a participant or refresh their profile. A first registration
    /// releases proposals that were parked waiting for them.
    pub fn register_profile(&self, mut profile: UserProfile) -> Result<UserProfile> {
        let username = profile.username.trim();
        if !(3..=32).contains(&username.chars().count()) {
            return Err(LifecycleError::Validation(
                "username must be 3-32 characters".into(),
            ));
        }
        profile.username = username.to_string();

        let is_new = self.db.upsert_user(&profile, self.now())?;
        if is_new {
            info!("Registered {} as {}", profile.fid, profile.username);
            let activated = self.matches().activate_pending_for(profile.fid)?;
            if activated > 0 {
                info!("Activated {} parked proposals for {}", activated, profile.fid);
            }
        }

        self.after_profile_change(&profile);
        Ok(profile)
    }

    pub(crate) fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    pub(crate) fn notify(&self, event: LifecycleEvent) {
        self.notifier.notify(event);
    }

    // -- Achievement hooks --
    //
    // Lifecycle writes have already committed when these run. Achievements are
    // recomputed from source data, so a failure here is logged and picked up
    // by the next recompute instead of failing the caller.

    pub(crate) fn after_proposal_sent(&self, creator: Fid) {
        if !self.config.achievements_enabled {
            return;
        }
        if let Err(e) = self.achievements().check_proposals_sent(creator) {
            warn!("Achievement recompute for {} failed: {}", creator, e);
        }
    }

    pub(crate) fn after_meeting_completed(&self, participants: [Fid; 2]) {
        if !self.config.achievements_enabled {
            return;
        }
        for fid in participants {
            if let Err(e) = self.achievements().check_meetings_completed(fid) {
                warn!("Achievement recompute for {} failed: {}", fid, e);
            }
        }
    }

    fn after_profile_change(&self, profile: &UserProfile) {
        if !self.config.achievements_enabled {
            return;
        }
        if let Err(e) = self.achievements().check_profile(profile) {
            warn!("Achievement recompute for {} failed: {}", profile.fid, e);
        }
    }
}
