use std::collections::HashSet;

use accord_db::achievements as q;
use accord_db::matches::count_unique_recipients;
use accord_db::rooms::count_completed_meetings;
use accord_types::events::LifecycleEvent;
use accord_types::models::{AchievementStatus, Fid, UserProfile, UserProgress};
use tracing::{debug, info};

use crate::Engine;
use crate::error::Result;

/// What has to be true for an achievement to be earned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Distinct counterparts of direct proposals the user created.
    UniqueRecipients(i64),
    /// Rooms where both participants marked the meeting complete.
    CompletedMeetings(i64),
    ProfileComplete,
}

#[derive(Debug, Clone, Copy)]
pub struct AchievementDef {
    pub code: &'static str,
    pub wave: u8,
    pub points: i64,
    pub trigger: Trigger,
}

pub const WAVES: u8 = 4;

#[rustfmt::skip]
pub const CATALOG: &[AchievementDef] = &[
    AchievementDef { code: "profile_complete", wave: 1, points: 50, trigger: Trigger::ProfileComplete },
    AchievementDef { code: "sent_5", wave: 1, points: 50, trigger: Trigger::UniqueRecipients(5) },
    AchievementDef { code: "completed_1", wave: 1, points: 50, trigger: Trigger::CompletedMeetings(1) },
    AchievementDef { code: "sent_10", wave: 2, points: 100, trigger: Trigger::UniqueRecipients(10) },
    AchievementDef { code: "completed_5", wave: 2, points: 100, trigger: Trigger::CompletedMeetings(5) },
    AchievementDef { code: "sent_20", wave: 3, points: 150, trigger: Trigger::UniqueRecipients(20) },
    AchievementDef { code: "completed_10", wave: 3, points: 150, trigger: Trigger::CompletedMeetings(10) },
    AchievementDef { code: "sent_30", wave: 4, points: 200, trigger: Trigger::UniqueRecipients(30) },
    AchievementDef { code: "completed_40", wave: 4, points: 300, trigger: Trigger::CompletedMeetings(40) },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardResult {
    pub code: String,
    pub awarded: bool,
    pub already_exists: bool,
}

/// Idempotent point awards, recomputed from source data on every check.
///
/// `award_if_new` is the only write path into a user's points, so however
/// often a threshold is re-evaluated each (user, code) pays out once.
pub struct AchievementEngine<'a> {
    engine: &'a Engine,
}

impl<'a> AchievementEngine<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    pub fn award_if_new(&self, fid: Fid, code: &str, points: i64) -> Result<AwardResult> {
        let now = self.engine.now();
        let cap = self.engine.config().points_cap();
        let awarded = self.engine.db().with_tx(|conn| -> anyhow::Result<bool> {
            if !q::insert_if_absent(conn, fid, code, points, now)? {
                return Ok(false);
            }
            q::add_points(conn, fid, points, cap, now)?;
            Ok(true)
        })?;

        if awarded {
            info!("Awarded {} to {} (+{} points)", code, fid, points);
            self.engine.notify(LifecycleEvent::AchievementAwarded {
                fid,
                code: code.to_string(),
                points,
            });
        } else {
            debug!("{} already holds {}", fid, code);
        }
        Ok(AwardResult {
            code: code.to_string(),
            awarded,
            already_exists: !awarded,
        })
    }

    /// Award every `sent_*` threshold the user's unique recipient count has
    /// crossed, highest first.
    pub fn check_proposals_sent(&self, fid: Fid) -> Result<Vec<AwardResult>> {
        let count = self
            .engine
            .db()
            .with_conn(|conn| count_unique_recipients(conn, fid))?;
        self.award_thresholds(fid, count, |t| match t {
            Trigger::UniqueRecipients(n) => Some(n),
            _ => None,
        })
    }

    pub fn check_meetings_completed(&self, fid: Fid) -> Result<Vec<AwardResult>> {
        let count = self
            .engine
            .db()
            .with_conn(|conn| count_completed_meetings(conn, fid))?;
        self.award_thresholds(fid, count, |t| match t {
            Trigger::CompletedMeetings(n) => Some(n),
            _ => None,
        })
    }

    pub fn check_profile(&self, profile: &UserProfile) -> Result<Vec<AwardResult>> {
        if !profile.is_complete() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for def in CATALOG.iter().filter(|d| d.trigger == Trigger::ProfileComplete) {
            results.push(self.award_if_new(profile.fid, def.code, def.points)?);
        }
        Ok(results)
    }

    /// Run every check for `fid`.
    pub fn recompute(&self, fid: Fid) -> Result<Vec<AwardResult>> {
        let mut results = self.check_proposals_sent(fid)?;
        results.extend(self.check_meetings_completed(fid)?);
        if let Some(profile) = self.engine.directory().lookup(fid)? {
            results.extend(self.check_profile(&profile)?);
        }
        Ok(results)
    }

    pub fn progress(&self, fid: Fid) -> Result<UserProgress> {
        let (records, points_total) = self.engine.db().with_conn(|conn| {
            Ok::<_, anyhow::Error>((q::list_for(conn, fid)?, q::points_total(conn, fid)?))
        })?;
        let earned: HashSet<&str> = records.iter().map(|r| r.code.as_str()).collect();
        let unlocked = unlocked_wave(&earned);
        let cfg = self.engine.config();

        Ok(UserProgress {
            fid,
            points_total,
            level: level_for(points_total, cfg.points_per_level, cfg.max_level),
            unlocked_wave: unlocked,
            achievements: CATALOG
                .iter()
                .map(|def| AchievementStatus {
                    code: def.code.to_string(),
                    wave: def.wave,
                    points: def.points,
                    earned: earned.contains(def.code),
                    visible: def.wave <= unlocked,
                })
                .collect(),
        })
    }

    fn award_thresholds(
        &self,
        fid: Fid,
        count: i64,
        threshold: impl Fn(Trigger) -> Option<i64>,
    ) -> Result<Vec<AwardResult>> {
        let mut crossed: Vec<(i64, &AchievementDef)> = CATALOG
            .iter()
            .filter_map(|def| threshold(def.trigger).map(|t| (t, def)))
            .filter(|(t, _)| count >= *t)
            .collect();
        crossed.sort_by(|a, b| b.0.cmp(&a.0));

        let mut results = Vec::with_capacity(crossed.len());
        for (_, def) in crossed {
            results.push(self.award_if_new(fid, def.code, def.points)?);
        }
        Ok(results)
    }
}

/// Highest visible wave. Wave 1 is always visible; wave k+1 needs every
/// achievement in wave k.
pub fn unlocked_wave(earned: &HashSet<&str>) -> u8 {
    let mut wave = 1;
    while wave < WAVES
        && CATALOG
            .iter()
            .filter(|d| d.wave == wave)
            .all(|d| earned.contains(d.code))
    {
        wave += 1;
    }
    wave
}

/// `floor(points / per_level)`, capped at `max_level`.
pub fn level_for(points: i64, per_level: i64, max_level: i64) -> i64 {
    if per_level <= 0 {
        return 0;
    }
    (points.max(0) / per_level).min(max_level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use crate::testutil::{INTRO, harness, harness_with};

    #[test]
    fn one_check_after_twelve_recipients_awards_every_crossed_threshold() {
        let config = EngineConfig {
            max_pending_proposals: 20,
            achievements_enabled: false,
            ..EngineConfig::default()
        };
        let fids: Vec<i64> = (1..=13).collect();
        let h = harness_with(config, &fids);
        for to in 2..=13 {
            h.engine.matches().propose(Fid(1), Fid(1), Fid(to), INTRO).unwrap();
        }

        let results = h.engine.achievements().check_proposals_sent(Fid(1)).unwrap();
        let codes: Vec<_> = results.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["sent_10", "sent_5"]);
        assert!(results.iter().all(|r| r.awarded));

        let progress = h.engine.achievements().progress(Fid(1)).unwrap();
        assert_eq!(progress.points_total, 150);
        assert_eq!(progress.level, 1);

        // Re-running pays nothing
        let again = h.engine.achievements().check_proposals_sent(Fid(1)).unwrap();
        assert!(again.iter().all(|r| r.already_exists));
        assert_eq!(h.engine.achievements().progress(Fid(1)).unwrap().points_total, 150);
    }

    #[test]
    fn proposals_trigger_the_check_as_they_are_sent() {
        let h = harness_with(EngineConfig::default(), &[1, 2, 3, 4, 5, 6]);
        for to in 2..=6 {
            h.engine.matches().propose(Fid(1), Fid(1), Fid(to), INTRO).unwrap();
        }
        let progress = h.engine.achievements().progress(Fid(1)).unwrap();
        assert!(progress.achievements.iter().any(|a| a.code == "sent_5" && a.earned));
    }

    #[test]
    fn award_if_new_inserts_once_and_adds_points_once() {
        let h = harness();
        let ach = h.engine.achievements();

        let first = ach.award_if_new(Fid(100), "sent_5", 50).unwrap();
        assert_eq!(
            first,
            AwardResult { code: "sent_5".into(), awarded: true, already_exists: false }
        );
        let second = ach.award_if_new(Fid(100), "sent_5", 50).unwrap();
        assert!(second.already_exists && !second.awarded);

        let progress = ach.progress(Fid(100)).unwrap();
        assert_eq!(progress.points_total, 50);
        assert_eq!(progress.achievements.iter().filter(|a| a.earned).count(), 1);
    }

    #[test]
    fn points_stop_at_the_level_cap() {
        let h = harness();
        let ach = h.engine.achievements();
        for (i, points) in [400, 400, 400].into_iter().enumerate() {
            ach.award_if_new(Fid(100), &format!("bonus_{}", i), points).unwrap();
        }
        let progress = ach.progress(Fid(100)).unwrap();
        assert_eq!(progress.points_total, 1000);
        assert_eq!(progress.level, 10);
    }

    #[test]
    fn waves_unlock_only_when_the_previous_wave_is_complete() {
        let none = HashSet::new();
        assert_eq!(unlocked_wave(&none), 1);

        let partial: HashSet<&str> = ["profile_complete", "sent_5"].into_iter().collect();
        assert_eq!(unlocked_wave(&partial), 1);

        // Later-wave codes do not help while wave 1 is incomplete
        let skipped: HashSet<&str> = ["sent_5", "completed_1", "sent_10", "completed_5"]
            .into_iter()
            .collect();
        assert_eq!(unlocked_wave(&skipped), 1);

        let wave1: HashSet<&str> = ["profile_complete", "sent_5", "completed_1"].into_iter().collect();
        assert_eq!(unlocked_wave(&wave1), 2);

        let all: HashSet<&str> = CATALOG.iter().map(|d| d.code).collect();
        assert_eq!(unlocked_wave(&all), WAVES);
    }

    #[test]
    fn level_is_derived_from_points() {
        assert_eq!(level_for(0, 100, 10), 0);
        assert_eq!(level_for(199, 100, 10), 1);
        assert_eq!(level_for(5000, 100, 10), 10);
        assert_eq!(level_for(50, 0, 10), 0);
    }

    #[test]
    fn complete_profile_earns_its_achievement_on_registration() {
        let h = harness();
        h.engine
            .register_profile(UserProfile {
                fid: Fid(100),
                username: "user100".into(),
                display_name: Some("Hundred".into()),
                avatar_url: Some("https://example.com/a.png".into()),
                bio: Some("Builds things".into()),
            })
            .unwrap();

        let progress = h.engine.achievements().progress(Fid(100)).unwrap();
        let hidden: Vec<_> = progress.achievements.iter().filter(|a| !a.visible).collect();
        assert!(progress.achievements.iter().any(|a| a.code == "profile_complete" && a.earned));
        assert_eq!(progress.unlocked_wave, 1);
        assert!(hidden.iter().all(|a| a.wave > 1));
    }
}
