use std::env;
use std::str::FromStr;

use chrono::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a decline blocks new proposals between the same pair.
    pub cooldown_window: Duration,
    /// Room lifetime, counted from the first join.
    pub room_ttl_seconds: i64,
    pub intro_min_chars: usize,
    pub intro_max_chars: usize,
    pub message_max_chars: usize,
    /// Unanswered matches a single participant may be part of at once.
    pub max_pending_proposals: u32,
    /// Unanswered proposals older than this are expired by maintenance.
    pub proposal_max_age: Duration,
    pub points_per_level: i64,
    pub max_level: i64,
    pub achievements_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cooldown_window: Duration::days(7),
            room_ttl_seconds: 2 * 60 * 60,
            intro_min_chars: 20,
            intro_max_chars: 100,
            message_max_chars: 2000,
            max_pending_proposals: 10,
            proposal_max_age: Duration::days(14),
            points_per_level: 100,
            max_level: 10,
            achievements_enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let d = Self::default();

        Self {
            cooldown_window: Duration::days(env_or("ACCORD_COOLDOWN_DAYS", 7)),
            room_ttl_seconds: env_or("ACCORD_ROOM_TTL_SECS", d.room_ttl_seconds),
            intro_min_chars: env_or("ACCORD_INTRO_MIN_CHARS", d.intro_min_chars),
            intro_max_chars: env_or("ACCORD_INTRO_MAX_CHARS", d.intro_max_chars),
            message_max_chars: env_or("ACCORD_MESSAGE_MAX_CHARS", d.message_max_chars),
            max_pending_proposals: env_or("ACCORD_MAX_PENDING_PROPOSALS", d.max_pending_proposals),
            proposal_max_age: Duration::days(env_or("ACCORD_PROPOSAL_MAX_AGE_DAYS", 14)),
            points_per_level: env_or("ACCORD_POINTS_PER_LEVEL", d.points_per_level),
            max_level: env_or("ACCORD_MAX_LEVEL", d.max_level),
            achievements_enabled: env_or("ACCORD_ACHIEVEMENTS_ENABLED", d.achievements_enabled),
        }
    }

    /// Ceiling on a user's point total.
    pub fn points_cap(&self) -> i64 {
        self.points_per_level * self.max_level
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
