use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How a timer found running at startup accounts for the time the process was away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResumeGapPolicy {
    /// Count the whole gap as worked time.
    #[default]
    CountAll,
    /// Count at most `max_secs` of the gap.
    Cap { max_secs: u64 },
    /// Resume from now, dropping the gap.
    Discard,
}

impl ResumeGapPolicy {
    /// Portion of a wall-clock gap (in milliseconds) credited to a running timer.
    pub fn credited_ms(&self, gap_ms: i64) -> i64 {
        let gap_ms = gap_ms.max(0);
        match self {
            Self::CountAll => gap_ms,
            Self::Cap { max_secs } => {
                let cap = i64::try_from(max_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
                gap_ms.min(cap)
            }
            Self::Discard => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the board's background pull from the server.
    pub sync_interval_secs: u64,
    /// Period of the global timer tick.
    pub tick_interval_ms: u64,
    /// Period of the timer registry autosave.
    pub autosave_interval_secs: u64,
    /// Ticks between opportunistic saves; zero disables tick saves.
    pub persist_every_ticks: u32,
    /// Sessions shorter than this are not logged.
    pub min_log_hours: f64,
    /// Key under which the timer registry is stored.
    pub timer_storage_key: String,
    pub resume_gap: ResumeGapPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 30,
            tick_interval_ms: 1000,
            autosave_interval_secs: 30,
            persist_every_ticks: 5,
            min_log_hours: 0.001,
            timer_storage_key: "issue_timers".to_string(),
            resume_gap: ResumeGapPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn config_path() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            dirs::home_dir().map(|home| home.join(".config/tracker/config.toml"))
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs::config_dir().map(|config| config.join("tracker").join("config.toml"))
        }
    }

    /// Load the user's config file, falling back to defaults when it is missing or malformed.
    pub fn load() -> Self {
        if let Some(config_path) = Self::config_path() {
            if config_path.exists() {
                if let Ok(content) = std::fs::read_to_string(&config_path) {
                    if let Ok(config) = Self::from_toml(&content) {
                        return config;
                    }
                }
            }
        }
        Self::default()
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_board_and_timer_cadence() {
        let config = SyncConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.autosave_interval(), Duration::from_secs(30));
        assert_eq!(config.min_log_hours, 0.001);
        assert_eq!(config.resume_gap, ResumeGapPolicy::CountAll);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml(
            r#"
            sync_interval_secs = 10

            [resume_gap]
            mode = "cap"
            max_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.sync_interval(), Duration::from_secs(10));
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.resume_gap, ResumeGapPolicy::Cap { max_secs: 600 });
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = SyncConfig {
            sync_interval_secs: 0,
            tick_interval_ms: 0,
            ..SyncConfig::default()
        };
        assert_eq!(config.sync_interval(), Duration::from_secs(1));
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }

    #[test]
    fn resume_gap_credit() {
        assert_eq!(ResumeGapPolicy::CountAll.credited_ms(90_000), 90_000);
        assert_eq!(ResumeGapPolicy::Cap { max_secs: 60 }.credited_ms(90_000), 60_000);
        assert_eq!(ResumeGapPolicy::Cap { max_secs: 60 }.credited_ms(5_000), 5_000);
        assert_eq!(ResumeGapPolicy::Discard.credited_ms(90_000), 0);
        assert_eq!(ResumeGapPolicy::CountAll.credited_ms(-10), 0);
    }
}
