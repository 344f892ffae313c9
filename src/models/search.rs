use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Keyword,
    Semantic,
    Both,
    Shortcut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub path: String,
    pub file_name: String,
    pub extension: String,
    pub snippet: String,
    pub score: f32,
    pub icon_data: Option<String>,
    pub match_source: MatchSource,
}

/// Inclusive modification-time window; a bound of exactly 0 means unbounded on that side.
/// Negative bounds are real instants before 1970.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub const UNBOUNDED: Self = Self { start: 0, end: 0 };

    pub fn lower(&self) -> Option<i64> {
        (self.start != 0).then_some(self.start)
    }

    pub fn upper(&self) -> Option<i64> {
        (self.end != 0).then_some(self.end)
    }

    pub fn contains(&self, modified_time: i64) -> bool {
        if self.lower().is_some_and(|start| modified_time < start) {
            return false;
        }
        if self.upper().is_some_and(|end| modified_time > end) {
            return false;
        }
        true
    }

    pub fn is_bounded(&self) -> bool {
        self.lower().is_some() || self.upper().is_some()
    }
}
