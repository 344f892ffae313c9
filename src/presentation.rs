use std::collections::HashMap;

use crate::models::search::{MatchSource, SearchResult};

pub const SETTINGS_URI: &str = "anything://settings";
const SETTINGS_KEYWORDS: [&str; 2] = ["settings", "config"];
const SETTINGS_SCORE: f32 = 1000.0;

/// Settings pseudo-result for queries that are a fragment of a control keyword ("set", "fig").
pub fn control_shortcut(raw_query: &str) -> Option<SearchResult> {
    let lower = raw_query.trim().to_lowercase();
    if lower.is_empty() || !SETTINGS_KEYWORDS.iter().any(|k| k.contains(lower.as_str())) {
        return None;
    }
    Some(SearchResult {
        path: SETTINGS_URI.to_string(),
        file_name: "Settings".to_string(),
        extension: ".settings".to_string(),
        snippet: "Configure AI, Indexing, and Hotkeys".to_string(),
        score: SETTINGS_SCORE,
        icon_data: None,
        match_source: MatchSource::Shortcut,
    })
}

pub fn is_control_uri(path: &str) -> bool {
    path == SETTINGS_URI
}

/// Puts any control shortcut ahead of ranked results.
pub fn with_control_shortcuts(raw_query: &str, mut results: Vec<SearchResult>) -> Vec<SearchResult> {
    if let Some(shortcut) = control_shortcut(raw_query) {
        results.insert(0, shortcut);
    }
    results
}

pub fn fill_extension_icons(results: &mut [SearchResult], icons: &HashMap<String, String>) {
    for result in results.iter_mut().filter(|r| r.icon_data.is_none()) {
        if let Some(icon) = icons.get(&result.extension.to_lowercase()) {
            result.icon_data = Some(icon.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(path: &str, extension: &str, icon: Option<&str>) -> SearchResult {
        SearchResult {
            path: path.to_string(),
            file_name: path.to_string(),
            extension: extension.to_string(),
            snippet: String::new(),
            score: 1.0,
            icon_data: icon.map(str::to_string),
            match_source: MatchSource::Keyword,
        }
    }

    #[test]
    fn test_control_shortcut_matches_keyword_fragments() {
        assert!(control_shortcut("Sett").is_some());
        assert!(control_shortcut("config").is_some());
        assert!(control_shortcut("fig").is_some());
        assert!(control_shortcut("settings panel").is_none());
        assert!(control_shortcut("report").is_none());
        assert!(control_shortcut("  ").is_none());
    }

    #[test]
    fn test_shortcut_goes_first() {
        let results = with_control_shortcuts("set", vec![plain("/d/setup.exe", ".exe", None)]);
        assert_eq!(results.len(), 2);
        assert!(is_control_uri(&results[0].path));
        assert_eq!(results[0].match_source, MatchSource::Shortcut);
    }

    #[test]
    fn test_fill_extension_icons_keeps_existing() {
        let icons = HashMap::from([(".pdf".to_string(), "pdf".to_string())]);
        let mut results = vec![
            plain("/d/a.PDF", ".PDF", None),
            plain("/d/b.pdf", ".pdf", Some("own")),
            plain("/d/c.txt", ".txt", None),
        ];
        fill_extension_icons(&mut results, &icons);
        assert_eq!(results[0].icon_data.as_deref(), Some("pdf"));
        assert_eq!(results[1].icon_data.as_deref(), Some("own"));
        assert_eq!(results[2].icon_data, None);
    }
}
