//! Category and merchant keys, comfort-category classification

use std::collections::HashSet;

use crate::config::DetectionConfig;

/// Normalize a free-text label into a grouping key.
///
/// Lowercases, turns runs of whitespace, `-`, `/` and `&` into a single `_`, and
/// returns `None` for labels that are empty after trimming.
pub fn normalize_key(raw: &str) -> Option<String> {
    let mut key = String::with_capacity(raw.len());
    let mut pending_sep = false;

    for ch in raw.trim().chars() {
        if ch.is_whitespace() || matches!(ch, '-' | '/' | '&' | '_') {
            pending_sep = !key.is_empty();
            continue;
        }
        if pending_sep {
            key.push('_');
            pending_sep = false;
        }
        key.extend(ch.to_lowercase());
    }

    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Classifies categories associated with emotional or impulse purchasing
#[derive(Debug, Clone, Default)]
pub struct ComfortClassifier {
    keys: HashSet<String>,
}

impl ComfortClassifier {
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: categories
                .into_iter()
                .filter_map(|c| normalize_key(c.as_ref()))
                .collect(),
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            keys: config.comfort_keys().into_iter().collect(),
        }
    }

    /// Whether a normalized category key is a comfort category; missing categories are not
    pub fn is_comfort(&self, category_key: Option<&str>) -> bool {
        category_key.is_some_and(|k| self.keys.contains(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Food Delivery").as_deref(), Some("food_delivery"));
        assert_eq!(normalize_key("  fast-food ").as_deref(), Some("fast_food"));
        assert_eq!(normalize_key("Bars & Nightlife").as_deref(), Some("bars_nightlife"));
        assert_eq!(normalize_key("STARBUCKS #123").as_deref(), Some("starbucks_#123"));
        assert_eq!(normalize_key("   "), None);
        assert_eq!(normalize_key(""), None);
    }

    #[test]
    fn test_comfort_classifier_defaults() {
        let classifier = ComfortClassifier::from_config(&DetectionConfig::default());
        assert!(classifier.is_comfort(Some("food_delivery")));
        assert!(classifier.is_comfort(Some("entertainment")));
        assert!(!classifier.is_comfort(Some("utilities")));
        assert!(!classifier.is_comfort(None));
    }

    #[test]
    fn test_custom_comfort_list() {
        let classifier = ComfortClassifier::new(["Late Night Snacks"]);
        assert!(classifier.is_comfort(Some("late_night_snacks")));
        assert!(!classifier.is_comfort(Some("food_delivery")));
    }
}
