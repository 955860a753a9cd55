//! Request DTOs for the admin API
//!
//! Defines the structure of incoming query strings and bodies.

use std::path::PathBuf;

use serde::Deserialize;

/// Query for DELETE /entities/:entity_type/:id
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateEntityQuery {
    /// Also drop derived aggregates (default: true)
    #[serde(default)]
    pub related: Option<bool>,
}

impl InvalidateEntityQuery {
    pub fn include_related(&self) -> bool {
        self.related.unwrap_or(true)
    }
}

/// Body for POST /preload. Without a source the configured file is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreloadRequest {
    #[serde(default)]
    pub source: Option<PathBuf>,
}

impl PreloadRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        match &self.source {
            Some(path) if path.as_os_str().is_empty() => {
                Some("source cannot be empty".to_string())
            }
            _ => None,
        }
    }
}

/// Query for GET /usage
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageQuery {
    /// Comma-separated glob patterns; defaults to every namespace and
    /// retention pattern
    #[serde(default)]
    pub patterns: Option<String>,
}

impl UsageQuery {
    pub fn pattern_list(&self) -> Vec<String> {
        self.patterns
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Query for GET /keys/no-expiry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoExpiryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl NoExpiryQuery {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_related_defaults_to_true() {
        let query: InvalidateEntityQuery = serde_json::from_str("{}").unwrap();
        assert!(query.include_related());

        let query: InvalidateEntityQuery = serde_json::from_str(r#"{"related": false}"#).unwrap();
        assert!(!query.include_related());
    }

    #[test]
    fn test_preload_request_validation() {
        let req: PreloadRequest = serde_json::from_str(r#"{"source": ""}"#).unwrap();
        assert!(req.validate().is_some());

        let req: PreloadRequest = serde_json::from_str(r#"{"source": "/tmp/hot.json"}"#).unwrap();
        assert!(req.validate().is_none());

        let req: PreloadRequest = serde_json::from_str("{}").unwrap();
        assert!(req.source.is_none());
    }

    #[test]
    fn test_usage_pattern_list() {
        let query = UsageQuery {
            patterns: Some("cache:user:*, events:*,,".to_string()),
        };
        assert_eq!(query.pattern_list(), vec!["cache:user:*", "events:*"]);
        assert!(UsageQuery::default().pattern_list().is_empty());
    }
}
