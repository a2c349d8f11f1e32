// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mission value object.
//!
//! A mission is created once per trigger event (e.g. a pull request being
//! opened or pushed to) and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// One unit of requested work: a revision of a repository to preview.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    id: String,
    source_location: String,
    branch: String,
    revision: String,
}

impl Mission {
    /// Create a new mission.
    pub fn new(
        id: impl Into<String>,
        source_location: impl Into<String>,
        branch: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_location: source_location.into(),
            branch: branch.into(),
            revision: revision.into(),
        }
    }

    /// Create a mission for a pull request, using `pr-<number>` as its id.
    pub fn for_pull_request(
        number: u64,
        source_location: impl Into<String>,
        branch: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self::new(format!("pr-{number}"), source_location, branch, revision)
    }

    /// Correlation key of the mission.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Repository URL to check out.
    pub fn source_location(&self) -> &str {
        &self.source_location
    }

    /// Branch to check out.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Commit hash the mission was triggered for.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Public hostname for this mission under `base_domain`.
    ///
    /// The id is lowercased and anything outside `[a-z0-9-]` becomes `-`,
    /// so `PR_12` under `preview.example.com` yields `pr-12.preview.example.com`.
    pub fn hostname(&self, base_domain: &str) -> String {
        let label: String = self
            .id
            .chars()
            .map(|c| {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let label = label.trim_matches('-');
        let base_domain = base_domain.trim_matches('.');

        if base_domain.is_empty() {
            label.to_string()
        } else {
            format!("{label}.{base_domain}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_value() {
        let a = Mission::new("pr-1", "https://example.com/app.git", "main", "abc123");
        let b = Mission::new("pr-1", "https://example.com/app.git", "main", "abc123");
        let c = Mission::new("pr-1", "https://example.com/app.git", "main", "def456");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_for_pull_request() {
        let mission = Mission::for_pull_request(42, "https://example.com/app.git", "feat", "abc");
        assert_eq!(mission.id(), "pr-42");
        assert_eq!(mission.branch(), "feat");
    }

    #[test]
    fn test_hostname_sanitizes_id() {
        let mission = Mission::new("PR_12", "repo", "main", "abc");
        assert_eq!(
            mission.hostname("preview.example.com"),
            "pr-12.preview.example.com"
        );
    }

    #[test]
    fn test_hostname_without_base_domain() {
        let mission = Mission::new("pr-7", "repo", "main", "abc");
        assert_eq!(mission.hostname(""), "pr-7");
        assert_eq!(mission.hostname(".localhost."), "pr-7.localhost");
    }

    #[test]
    fn test_serde_shape() {
        let mission = Mission::new("pr-1", "https://example.com/app.git", "main", "abc123");
        let json = serde_json::to_value(&mission).unwrap();

        assert_eq!(json["id"], "pr-1");
        assert_eq!(json["sourceLocation"], "https://example.com/app.git");
        assert_eq!(json["revision"], "abc123");

        let back: Mission = serde_json::from_value(json).unwrap();
        assert_eq!(back, mission);
    }
}
