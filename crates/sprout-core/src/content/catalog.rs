//! TOML content packs.
//!
//! A content pack declares subjects, activities and achievement definitions:
//!
//! ```toml
//! [[subjects]]
//! id = "math"
//! name = "Mathematics"
//! sequence = ["count-1", "count-2"]
//!
//! [[activities]]
//! id = "count-1"
//! subject = "math"
//! tier = "easy"
//!
//! [[achievements]]
//! id = "first-steps"
//! name = "First Steps"
//! category = "milestone"
//! criteria = { kind = "first_completion" }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Activity, Subject};
use crate::achievements::AchievementDefinition;
use crate::error::ContentGraphError;

const BUILTIN_PACK: &str = include_str!("../../content/default_pack.toml");

/// Unvalidated content as read from a pack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentCatalog {
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub achievements: Vec<AchievementDefinition>,
}

impl ContentCatalog {
    /// Parse a pack from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ContentGraphError> {
        toml::from_str(content).map_err(|e| ContentGraphError::Load(e.to_string()))
    }

    /// Read a pack from disk.
    pub fn load(path: &Path) -> Result<Self, ContentGraphError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ContentGraphError::Load(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// The pack compiled into the crate.
    pub fn builtin() -> Result<Self, ContentGraphError> {
        Self::from_toml_str(BUILTIN_PACK)
    }

    pub fn to_toml_string(&self) -> Result<String, ContentGraphError> {
        toml::to_string_pretty(self).map_err(|e| ContentGraphError::Load(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::DifficultyTier;
    use indoc::indoc;

    #[test]
    fn builtin_pack_parses() {
        let catalog = ContentCatalog::builtin().unwrap();
        assert!(!catalog.subjects.is_empty());
        assert!(!catalog.activities.is_empty());
        assert!(!catalog.achievements.is_empty());
    }

    #[test]
    fn activity_defaults_apply() {
        let catalog = ContentCatalog::from_toml_str(indoc! {r#"
            [[subjects]]
            id = "math"
            name = "Mathematics"

            [[activities]]
            id = "count-1"
            subject = "math"
            tier = "easy"
        "#})
        .unwrap();

        let activity = &catalog.activities[0];
        assert_eq!(activity.tier, DifficultyTier::Easy);
        assert_eq!(activity.min_age, 3);
        assert_eq!(activity.max_age, 8);
        assert!(activity.published);
        assert!(!activity.crown_challenge);
        assert!(activity.prerequisites.is_empty());
    }

    #[test]
    fn malformed_pack_is_a_load_error() {
        let err = ContentCatalog::from_toml_str("[[activities]]\nid = 3").unwrap_err();
        assert!(matches!(err, ContentGraphError::Load(_)));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack.toml");
        std::fs::write(&path, BUILTIN_PACK).unwrap();
        let catalog = ContentCatalog::load(&path).unwrap();
        assert_eq!(catalog, ContentCatalog::builtin().unwrap());
    }
}
