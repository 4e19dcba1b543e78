//! User-facing billboard toggles, persisted as JSON
//!
//! Hooks read these at the start of every call, so a change takes effect on
//! the next sprite drawn.

use std::fs;
use std::path::Path;

use recomp_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};

use crate::PatchError;

/// Toggles for one rewritten call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteControls {
    /// Drop the sprite entirely; neither the original nor the quad is drawn
    pub disable_render: bool,
    /// Replace the texture rectangle with an interpolated quad
    pub rewrite: bool,
    /// Hide the original rectangle once the quad is emitted
    pub suppress_original: bool,
}

impl Default for SiteControls {
    fn default() -> Self {
        Self {
            disable_render: false,
            rewrite: true,
            suppress_original: !cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillboardControls {
    pub stars: SiteControls,
    pub energy_items: SiteControls,
    pub flowers: SiteControls,
    pub collectibles: SiteControls,
    pub trees: SiteControls,
    /// FOV-mask sprites are only observed, never rewritten
    pub disable_fov_masks: bool,
    /// Periodic stats reports and the energy-item trace
    pub debug_logging: bool,
}

impl Default for BillboardControls {
    fn default() -> Self {
        Self {
            stars: SiteControls::default(),
            energy_items: SiteControls::default(),
            flowers: SiteControls::default(),
            collectibles: SiteControls::default(),
            trees: SiteControls::default(),
            disable_fov_masks: false,
            debug_logging: cfg!(debug_assertions),
        }
    }
}

impl BillboardControls {
    /// Load controls from `path`, falling back to defaults
    ///
    /// A missing file is not an error. A file that fails to parse is logged
    /// and ignored.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(controls) => controls,
                Err(e) => {
                    log(LogCategory::Hooks, LogLevel::Warn, || {
                        format!(
                            "failed to parse {}: {}, using defaults",
                            path.display(),
                            e
                        )
                    });
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Like [`BillboardControls::load`], but surfaces every failure
    pub fn try_load(path: &Path) -> Result<Self, PatchError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), PatchError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Rewrite everything, hide all originals, keep logs quiet
    pub fn release() -> Self {
        let site = SiteControls {
            disable_render: false,
            rewrite: true,
            suppress_original: true,
        };
        Self {
            stars: site,
            energy_items: site,
            flowers: site,
            collectibles: site,
            trees: site,
            disable_fov_masks: false,
            debug_logging: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "trees": { "rewrite": false }, "debug_logging": true }"#;
        let controls: BillboardControls = serde_json::from_str(json).unwrap();
        assert!(!controls.trees.rewrite);
        assert_eq!(
            controls.trees.suppress_original,
            SiteControls::default().suppress_original
        );
        assert!(controls.stars.rewrite);
        assert!(controls.debug_logging);
    }

    #[test]
    fn test_build_profile_defaults() {
        let controls = BillboardControls::default();
        assert!(controls.energy_items.rewrite);
        assert!(!controls.energy_items.disable_render);
        assert_eq!(controls.energy_items.suppress_original, !cfg!(debug_assertions));
        assert_eq!(controls.debug_logging, cfg!(debug_assertions));

        let release = BillboardControls::release();
        assert!(release.flowers.suppress_original);
        assert!(!release.debug_logging);
    }

    #[test]
    fn test_save_and_load() {
        let dir = env::temp_dir().join("sssv_controls_test_save_and_load");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("billboard.json");

        let mut controls = BillboardControls::release();
        controls.collectibles.disable_render = true;
        controls.disable_fov_masks = true;
        controls.save(&path).unwrap();

        assert_eq!(BillboardControls::load(&path), controls);
        assert_eq!(BillboardControls::try_load(&path).unwrap(), controls);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_bad_file_falls_back() {
        let dir = env::temp_dir().join("sssv_controls_test_bad_file");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("billboard.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(BillboardControls::load(&path), BillboardControls::default());
        assert!(matches!(
            BillboardControls::try_load(&path),
            Err(PatchError::Config(_))
        ));
        assert_eq!(
            BillboardControls::load(&dir.join("missing.json")),
            BillboardControls::default()
        );

        fs::remove_dir_all(&dir).unwrap();
    }
}
