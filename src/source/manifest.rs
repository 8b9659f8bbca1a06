use serde::Deserialize;
use tracing::warn;

use crate::error::UpdateError;

/// Selectable build flavor published in the same release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Standard,
    ModifiedVariant,
}

impl Variant {
    /// Position of this build in the release's asset list.
    pub fn asset_index(self) -> usize {
        match self {
            Variant::Standard => 0,
            Variant::ModifiedVariant => 1,
        }
    }

    /// File name the release publishes for this build.
    pub fn archive_name(self) -> &'static str {
        match self {
            Variant::Standard => "game.zip",
            Variant::ModifiedVariant => "game_futaba_mod.zip",
        }
    }

    pub fn from_modded(modded: bool) -> Self {
        if modded {
            Variant::ModifiedVariant
        } else {
            Variant::Standard
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetDescriptor {
    pub browser_download_url: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseManifest {
    #[serde(default)]
    pub tag_name: Option<String>,
    pub assets: Vec<AssetDescriptor>,
}

impl ReleaseManifest {
    pub fn parse(body: &[u8]) -> Result<Self, UpdateError> {
        serde_json::from_slice(body).map_err(|e| UpdateError::ManifestParse(e.to_string()))
    }

    /// Pick the asset for `variant`.
    ///
    /// With `label` set, the asset whose `name` matches exactly wins. Otherwise the
    /// positional contract applies (index 0 standard, index 1 modified).
    pub fn select(&self, variant: Variant, label: Option<&str>) -> Result<&AssetDescriptor, UpdateError> {
        if let Some(label) = label {
            return self
                .assets
                .iter()
                .find(|a| a.name.as_deref() == Some(label))
                .ok_or_else(|| {
                    UpdateError::ManifestParse(format!("no asset named {:?} in release", label))
                });
        }

        let index = variant.asset_index();
        let asset = self.assets.get(index).ok_or_else(|| {
            UpdateError::ManifestParse(format!(
                "release has {} assets, expected index {} for {:?}",
                self.assets.len(),
                index,
                variant
            ))
        })?;

        if let Some(name) = asset.name.as_deref() {
            if name != variant.archive_name() {
                warn!(
                    "positional asset {} is named {:?}, expected {:?}",
                    index,
                    name,
                    variant.archive_name()
                );
            }
        }

        Ok(asset)
    }
}
