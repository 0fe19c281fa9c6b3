//! Battery state-of-charge badge
//!
//! Every few minutes, look up the battery of the selected plant and show
//! its charge as `"<n>%"`. Anything missing or failing clears the badge.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{Gateway, PointQuery, Session};
use crate::auth::TokenManager;
use crate::error::{Error, Result};
use crate::models::{find_battery, BATTERY_SOC_POINT};

pub const BADGE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Where the badge text goes.
pub trait Badge: Send + Sync {
    fn set_text(&self, text: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// Writes the badge to a file for status-bar integrations. Cleared means
/// the file is absent.
#[derive(Debug)]
pub struct FileBadge {
    path: PathBuf,
}

impl FileBadge {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `badge.txt` in the cache directory.
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::at(crate::config::cache_dir()?.join("badge.txt")))
    }
}

impl Badge for FileBadge {
    fn set_text(&self, text: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| Error::Storage(format!("Failed to create badge directory: {}", e)))?;
        }
        fs::write(&self.path, text)
            .map_err(|e| Error::Storage(format!("Failed to write badge file: {}", e)))?;
        tracing::info!("Battery badge: {}", text);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Battery badge cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to clear badge file: {}", e))),
        }
    }
}

/// Badge text for a state of charge given as a fraction.
pub fn format_soc(fraction: f64) -> String {
    format!("{}%", (fraction * 100.0).round() as i64)
}

pub struct BadgePoller {
    tokens: TokenManager,
    badge: Arc<dyn Badge>,
}

impl BadgePoller {
    pub fn new(tokens: TokenManager, badge: Arc<dyn Badge>) -> Self {
        Self { tokens, badge }
    }

    /// One update. Returns the text shown, `None` when cleared. Never fails.
    pub async fn tick(&self) -> Option<String> {
        let text = match self.battery_text().await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to update battery badge: {}", e);
                None
            }
        };

        let shown = match &text {
            Some(text) => self.badge.set_text(text),
            None => self.badge.clear(),
        };
        if let Err(e) = shown {
            tracing::warn!("{}", e);
        }
        text
    }

    async fn battery_text(&self) -> Result<Option<String>> {
        let stored = self.tokens.store().load()?;

        let Some(plant_id) = stored
            .selected_plant_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            tracing::debug!("No plant selected, clearing badge");
            return Ok(None);
        };
        if !self.tokens.is_valid(stored.token_state().as_ref()) {
            tracing::debug!("No valid token, clearing badge");
            return Ok(None);
        }
        let Ok(ps_id) = plant_id.parse::<u64>() else {
            tracing::warn!("Selected plant id {:?} is not numeric", plant_id);
            return Ok(None);
        };

        let session = Session::from_state(&stored)?;
        let gateway = self.tokens.gateway();

        let devices = gateway.device_list(&session, ps_id).await?;
        let Some(battery) = find_battery(&devices) else {
            tracing::debug!("Plant {} has no battery", ps_id);
            return Ok(None);
        };

        let query = PointQuery {
            device_type: battery.device_type,
            ps_key: battery.ps_key.clone(),
            point_ids: vec![BATTERY_SOC_POINT],
        };
        let points = gateway.device_points(&session, &query).await?;
        Ok(points
            .first()
            .and_then(|point| point.battery_soc())
            .map(format_soc))
    }
}
