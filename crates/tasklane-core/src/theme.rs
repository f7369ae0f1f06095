use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::storage::{KeyValueStore, THEME_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(anyhow!("unknown theme: {other}")),
        }
    }
}

/// Display mode with an optional stored user preference. Without one the
/// environment's colour scheme is followed, including later changes.
pub struct ThemeState {
    storage: Arc<dyn KeyValueStore>,
    current: Theme,
}

impl ThemeState {
    pub fn resolve(storage: Arc<dyn KeyValueStore>, system: Theme) -> Self {
        let current = read_stored(storage.as_ref()).unwrap_or(system);
        debug!(theme = %current, "resolved theme");
        Self { storage, current }
    }

    pub fn current(&self) -> Theme {
        self.current
    }

    pub fn has_stored_preference(&self) -> bool {
        read_stored(self.storage.as_ref()).is_some()
    }

    pub fn toggle(&mut self) -> Theme {
        self.current = self.current.toggled();
        if let Err(err) = self.storage.set_item(THEME_KEY, self.current.as_str()) {
            warn!(error = %format!("{err:#}"), "failed saving theme preference");
        }
        info!(theme = %self.current, "theme toggled");
        self.current
    }

    /// Follows the environment signal unless the user picked a theme.
    pub fn on_system_change(&mut self, system: Theme) -> bool {
        if self.has_stored_preference() {
            debug!("stored theme preference wins over system change");
            return false;
        }
        self.current = system;
        true
    }
}

fn read_stored(storage: &dyn KeyValueStore) -> Option<Theme> {
    match storage.get_item(THEME_KEY) {
        Ok(Some(raw)) => raw.parse().ok(),
        Ok(None) => None,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "failed reading theme preference");
            None
        }
    }
}

/// Environment colour-scheme signal: an explicit override, else the
/// terminal's `COLORFGBG` background index, else light.
pub fn system_theme(override_value: Option<&str>, colorfgbg: Option<&str>) -> Theme {
    if let Some(theme) = override_value.and_then(|v| v.parse().ok()) {
        return theme;
    }

    let background = colorfgbg
        .and_then(|raw| raw.rsplit(';').next())
        .and_then(|bg| bg.trim().parse::<u8>().ok());

    match background {
        Some(0..=6 | 8) => Theme::Dark,
        _ => Theme::Light,
    }
}
