use std::{fs, path::Path, sync::Mutex};

use anyhow::{Context as _, anyhow};
use base64::prelude::*;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

/// Outer (browser chrome included) and inner (viewport) window dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WindowMetrics {
    pub(crate) outer_width: u32,
    pub(crate) outer_height: u32,
    pub(crate) inner_width: u32,
    pub(crate) inner_height: u32,
}

impl WindowMetrics {
    /// Returns true if either axis loses more than `threshold` pixels between
    /// the outer window and the viewport.
    pub(crate) fn exceeds_gap(&self, threshold: u32) -> bool {
        self.outer_width.saturating_sub(self.inner_width) > threshold
            || self.outer_height.saturating_sub(self.inner_height) > threshold
    }
}

impl Default for WindowMetrics {
    fn default() -> Self {
        Self {
            outer_width: 1280,
            outer_height: 800,
            inner_width: 1280,
            inner_height: 720,
        }
    }
}

/// Ambient page environment consulted by the enforcement core.
///
/// Every capability other than the location is optional so that a missing
/// capability degrades identity and tracking rather than failing them.
pub(crate) trait Host: Send + Sync {
    fn hostname(&self) -> String;
    fn href(&self) -> String;
    fn referrer(&self) -> Option<String>;
    fn user_agent(&self) -> Option<String>;
    fn language(&self) -> Option<String>;
    fn platform(&self) -> Option<String>;
    fn screen(&self) -> Option<(u32, u32)>;
    fn timezone(&self) -> Option<String>;

    /// Renders `text` with the page's rendering backend and returns an encoded
    /// image of the result.
    fn render_probe(&self, text: &str) -> Option<String>;

    fn window_metrics(&self) -> WindowMetrics;

    /// Source URLs of the scripts currently loaded in the page.
    fn loaded_scripts(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct HostProfile {
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) referrer: Option<String>,
    #[serde(default)]
    pub(crate) user_agent: Option<String>,
    #[serde(default)]
    pub(crate) language: Option<String>,
    #[serde(default)]
    pub(crate) platform: Option<String>,
    #[serde(default)]
    pub(crate) screen_width: Option<u32>,
    #[serde(default)]
    pub(crate) screen_height: Option<u32>,
    #[serde(default)]
    pub(crate) timezone: Option<String>,
    #[serde(default = "default_rendering")]
    pub(crate) rendering: bool,
    #[serde(default)]
    pub(crate) window: WindowMetrics,
    #[serde(default)]
    pub(crate) scripts: Vec<String>,
}

fn default_rendering() -> bool {
    true
}

impl HostProfile {
    pub(crate) fn for_url(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            referrer: None,
            user_agent: None,
            language: None,
            platform: None,
            screen_width: None,
            screen_height: None,
            timezone: None,
            rendering: true,
            window: WindowMetrics::default(),
            scripts: vec![],
        }
    }

    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read host profile {}", path.display()))?;

        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse host profile {}", path.display()))
    }
}

/// A page environment driven from a [`HostProfile`], with mutable window
/// metrics and script list so sessions can simulate layout changes and
/// tampering.
#[derive(Debug)]
pub(crate) struct SimulatedHost {
    profile: HostProfile,
    hostname: String,
    window: Mutex<WindowMetrics>,
    scripts: Mutex<Vec<String>>,
}

impl SimulatedHost {
    pub(crate) fn new(profile: HostProfile) -> anyhow::Result<Self> {
        let url = Url::parse(&profile.url)
            .with_context(|| format!("Invalid page URL {:?} in host profile", profile.url))?;
        let hostname = url
            .host_str()
            .ok_or_else(|| anyhow!("No hostname in page URL {:?}", profile.url))?
            .to_owned();

        Ok(Self {
            hostname,
            window: Mutex::new(profile.window),
            scripts: Mutex::new(profile.scripts.clone()),
            profile,
        })
    }

    pub(crate) fn resize(&self, metrics: WindowMetrics) {
        *lock(&self.window) = metrics;
    }

    pub(crate) fn add_script(&self, src: &str) {
        lock(&self.scripts).push(src.to_owned());
    }

    /// Removes every loaded script whose source contains `pattern`, returning
    /// how many were removed.
    pub(crate) fn remove_scripts(&self, pattern: &str) -> usize {
        let mut scripts = lock(&self.scripts);
        let before = scripts.len();
        scripts.retain(|src| !src.contains(pattern));
        before - scripts.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Host for SimulatedHost {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn href(&self) -> String {
        self.profile.url.clone()
    }

    fn referrer(&self) -> Option<String> {
        self.profile.referrer.clone()
    }

    fn user_agent(&self) -> Option<String> {
        self.profile.user_agent.clone()
    }

    fn language(&self) -> Option<String> {
        self.profile.language.clone()
    }

    fn platform(&self) -> Option<String> {
        self.profile.platform.clone()
    }

    fn screen(&self) -> Option<(u32, u32)> {
        self.profile.screen_width.zip(self.profile.screen_height)
    }

    fn timezone(&self) -> Option<String> {
        self.profile.timezone.clone()
    }

    fn render_probe(&self, text: &str) -> Option<String> {
        if !self.profile.rendering {
            return None;
        }

        // Stands in for rasterised output: stable per text and rendering stack.
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(self.profile.user_agent.as_deref().unwrap_or_default());
        hasher.update(self.profile.platform.as_deref().unwrap_or_default());

        Some(format!(
            "data:image/png;base64,{}",
            BASE64_STANDARD.encode(hasher.finalize())
        ))
    }

    fn window_metrics(&self) -> WindowMetrics {
        *lock(&self.window)
    }

    fn loaded_scripts(&self) -> Vec<String> {
        lock(&self.scripts).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_derived_from_page_url() {
        let host = SimulatedHost::new(HostProfile::for_url("https://example.com:8443/tool")).unwrap();

        assert_eq!(host.hostname(), "example.com");
        assert_eq!(host.href(), "https://example.com:8443/tool");
    }

    #[test]
    fn profile_without_hostname_is_rejected() {
        assert!(SimulatedHost::new(HostProfile::for_url("data:text/plain,hello")).is_err());
    }

    #[test]
    fn window_gap_uses_either_axis() {
        let mut metrics = WindowMetrics::default();
        assert!(!metrics.exceeds_gap(160));

        metrics.inner_height = 500;
        assert!(metrics.exceeds_gap(160));

        metrics.inner_height = metrics.outer_height;
        metrics.inner_width = metrics.outer_width - 161;
        assert!(metrics.exceeds_gap(160));

        metrics.inner_width = metrics.outer_width - 160;
        assert!(!metrics.exceeds_gap(160));
    }

    #[test]
    fn removing_scripts_matches_by_substring() {
        let mut profile = HostProfile::for_url("https://example.com/");
        profile.scripts = vec![
            "https://example.com/js/premium.js".to_owned(),
            "https://example.com/js/protected-core.js".to_owned(),
        ];
        let host = SimulatedHost::new(profile).unwrap();

        assert_eq!(host.remove_scripts("premium.js"), 1);
        assert_eq!(host.loaded_scripts(), vec!["https://example.com/js/protected-core.js"]);
    }

    #[test]
    fn render_probe_is_absent_without_rendering() {
        let mut profile = HostProfile::for_url("https://example.com/");
        profile.rendering = false;
        let host = SimulatedHost::new(profile).unwrap();

        assert_eq!(host.render_probe("probe"), None);
    }

    #[test]
    fn profile_parses_from_yaml() {
        let profile: HostProfile = serde_yaml::from_str(
            r"
url: https://example.com/
userAgent: TestAgent/1.0
screenWidth: 1920
screenHeight: 1080
window:
  outerWidth: 1920
  outerHeight: 1080
  innerWidth: 1920
  innerHeight: 1000
scripts:
  - /js/premium.js
",
        )
        .unwrap();

        let host = SimulatedHost::new(profile).unwrap();
        assert_eq!(host.screen(), Some((1920, 1080)));
        assert_eq!(host.user_agent().as_deref(), Some("TestAgent/1.0"));
        assert_eq!(host.window_metrics().inner_height, 1000);
    }
}
