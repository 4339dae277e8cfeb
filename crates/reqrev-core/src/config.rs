#![forbid(unsafe_code)]

//! Configuration for the host-page integration.
//!
//! Every selector, marker, id and delay the core relies on lives in a single
//! [`InjectConfig`] that can be loaded from TOML or JSON, so a change to the
//! host page's markup does not require a rebuild.
//!
//! ```toml
//! [selectors]
//! anchor_tab_text = "Issues"
//!
//! [timing]
//! reconcile_interval_ms = 150
//! ```
//!
//! `InjectConfig::default()` carries the values tuned for the GitHub
//! repository page.

use core::time::Duration;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::retry::{BackoffStrategy, RetryPolicy};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration for the integration core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectConfig {
    /// Host-page queries.
    pub selectors: HostSelectors,

    /// Selection markers the host puts on its tabs.
    pub markers: TabMarkers,

    /// Ids and classes of the injected elements.
    pub elements: InjectedElementIds,

    /// Delays and bounds for every scheduled operation.
    pub timing: TimingConfig,

    /// First path segments that are site routes, not resource namespaces.
    pub excluded_namespaces: Vec<String>,

    /// Maximum tracing level for the content script (`error` .. `trace`).
    pub log_level: String,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            selectors: HostSelectors::default(),
            markers: TabMarkers::default(),
            elements: InjectedElementIds::default(),
            timing: TimingConfig::default(),
            excluded_namespaces: DEFAULT_EXCLUDED_NAMESPACES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            log_level: "info".to_owned(),
        }
    }
}

/// Top-level GitHub routes that share the `/a/b` shape with repository pages.
pub const DEFAULT_EXCLUDED_NAMESPACES: &[&str] = &[
    "about",
    "account",
    "apps",
    "codespaces",
    "collections",
    "copilot",
    "dashboard",
    "enterprise",
    "explore",
    "features",
    "issues",
    "join",
    "login",
    "logout",
    "marketplace",
    "new",
    "notifications",
    "organizations",
    "orgs",
    "pricing",
    "pulls",
    "search",
    "sessions",
    "settings",
    "signup",
    "sponsors",
    "stars",
    "topics",
    "trending",
    "users",
];

impl InjectConfig {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Parse TOML and reject configs that fail [`Self::validate`].
    pub fn from_toml_validated(s: &str) -> Result<Self, ConfigError> {
        let config = Self::from_toml_str(s)?;
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Validate all parameters.
    ///
    /// Returns a list of problems; an empty list means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, value) in [
            ("selectors.nav", &self.selectors.nav),
            ("selectors.tab_links", &self.selectors.tab_links),
            ("selectors.main_content", &self.selectors.main_content),
            ("selectors.host_content", &self.selectors.host_content),
            ("markers.base_class", &self.markers.base_class),
            ("elements.tab_id", &self.elements.tab_id),
            ("elements.panel_id", &self.elements.panel_id),
            ("elements.visible_class", &self.elements.visible_class),
            ("elements.hidden_class", &self.elements.hidden_class),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{name} must not be empty"));
            }
        }

        if self.markers.selected_classes.is_empty() {
            errors.push("markers.selected_classes must name at least one class".into());
        }
        if self
            .markers
            .selected_classes
            .iter()
            .any(|c| c == &self.markers.base_class)
        {
            errors.push("markers.base_class must not also be a selected class".into());
        }
        if self.elements.visible_class == self.elements.hidden_class {
            errors.push("elements.visible_class and elements.hidden_class must differ".into());
        }
        if self.elements.tab_id == self.elements.panel_id {
            errors.push("elements.tab_id and elements.panel_id must differ".into());
        }

        let t = &self.timing;
        if t.reconcile_interval_ms == 0 {
            errors.push("timing.reconcile_interval_ms must be > 0".into());
        }
        if t.inject_retry_interval_ms == 0 {
            errors.push("timing.inject_retry_interval_ms must be > 0".into());
        }
        if t.inject_max_attempts == 0 {
            errors.push("timing.inject_max_attempts must be > 0".into());
        }
        if t.deactivate_delay_ms >= t.reconcile_interval_ms {
            errors.push(format!(
                "timing.deactivate_delay_ms ({}) must be shorter than timing.reconcile_interval_ms ({})",
                t.deactivate_delay_ms, t.reconcile_interval_ms
            ));
        }

        if !matches!(
            self.log_level.to_ascii_lowercase().as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            errors.push(format!("log_level {:?} is not a tracing level", self.log_level));
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// CSS selectors for the host page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSelectors {
    /// The repository navigation widget.
    pub nav: String,
    /// Tab links inside the navigation widget.
    pub tab_links: String,
    /// Main content region; the panel is inserted as its first child.
    pub main_content: String,
    /// Host content regions hidden while the panel is visible.
    pub host_content: String,
    /// Text of the tab the extension tab is inserted after.
    pub anchor_tab_text: String,
}

impl Default for HostSelectors {
    fn default() -> Self {
        Self {
            nav: r#"nav.js-repo-nav, nav[aria-label="Repository"]"#.to_owned(),
            tab_links: "a.UnderlineNav-item".to_owned(),
            main_content: "main#js-repo-pjax-container, main".to_owned(),
            host_content: "#repo-content-pjax-container, #repo-content-turbo-frame".to_owned(),
            anchor_tab_text: "Pull requests".to_owned(),
        }
    }
}

/// How the host marks a tab as selected.
///
/// The host sets all of these together; they must be cleared together or the
/// page renders a half-selected tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabMarkers {
    /// Class every tab link carries regardless of state.
    pub base_class: String,
    /// Classes the host adds to the selected tab.
    pub selected_classes: Vec<String>,
    /// Value the host writes to `aria-current` on the selected tab.
    pub aria_current_value: String,
}

impl Default for TabMarkers {
    fn default() -> Self {
        Self {
            base_class: "UnderlineNav-item".to_owned(),
            selected_classes: vec!["selected".to_owned()],
            aria_current_value: "page".to_owned(),
        }
    }
}

/// Ids and marker classes of the injected elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectedElementIds {
    pub tab_id: String,
    /// Id of the list item wrapping the tab when host tabs are wrapped.
    pub tab_item_id: String,
    pub tab_label: String,
    pub panel_id: String,
    pub panel_class: String,
    pub visible_class: String,
    pub hidden_class: String,
}

impl Default for InjectedElementIds {
    fn default() -> Self {
        Self {
            tab_id: "reqrev-tab".to_owned(),
            tab_item_id: "reqrev-tab-item".to_owned(),
            tab_label: "Requirements".to_owned(),
            panel_id: "reqrev-panel".to_owned(),
            panel_class: "reqrev-panel".to_owned(),
            visible_class: "reqrev-panel--visible".to_owned(),
            hidden_class: "reqrev-panel--hidden".to_owned(),
        }
    }
}

/// Delays and bounds, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Period of the reconciliation loop while the panel is visible.
    pub reconcile_interval_ms: u64,
    /// Third deactivation horizon after `show()`.
    pub deactivate_delay_ms: u64,
    /// Delay between creating a panel and showing it on first toggle.
    pub mount_show_delay_ms: u64,
    /// Spacing of injection attempts.
    pub inject_retry_interval_ms: u64,
    /// Injection attempts before giving up for this page load.
    pub inject_max_attempts: u32,
    /// Delay before re-initialising after navigating to another resource.
    pub navigation_settle_ms: u64,
    /// How long a click on a host tab counts as user intent.
    pub user_intent_window_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: 100,
            deactivate_delay_ms: 50,
            mount_show_delay_ms: 100,
            inject_retry_interval_ms: 500,
            inject_max_attempts: 20,
            navigation_settle_ms: 300,
            user_intent_window_ms: 1_000,
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    #[must_use]
    pub fn deactivate_delay(&self) -> Duration {
        Duration::from_millis(self.deactivate_delay_ms)
    }

    #[must_use]
    pub fn mount_show_delay(&self) -> Duration {
        Duration::from_millis(self.mount_show_delay_ms)
    }

    #[must_use]
    pub fn navigation_settle(&self) -> Duration {
        Duration::from_millis(self.navigation_settle_ms)
    }

    #[must_use]
    pub fn user_intent_window(&self) -> Duration {
        Duration::from_millis(self.user_intent_window_ms)
    }

    /// Retry policy for the injection loop.
    #[must_use]
    pub fn inject_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.inject_max_attempts,
            BackoffStrategy::Fixed {
                delay_ms: self.inject_retry_interval_ms,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur when loading a configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading a file.
    Io(std::io::Error),
    /// TOML parse error.
    Toml(toml::de::Error),
    /// JSON parse error.
    Json(serde_json::Error),
    /// Validation errors.
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::Validation(errors) => {
                write!(f, "validation errors: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Toml(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}
