//! Milter configuration.

use std::path::Path;

use milterflow_milter::{ActionFlags, AddressPolicy};
use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::error::{Error, Result};

/// Name of the forensic log written next to trashed messages.
pub const TRASH_LOG_NAME: &str = "00-milterflow-trash.log";

/// How modifications made by plugins reach the MTA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MilterMode {
    /// Rewrite whatever the plugins changed.
    Auto,
    /// Never modify the message.
    Readonly,
    /// Rewrite what the `milter_replace` tag asks for.
    Tags,
    /// Rewrite what `milter_mode_options` asks for.
    Manual,
}

impl MilterMode {
    /// Parses a single mode token.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "readonly" => Some(Self::Readonly),
            "tags" => Some(Self::Tags),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Mode name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Readonly => "readonly",
            Self::Tags => "tags",
            Self::Manual => "manual",
        }
    }
}

/// Splits an option string on commas and whitespace, lower-cased.
#[must_use]
pub fn tokens(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Configuration of the milter session layer.
///
/// Every key has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Combination of `auto`, `readonly`, `tags` and `manual`.
    pub milter_mode: String,
    /// Rewrite targets for manual mode (`all`, `body`, `headers`, `from`, `to`).
    pub milter_mode_options: String,
    /// Envelope address policy name.
    pub address_compliance_checker: String,
    /// Decision used when an envelope address fails the policy.
    pub address_compliance_fail_action: String,
    /// Reply text for a failing address, empty for the built-in text.
    pub address_compliance_fail_message: String,
    /// Directory for deleted messages, empty to disable.
    pub trashdir: String,
    /// Log every trashed message to [`TRASH_LOG_NAME`].
    pub trashlog: bool,
    /// Temporary directory handed to plugins.
    pub tempdir: String,
    /// Prefix of the headers added after scanning.
    pub prependaddedheaders: String,
    /// Add a spam status header.
    pub spamstatusheader: bool,
    /// Add a header carrying the message id.
    pub suspectidheader: bool,
    /// Add a header with the message summary.
    pub debuginfoheader: bool,
    /// Collect per-phase timings.
    pub track_timings: bool,
    /// Size of the blocking worker pool, 0 runs plugins inline.
    pub worker_threads: usize,
    /// Listen address.
    pub bind_address: String,
    /// Listen port.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            milter_mode: "tags".to_string(),
            milter_mode_options: String::new(),
            address_compliance_checker: "Default".to_string(),
            address_compliance_fail_action: "dunno".to_string(),
            address_compliance_fail_message: String::new(),
            trashdir: String::new(),
            trashlog: false,
            tempdir: "/tmp".to_string(),
            prependaddedheaders: "X-Milterflow-".to_string(),
            spamstatusheader: false,
            suspectidheader: false,
            debuginfoheader: false,
            track_timings: false,
            worker_threads: 0,
            bind_address: "127.0.0.1".to_string(),
            port: 10125,
        }
    }
}

impl Config {
    /// Parses a JSON config.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Parses `milter_mode` and `milter_mode_options`. Unknown mode tokens
    /// are logged and fall back to `tags`.
    #[must_use]
    pub fn modes(&self) -> Modes {
        let mut enabled = Vec::new();
        for token in tokens(&self.milter_mode) {
            let mode = MilterMode::parse(&token).unwrap_or_else(|| {
                tracing::warn!(mode = %token, "unknown milter mode, using tags");
                MilterMode::Tags
            });
            if !enabled.contains(&mode) {
                enabled.push(mode);
            }
        }
        if enabled.is_empty() {
            enabled.push(MilterMode::Tags);
        }
        Modes {
            enabled,
            options: tokens(&self.milter_mode_options),
        }
    }

    /// Envelope address policy. Unknown names fall back to `Default`.
    #[must_use]
    pub fn address_policy(&self) -> AddressPolicy {
        self.address_compliance_checker
            .parse()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "using default address policy");
                AddressPolicy::Default
            })
    }

    /// Decision for a failing envelope address.
    #[must_use]
    pub fn fail_decision(&self) -> Decision {
        Decision::parse_or_dunno(&self.address_compliance_fail_action)
    }
}

/// Milter modes and manual rewrite options, parsed once per server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modes {
    enabled: Vec<MilterMode>,
    options: Vec<String>,
}

impl Modes {
    /// Enabled modes, in configured order.
    #[must_use]
    pub fn enabled(&self) -> &[MilterMode] {
        &self.enabled
    }

    /// Returns true if `mode` is enabled.
    #[must_use]
    pub fn contains(&self, mode: MilterMode) -> bool {
        self.enabled.contains(&mode)
    }

    /// Tokens of `milter_mode_options`.
    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Modification actions to request from the MTA.
    #[must_use]
    pub fn filter_options(&self) -> ActionFlags {
        if self.contains(MilterMode::Readonly) {
            ActionFlags::empty()
        } else {
            ActionFlags::REWRITE
        }
    }
}
