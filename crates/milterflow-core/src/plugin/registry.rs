//! Plugin lists shared by every session.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Appender, AppenderList, MilterPlugin, Phase, PluginList, Prepender, ScannerPlugin};

/// Ordered plugin lists, read-only once sessions start.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    prependers: Vec<Arc<dyn Prepender>>,
    plugins: PluginList,
    appenders: AppenderList,
    milter: HashMap<Phase, Vec<Arc<dyn MilterPlugin>>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a prepender.
    #[must_use]
    pub fn with_prepender(mut self, prepender: impl Prepender + 'static) -> Self {
        self.prependers.push(Arc::new(prepender));
        self
    }

    /// Appends a content scanner.
    #[must_use]
    pub fn with_plugin(mut self, plugin: impl ScannerPlugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Appends an appender.
    #[must_use]
    pub fn with_appender(mut self, appender: impl Appender + 'static) -> Self {
        self.appenders.push(Arc::new(appender));
        self
    }

    /// Registers a phase plugin for each of `phases`.
    #[must_use]
    pub fn with_milter_plugin(mut self, phases: &[Phase], plugin: impl MilterPlugin + 'static) -> Self {
        let plugin: Arc<dyn MilterPlugin> = Arc::new(plugin);
        for phase in phases {
            self.milter.entry(*phase).or_default().push(Arc::clone(&plugin));
        }
        self
    }

    /// Prependers in order.
    #[must_use]
    pub fn prependers(&self) -> &[Arc<dyn Prepender>] {
        &self.prependers
    }

    /// Content scanners in order.
    #[must_use]
    pub fn plugins(&self) -> &[Arc<dyn ScannerPlugin>] {
        &self.plugins
    }

    /// Appenders in order.
    #[must_use]
    pub fn appenders(&self) -> &[Arc<dyn Appender>] {
        &self.appenders
    }

    /// Phase plugins registered for `phase`.
    #[must_use]
    pub fn milter_plugins(&self, phase: Phase) -> &[Arc<dyn MilterPlugin>] {
        self.milter.get(&phase).map_or(&[], Vec::as_slice)
    }

    /// Returns true if end of body builds a suspect.
    #[must_use]
    pub fn has_pipeline(&self) -> bool {
        !self.plugins.is_empty() || !self.appenders.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let milter: HashMap<&str, Vec<&str>> = self
            .milter
            .iter()
            .map(|(phase, list)| (phase.as_str(), list.iter().map(|p| p.name()).collect()))
            .collect();
        f.debug_struct("PluginRegistry")
            .field("prependers", &self.prependers.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("plugins", &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("appenders", &self.appenders.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("milter", &milter)
            .finish()
    }
}
