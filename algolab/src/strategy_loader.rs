// algolab/src/strategy_loader.rs

//! Strategy discovery.
//!
//! A strategies directory holds JSON manifests named `strategy_<NN>_<label>.json`. Each one
//! picks a strategy from the statically linked registry and may override its defaults.
//! Manifests are offered in order of `NN`; without a directory every registered strategy is
//! offered in registration order.

use anyhow::Context;

use algolab_core::settings::StrategySelection;
use algolab_core::strategy::{ParamValue, ParameterSet, StrategyDescriptor, StrategyRegistry};

/// On-disk manifest of one strategy.
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StrategyManifest {
    /// Registered strategy name.
    pub strategy: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Display label.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub parameters: std::collections::HashMap<String, ParamValue>,
}

fn default_enabled() -> bool {
    true
}

/// A selectable strategy: its descriptor plus manifest overrides.
#[derive(Debug, Clone)]
pub struct StrategyEntry {
    number: usize,
    label: String,
    descriptor: StrategyDescriptor,
    overrides: ParameterSet,
    source: Option<std::path::PathBuf>,
}

impl StrategyEntry {
    /// Manifest overrides merged over the declared defaults.
    pub fn parameters(&self) -> Result<ParameterSet, algolab_core::AlgoError> {
        ParameterSet::merged(self.descriptor.get_defaults(), &self.overrides)
    }

    /// Run-level `overrides` merged over [`StrategyEntry::parameters`].
    pub fn parameters_with(&self, overrides: &ParameterSet) -> Result<ParameterSet, algolab_core::AlgoError> {
        ParameterSet::merged(&self.parameters()?, overrides)
    }

    /// One-line listing, e.g. `1: sma_cross v1.0.0 {'short_window': 10, 'long_window': 20}`.
    pub fn describe(&self) -> String {
        let params = self
            .parameters()
            .map(|p| p.format_for_display())
            .unwrap_or_else(|e| format!("<{}>", e));
        let mut line = format!("{}: {} v{} {}", self.number, self.label, self.descriptor.get_version(), params);
        if !self.descriptor.get_description().is_empty() {
            line.push_str(" - ");
            line.push_str(self.descriptor.get_description());
        }
        line
    }

    /// --- Getters ---
    pub fn get_number(&self) -> usize {
        self.number
    }

    pub fn get_label(&self) -> &str {
        &self.label
    }

    pub fn get_descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    pub fn get_source(&self) -> Option<&std::path::Path> {
        self.source.as_deref()
    }
}

/// Strategies offered to the user, in selection order.
#[derive(Debug, Clone, Default)]
pub struct StrategyCatalog {
    entries: Vec<StrategyEntry>,
}

impl StrategyCatalog {
    /// Every registered strategy, numbered from 1 in registration order.
    pub fn from_registry(registry: &StrategyRegistry) -> Self {
        let entries = registry
            .iter()
            .enumerate()
            .map(|(i, descriptor)| StrategyEntry {
                number: i + 1,
                label: descriptor.get_name().to_string(),
                descriptor: descriptor.clone(),
                overrides: ParameterSet::new(),
                source: None,
            })
            .collect();

        Self { entries }
    }

    /// Reads the manifests of `dir`, or falls back to the registry when `dir` is unset or missing.
    ///
    /// # Returns
    /// * An error naming the manifest file when it cannot be parsed, names an unknown strategy
    ///   or overrides an undeclared parameter.
    pub fn discover(dir: Option<&std::path::Path>, registry: &StrategyRegistry) -> anyhow::Result<Self> {
        let Some(dir) = dir.filter(|d| d.is_dir()) else {
            if let Some(missing) = dir {
                tracing::warn!(dir = %missing.display(), "strategies directory not found, offering all registered strategies");
            }
            return anyhow::Ok(Self::from_registry(registry));
        };

        let mut manifests = Vec::new();
        for item in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
            let path = item?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.starts_with("strategy_") || !file_name.ends_with(".json") {
                continue;
            }
            manifests.push((manifest_number(file_name), file_name.to_string(), path));
        }
        manifests.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut entries = Vec::new();
        for (number, file_name, path) in manifests {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read manifest {}", path.display()))?;
            let manifest: StrategyManifest = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse manifest {}", file_name))?;

            if !manifest.enabled {
                tracing::debug!(manifest = %file_name, "manifest disabled, skipped");
                continue;
            }

            let descriptor = registry.get(&manifest.strategy).ok_or_else(|| {
                algolab_core::AlgoError::invalid(format!(
                    "manifest {} names unknown strategy '{}'; registered: [{}]",
                    file_name,
                    manifest.strategy,
                    registry.names().join(", ")
                ))
            })?;

            if let Some(version) = manifest.version.as_deref() {
                if version != descriptor.get_version() {
                    tracing::warn!(
                        manifest = %file_name,
                        expected = version,
                        linked = descriptor.get_version(),
                        "strategy version differs from manifest"
                    );
                }
            }

            let mut names: Vec<&String> = manifest.parameters.keys().collect();
            names.sort();
            let overrides: ParameterSet = names
                .into_iter()
                .map(|name| (name.clone(), manifest.parameters[name]))
                .collect();

            let entry = StrategyEntry {
                number,
                label: manifest.name.clone().unwrap_or_else(|| manifest.strategy.clone()),
                descriptor: descriptor.clone(),
                overrides,
                source: Some(path.clone()),
            };
            entry
                .parameters()
                .with_context(|| format!("Invalid parameters in manifest {}", file_name))?;

            tracing::debug!(number, manifest = %file_name, strategy = %manifest.strategy, "strategy manifest loaded");
            entries.push(entry);
        }

        if entries.is_empty() {
            anyhow::bail!("No enabled strategy manifests in {}", dir.display());
        }

        anyhow::Ok(Self { entries })
    }

    /// Picks an entry by manifest number or by strategy/label name.
    /// Without a selection the only entry is taken; several entries need an explicit choice.
    pub fn select(&self, selection: Option<&StrategySelection>) -> anyhow::Result<&StrategyEntry> {
        let found = match selection {
            Some(StrategySelection::Number(number)) => self.entries.iter().find(|e| e.number == *number),
            Some(StrategySelection::Name(name)) => self
                .entries
                .iter()
                .find(|e| e.label == *name)
                .or_else(|| self.entries.iter().find(|e| e.descriptor.get_name() == name)),
            None if self.entries.len() == 1 => self.entries.first(),
            None => {
                anyhow::bail!(algolab_core::AlgoError::invalid(format!(
                    "{} strategies available, select one of: {}",
                    self.entries.len(),
                    self.listing()
                )))
            }
        };

        found.ok_or_else(|| {
            anyhow::anyhow!(algolab_core::AlgoError::invalid(format!(
                "no strategy matches selection '{}'; available: {}",
                selection.map(|s| s.to_string()).unwrap_or_default(),
                self.listing()
            )))
        })
    }

    pub fn entries(&self) -> &[StrategyEntry] {
        &self.entries
    }

    fn listing(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{} ({})", e.number, e.label))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Number between underscores in a manifest file name, e.g. `strategy_07_fast.json` is 7.
/// Names without one sort first as 0.
fn manifest_number(file_name: &str) -> usize {
    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
    let parts: Vec<&str> = stem.split('_').collect();

    parts
        .iter()
        .enumerate()
        .filter(|(i, _)| *i > 0 && *i + 1 < parts.len())
        .find_map(|(_, part)| {
            if !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) {
                part.parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}
