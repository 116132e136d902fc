// algolab_core/src/strategy.rs

//! Strategy contract.
//!
//! A strategy is a named, versioned unit that declares its default numeric parameters and
//! exposes a decision function over the bar history. Strategies are linked statically and
//! registered explicitly in a [`StrategyRegistry`]; a fresh instance is built per run from a
//! [`ParameterSet`] through the descriptor's factory function.

use crate::data_handler;
use crate::error::AlgoError;

/// Numeric strategy parameter value.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Real(f64),
}

impl ParamValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ParamValue::Int(v) => *v as f64,
            ParamValue::Real(v) => *v,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, ParamValue::Int(_))
    }

    /// Converts `self` to the numeric kind of `template`.
    /// A real value only converts to an integer when it has no fractional part.
    fn coerce_like(&self, template: &ParamValue) -> Option<ParamValue> {
        match (template, self) {
            (ParamValue::Int(_), ParamValue::Int(v)) => Some(ParamValue::Int(*v)),
            (ParamValue::Int(_), ParamValue::Real(v)) => {
                if v.is_finite() && v.fract() == 0.0 {
                    Some(ParamValue::Int(*v as i64))
                } else {
                    None
                }
            }
            (ParamValue::Real(_), value) => Some(ParamValue::Real(value.as_f64())),
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Real(v) => write!(f, "{}", v),
        }
    }
}

/// Ordered mapping from parameter name to value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSet {
    params: Vec<(String, ParamValue)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Sets `name`, replacing an existing value in place.
    pub fn with_param(mut self, name: &str, value: ParamValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: ParamValue) {
        match self.params.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => self.params.push((name.to_string(), value)),
        }
    }

    /// Combines strategy defaults with caller overrides.
    ///
    /// # Arguments
    /// * `defaults` - Parameters declared by the strategy; they fix names, order and numeric kind.
    /// * `overrides` - Values supplied by the caller or the optimizer.
    ///
    /// # Returns
    /// * `InvalidInput` when an override names an undeclared parameter or cannot take the declared kind.
    pub fn merged(defaults: &ParameterSet, overrides: &ParameterSet) -> Result<ParameterSet, AlgoError> {
        let mut merged = defaults.clone();

        for (name, value) in &overrides.params {
            let Some(default) = defaults.get(name) else {
                return Err(AlgoError::invalid(format!(
                    "unknown parameter '{}'; declared parameters: [{}]",
                    name,
                    defaults.names().join(", ")
                )));
            };

            let coerced = value.coerce_like(&default).ok_or_else(|| {
                AlgoError::invalid(format!(
                    "parameter '{}' expects an integer, got {}",
                    name, value
                ))
            })?;
            merged.set(name, coerced);
        }

        Ok(merged)
    }

    /// --- Getters ---
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    /// Reads a non-negative parameter as `usize`.
    pub fn get_usize(&self, name: &str) -> anyhow::Result<usize> {
        let value = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Missing parameter '{}'", name))?;

        let number = value.as_f64();
        if !number.is_finite() || number < 0.0 {
            anyhow::bail!("Parameter '{}' must be a non-negative number, got: {}", name, value);
        }

        anyhow::Ok(number as usize)
    }

    pub fn get_f64(&self, name: &str) -> anyhow::Result<f64> {
        self.get(name)
            .map(|value| value.as_f64())
            .ok_or_else(|| anyhow::anyhow!("Missing parameter '{}'", name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, ParamValue)> {
        self.params.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Human-readable form used in logs and reports, e.g. `{'short_window': 10, 'long_window': 20}`.
    pub fn format_for_display(&self) -> String {
        if self.params.is_empty() {
            return "{}".to_string();
        }

        let params_str = self
            .params
            .iter()
            .map(|(k, v)| format!("'{}': {}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}", params_str)
    }
}

impl FromIterator<(String, ParamValue)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (String, ParamValue)>>(iter: T) -> Self {
        let mut set = ParameterSet::new();
        for (name, value) in iter {
            set.set(&name, value);
        }
        set
    }
}

/// Requested position size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderSize {
    /// Fraction in `(0, 1]` of the quantity the available cash buys after commission.
    Fraction(f64),
    /// Absolute quantity of the instrument.
    Units(f64),
}

impl Default for OrderSize {
    fn default() -> Self {
        OrderSize::Fraction(1.0)
    }
}

/// Decision returned for the current bar.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Action {
    #[default]
    Hold,
    EnterLong(OrderSize),
    ExitLong,
    EnterShort(OrderSize),
    ExitShort,
}

impl Action {
    /// Enter long with all available equity.
    pub fn enter_long() -> Self {
        Action::EnterLong(OrderSize::default())
    }

    /// Enter short with all available equity.
    pub fn enter_short() -> Self {
        Action::EnterShort(OrderSize::default())
    }

    /// Checks the size carried by entry actions.
    pub fn validate(&self) -> Result<(), String> {
        let size = match self {
            Action::EnterLong(size) | Action::EnterShort(size) => size,
            _ => return Ok(()),
        };

        match size {
            OrderSize::Fraction(f) if f.is_finite() && *f > 0.0 && *f <= 1.0 => Ok(()),
            OrderSize::Units(q) if q.is_finite() && *q > 0.0 => Ok(()),
            other => Err(format!("invalid order size {:?}", other)),
        }
    }
}

/// What a strategy sees when deciding on a bar.
#[derive(Debug, Clone, Copy)]
pub struct StrategyContext<'a> {
    /// Bars up to and including the current one.
    pub history: &'a [data_handler::MarketBar],
    /// Signed quantity held.
    pub position: f64,
    pub cash: f64,
    /// Mark-to-market equity at the current bar's close.
    pub equity: f64,
}

impl<'a> StrategyContext<'a> {
    pub fn current_bar(&self) -> Option<&'a data_handler::MarketBar> {
        self.history.last()
    }

    pub fn bar_index(&self) -> usize {
        self.history.len().saturating_sub(1)
    }

    /// Last `n` closes, oldest first. Shorter when less history is available.
    pub fn closes(&self, n: usize) -> Vec<f64> {
        self.tail(n).iter().map(|bar| bar.close).collect()
    }

    pub fn highs(&self, n: usize) -> Vec<f64> {
        self.tail(n).iter().map(|bar| bar.high).collect()
    }

    pub fn lows(&self, n: usize) -> Vec<f64> {
        self.tail(n).iter().map(|bar| bar.low).collect()
    }

    pub fn is_flat(&self) -> bool {
        self.position == 0.0
    }

    pub fn is_long(&self) -> bool {
        self.position > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.position < 0.0
    }

    fn tail(&self, n: usize) -> &'a [data_handler::MarketBar] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }
}

/// Main strategy trait.
/// All trading strategies must implement this trait.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Minimum number of bars the decision function needs. Earlier bars are only marked to market.
    fn warmup_bars(&self) -> usize {
        1
    }

    /// Decides the action for the last bar of `ctx.history`.
    fn next(&mut self, ctx: &StrategyContext<'_>) -> anyhow::Result<Action>;
}

/// Builds a strategy instance from a complete parameter set.
pub type StrategyFactory = fn(&ParameterSet) -> anyhow::Result<Box<dyn Strategy>>;

/// Registration record of a statically linked strategy.
#[derive(Debug, Clone)]
pub struct StrategyDescriptor {
    name: String,
    version: String,
    description: String,
    defaults: ParameterSet,
    factory: StrategyFactory,
}

impl StrategyDescriptor {
    pub fn new(name: &str, factory: StrategyFactory) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            defaults: ParameterSet::new(),
            factory,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_defaults(mut self, defaults: ParameterSet) -> Self {
        self.defaults = defaults;
        self
    }

    /// Builds a fresh instance with `overrides` merged over the declared defaults.
    pub fn build(&self, overrides: &ParameterSet) -> Result<Box<dyn Strategy>, AlgoError> {
        let params = ParameterSet::merged(&self.defaults, overrides)?;
        self.build_exact(&params)
    }

    /// Builds a fresh instance from an already merged parameter set.
    pub fn build_exact(&self, params: &ParameterSet) -> Result<Box<dyn Strategy>, AlgoError> {
        (self.factory)(params).map_err(|e| {
            AlgoError::invalid(format!(
                "cannot build strategy '{}' with {}: {:#}",
                self.name,
                params.format_for_display(),
                e
            ))
        })
    }

    /// --- Getters ---
    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_version(&self) -> &str {
        &self.version
    }

    pub fn get_description(&self) -> &str {
        &self.description
    }

    pub fn get_defaults(&self) -> &ParameterSet {
        &self.defaults
    }
}

/// Explicit registry of the strategies linked into the program.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    descriptors: Vec<StrategyDescriptor>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self { descriptors: Vec::new() }
    }

    /// Adds a descriptor. Names are unique.
    pub fn register(&mut self, descriptor: StrategyDescriptor) -> Result<(), AlgoError> {
        if self.get(descriptor.get_name()).is_some() {
            return Err(AlgoError::invalid(format!(
                "strategy '{}' is already registered",
                descriptor.get_name()
            )));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StrategyDescriptor> {
        self.descriptors.iter().find(|d| d.get_name() == name)
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &StrategyDescriptor> {
        self.descriptors.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.get_name()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
