// strategy_lib/src/lib.rs

//! Strategies linked into the platform, and the registry that exposes them.

use algolab_core::error::AlgoError;
use algolab_core::indicators;
use algolab_core::strategy::{
    Action, ParamValue, ParameterSet, Strategy, StrategyContext, StrategyDescriptor, StrategyRegistry,
};

/// Builds the registry of every strategy in this crate, in a stable order.
pub fn registry() -> Result<StrategyRegistry, AlgoError> {
    let mut registry = StrategyRegistry::new();
    registry.register(MovingAverageCrossStrategy::descriptor())?;
    registry.register(UpDownTickStrategy::descriptor())?;
    registry.register(BreakoutStrategy::descriptor())?;
    Ok(registry)
}

/// A simple moving average crossover strategy.
/// Goes long when the short SMA is above the long SMA and exits when it falls below.
pub struct MovingAverageCrossStrategy {
    /// The window size for the short-term Simple Moving Average (SMA).
    short_window: usize,
    /// The window size for the long-term Simple Moving Average (SMA).
    long_window: usize,
}

impl MovingAverageCrossStrategy {
    pub const NAME: &'static str = "sma_cross";

    /// Creates a new instance from `short_window` and `long_window`.
    ///
    /// Windows in either order are accepted so that every grid point is a valid strategy;
    /// only zero windows are rejected.
    pub fn new(params: &ParameterSet) -> anyhow::Result<Self> {
        let short_window = params.get_usize("short_window")?;
        let long_window = params.get_usize("long_window")?;

        if short_window == 0 || long_window == 0 {
            anyhow::bail!(
                "SMA windows must be positive, got short_window={} long_window={}",
                short_window,
                long_window
            );
        }

        anyhow::Ok(Self {
            short_window,
            long_window,
        })
    }

    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor::new(Self::NAME, |params| Ok(Box::new(Self::new(params)?)))
            .with_version("1.0.0")
            .with_description("Long while the short SMA of closes is above the long SMA")
            .with_defaults(
                ParameterSet::new()
                    .with_param("short_window", ParamValue::Int(10))
                    .with_param("long_window", ParamValue::Int(20)),
            )
    }
}

impl Strategy for MovingAverageCrossStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn warmup_bars(&self) -> usize {
        self.short_window.max(self.long_window)
    }

    fn next(&mut self, ctx: &StrategyContext<'_>) -> anyhow::Result<Action> {
        let closes = ctx.closes(self.warmup_bars());

        let (Some(short_sma), Some(long_sma)) = (
            indicators::sma(&closes, self.short_window),
            indicators::sma(&closes, self.long_window),
        ) else {
            return anyhow::Ok(Action::Hold);
        };

        let action = if ctx.is_flat() && short_sma > long_sma {
            Action::enter_long()
        } else if ctx.is_long() && short_sma < long_sma {
            Action::ExitLong
        } else {
            Action::Hold
        };

        anyhow::Ok(action)
    }
}

/// Buys on an up-tick and sells on a down-tick.
/// A tick compares the close with the previous close, or with the bar's own open on the first bar.
pub struct UpDownTickStrategy;

impl UpDownTickStrategy {
    pub const NAME: &'static str = "up_down_tick";

    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor::new(Self::NAME, |_params| Ok(Box::new(UpDownTickStrategy)))
            .with_version("1.0.0")
            .with_description("Long after an up-tick, flat after a down-tick")
    }
}

impl Strategy for UpDownTickStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn next(&mut self, ctx: &StrategyContext<'_>) -> anyhow::Result<Action> {
        let Some(bar) = ctx.current_bar() else {
            return anyhow::Ok(Action::Hold);
        };

        let reference = match ctx.bar_index() {
            0 => bar.open,
            index => ctx.history[index - 1].close,
        };

        let action = if bar.close > reference && ctx.is_flat() {
            Action::enter_long()
        } else if bar.close < reference && ctx.is_long() {
            Action::ExitLong
        } else {
            Action::Hold
        };

        anyhow::Ok(action)
    }
}

/// Channel breakout, long and short.
/// Enters long when the close clears the highest high of the prior `lookback` bars by
/// `buffer_pct` percent, and short when it falls through the lowest low by the same margin.
/// An opposite breakout flips the position.
pub struct BreakoutStrategy {
    lookback: usize,
    buffer_pct: f64,
}

impl BreakoutStrategy {
    pub const NAME: &'static str = "breakout";

    pub fn new(params: &ParameterSet) -> anyhow::Result<Self> {
        let lookback = params.get_usize("lookback")?;
        let buffer_pct = params.get_f64("buffer_pct")?;

        if lookback == 0 {
            anyhow::bail!("'lookback' must be positive");
        }
        if !buffer_pct.is_finite() || buffer_pct < 0.0 {
            anyhow::bail!("'buffer_pct' must be a non-negative number, got {}", buffer_pct);
        }

        anyhow::Ok(Self { lookback, buffer_pct })
    }

    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor::new(Self::NAME, |params| Ok(Box::new(Self::new(params)?)))
            .with_version("1.0.0")
            .with_description("Trades breakouts of the prior high/low channel")
            .with_defaults(
                ParameterSet::new()
                    .with_param("lookback", ParamValue::Int(20))
                    .with_param("buffer_pct", ParamValue::Real(0.5)),
            )
    }
}

impl Strategy for BreakoutStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn warmup_bars(&self) -> usize {
        self.lookback + 1
    }

    fn next(&mut self, ctx: &StrategyContext<'_>) -> anyhow::Result<Action> {
        let Some(bar) = ctx.current_bar() else {
            return anyhow::Ok(Action::Hold);
        };

        let highs = ctx.highs(self.warmup_bars());
        let lows = ctx.lows(self.warmup_bars());
        let (Some(channel_high), Some(channel_low)) = (
            indicators::highest(&highs, self.lookback, 1),
            indicators::lowest(&lows, self.lookback, 1),
        ) else {
            return anyhow::Ok(Action::Hold);
        };

        let margin = self.buffer_pct / 100.0;
        let action = if bar.close > channel_high * (1.0 + margin) && !ctx.is_long() {
            Action::enter_long()
        } else if bar.close < channel_low * (1.0 - margin) && !ctx.is_short() {
            Action::enter_short()
        } else {
            Action::Hold
        };

        tracing::trace!(
            bar_index = ctx.bar_index(),
            channel_high,
            channel_low,
            close = bar.close,
            ?action,
            "breakout evaluated"
        );

        anyhow::Ok(action)
    }
}
