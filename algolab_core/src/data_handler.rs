// algolab_core/src/data_handler.rs

//! Market data primitives: OHLCV bars, validated price series and the provider seam
//! through which the binary plugs in file-backed sources.

use crate::error::AlgoError;

/// One OHLCV sample for a fixed time interval.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MarketBar {
    pub datetime: chrono::DateTime<chrono::Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<u64>,
}

impl MarketBar {
    /// Creates a bar without volume.
    pub fn new(
        datetime: chrono::DateTime<chrono::Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume: None,
        }
    }

    pub fn with_volume(mut self, volume: u64) -> Self {
        self.volume = Some(volume);
        self
    }

    fn check(&self) -> Result<(), String> {
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{} must be a positive number, got {}", name, value));
            }
        }

        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(format!(
                "expected low <= min(open, close) <= max(open, close) <= high, got o={} h={} l={} c={}",
                self.open, self.high, self.low, self.close
            ));
        }

        Ok(())
    }
}

/// Ordered bars for one symbol/interval. Immutable once built.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PriceSeries {
    symbol: String,
    interval: String,
    bars: Vec<MarketBar>,
}

impl PriceSeries {
    /// Builds a series and validates it.
    ///
    /// # Arguments
    /// * `symbol` - Traded instrument, e.g. `BTCUSD`.
    /// * `interval` - Bar interval label, e.g. `1d`.
    /// * `bars` - Bars in chronological order.
    ///
    /// # Returns
    /// * `InvalidInput` naming the first offending bar when an invariant is broken.
    pub fn new(
        symbol: impl Into<String>,
        interval: impl Into<String>,
        bars: Vec<MarketBar>,
    ) -> Result<Self, AlgoError> {
        let series = Self {
            symbol: symbol.into(),
            interval: interval.into(),
            bars,
        };
        series.validate()?;
        Ok(series)
    }

    /// Re-checks bar invariants and strict timestamp ordering.
    pub fn validate(&self) -> Result<(), AlgoError> {
        for (index, bar) in self.bars.iter().enumerate() {
            bar.check().map_err(|reason| {
                AlgoError::invalid(format!("{} bar {} ({}): {}", self.symbol, index, bar.datetime, reason))
            })?;
        }

        for (index, pair) in self.bars.windows(2).enumerate() {
            if pair[1].datetime <= pair[0].datetime {
                return Err(AlgoError::invalid(format!(
                    "{} timestamps must be strictly increasing: bar {} ({}) follows {}",
                    self.symbol,
                    index + 1,
                    pair[1].datetime,
                    pair[0].datetime
                )));
            }
        }

        Ok(())
    }

    /// Returns the bars whose calendar date falls in `[start, end]`.
    pub fn between(&self, start: chrono::NaiveDate, end: chrono::NaiveDate) -> PriceSeries {
        let bars = self
            .bars
            .iter()
            .filter(|bar| {
                let date = bar.datetime.date_naive();
                date >= start && date <= end
            })
            .cloned()
            .collect();

        PriceSeries {
            symbol: self.symbol.clone(),
            interval: self.interval.clone(),
            bars,
        }
    }

    /// --- Getters ---
    pub fn get_symbol(&self) -> &str {
        &self.symbol
    }

    pub fn get_interval(&self) -> &str {
        &self.interval
    }

    pub fn get_bars(&self) -> &[MarketBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|bar| bar.close).collect()
    }

    pub fn first_close(&self) -> Option<f64> {
        self.bars.first().map(|bar| bar.close)
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|bar| bar.close)
    }
}

/// Identifies a series by symbol, interval and inclusive date range.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRequest {
    pub symbol: String,
    pub interval: String,
    pub start: chrono::NaiveDate,
    pub end: chrono::NaiveDate,
}

impl SeriesRequest {
    pub fn new(
        symbol: &str,
        interval: &str,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Self, AlgoError> {
        if symbol.trim().is_empty() {
            return Err(AlgoError::invalid("symbol cannot be empty"));
        }
        if interval.trim().is_empty() {
            return Err(AlgoError::invalid("interval cannot be empty"));
        }
        if start > end {
            return Err(AlgoError::invalid(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }

        Ok(Self {
            symbol: symbol.trim().to_uppercase(),
            interval: interval.trim().to_lowercase(),
            start,
            end,
        })
    }

    pub fn not_found(&self) -> AlgoError {
        AlgoError::DataNotFound {
            symbol: self.symbol.clone(),
            interval: self.interval.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

/// Source of price series keyed by symbol, interval and date range.
pub trait DataProvider {
    /// Loads the bars of `request`.
    ///
    /// Fails with `DataNotFound` when nothing matches the symbol/interval; a matching source
    /// with no bars in range yields an empty series.
    fn load(&self, request: &SeriesRequest) -> Result<PriceSeries, AlgoError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).single().unwrap()
    }

    fn bar(d: u32, close: f64) -> MarketBar {
        MarketBar::new(day(d), close, close + 1.0, close - 1.0, close)
    }

    #[test]
    fn accepts_well_formed_series() {
        let series = PriceSeries::new("BTCUSD", "1d", vec![bar(1, 10.0), bar(2, 11.0)]).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.first_close(), Some(10.0));
        assert_eq!(series.last_close(), Some(11.0));
    }

    #[test]
    fn rejects_duplicate_timestamps() {
        let err = PriceSeries::new("BTCUSD", "1d", vec![bar(1, 10.0), bar(1, 11.0)]).unwrap_err();
        assert!(matches!(err, AlgoError::InvalidInput(_)));
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn rejects_inconsistent_ohlc() {
        let broken = MarketBar::new(day(1), 10.0, 9.0, 8.0, 9.5);
        let err = PriceSeries::new("BTCUSD", "1d", vec![broken]).unwrap_err();
        assert!(err.to_string().contains("bar 0"));
    }

    #[test]
    fn rejects_non_positive_prices() {
        let broken = MarketBar::new(day(1), 0.0, 1.0, 0.0, 1.0);
        assert!(PriceSeries::new("BTCUSD", "1d", vec![broken]).is_err());
    }

    #[test]
    fn between_is_inclusive() {
        let series = PriceSeries::new(
            "BTCUSD",
            "1d",
            (1..=5).map(|d| bar(d, 10.0 + d as f64)).collect(),
        )
        .unwrap();
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let end = chrono::NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        let window = series.between(start, end);
        assert_eq!(window.len(), 3);
        assert_eq!(window.first_close(), Some(12.0));
        assert_eq!(window.last_close(), Some(14.0));
    }

    #[test]
    fn request_rejects_reversed_range() {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let end = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(SeriesRequest::new("btcusd", "1d", start, end).is_err());

        let ok = SeriesRequest::new("btcusd", "1D", end, start).unwrap();
        assert_eq!(ok.symbol, "BTCUSD");
        assert_eq!(ok.interval, "1d");
    }
}
