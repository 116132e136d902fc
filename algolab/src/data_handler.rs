// algolab/src/data_handler.rs

//! File-backed price data.
//!
//! `CsvDataProvider` reads exported bar files named `*_{SYMBOL}_{INTERVAL}_*.csv`.
//! `SeriesStore` keeps one bincode file per symbol and interval and reads it back through a
//! memory map; the import mode fills it from CSV.

use anyhow::Context;

use algolab_core::data_handler::{DataProvider, MarketBar, PriceSeries, SeriesRequest};
use algolab_core::error::AlgoError;

const TIMESTAMP_COLUMNS: [&str; 3] = ["date", "datetime", "timestamp"];

/// Column positions resolved from a CSV header.
struct ColumnMap {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord, path: &std::path::Path) -> Result<Self, AlgoError> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
        let find = |name: &str| names.iter().position(|h| h == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| {
                AlgoError::invalid(format!("{}: missing required column '{}'", path.display(), name))
            })
        };

        let timestamp = TIMESTAMP_COLUMNS.iter().find_map(|name| find(*name)).ok_or_else(|| {
            AlgoError::invalid(format!(
                "{}: missing timestamp column (one of {})",
                path.display(),
                TIMESTAMP_COLUMNS.join(", ")
            ))
        })?;

        Ok(Self {
            timestamp,
            open: require("open")?,
            high: require("high")?,
            low: require("low")?,
            close: require("close")?,
            volume: find("volume"),
        })
    }
}

/// Reads bar files from a data directory.
#[derive(Debug, Clone)]
pub struct CsvDataProvider {
    data_dir: std::path::PathBuf,
}

impl CsvDataProvider {
    pub fn new(data_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Files whose name matches `*_{SYMBOL}_{INTERVAL}_*.csv`, compared case-insensitively.
    pub fn find_files(&self, symbol: &str, interval: &str) -> Result<Vec<std::path::PathBuf>, AlgoError> {
        let needle = format!("_{}_{}_", symbol.to_uppercase(), interval.to_uppercase());
        let mut files = Vec::new();

        if !self.data_dir.is_dir() {
            return Ok(files);
        }

        for item in std::fs::read_dir(&self.data_dir)? {
            let path = item?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let upper = format!("_{}", file_name.to_uppercase());
            if upper.ends_with(".CSV") && upper.contains(&needle) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Parses every row of one CSV file.
    pub fn read_file(path: &std::path::Path) -> Result<Vec<MarketBar>, AlgoError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| AlgoError::invalid(format!("{}: {}", path.display(), e)))?;

        let headers = reader
            .headers()
            .map_err(|e| AlgoError::invalid(format!("{}: {}", path.display(), e)))?
            .clone();
        let columns = ColumnMap::from_headers(&headers, path)?;

        let mut bars = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|e| AlgoError::invalid(format!("{}: {}", path.display(), e)))?;
            let bar = parse_row(&record, &columns)
                .map_err(|e| AlgoError::invalid(format!("{} row {}: {:#}", path.display(), row + 1, e)))?;
            bars.push(bar);
        }

        tracing::debug!(file = %path.display(), bars = bars.len(), "csv file read");
        Ok(bars)
    }

    /// Reads one file as a complete, validated series.
    ///
    /// # Arguments
    /// * `path` - CSV file with a header row.
    /// * `symbol` - Symbol recorded on the series.
    /// * `interval` - Interval recorded on the series.
    pub fn load_file(path: &std::path::Path, symbol: &str, interval: &str) -> Result<PriceSeries, AlgoError> {
        let mut bars = Self::read_file(path)?;
        bars.sort_by_key(|bar| bar.datetime);
        PriceSeries::new(symbol, interval, bars)
    }
}

impl DataProvider for CsvDataProvider {
    fn load(&self, request: &SeriesRequest) -> Result<PriceSeries, AlgoError> {
        let files = self.find_files(&request.symbol, &request.interval)?;
        if files.is_empty() {
            return Err(request.not_found());
        }

        let mut bars = Vec::new();
        for path in &files {
            bars.extend(Self::read_file(path)?);
        }
        bars.sort_by_key(|bar| bar.datetime);

        let series = PriceSeries::new(request.symbol.as_str(), request.interval.as_str(), bars)?;
        let selected = series.between(request.start, request.end);

        tracing::info!(
            symbol = %request.symbol,
            interval = %request.interval,
            files = files.len(),
            bars = selected.len(),
            "price series loaded from csv"
        );
        Ok(selected)
    }
}

fn parse_row(record: &csv::StringRecord, columns: &ColumnMap) -> anyhow::Result<MarketBar> {
    let field = |index: usize, name: &str| {
        record
            .get(index)
            .with_context(|| format!("missing field '{}'", name))
    };
    let number = |index: usize, name: &str| -> anyhow::Result<f64> {
        let text = field(index, name)?;
        text.parse::<f64>()
            .with_context(|| format!("'{}' is not a number in column '{}'", text, name))
    };

    let datetime = algolab_core::utils::parse_timestamp(field(columns.timestamp, "timestamp")?)?;
    let mut bar = MarketBar::new(
        datetime,
        number(columns.open, "open")?,
        number(columns.high, "high")?,
        number(columns.low, "low")?,
        number(columns.close, "close")?,
    );

    if let Some(index) = columns.volume {
        let text = field(index, "volume")?;
        if !text.is_empty() {
            let volume = match text.parse::<u64>() {
                Ok(v) => v,
                Err(_) => {
                    let v = text
                        .parse::<f64>()
                        .with_context(|| format!("'{}' is not a volume", text))?;
                    if !v.is_finite() || v < 0.0 {
                        anyhow::bail!("'{}' is not a volume", text);
                    }
                    v.round() as u64
                }
            };
            bar = bar.with_volume(volume);
        }
    }

    anyhow::Ok(bar)
}

/// Binary series store: one `{SYMBOL}_{INTERVAL}.bin` file per series.
#[derive(Debug, Clone)]
pub struct SeriesStore {
    root: std::path::PathBuf,
}

impl SeriesStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, symbol: &str, interval: &str) -> std::path::PathBuf {
        self.root.join(format!(
            "{}_{}.bin",
            symbol.trim().to_uppercase(),
            interval.trim().to_uppercase()
        ))
    }

    /// Writes `series`, replacing any stored copy.
    pub fn save(&self, series: &PriceSeries) -> anyhow::Result<std::path::PathBuf> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;

        let path = self.path_for(series.get_symbol(), series.get_interval());
        let tmp_path = path.with_extension("bin.tmp");
        {
            let file = std::fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            bincode::serialize_into(&mut writer, series)
                .with_context(|| format!("Failed to encode {}", tmp_path.display()))?;
            std::io::Write::flush(&mut writer)?;
        }
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to move {} into place", tmp_path.display()))?;

        tracing::info!(file = %path.display(), bars = series.len(), "series stored");
        anyhow::Ok(path)
    }

    /// Reads a stored series, `None` when nothing is stored for the key.
    pub fn read(&self, symbol: &str, interval: &str) -> anyhow::Result<Option<PriceSeries>> {
        let path = self.path_for(symbol, interval);
        if !path.is_file() {
            return anyhow::Ok(None);
        }

        let file = std::fs::File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        // SAFETY: the store only replaces files by rename, so a mapped file is never truncated in place.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .with_context(|| format!("Failed to map {}", path.display()))?;
        let series: PriceSeries = bincode::deserialize(&mmap[..])
            .with_context(|| format!("Failed to decode {}", path.display()))?;
        series
            .validate()
            .with_context(|| format!("Corrupt series in {}", path.display()))?;

        anyhow::Ok(Some(series))
    }
}

impl DataProvider for SeriesStore {
    fn load(&self, request: &SeriesRequest) -> Result<PriceSeries, AlgoError> {
        let series = self
            .read(&request.symbol, &request.interval)
            .map_err(|e| AlgoError::invalid(format!("{:#}", e)))?
            .ok_or_else(|| request.not_found())?;

        let selected = series.between(request.start, request.end);
        tracing::info!(
            symbol = %request.symbol,
            interval = %request.interval,
            bars = selected.len(),
            "price series loaded from store"
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("algolab_data_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn date(y: i32, m: u32, d: u32) -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn request(start: chrono::NaiveDate, end: chrono::NaiveDate) -> SeriesRequest {
        SeriesRequest::new("btcusd", "1D", start, end).unwrap()
    }

    const CSV: &str = "Date,Open,High,Low,Close,Volume\n\
        2024-01-03,102,104,101,103,1500\n\
        2024-01-01,100,101,99,100.5,1000\n\
        2024-01-02,100.5,103,100,102,1200.0\n";

    #[test]
    fn loads_matching_files_sorted_and_sliced() {
        let dir = temp_dir("csv");
        std::fs::write(dir.join("binance_BTCUSD_1d_2024.csv"), CSV).unwrap();
        std::fs::write(dir.join("binance_ETHUSD_1d_2024.csv"), "garbage").unwrap();

        let provider = CsvDataProvider::new(&dir);
        let series = provider.load(&request(date(2024, 1, 1), date(2024, 1, 31))).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.get_symbol(), "BTCUSD");
        assert_eq!(series.closes(), vec![100.5, 102.0, 103.0]);
        assert_eq!(series.get_bars()[1].volume, Some(1200));

        let sliced = provider.load(&request(date(2024, 1, 2), date(2024, 1, 2))).unwrap();
        assert_eq!(sliced.len(), 1);

        let empty = provider.load(&request(date(2023, 1, 1), date(2023, 12, 31))).unwrap();
        assert!(empty.is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_files_are_data_not_found() {
        let dir = temp_dir("missing");
        let err = CsvDataProvider::new(&dir)
            .load(&request(date(2024, 1, 1), date(2024, 1, 31)))
            .unwrap_err();
        assert!(matches!(err, AlgoError::DataNotFound { .. }));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_column_is_invalid_input() {
        let dir = temp_dir("columns");
        std::fs::write(dir.join("x_BTCUSD_1D_a.csv"), "timestamp,open,high,close\n2024-01-01,1,2,1.5\n").unwrap();
        let err = CsvDataProvider::new(&dir)
            .load(&request(date(2024, 1, 1), date(2024, 1, 31)))
            .unwrap_err();
        assert!(matches!(err, AlgoError::InvalidInput(ref m) if m.contains("'low'")));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn broken_bar_names_the_offending_bar() {
        let dir = temp_dir("broken");
        std::fs::write(
            dir.join("x_BTCUSD_1D_a.csv"),
            "datetime,open,high,low,close\n2024-01-01 00:00:00,10,11,9,10\n2024-01-02 00:00:00,10,9,8,12\n",
        )
        .unwrap();
        let err = CsvDataProvider::new(&dir)
            .load(&request(date(2024, 1, 1), date(2024, 1, 31)))
            .unwrap_err();
        assert!(err.to_string().contains("bar 1"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn store_round_trips_through_memory_map() {
        let dir = temp_dir("store");
        std::fs::write(dir.join("a_BTCUSD_1D_b.csv"), CSV).unwrap();
        let series = CsvDataProvider::load_file(&dir.join("a_BTCUSD_1D_b.csv"), "BTCUSD", "1d").unwrap();

        let store = SeriesStore::new(dir.join("store"));
        let path = store.save(&series).unwrap();
        assert!(path.ends_with("BTCUSD_1D.bin"));

        let loaded = store.load(&request(date(2024, 1, 2), date(2024, 1, 3))).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get_bars(), &series.get_bars()[1..]);

        let err = store
            .load(&SeriesRequest::new("ETHUSD", "1d", date(2024, 1, 1), date(2024, 1, 2)).unwrap())
            .unwrap_err();
        assert!(matches!(err, AlgoError::DataNotFound { .. }));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
