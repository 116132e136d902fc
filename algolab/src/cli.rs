// algolab/src/cli.rs

/// What the driver does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Backtest,
    Optimize,
    /// Converts CSV bars into the binary series store.
    Import,
}

impl RunMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "backtest" => Some(RunMode::Backtest),
            "optimize" => Some(RunMode::Optimize),
            "import" => Some(RunMode::Import),
            _ => None,
        }
    }
}

impl From<algolab_core::settings::Mode> for RunMode {
    fn from(mode: algolab_core::settings::Mode) -> Self {
        match mode {
            algolab_core::settings::Mode::Backtest => RunMode::Backtest,
            algolab_core::settings::Mode::Optimize => RunMode::Optimize,
        }
    }
}

/// Structure representing command-line arguments.
#[derive(Debug, Default)]
pub struct Args {
    /// Settings file. Interactive prompts are used when absent.
    pub config: Option<std::path::PathBuf>,
    /// Overrides the mode of the settings file.
    pub mode: Option<RunMode>,
    pub strategies: Option<String>,
    pub data: Option<String>,
    pub output: Option<String>,
    pub log_level: Option<String>,
    /// CSV file read by the import mode.
    pub csv: Option<std::path::PathBuf>,
}

/// Command-line arguments parser using Clap.
impl Args {
    /// Parses command-line arguments using `clap`.
    ///
    /// # Returns
    /// * `Args` - Struct containing parsed arguments.
    ///
    /// # Errors
    /// * Exits with a usage message if arguments are missing or invalid.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    fn command() -> clap::Command {
        clap::Command::new("algolab")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Bar-by-bar strategy backtester and grid optimizer")
            .arg(
                clap::Arg::new("config")
                    .short('c')
                    .long("config")
                    .help("Path to the settings.json configuration file; prompts interactively when omitted")
                    .num_args(1),
            )
            .arg(
                clap::Arg::new("mode")
                    .short('m')
                    .long("mode")
                    .help("Run mode")
                    .value_parser(["backtest", "optimize", "import"])
                    .ignore_case(true)
                    .num_args(1),
            )
            .arg(
                clap::Arg::new("strategies")
                    .long("strategies")
                    .help("Directory of strategy manifests")
                    .num_args(1),
            )
            .arg(
                clap::Arg::new("data")
                    .long("data")
                    .help("Directory of price data")
                    .num_args(1),
            )
            .arg(
                clap::Arg::new("output")
                    .long("output")
                    .help("Directory for result files")
                    .num_args(1),
            )
            .arg(
                clap::Arg::new("log-level")
                    .long("log-level")
                    .help("Log filter, e.g. info or algolab_core=debug; ALGOLAB_LOG takes precedence")
                    .num_args(1),
            )
            .arg(
                clap::Arg::new("csv")
                    .long("csv")
                    .help("CSV file to import into the series store")
                    .num_args(1),
            )
    }

    fn from_matches(matches: &clap::ArgMatches) -> Self {
        let string = |id: &str| matches.get_one::<String>(id).cloned();

        Args {
            config: string("config").map(Into::into),
            mode: string("mode").as_deref().and_then(RunMode::parse),
            strategies: string("strategies"),
            data: string("data"),
            output: string("output"),
            log_level: string("log-level"),
            csv: string("csv").map(Into::into),
        }
    }
}
