use clap::Parser;
use slog::{error, info, o, Drain, Level, Logger};
use std::{
    env,
    fs::{self, File},
    io::Read,
    path::Path,
};

use sealevel::{BoundingBox, Provider};

#[derive(Parser, Clone, Debug, serde::Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to Settings.toml file holding the rest of the cli options
    #[arg(short, long)]
    pub config: Option<String>,

    /// Set the log level (default: info)
    #[arg(short, long)]
    pub level: Option<String>,

    /// Folder snapshots are written to (default: ./data)
    #[arg(short, long)]
    pub data_dir: Option<String>,

    /// Hours between snapshot runs (default: 1)
    #[arg(short, long)]
    pub interval_hours: Option<u64>,

    /// Provider to pull stations from: all, coops, ioc or usgs (default: all)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Bounding box "west,south,east,north" limiting the station pull
    #[arg(short, long)]
    pub bbox: Option<String>,

    /// Comma separated IOC station codes to pull sea level readings for
    #[arg(short = 's', long)]
    pub ioc_stations: Option<String>,
}

impl Cli {
    pub fn data_dir(&self) -> String {
        self.data_dir.clone().unwrap_or_else(|| String::from("./data"))
    }

    pub fn interval_hours(&self) -> u64 {
        self.interval_hours.unwrap_or(1)
    }

    pub fn provider(&self) -> Result<Provider, anyhow::Error> {
        match self.provider.as_deref() {
            Some(raw) => Ok(raw.parse()?),
            None => Ok(Provider::All),
        }
    }

    pub fn bounding_box(&self) -> Result<Option<BoundingBox>, anyhow::Error> {
        match self.bbox.as_deref() {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    pub fn ioc_station_codes(&self) -> Vec<String> {
        self.ioc_stations
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|code| code.trim().to_lowercase())
            .filter(|code| !code.is_empty())
            .collect()
    }
}

pub fn get_config_info() -> Cli {
    let mut cli = Cli::parse();

    if let Some(config_path) = cli.config.clone() {
        if let Ok(mut file) = File::open(config_path) {
            let mut content = String::new();
            file.read_to_string(&mut content)
                .expect("Failed to read config file");
            cli = toml::from_str(&content).expect("Failed to deserialize config")
        };
    };
    cli
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let log_level = if cli.level.is_some() {
        let level = cli.level.as_ref().unwrap();
        match level.as_ref() {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" => Level::Warning,
            "error" => Level::Error,
            _ => Level::Info,
        }
    } else {
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| String::from(""));
        match rust_log.to_lowercase().as_str() {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" => Level::Warning,
            "error" => Level::Error,
            _ => Level::Info,
        }
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => "0.3"))
}

pub fn create_folder(root_path: &str, logger: &Logger) {
    let path = Path::new(root_path);

    if !path.exists() || !path.is_dir() {
        // Create the folder if it doesn't exist
        if let Err(err) = fs::create_dir_all(path) {
            error!(logger, "Error creating folder: {}", err);
        } else {
            info!(logger, "Folder created: {}", root_path);
        }
    } else {
        info!(logger, "Folder already exists: {}", root_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_cli() -> Cli {
        Cli {
            config: None,
            level: None,
            data_dir: None,
            interval_hours: None,
            provider: None,
            bbox: None,
            ioc_stations: None,
        }
    }

    #[test]
    fn defaults_apply_when_flags_are_missing() {
        let cli = empty_cli();
        assert_eq!(cli.data_dir(), "./data");
        assert_eq!(cli.interval_hours(), 1);
        assert_eq!(cli.provider().unwrap(), Provider::All);
        assert!(cli.bounding_box().unwrap().is_none());
        assert!(cli.ioc_station_codes().is_empty());
    }

    #[test]
    fn ioc_codes_are_trimmed_and_lowercased() {
        let mut cli = empty_cli();
        cli.ioc_stations = Some(String::from("ABAS, acnj ,,setp1"));
        assert_eq!(cli.ioc_station_codes(), vec!["abas", "acnj", "setp1"]);
    }

    #[test]
    fn provider_and_bbox_flags_parse() {
        let mut cli = empty_cli();
        cli.provider = Some(String::from("ioc"));
        cli.bbox = Some(String::from("-75.0,38.0,-70.0,42.0"));
        assert_eq!(cli.provider().unwrap(), Provider::Ioc);
        let bbox = cli.bounding_box().unwrap().unwrap();
        assert!(bbox.contains(-71.4, 41.8));

        cli.provider = Some(String::from("nope"));
        assert!(cli.provider().is_err());
    }

    #[test]
    fn config_file_overrides_flags() {
        let parsed: Cli = toml::from_str(
            r#"
            level = "debug"
            data_dir = "/tmp/snapshots"
            interval_hours = 6
            provider = "coops"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.level.as_deref(), Some("debug"));
        assert_eq!(parsed.data_dir(), "/tmp/snapshots");
        assert_eq!(parsed.interval_hours(), 6);
        assert_eq!(parsed.provider().unwrap(), Provider::Coops);
    }
}
