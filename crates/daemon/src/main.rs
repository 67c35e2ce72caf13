use daemon::{
    create_folder, get_config_info, save_sea_levels, save_stations, setup_logger, Cli,
};
use sealevel::{get_ioc_data, get_stations};
use slog::{debug, error, info, Logger};
use std::time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::time::interval;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = get_config_info();
    let logger = setup_logger(&cli);

    // Run once to start
    process_data(&cli, &logger).await?;

    // Run on the configured interval after
    process_data_on_interval(cli, logger).await;
    Ok(())
}

async fn process_data_on_interval(cli: Cli, logger: Logger) {
    let sleep_between_checks = cli.interval_hours() * 3600;
    let mut check_interval = interval(Duration::from_secs(sleep_between_checks));
    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                let mut retry_count = 0;
                while retry_count < 3 {
                    match process_data(&cli, &logger).await {
                        Ok(_) => {
                            break;
                        }
                        Err(err) => {
                            error!(&logger, "Error processing data (trying again): {}", err);
                            retry_count += 1;
                        }
                    }
                }
                if retry_count >= 3 {
                    error!(&logger, "Tried processing three times, giving up until next run: {}", OffsetDateTime::now_utc());
                }
            }
        }
    }
}

async fn process_data(cli: &Cli, logger: &Logger) -> Result<(), anyhow::Error> {
    let provider = cli.provider()?;
    let region = cli.bounding_box()?;

    let stations = get_stations(logger, provider, region).await?;
    debug!(logger, "stations: {}", stations.len());

    let current_utc_time: String = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let root_path = cli.data_dir();
    create_folder(&root_path, logger);

    let station_snapshot = save_stations(
        &stations,
        &root_path,
        format!("{}_{}", "stations", current_utc_time),
    )?;
    info!(logger, "wrote station snapshot: {}", station_snapshot);

    let codes = cli.ioc_station_codes();
    if codes.is_empty() {
        debug!(logger, "no ioc stations configured, skipping sea level pull");
        return Ok(());
    }

    let end = OffsetDateTime::now_utc();
    let start = end - time::Duration::days(1);
    let readings = get_ioc_data(logger, &codes, start, end).await?;
    debug!(logger, "readings: {}", readings.len());

    let sea_level_snapshot = save_sea_levels(
        &readings,
        &root_path,
        format!("{}_{}", "sea_levels", current_utc_time),
    )?;
    info!(logger, "wrote sea level snapshot: {}", sea_level_snapshot);
    Ok(())
}
