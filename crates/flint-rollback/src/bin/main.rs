use flint_rollback::{cli, config, paths, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());
    let loaded = config::load_or_init_deferred();
    let cfg = &loaded.config;

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| paths::data_dir(cfg.paths.data_dir.as_deref()));
    let telemetry_cfg =
        telemetry::TelemetryConfig::new(cli.verbose, cfg.logging.clone(), paths::log_dir(&data_dir));
    let _telemetry_guard = telemetry::init(telemetry_cfg);
    loaded.emit_warnings();

    if let Err(e) = cli::run(cli, cfg) {
        tracing::error!("error: {e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
