use deckpool::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());
    let _telemetry_guard = init_tracing(&cli);

    if let Err(e) = cli::run(cli) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

fn init_tracing(cli: &cli::Cli) -> telemetry::TelemetryGuard {
    let cfg = match cli::load_config(cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config load failed, using defaults: {err}");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    let telemetry_cfg = telemetry::TelemetryConfig::new(cli.verbose, cfg.logging);
    telemetry::init(telemetry_cfg)
}
