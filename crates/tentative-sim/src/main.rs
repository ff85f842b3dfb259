use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;
use tentative_core::EngineConfig;
use tentative_sim::{run_scenario, run_simulator, Scenario, SimulatorConfig};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("tentative-sim")
        .version(tentative_core::VERSION)
        .about("Optimistic change command simulator")
        .subcommand_required(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Output as JSON (logs and reports)"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a randomized workload and check invariants")
                .arg(
                    Arg::new("records")
                        .long("records")
                        .default_value("20")
                        .value_parser(value_parser!(u64))
                        .help("Number of records seeded before the run"),
                )
                .arg(
                    Arg::new("operations")
                        .long("operations")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Number of commands to submit"),
                )
                .arg(
                    Arg::new("tick-ms")
                        .long("tick-ms")
                        .value_parser(value_parser!(u64))
                        .help("Length of one countdown second in milliseconds"),
                )
                .arg(
                    Arg::new("grace")
                        .long("grace")
                        .value_parser(value_parser!(u64))
                        .help("Grace period in countdown seconds"),
                )
                .arg(
                    Arg::new("reject-rate")
                        .long("reject-rate")
                        .default_value("0.05")
                        .value_parser(value_parser!(f64))
                        .help("Share of commits the backing store rejects"),
                )
                .arg(
                    Arg::new("signal-rate")
                        .long("signal-rate")
                        .default_value("0.3")
                        .value_parser(value_parser!(f64))
                        .help("Share of commands that receive a redirect or cancel"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(std::path::PathBuf))
                        .help("Engine configuration file (TOML)"),
                ),
        )
        .subcommand(
            Command::new("scenario")
                .about("Run a named scenario")
                .arg(
                    Arg::new("name")
                        .required(true)
                        .value_parser(
                            Scenario::ALL
                                .iter()
                                .map(|s| s.name())
                                .chain(["all"])
                                .collect::<Vec<_>>(),
                        )
                        .help("Scenario to run"),
                )
                .arg(
                    Arg::new("tick-ms")
                        .long("tick-ms")
                        .default_value("100")
                        .value_parser(value_parser!(u64))
                        .help("Length of one countdown second in milliseconds"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective engine configuration as TOML")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .value_parser(value_parser!(std::path::PathBuf))
                        .help("Configuration file to load"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&std::path::PathBuf>) -> anyhow::Result<Option<EngineConfig>> {
    path.map(|path| {
        EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))
    })
    .transpose()
}

async fn simulate(args: &ArgMatches, json: bool) -> anyhow::Result<bool> {
    let mut config = SimulatorConfig {
        seed: *args.get_one::<u64>("seed").context("missing --seed")?,
        records: *args.get_one::<u64>("records").context("missing --records")?,
        operations: *args
            .get_one::<u64>("operations")
            .context("missing --operations")?,
        reject_rate: *args
            .get_one::<f64>("reject-rate")
            .context("missing --reject-rate")?,
        signal_rate: *args
            .get_one::<f64>("signal-rate")
            .context("missing --signal-rate")?,
        ..SimulatorConfig::default()
    };
    if let Some(engine) = load_config(args.get_one("config"))? {
        config.engine = engine;
    }
    if let Some(tick_ms) = args.get_one::<u64>("tick-ms") {
        config.engine.tick_ms = *tick_ms;
    }
    if let Some(grace) = args.get_one::<u64>("grace") {
        config.engine.grace_period_secs = *grace;
    }
    config.engine.validate()?;
    anyhow::ensure!(
        (0.0..=1.0).contains(&config.reject_rate) && (0.0..=1.0).contains(&config.signal_rate),
        "rates must lie between 0 and 1"
    );

    tracing::info!(seed = config.seed, operations = config.operations, "starting simulation");
    let report = run_simulator(config).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

async fn scenario(args: &ArgMatches, json: bool) -> anyhow::Result<bool> {
    let name = args
        .get_one::<String>("name")
        .context("missing scenario name")?;
    let tick = Duration::from_millis(*args.get_one::<u64>("tick-ms").context("missing --tick-ms")?);
    let scenarios = match Scenario::from_name(name) {
        Some(scenario) => vec![scenario],
        None => Scenario::ALL.to_vec(),
    };

    let mut passed = true;
    for scenario in scenarios {
        let outcome = run_scenario(scenario, tick).await?;
        passed &= outcome.passed;
        if json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        } else {
            println!("{}", outcome.generate_text());
        }
    }
    Ok(passed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let json = matches.get_flag("json");
    init_tracing(json);

    let passed = match matches.subcommand() {
        Some(("simulate", args)) => simulate(args, json).await?,
        Some(("scenario", args)) => scenario(args, json).await?,
        Some(("config", args)) => {
            let config = load_config(args.get_one("path"))?.unwrap_or_default();
            print!("{}", config.to_toml_string()?);
            true
        }
        _ => true,
    };

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn scenario_names_are_accepted() {
        let matches = cli()
            .try_get_matches_from(["tentative-sim", "scenario", "back-to-back"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "scenario");
        assert_eq!(args.get_one::<u64>("tick-ms"), Some(&100));
        assert!(cli()
            .try_get_matches_from(["tentative-sim", "scenario", "nope"])
            .is_err());
    }
}
