use anyhow::Result;
use clap::{builder::PossibleValuesParser, value_parser};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Clone)]
pub struct AppArgs {
    pub config_file: String,
    pub config_test: bool,
    pub log_level: String,
}

pub fn parse_args() -> Result<AppArgs> {
    let args = app_args(&command().get_matches());
    init_logging(&args.log_level)?;
    Ok(args)
}

fn command() -> clap::Command {
    clap::Command::new("roulette-rs")
        .version(crate::VERSION)
        .arg(
            clap::Arg::new("config")
                .short('c')
                .long("config")
                .help("Config filename")
                .default_value("config.yaml")
                .value_parser(value_parser!(String))
                .num_args(1),
        )
        .arg(
            clap::Arg::new("log-level")
                .short('l')
                .long("log")
                .help("Set log level")
                .value_parser(PossibleValuesParser::new([
                    "erro", "warn", "info", "debug", "trace",
                ]))
                .num_args(1),
        )
        .arg(
            clap::Arg::new("config-check")
                .short('t')
                .long("test")
                .help("Load and check config file then exits")
                .action(clap::ArgAction::SetTrue),
        )
}

fn app_args(args: &clap::ArgMatches) -> AppArgs {
    let config_file = args
        .get_one("config")
        .map(String::as_str)
        .unwrap_or("config.yaml")
        .to_string();
    let config_test = args.get_flag("config-check");
    let log_level = args
        .get_one("log-level")
        .map(String::as_str)
        .unwrap_or("info")
        .to_string();
    AppArgs {
        config_file,
        config_test,
        log_level,
    }
}

/// Map a `--log` value to a tracing filter directive.
fn level_directive(log_level: &str) -> &str {
    match log_level {
        "erro" => "error",
        level => level,
    }
}

pub fn init_logging(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(level_directive(log_level).parse()?)
                .from_env()?,
        )
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::Directive;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("erro"), "error");
        assert_eq!(level_directive("debug"), "debug");
    }

    #[test]
    fn test_all_cli_levels_parse() {
        for level in ["erro", "warn", "info", "debug", "trace"] {
            assert!(level_directive(level).parse::<Directive>().is_ok());
        }
    }

    #[test]
    fn test_app_args_defaults() {
        let args = app_args(&command().get_matches_from(["roulette-rs"]));
        assert_eq!(args.config_file, "config.yaml");
        assert!(!args.config_test);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_app_args_from_flags() {
        let matches = command().get_matches_from(["roulette-rs", "-c", "chat.yaml", "-l", "erro", "-t"]);
        let args = app_args(&matches);
        assert_eq!(args.config_file, "chat.yaml");
        assert!(args.config_test);
        assert_eq!(args.log_level, "erro");
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        assert!(
            command()
                .try_get_matches_from(["roulette-rs", "-l", "loud"])
                .is_err()
        );
    }
}
