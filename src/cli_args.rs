use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::builder::RangedU64ValueParser;
use clap::Parser;
use fallback_breaker::{ProbeFailure, Settings};
use serde::Deserialize;

use crate::cli_helpers::ConfigError;

#[derive(Debug, Parser)]
#[command(name = "fallback-breaker", version)]
#[command(about = "Replay scripted task and fallback outcomes through a circuit breaker", long_about = None)]
pub struct Args {
	/// TOML file with breaker settings. Flags take precedence.
	#[arg(short = 'c', long = "config", value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Accumulated failures that trip the circuit open.
	#[arg(short = 'm', long = "max_error_count", value_name = "NUMBER")]
	pub max_error_count: Option<u32>,

	/// Cooldown in seconds before an open circuit may be probed.
	#[arg(short = 'r', long = "retry_interval", value_name = "SECONDS")]
	pub retry_interval: Option<u64>,

	/// What a failed probe does: hold_gate or reopen.
	#[arg(short = 'p', long = "probe_failure", value_name = "POLICY", value_parser = parse_probe_failure)]
	pub probe_failure: Option<ProbeFailure>,

	/// Stamp the trip time so an open circuit waits retry_interval.
	#[arg(long = "record_trip_time")]
	pub record_trip_time: bool,

	/// Zero the error counter when a probe closes the circuit.
	#[arg(long = "reset_count_on_close")]
	pub reset_count_on_close: bool,

	/// Task outcomes per call, `o` for success and `x` for failure, cycled.
	#[arg(short = 't', long = "task", value_name = "PATTERN", default_value = "x")]
	pub task: String,

	/// Fallback outcomes per call, cycled.
	#[arg(short = 'f', long = "fallback", value_name = "PATTERN", default_value = "o")]
	pub fallback: String,

	/// Number of calls to simulate.
	#[arg(short = 'n', long = "calls", value_name = "NUMBER", default_value_t = 8)]
	pub calls: usize,

	/// Number of recent calls kept for display.
	#[arg(
		short = 'b',
		long = "history",
		value_name = "SIZE",
		default_value_t = 12,
		value_parser = RangedU64ValueParser::<usize>::new().range(1..)
	)]
	pub history: usize,

	/// Boxes per rendered row.
	#[arg(
		short = 'w',
		long = "columns",
		value_name = "NUMBER",
		default_value_t = 4,
		value_parser = RangedU64ValueParser::<usize>::new().range(1..)
	)]
	pub columns: usize,

	/// Redraw after every call instead of once at the end.
	#[arg(short = 'a', long = "autoplay")]
	pub autoplay: bool,

	/// Delay between calls in autoplay mode.
	#[arg(short = 's', long = "step_ms", value_name = "MILLISECONDS", default_value_t = 500)]
	pub step_ms: u64,
}

#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
	pub max_error_count: Option<u32>,
	/// Seconds.
	pub retry_interval: Option<u64>,
	pub probe_failure: Option<ProbeFailure>,
	pub record_trip_time: Option<bool>,
	pub reset_count_on_close: Option<bool>,
}

impl FileConfig {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Ok(toml::from_str(&contents)?)
	}
}

fn parse_probe_failure(value: &str) -> Result<ProbeFailure, String> {
	match value {
		"hold_gate" => Ok(ProbeFailure::HoldGate),
		"reopen" => Ok(ProbeFailure::Reopen),
		other => Err(format!("unknown probe failure policy {other:?}, expected hold_gate or reopen")),
	}
}

pub fn merge_settings(args: &Args, file: FileConfig) -> Settings {
	let mut settings: Settings = Default::default();

	if let Some(count) = args.max_error_count.or(file.max_error_count) {
		settings.max_error_count = count;
	}
	if let Some(seconds) = args.retry_interval.or(file.retry_interval) {
		settings.retry_interval = Duration::from_secs(seconds);
	}
	if let Some(policy) = args.probe_failure.or(file.probe_failure) {
		settings.probe_failure = policy;
	}
	settings.record_trip_time = args.record_trip_time || file.record_trip_time.unwrap_or(false);
	settings.reset_count_on_close = args.reset_count_on_close || file.reset_count_on_close.unwrap_or(false);

	settings
}

pub fn load_settings(args: &Args) -> Result<Settings, ConfigError> {
	let file = match &args.config {
		Some(path) => FileConfig::load(path)?,
		None => FileConfig::default(),
	};
	Ok(merge_settings(args, file))
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;

	fn parse(args: &[&str]) -> Args {
		Args::try_parse_from(std::iter::once("fallback-breaker").chain(args.iter().copied())).unwrap()
	}

	fn try_parse(args: &[&str]) -> Result<Args, clap::Error> {
		Args::try_parse_from(std::iter::once("fallback-breaker").chain(args.iter().copied()))
	}

	#[test]
	fn parse_args_defaults() {
		let args = parse(&[]);
		assert_eq!(args.task, "x");
		assert_eq!(args.fallback, "o");
		assert_eq!(args.calls, 8);
		assert_eq!(args.history, 12);
		assert_eq!(args.columns, 4);
		assert!(!args.autoplay);
		assert_eq!(merge_settings(&args, FileConfig::default()), Settings::default());
	}

	#[test]
	fn parse_args_long_flags() {
		let args = parse(&[
			"--max_error_count",
			"42",
			"--retry_interval",
			"200",
			"--probe_failure",
			"reopen",
			"--record_trip_time",
			"--reset_count_on_close",
			"--task",
			"xxo",
			"--fallback",
			"ox",
			"--calls",
			"20",
			"--history",
			"6",
			"--columns",
			"3",
			"--autoplay",
			"--step_ms",
			"100",
		]);
		assert_eq!(args.task, "xxo");
		assert_eq!(args.fallback, "ox");
		assert_eq!(args.calls, 20);
		assert_eq!(args.history, 6);
		assert_eq!(args.columns, 3);
		assert!(args.autoplay);
		assert_eq!(args.step_ms, 100);
		assert_eq!(
			merge_settings(&args, FileConfig::default()),
			Settings {
				max_error_count: 42,
				retry_interval: Duration::from_secs(200),
				probe_failure: ProbeFailure::Reopen,
				record_trip_time: true,
				reset_count_on_close: true,
			}
		);
	}

	#[test]
	fn parse_args_short_flags() {
		let args = parse(&["-m", "0", "-r", "62", "-p", "hold_gate", "-t", "o", "-f", "x", "-n", "3", "-b", "1", "-w", "1", "-a", "-s", "0"]);
		assert_eq!(args.calls, 3);
		assert_eq!(args.history, 1);
		assert_eq!(
			merge_settings(&args, FileConfig::default()),
			Settings {
				max_error_count: 0,
				retry_interval: Duration::from_secs(62),
				..Default::default()
			}
		);
	}

	#[test]
	fn parse_args_errors() {
		assert!(try_parse(&["-m"]).is_err());
		assert!(try_parse(&["-m", "-9"]).is_err());
		assert!(try_parse(&["-r", "ten"]).is_err());
		assert!(try_parse(&["-p", "close"]).is_err());
		assert!(try_parse(&["--history", "0"]).is_err());
		assert!(try_parse(&["--columns", "0"]).is_err());
		assert!(try_parse(&["--unknown"]).is_err());
	}

	#[test]
	fn merge_settings_file_test() {
		let file: FileConfig = toml::from_str(
			r#"
max_error_count = 3
retry_interval = 5
probe_failure = "reopen"
record_trip_time = true
"#,
		)
		.unwrap();
		assert_eq!(
			merge_settings(&parse(&[]), file),
			Settings {
				max_error_count: 3,
				retry_interval: Duration::from_secs(5),
				probe_failure: ProbeFailure::Reopen,
				record_trip_time: true,
				reset_count_on_close: false,
			}
		);
	}

	#[test]
	fn merge_settings_flags_win_test() {
		let file = FileConfig {
			max_error_count: Some(3),
			retry_interval: Some(5),
			probe_failure: Some(ProbeFailure::Reopen),
			..Default::default()
		};
		let settings = merge_settings(&parse(&["-m", "9", "-p", "hold_gate"]), file);
		assert_eq!(settings.max_error_count, 9);
		assert_eq!(settings.retry_interval, Duration::from_secs(5));
		assert_eq!(settings.probe_failure, ProbeFailure::HoldGate);
	}

	#[test]
	fn file_config_errors() {
		assert!(toml::from_str::<FileConfig>("max_error_count = \"three\"").is_err());
		assert!(toml::from_str::<FileConfig>("buffer_size = 3").is_err());
		assert!(toml::from_str::<FileConfig>("probe_failure = \"close\"").is_err());
		assert_eq!(toml::from_str::<FileConfig>("").unwrap(), FileConfig::default());

		let missing = FileConfig::load(Path::new("/nonexistent/breaker.toml")).unwrap_err();
		assert!(matches!(missing, ConfigError::Read { .. }));
		assert!(missing.to_string().starts_with("failed to read config file /nonexistent/breaker.toml"));
	}

	#[test]
	fn help_test() {
		let settings = Settings::default();
		let debug_output = format!("{:#?}", settings);

		let field_names: Vec<_> = debug_output
			.lines()
			.skip(1)
			.filter_map(|line| line.trim().split_once(":").map(|(field, _)| field.trim()))
			.collect();

		let help = Args::command().render_long_help().to_string();
		for field in &field_names {
			assert!(help.contains(field), "Field name '{}' not found in help", field);
		}
	}
}
