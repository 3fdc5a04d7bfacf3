use std::cell::Cell;
use std::path::PathBuf;

use fallback_breaker::CircuitBreaker;
use thiserror::Error;
use tracing::debug;

use crate::visualizer::CallRecord;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config file: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("invalid {name} pattern {pattern:?}: {reason}")]
	Pattern {
		name: &'static str,
		pattern: String,
		reason: &'static str,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SimulatedFailure {
	#[error("task failed on call {0}")]
	Task(usize),

	#[error("fallback failed on call {0}")]
	Fallback(usize),
}

pub fn exit_with_error(error: &str, code: i32) -> ! {
	eprintln!("{error}");

	if cfg!(test) {
		panic!("error=\"{error}\" code=\"{code}\"");
	} else {
		std::process::exit(code);
	}
}

/// `o` succeeds, `x` fails; whitespace is ignored.
pub fn parse_pattern(name: &'static str, pattern: &str) -> Result<Vec<bool>, ConfigError> {
	let invalid = |reason: &'static str| ConfigError::Pattern {
		name,
		pattern: pattern.to_string(),
		reason,
	};

	let outcomes = pattern
		.chars()
		.filter(|c| !c.is_whitespace())
		.map(|c| match c {
			'o' | 'O' => Ok(true),
			'x' | 'X' => Ok(false),
			_ => Err(invalid("only 'o' and 'x' are allowed")),
		})
		.collect::<Result<Vec<_>, _>>()?;

	if outcomes.is_empty() {
		return Err(invalid("must not be empty"));
	}
	Ok(outcomes)
}

/// Scripted outcomes, cycled when a run has more calls than the pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
	task: Vec<bool>,
	fallback: Vec<bool>,
}

impl Script {
	pub fn new(task: &str, fallback: &str) -> Result<Self, ConfigError> {
		Ok(Self {
			task: parse_pattern("task", task)?,
			fallback: parse_pattern("fallback", fallback)?,
		})
	}

	pub fn run_call(&self, breaker: &CircuitBreaker, call: usize) -> CallRecord {
		let task_ok = self.task[call % self.task.len()];
		let fallback_ok = self.fallback[call % self.fallback.len()];
		let task_ran = Cell::new(None);
		let fallback_ran = Cell::new(None);

		let before = breaker.get_state();
		let result = breaker.handle(
			|| {
				task_ran.set(Some(task_ok));
				if task_ok {
					Ok(())
				} else {
					Err(SimulatedFailure::Task(call + 1))
				}
			},
			|| {
				fallback_ran.set(Some(fallback_ok));
				if fallback_ok {
					Ok(())
				} else {
					Err(SimulatedFailure::Fallback(call + 1))
				}
			},
		);
		if let Err(error) = &result {
			debug!(%error, "simulated call failed");
		}

		CallRecord {
			index: call + 1,
			before,
			after: breaker.get_state(),
			task: task_ran.get(),
			fallback: fallback_ran.get(),
			ok: result.is_ok(),
			error_count: breaker.get_error_count(),
			retrying: breaker.is_retrying(),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use fallback_breaker::State;
	use std::time::Duration;

	#[test]
	fn parse_pattern_test() {
		assert_eq!(parse_pattern("task", "o").unwrap(), vec![true]);
		assert_eq!(parse_pattern("task", "xXoO").unwrap(), vec![false, false, true, true]);
		assert_eq!(parse_pattern("task", " x o ").unwrap(), vec![false, true]);
	}

	#[test]
	fn parse_pattern_error_test() {
		assert!(matches!(
			parse_pattern("task", ""),
			Err(ConfigError::Pattern { reason: "must not be empty", .. })
		));
		assert!(matches!(
			parse_pattern("fallback", "  "),
			Err(ConfigError::Pattern { name: "fallback", .. })
		));
		assert_eq!(
			parse_pattern("task", "ox1").unwrap_err().to_string(),
			"invalid task pattern \"ox1\": only 'o' and 'x' are allowed"
		);
	}

	#[test]
	#[should_panic(expected = "code=\"3\"")]
	fn exit_with_error_test() {
		exit_with_error("boom", 3);
	}

	#[test]
	fn run_call_recorded_scenario_test() {
		let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
		let script = Script::new("x", "o").unwrap();
		let records: Vec<_> = (0..4).map(|call| script.run_call(&breaker, call)).collect();

		assert!(records.iter().all(|record| record.ok));
		assert_eq!(records.iter().filter(|record| record.task.is_some()).count(), 3);
		assert_eq!(records.iter().filter(|record| record.fallback.is_some()).count(), 4);
		assert_eq!(records[2].before, State::Closed);
		assert_eq!(records[2].after, State::Open);
		assert_eq!(
			records[3],
			CallRecord {
				index: 4,
				before: State::Open,
				after: State::HalfOpen,
				task: None,
				fallback: Some(true),
				ok: true,
				error_count: 0,
				retrying: false,
			}
		);
	}

	#[test]
	fn run_call_cycles_pattern_test() {
		let breaker = CircuitBreaker::new(100, Duration::from_secs(60));
		let script = Script::new("ox", "x").unwrap();

		let first = script.run_call(&breaker, 0);
		assert_eq!(first.task, Some(true));
		assert_eq!(first.fallback, None);
		assert!(first.ok);

		let second = script.run_call(&breaker, 1);
		assert_eq!(second.task, Some(false));
		assert_eq!(second.fallback, Some(false));
		assert!(!second.ok);
		assert_eq!(second.error_count, 2);

		assert_eq!(script.run_call(&breaker, 2).task, Some(true));
	}
}
