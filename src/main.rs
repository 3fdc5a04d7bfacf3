mod cli_args;
mod cli_helpers;
mod ring_buffer;
mod visualizer;

use std::thread;
use std::time::Duration;

use clap::Parser;
use fallback_breaker::CircuitBreaker;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli_helpers::{exit_with_error, Script};
use crate::ring_buffer::RingBuffer;
use crate::visualizer::Visualizer;

fn main() {
	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();

	let args = cli_args::Args::parse();
	let settings = cli_args::load_settings(&args).unwrap_or_else(|error| exit_with_error(&error.to_string(), 1));
	let script = Script::new(&args.task, &args.fallback).unwrap_or_else(|error| exit_with_error(&error.to_string(), 1));
	let breaker = CircuitBreaker::with_settings(settings).unwrap_or_else(|error| exit_with_error(&error.to_string(), 1));

	let mut history = RingBuffer::new(args.history);
	for call in 0..args.calls {
		history.push(script.run_call(&breaker, call));

		if args.autoplay {
			print!("\x1b[2J\x1b[H");
			println!("{}", Visualizer::new(&history, args.columns).render(&breaker));
			thread::sleep(Duration::from_millis(args.step_ms));
		}
	}

	if !args.autoplay {
		println!("{}", Visualizer::new(&history, args.columns).render(&breaker));
	}
}
