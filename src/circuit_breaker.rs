//! Circuit breaker wrapping a task and its fallback.
//!
//! ```text
//! Closed   → Open:     error counter reaches max_error_count (counter zeroed)
//! Open     → HalfOpen: retry_interval elapsed since the recorded trip time
//! HalfOpen → Closed:   the single probe (task or fallback) succeeds
//! ```
//!
//! Every field is updated with its own atomic operation. A `handle` call is
//! not one transaction, so concurrent callers may interleave between reading
//! the state and updating the counter.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{BreakerError, BreakerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
	Closed = 0,
	HalfOpen = 1,
	Open = 2,
}

impl State {
	fn from_u8(value: u8) -> BreakerResult<Self> {
		match value {
			0 => Ok(State::Closed),
			1 => Ok(State::HalfOpen),
			2 => Ok(State::Open),
			other => Err(BreakerError::UnexpectedState(other)),
		}
	}
}

impl fmt::Display for State {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			State::Closed => write!(f, "closed"),
			State::HalfOpen => write!(f, "half-open"),
			State::Open => write!(f, "open"),
		}
	}
}

/// What a failed half-open probe does to the breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailure {
	/// The probe gate stays held and the state stays half-open, so every later
	/// call is served by the fallback alone.
	#[default]
	HoldGate,
	/// Trip back to open, zero the counter and release the probe gate.
	Reopen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
	/// Accumulated failures that trip the breaker open.
	pub max_error_count: u32,
	/// Cooldown before an open breaker may be probed. Must be non-zero.
	pub retry_interval: Duration,
	pub probe_failure: ProbeFailure,
	/// Stamp the trip time when opening. Left unset, the trip time stays at
	/// the epoch and an open breaker is eligible for a probe on the next call.
	pub record_trip_time: bool,
	/// Zero the error counter when a probe closes the breaker.
	pub reset_count_on_close: bool,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			max_error_count: 5,
			retry_interval: Duration::from_secs(60),
			probe_failure: ProbeFailure::HoldGate,
			record_trip_time: false,
			reset_count_on_close: false,
		}
	}
}

impl Settings {
	pub fn new(max_error_count: u32, retry_interval: Duration) -> Self {
		Self {
			max_error_count,
			retry_interval,
			..Default::default()
		}
	}

	pub fn set_max_error_count(mut self, count: u32) -> Self {
		self.max_error_count = count;
		self
	}

	pub fn set_retry_interval(mut self, interval: Duration) -> Self {
		self.retry_interval = interval;
		self
	}

	pub fn set_probe_failure(mut self, policy: ProbeFailure) -> Self {
		self.probe_failure = policy;
		self
	}

	pub fn set_record_trip_time(mut self, enabled: bool) -> Self {
		self.record_trip_time = enabled;
		self
	}

	pub fn set_reset_count_on_close(mut self, enabled: bool) -> Self {
		self.reset_count_on_close = enabled;
		self
	}
}

/// Shared breaker guarding one dependency. Safe to call from many threads
/// through `&self` or an `Arc`.
#[derive(Debug)]
pub struct CircuitBreaker {
	settings: Settings,
	state: AtomicU8,
	error_count: AtomicU32,
	last_open_timestamp: AtomicI64,
	retrying: AtomicBool,
}

impl CircuitBreaker {
	/// Panics when `retry_interval` is zero.
	pub fn new(max_error_count: u32, retry_interval: Duration) -> Self {
		match Self::try_new(max_error_count, retry_interval) {
			Ok(breaker) => breaker,
			Err(error) => panic!("{error}"),
		}
	}

	pub fn try_new(max_error_count: u32, retry_interval: Duration) -> BreakerResult<Self> {
		Self::with_settings(Settings::new(max_error_count, retry_interval))
	}

	pub fn with_settings(settings: Settings) -> BreakerResult<Self> {
		if settings.retry_interval.is_zero() {
			return Err(BreakerError::InvalidRetryInterval);
		}

		Ok(Self {
			settings,
			state: AtomicU8::new(State::Closed as u8),
			error_count: AtomicU32::new(0),
			last_open_timestamp: AtomicI64::new(0),
			retrying: AtomicBool::new(false),
		})
	}

	/// Runs `task`, `fallback`, or both depending on the current state.
	///
	/// Returns `Ok(())` as soon as either closure succeeds. When both fail the
	/// fallback's error is returned. While open, or while another caller holds
	/// the half-open probe, the task is skipped and only the fallback decides
	/// the result.
	pub fn handle<T, F, E>(&self, task: T, fallback: F) -> Result<(), E>
	where
		T: FnOnce() -> Result<(), E>,
		F: FnOnce() -> Result<(), E>,
	{
		match self.get_state() {
			State::Open => self.handle_open(fallback),
			State::HalfOpen => self.handle_half_open(task, fallback),
			State::Closed => self.handle_closed(task, fallback),
		}
	}

	pub fn get_state(&self) -> State {
		match State::from_u8(self.state.load(Ordering::SeqCst)) {
			Ok(state) => state,
			Err(error) => panic!("{error}"),
		}
	}

	pub fn get_error_count(&self) -> u32 {
		self.error_count.load(Ordering::SeqCst)
	}

	/// Whether a half-open probe currently holds the gate.
	pub fn is_retrying(&self) -> bool {
		self.retrying.load(Ordering::SeqCst)
	}

	pub fn get_settings(&self) -> &Settings {
		&self.settings
	}

	fn handle_closed<T, F, E>(&self, task: T, fallback: F) -> Result<(), E>
	where
		T: FnOnce() -> Result<(), E>,
		F: FnOnce() -> Result<(), E>,
	{
		self.handle_normal(task, fallback, true)
	}

	fn handle_half_open<T, F, E>(&self, task: T, fallback: F) -> Result<(), E>
	where
		T: FnOnce() -> Result<(), E>,
		F: FnOnce() -> Result<(), E>,
	{
		if !self.try_set_retrying() {
			return self.handle_open(fallback);
		}

		match self.handle_normal(task, fallback, false) {
			Ok(()) => {
				self.set_closed();
				self.set_retrying_finish();
				Ok(())
			},
			Err(error) => {
				self.on_probe_failure();
				Err(error)
			},
		}
	}

	fn handle_open<F, E>(&self, fallback: F) -> Result<(), E>
	where
		F: FnOnce() -> Result<(), E>,
	{
		self.try_set_half_open();
		if let Err(error) = fallback() {
			self.add_error();
			return Err(error);
		}
		Ok(())
	}

	fn handle_normal<T, F, E>(&self, task: T, fallback: F, trip_enabled: bool) -> Result<(), E>
	where
		T: FnOnce() -> Result<(), E>,
		F: FnOnce() -> Result<(), E>,
	{
		if task().is_ok() {
			return Ok(());
		}

		self.add_error();
		if trip_enabled {
			self.try_set_open();
		}

		if let Err(error) = fallback() {
			self.add_error();
			if trip_enabled {
				self.try_set_open();
			}
			return Err(error);
		}
		Ok(())
	}

	fn on_probe_failure(&self) {
		match self.settings.probe_failure {
			ProbeFailure::HoldGate => {
				warn!(
					error_count = self.get_error_count(),
					"circuit breaker probe failed, probe gate stays held"
				);
			},
			ProbeFailure::Reopen => {
				self.set_open();
				self.set_retrying_finish();
			},
		}
	}

	fn try_set_retrying(&self) -> bool {
		self.retrying
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_ok()
	}

	fn set_retrying_finish(&self) {
		self.retrying.store(false, Ordering::SeqCst);
	}

	fn try_set_half_open(&self) {
		let last_open = self.last_open_timestamp.load(Ordering::SeqCst);
		if elapsed_since(last_open) <= self.settings.retry_interval {
			return;
		}

		if self
			.state
			.compare_exchange(State::Open as u8, State::HalfOpen as u8, Ordering::SeqCst, Ordering::SeqCst)
			.is_ok()
		{
			info!(from = %State::Open, to = %State::HalfOpen, "circuit breaker state changed");
		}
	}

	fn set_closed(&self) {
		self.state.store(State::Closed as u8, Ordering::SeqCst);
		if self.settings.reset_count_on_close {
			self.error_count.store(0, Ordering::SeqCst);
		}
		info!(
			from = %State::HalfOpen,
			to = %State::Closed,
			error_count = self.get_error_count(),
			"circuit breaker state changed"
		);
	}

	fn try_set_open(&self) {
		let error_count = self.error_count.load(Ordering::SeqCst);
		if error_count >= self.settings.max_error_count {
			self.set_open();
		}
	}

	fn set_open(&self) {
		if self.settings.record_trip_time {
			self.last_open_timestamp.store(unix_now(), Ordering::SeqCst);
		}
		let previous = self.state.swap(State::Open as u8, Ordering::SeqCst);
		self.error_count.store(0, Ordering::SeqCst);

		if previous != State::Open as u8 {
			info!(
				to = %State::Open,
				max_error_count = self.settings.max_error_count,
				"circuit breaker tripped"
			);
		}
	}

	fn add_error(&self) {
		let error_count = self.error_count.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
		debug!(error_count, "circuit breaker counted failure");
	}
}

fn unix_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
		.unwrap_or(0)
}

// Stamps are nanoseconds since the epoch. Clock skew behind the stamp counts
// as no time elapsed.
fn elapsed_since(timestamp: i64) -> Duration {
	let opened = UNIX_EPOCH + Duration::from_nanos(u64::try_from(timestamp).unwrap_or(0));
	SystemTime::now().duration_since(opened).unwrap_or_default()
}
