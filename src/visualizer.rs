use fallback_breaker::{CircuitBreaker, State};

use crate::ring_buffer::RingBuffer;

const INNER_WIDTH: usize = 27;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallRecord {
	pub index: usize,
	pub before: State,
	pub after: State,
	/// `None` when the breaker skipped the closure, otherwise whether it succeeded.
	pub task: Option<bool>,
	pub fallback: Option<bool>,
	pub ok: bool,
	pub error_count: u32,
	pub retrying: bool,
}

#[derive(Debug, PartialEq)]
pub struct Visualizer<'a> {
	history: &'a RingBuffer<CallRecord>,
	columns: usize,
}

impl<'a> Visualizer<'a> {
	pub fn new(history: &'a RingBuffer<CallRecord>, columns: usize) -> Self {
		Self {
			history,
			columns: columns.max(1),
		}
	}

	fn is_active(&self, record: &CallRecord) -> bool {
		self.history.latest().map(|latest| latest.index) == Some(record.index)
	}

	fn render_top(&self, record: &CallRecord) -> String {
		match self.is_active(record) {
			true => format!("┏{}┓", "━".repeat(INNER_WIDTH)),
			false => format!("┌{}┐", "─".repeat(INNER_WIDTH)),
		}
	}

	fn render_middle(&self, record: &CallRecord) -> [String; 3] {
		let side = match self.is_active(record) {
			true => "┃",
			false => "│",
		};
		let result = match record.ok {
			true => "ok",
			false => "err",
		};
		let gate = match record.retrying {
			true => "held",
			false => "free",
		};

		[
			format!(
				"{side} #{:03} {:>9} → {:<9}{side}",
				record.index % 1000,
				record.before.to_string(),
				record.after.to_string()
			),
			format!(
				"{side} task {} fallback {} {result:<4}{side}",
				render_outcome(record.task),
				render_outcome(record.fallback)
			),
			format!("{side} errors {:<6} probe {gate:<6}{side}", record.error_count.min(999_999)),
		]
	}

	fn render_bottom(&self, record: &CallRecord) -> String {
		match self.is_active(record) {
			true => format!("┗{}┛", "━".repeat(INNER_WIDTH)),
			false => format!("└{}┘", "─".repeat(INNER_WIDTH)),
		}
	}

	fn render_row(&self, records: &[&CallRecord]) -> String {
		let mut output = [String::new(), String::new(), String::new(), String::new(), String::new()];

		for record in records {
			let [first, second, third] = self.render_middle(record);
			output[0].push_str(&self.render_top(record));
			output[1].push_str(&first);
			output[2].push_str(&second);
			output[3].push_str(&third);
			output[4].push_str(&self.render_bottom(record));
		}

		output.join("\n")
	}

	pub fn render(&self, breaker: &CircuitBreaker) -> String {
		let records: Vec<_> = self.history.iter().collect();
		let mut rows: Vec<String> = records.chunks(self.columns).map(|row| self.render_row(row)).collect();
		rows.push(render_status(breaker));
		rows.join("\n")
	}
}

fn render_outcome(outcome: Option<bool>) -> &'static str {
	match outcome {
		Some(true) => "\x1b[42m ✓ \x1b[0m",
		Some(false) => "\x1b[41m ✗ \x1b[0m",
		None => " - ",
	}
}

pub fn render_status(breaker: &CircuitBreaker) -> String {
	let settings = breaker.get_settings();
	format!(
		"state: {}  errors: {}/{}  probe gate: {}  retry interval: {}s",
		breaker.get_state(),
		breaker.get_error_count(),
		settings.max_error_count,
		if breaker.is_retrying() { "held" } else { "free" },
		settings.retry_interval.as_secs()
	)
}
