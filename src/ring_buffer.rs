#[derive(Debug, PartialEq)]
pub struct RingBuffer<T> {
	cursor: usize,
	nodes: Vec<Option<T>>,
}

impl<T> RingBuffer<T> {
	pub fn new(elements: usize) -> Self {
		assert!(elements > 0, "Must have at least one buffer enabled");
		Self {
			cursor: 0,
			nodes: (0..elements).map(|_| None).collect(),
		}
	}

	pub fn push(&mut self, item: T) {
		self.nodes[self.cursor] = Some(item);
		self.next();
	}

	pub fn latest(&self) -> Option<&T> {
		let index = (self.cursor + self.nodes.len() - 1) % self.nodes.len();
		self.nodes[index].as_ref()
	}

	/// Oldest entry first.
	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.nodes[self.cursor..]
			.iter()
			.chain(self.nodes[..self.cursor].iter())
			.flatten()
	}

	fn next(&mut self) {
		if self.cursor == self.nodes.len() - 1 {
			self.cursor = 0;
		} else {
			self.cursor += 1;
		}
	}
}
