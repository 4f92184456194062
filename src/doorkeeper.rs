/// Bloom-filter admission gate that suppresses one-hit wonders.
///
/// Every shard owns one doorkeeper. A key is only allowed into the cache once
/// the filter has seen it before, so keys touched exactly once never occupy
/// cache space. The filter is periodically reset by the shard once the number
/// of distinct insertions exceeds its capacity.
pub(crate) struct Doorkeeper {
	/// Bit vector backing the filter.
	filter: Vec<u64>,
	/// Size of the bit vector in bits. Always a power of two.
	m: u32,
	/// Number of probe positions per key.
	k: u32,
	false_positive_rate: f64,
	capacity: usize,
}

impl Doorkeeper {
	pub(crate) fn new(false_positive_rate: f64) -> Self {
		let mut d = Self {
			filter: Vec::new(),
			m: 0,
			k: 0,
			false_positive_rate,
			capacity: 0,
		};
		d.ensure_capacity(320);
		d
	}

	/// Grow the filter so it can hold `capacity` keys at the configured
	/// false-positive rate. Shrinking is never performed; the rebuild
	/// discards all previously set bits.
	pub(crate) fn ensure_capacity(&mut self, capacity: usize) {
		if capacity <= self.capacity {
			return;
		}
		let capacity = capacity.next_power_of_two();
		let bits = (capacity as f64) * -self.false_positive_rate.ln()
			/ (2.0f64.ln() * 2.0f64.ln());
		let m = (bits as u32).next_power_of_two().max(1024);
		let k = ((0.7 * m as f64 / capacity as f64) as u32).max(2);

		self.capacity = capacity;
		self.m = m;
		self.k = k;
		self.filter = vec![0u64; (m as usize + 63) / 64];
	}

	/// Insert the key hash and report whether every probed bit was already
	/// set, i.e. whether the filter considers the key seen before.
	pub(crate) fn insert(&mut self, h: u64) -> bool {
		let (h1, h2) = (h as u32, (h >> 32) as u32);
		let mut seen = 1u64;
		for i in 0..self.k {
			let bit = h1.wrapping_add(i.wrapping_mul(h2)) & (self.m - 1);
			seen &= self.getset(bit);
		}
		seen == 1
	}

	/// Clear every bit.
	pub(crate) fn reset(&mut self) {
		for word in &mut self.filter {
			*word = 0;
		}
	}

	pub(crate) fn capacity(&self) -> usize {
		self.capacity
	}

	/// Set `bit` and return its previous value (0 or 1).
	fn getset(&mut self, bit: u32) -> u64 {
		let idx = (bit / 64) as usize;
		let shift = bit % 64;
		let mask = 1u64 << shift;
		let prev = self.filter[idx] & mask;
		self.filter[idx] |= mask;
		(prev >> shift) as u64
	}
}
