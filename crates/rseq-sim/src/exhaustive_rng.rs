//! Exhaustively exploring "random" number generator.
//!
//! Each call site draws an integer in `[0, max)`. Across laps, the generator
//! walks every combination of values the draws could have produced, like an
//! odometer over the decision vector. Driving a scheduler's preempt
//! decisions from this RNG turns a nondeterministic test into an exhaustive
//! enumeration of preemption placements.

/// Deterministic decision-vector enumerator.
#[derive(Debug, Default)]
pub struct ExhaustiveRng {
    counters: Vec<u32>,
    counter_limits: Vec<u32>,
    counter_index: usize,
    done: bool,
}

impl ExhaustiveRng {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws the current lap's value for this decision point, in
    /// `[0, max_plus_one)`.
    pub fn next_integer_0(&mut self, max_plus_one: u32) -> u32 {
        if self.counter_index >= self.counters.len() {
            self.counters.push(0);
        }
        if self.counter_index >= self.counter_limits.len() {
            self.counter_limits.push(max_plus_one);
        } else {
            self.counter_limits[self.counter_index] = max_plus_one;
        }
        let result = self.counters[self.counter_index];
        self.counter_index += 1;
        result
    }

    /// Draws a value in `[min, max_plus_one)`.
    pub fn next_integer(&mut self, min: u32, max_plus_one: u32) -> u32 {
        min + self.next_integer_0(max_plus_one - min)
    }

    /// True when every decision vector has been enumerated.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Advances to the next decision vector (odometer-style, rightmost
    /// decision first) and rewinds for the next lap.
    pub fn lap(&mut self) {
        let mut index = self.counter_index;
        loop {
            if index == 0 {
                self.done = true;
                break;
            }
            index -= 1;
            self.counters[index] += 1;
            if self.counters[index] != self.counter_limits[index] {
                break;
            }
            self.counters[index] = 0;
        }
        self.counter_index = 0;
    }
}
