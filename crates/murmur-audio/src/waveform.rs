use std::collections::VecDeque;

/// Fixed-capacity ring of recent amplitudes for display. When full, the
/// oldest value is overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    levels: VecDeque<f32>,
    capacity: usize,
}

impl Waveform {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            levels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, level: f32) {
        if self.levels.len() == self.capacity {
            self.levels.pop_front();
        }
        self.levels.push_back(level.clamp(0.0, 1.0));
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Contents oldest first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.levels.iter().copied().collect()
    }
}
