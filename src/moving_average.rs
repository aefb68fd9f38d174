use std::collections::VecDeque;

/// A moving average over the last `capacity` samples.
///
/// Samples are stored unrounded; once the window is full the oldest sample is
/// evicted before the newest one is admitted.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl MovingAverage {
    /// Creates an empty window. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::new(),
            capacity,
        }
    }

    /// Adds a sample and returns the mean of the window contents
    pub fn add(&mut self, value: f64) -> f64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.mean_of_contents()
    }

    /// Mean of the current contents, `None` before the first sample
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.mean_of_contents())
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn mean_of_contents(&self) -> f64 {
        // Summed fresh each time so eviction never accumulates error
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Rounds to a fixed number of decimal places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
