use std::collections::VecDeque;

use trip_detection_lib::MotionSample;

/// Fixed-size ring of the most recent motion samples.
#[derive(Debug, Clone)]
pub struct MotionBuffer {
    samples: VecDeque<MotionSample>,
    capacity: usize,
}

impl MotionBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: MotionSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Average over whatever is buffered, 0 when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|sample| sample.magnitude).sum::<f64>() / self.samples.len() as f64
    }

    pub fn magnitudes(&self) -> Vec<f64> {
        self.samples.iter().map(|sample| sample.magnitude).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn never_exceeds_capacity() {
        let mut buffer = MotionBuffer::new(3);
        for magnitude in [1.0, 2.0, 3.0, 4.0, 5.0] {
            buffer.push(MotionSample::new(magnitude, Utc::now()));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.magnitudes(), vec![3.0, 4.0, 5.0]);
        assert!((buffer.average() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn partial_buffer_averages_what_it_has() {
        let mut buffer = MotionBuffer::new(10);
        assert_eq!(buffer.average(), 0.0);
        buffer.push(MotionSample::new(0.9, Utc::now()));
        buffer.push(MotionSample::new(0.7, Utc::now()));
        assert!((buffer.average() - 0.8).abs() < 1e-9);
    }
}
