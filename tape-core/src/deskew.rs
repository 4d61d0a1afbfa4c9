//! The `deskew` module implements [`DeskewBuffer`]: a per-channel delay line that aligns
//! NRZI/GCR tracks that are physically offset on the head.

use std::collections::VecDeque;

use crate::units::Volts;

/// A fixed-length FIFO delay for one channel.
#[derive(Debug)]
pub struct DeskewBuffer {
    lines: Vec<VecDeque<Volts>>,
}

impl DeskewBuffer {
    /// `delays[i]` is the number of samples channel `i` should be held back by.
    pub fn new(delays: &[usize]) -> Self {
        let lines = delays
            .iter()
            .map(|&delay| {
                let mut line = VecDeque::with_capacity(delay + 1);
                for _ in 0..delay {
                    line.push_back(0.0);
                }
                line
            })
            .collect();
        DeskewBuffer { lines }
    }

    /// Pushes one new voltage for channel `track` and returns the voltage from `delay` samples
    /// ago for that channel.
    pub fn push(&mut self, track: usize, voltage: Volts) -> Volts {
        let line = &mut self.lines[track];
        line.push_back(voltage);
        line.pop_front().unwrap_or(0.0)
    }

    pub fn ntrks(&self) -> usize {
        self.lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_is_passthrough() {
        let mut buf = DeskewBuffer::new(&[0, 0]);
        assert_eq!(buf.push(0, 1.0), 1.0);
        assert_eq!(buf.push(1, 2.0), 2.0);
    }

    #[test]
    fn delay_returns_voltage_from_n_samples_ago() {
        let mut buf = DeskewBuffer::new(&[2]);
        assert_eq!(buf.push(0, 1.0), 0.0);
        assert_eq!(buf.push(0, 2.0), 0.0);
        assert_eq!(buf.push(0, 3.0), 1.0);
        assert_eq!(buf.push(0, 4.0), 2.0);
    }
}
