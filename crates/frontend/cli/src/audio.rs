//! Audio sink backed by a bounded sample queue drained by rodio.
//!
//! The emulator pushes interleaved stereo samples from inside `run_for`
//! and must never block there; the rodio source on the playback thread
//! pops from the same queue and substitutes silence on underrun. When the
//! emulator outruns playback the oldest frame is dropped, bounding
//! latency instead of growing the queue without limit.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dotboy_core::AudioSink;
use rodio::Source;

pub const SAMPLE_RATE: u32 = 44_100;

// Interleaved samples; about 90 ms of stereo audio
const QUEUE_LIMIT: usize = 8192;

pub type SampleQueue = Arc<Mutex<VecDeque<i16>>>;

pub struct QueueSink {
    queue: SampleQueue,
}

impl QueueSink {
    pub fn new() -> (Self, SampleQueue) {
        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(QUEUE_LIMIT)));
        (
            Self {
                queue: queue.clone(),
            },
            queue,
        )
    }
}

impl AudioSink for QueueSink {
    fn push_sample(&mut self, left: i16, right: i16) {
        let Ok(mut queue) = self.queue.lock() else {
            return;
        };

        if queue.len() >= QUEUE_LIMIT {
            queue.pop_front();
            queue.pop_front();
        }
        queue.push_back(left);
        queue.push_back(right);
    }
}

/// Endless stereo source reading from the shared queue.
pub struct QueueSource {
    queue: SampleQueue,
}

impl QueueSource {
    pub fn new(queue: SampleQueue) -> Self {
        Self { queue }
    }
}

impl Iterator for QueueSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        let sample = match self.queue.lock() {
            Ok(mut queue) => queue.pop_front().unwrap_or(0),
            Err(_) => 0,
        };
        Some(sample)
    }
}

impl Source for QueueSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_flow_through_queue() {
        let (mut sink, queue) = QueueSink::new();
        sink.push_sample(100, -100);
        sink.push_sample(200, -200);

        let mut source = QueueSource::new(queue);
        assert_eq!(source.next(), Some(100));
        assert_eq!(source.next(), Some(-100));
        assert_eq!(source.next(), Some(200));
        assert_eq!(source.next(), Some(-200));
    }

    #[test]
    fn test_underrun_yields_silence() {
        let (_sink, queue) = QueueSink::new();
        let mut source = QueueSource::new(queue);
        assert_eq!(source.next(), Some(0));
    }

    #[test]
    fn test_overrun_drops_oldest_frame() {
        let (mut sink, queue) = QueueSink::new();
        for i in 0..(QUEUE_LIMIT as i16 / 2 + 10) {
            sink.push_sample(i, i);
        }
        assert_eq!(queue.lock().unwrap().len(), QUEUE_LIMIT);
        // The head is no longer the first sample pushed
        assert_ne!(queue.lock().unwrap().front(), Some(&0));
    }
}
