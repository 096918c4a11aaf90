//! Jitter buffer between the realtime receive loop and the output device.
//!
//! One producer pushes decoded response audio, one consumer (the output
//! device callback) pulls fixed-size periods. The lock is held only while
//! the requested frames are copied, so pull cost is O(frame_count) no matter
//! how much audio is queued.

use super::SampleBlock;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct QueueInner {
    blocks: VecDeque<SampleBlock>,
    /// Samples of the front block already handed to the device
    head_offset: usize,
    queued_samples: usize,
}

/// FIFO of pending playback blocks, shared by cloning
#[derive(Debug, Clone, Default)]
pub struct PlaybackQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // The queue holds plain samples, so a panicked holder cannot leave it inconsistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a block at the tail. Never blocks on capacity.
    pub fn push(&self, block: SampleBlock) {
        if block.is_empty() {
            return;
        }
        let mut inner = self.lock();
        inner.queued_samples += block.len();
        inner.blocks.push_back(block);
    }

    /// Fill `out` from the head of the queue, padding any shortfall with
    /// silence. Returns the number of real (non-padding) samples written.
    pub fn pull_into(&self, out: &mut [i16]) -> usize {
        let mut written = 0;
        {
            let mut inner = self.lock();
            while written < out.len() {
                let offset = inner.head_offset;
                let Some(front) = inner.blocks.front() else {
                    break;
                };
                let remaining = &front.samples()[offset..];
                let take = remaining.len().min(out.len() - written);
                out[written..written + take].copy_from_slice(&remaining[..take]);
                written += take;

                if take == remaining.len() {
                    inner.blocks.pop_front();
                    inner.head_offset = 0;
                } else {
                    inner.head_offset += take;
                }
                inner.queued_samples -= take;
            }
        }

        out[written..].fill(0);
        written
    }

    /// Remove up to `frame_count` samples, padded with silence to exactly `frame_count`
    pub fn pull(&self, frame_count: usize) -> Vec<i16> {
        let mut out = vec![0; frame_count];
        self.pull_into(&mut out);
        out
    }

    /// Drop everything queued
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.blocks.clear();
        inner.head_offset = 0;
        inner.queued_samples = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queued_samples == 0
    }

    /// Number of samples still waiting to be played
    pub fn len(&self) -> usize {
        self.lock().queued_samples
    }
}
