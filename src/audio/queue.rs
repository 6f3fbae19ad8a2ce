// Bounded single-producer/single-consumer block queues between the audio
// callbacks and their worker threads.
//
// Every queue is paired with a return ring that carries spent buffers back
// to the producer, so the real-time side neither allocates nor frees.

use rtrb::{Consumer, Producer, PushError, RingBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::CHANNELS;

/// One mixed, interleaved stereo block plus its end-of-pass notifier
#[derive(Debug)]
pub struct MixedBlock {
    pub samples: Vec<f32>,
    /// The last block of a pass; the audio cursor wraps after it
    pub is_last: bool,
}

impl MixedBlock {
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }
}

/// Mixer side of the playback queue
pub struct BlockSender {
    blocks: Producer<MixedBlock>,
    spares: Consumer<Vec<f32>>,
    block_samples: usize,
}

/// Playback-callback side of the playback queue
pub struct BlockReceiver {
    blocks: Consumer<MixedBlock>,
    spares: Producer<Vec<f32>>,
}

/// Create a playback queue holding at most `depth` mixed blocks.
///
/// The audio block and its `is_last` flag travel as one entry, so the
/// notifier can never get out of step with the audio.
pub fn block_queue(depth: usize, block_samples: usize) -> (BlockSender, BlockReceiver) {
    let (block_tx, block_rx) = RingBuffer::new(depth);
    // Blocks in the queue, one in the callback and one being mixed
    let (spare_tx, spare_rx) = RingBuffer::new(depth + 2);
    (
        BlockSender {
            blocks: block_tx,
            spares: spare_rx,
            block_samples,
        },
        BlockReceiver {
            blocks: block_rx,
            spares: spare_tx,
        },
    )
}

impl BlockSender {
    pub fn is_full(&self) -> bool {
        self.blocks.is_full()
    }

    /// An empty buffer for the next block, recycled when one is available
    pub fn buffer(&mut self) -> Vec<f32> {
        match self.spares.pop() {
            Ok(mut buf) => {
                buf.clear();
                buf
            }
            Err(_) => Vec::with_capacity(self.block_samples),
        }
    }

    /// Queue a block; hands it back if the queue is full
    pub fn send(&mut self, block: MixedBlock) -> Result<(), MixedBlock> {
        self.blocks.push(block).map_err(|PushError::Full(block)| block)
    }

    pub fn queued(&self) -> usize {
        self.blocks.buffer().capacity() - self.blocks.slots()
    }
}

impl BlockReceiver {
    pub fn try_recv(&mut self) -> Option<MixedBlock> {
        self.blocks.pop().ok()
    }

    /// Return a played buffer to the mixer. Dropped if the return ring is full.
    pub fn recycle(&mut self, samples: Vec<f32>) {
        let _ = self.spares.push(samples);
    }
}

/// Entries on the capture queue. `End` tells the disk writer to finalize.
#[derive(Debug)]
pub enum CaptureMessage {
    Block(Vec<f32>),
    End,
}

/// Input-callback side of the capture queue
pub struct CaptureSender {
    queue: Producer<CaptureMessage>,
    pool: Consumer<Vec<f32>>,
    spare: Option<Vec<f32>>,
    overflows: Arc<AtomicU64>,
}

/// Disk-writer side of the capture queue
pub struct CaptureReceiver {
    queue: Consumer<CaptureMessage>,
    pool: Producer<Vec<f32>>,
}

/// Create a capture queue of `depth` blocks with a pool of pre-sized buffers
pub fn capture_queue(
    depth: usize,
    buffer_samples: usize,
    overflows: Arc<AtomicU64>,
) -> (CaptureSender, CaptureReceiver) {
    let (queue_tx, queue_rx) = RingBuffer::new(depth);
    let (mut pool_tx, pool_rx) = RingBuffer::new(depth + 1);
    while !pool_tx.is_full() {
        let _ = pool_tx.push(Vec::with_capacity(buffer_samples));
    }
    (
        CaptureSender {
            queue: queue_tx,
            pool: pool_rx,
            spare: None,
            overflows,
        },
        CaptureReceiver {
            queue: queue_rx,
            pool: pool_tx,
        },
    )
}

impl CaptureSender {
    /// Copy one captured block onto the queue.
    ///
    /// Never blocks: with no free buffer or a full queue the block is
    /// dropped and counted as an overflow.
    pub fn send_block(&mut self, data: &[f32]) -> bool {
        let Some(mut buf) = self.spare.take().or_else(|| self.pool.pop().ok()) else {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        buf.clear();
        buf.extend_from_slice(data);
        match self.queue.push(CaptureMessage::Block(buf)) {
            Ok(()) => true,
            Err(PushError::Full(CaptureMessage::Block(buf))) => {
                self.spare = Some(buf);
                self.overflows.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(PushError::Full(CaptureMessage::End)) => false,
        }
    }

    /// Queue the end-of-recording sentinel; false if the queue is full
    pub fn send_end(&mut self) -> bool {
        self.queue.push(CaptureMessage::End).is_ok()
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

impl CaptureReceiver {
    pub fn try_recv(&mut self) -> Option<CaptureMessage> {
        self.queue.pop().ok()
    }

    pub fn recycle(&mut self, buf: Vec<f32>) {
        let _ = self.pool.push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_arrive_in_order_with_their_flags() {
        let (mut tx, mut rx) = block_queue(4, 8);
        for i in 0..4 {
            let mut samples = tx.buffer();
            samples.push(i as f32);
            tx.send(MixedBlock {
                samples,
                is_last: i == 2,
            })
            .unwrap();
        }
        assert!(tx.is_full());
        assert_eq!(tx.queued(), 4);

        for i in 0..4 {
            let block = rx.try_recv().unwrap();
            assert_eq!(block.samples, vec![i as f32]);
            assert_eq!(block.is_last, i == 2);
            rx.recycle(block.samples);
        }
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_hands_block_back() {
        let (mut tx, _rx) = block_queue(1, 8);
        tx.send(MixedBlock {
            samples: vec![0.0; 8],
            is_last: false,
        })
        .unwrap();
        let rejected = tx
            .send(MixedBlock {
                samples: vec![1.0; 8],
                is_last: true,
            })
            .unwrap_err();
        assert!(rejected.is_last);
    }

    #[test]
    fn test_recycled_buffers_are_reused() {
        let (mut tx, mut rx) = block_queue(2, 16);
        let mut samples = tx.buffer();
        samples.extend_from_slice(&[0.5; 16]);
        let ptr = samples.as_ptr();
        tx.send(MixedBlock {
            samples,
            is_last: false,
        })
        .unwrap();

        let block = rx.try_recv().unwrap();
        rx.recycle(block.samples);

        let reused = tx.buffer();
        assert!(reused.is_empty());
        assert_eq!(reused.as_ptr(), ptr);
    }

    #[test]
    fn test_capture_overflow_is_counted_not_blocking() {
        let overflows = Arc::new(AtomicU64::new(0));
        let (mut tx, mut rx) = capture_queue(2, 4, Arc::clone(&overflows));

        assert!(tx.send_block(&[0.1; 4]));
        assert!(tx.send_block(&[0.2; 4]));
        assert!(!tx.send_block(&[0.3; 4]));
        assert!(!tx.send_block(&[0.4; 4]));
        assert_eq!(tx.overflows(), 2);

        match rx.try_recv() {
            Some(CaptureMessage::Block(buf)) => {
                assert_eq!(buf, vec![0.1; 4]);
                rx.recycle(buf);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(tx.send_block(&[0.5; 4]));
        assert!(!tx.send_end());
        assert_eq!(overflows.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_end_sentinel_follows_blocks() {
        let overflows = Arc::new(AtomicU64::new(0));
        let (mut tx, mut rx) = capture_queue(4, 4, overflows);
        tx.send_block(&[1.0; 4]);
        assert!(tx.send_end());

        assert!(matches!(rx.try_recv(), Some(CaptureMessage::Block(_))));
        assert!(matches!(rx.try_recv(), Some(CaptureMessage::End)));
        assert!(rx.try_recv().is_none());
    }
}
