//! Lock-free SPSC ring buffer between the device callback and the capture thread.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callback.

pub mod frame;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half, held by the capture thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^18 = 262 144 f32 samples ≈ 5.5 s at 48 kHz.
/// Frames are forwarded as soon as they fill, so a few seconds of slack is plenty.
pub const RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    create_audio_ring_with_capacity(RING_CAPACITY)
}

pub fn create_audio_ring_with_capacity(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_overflow_reports_short_write() {
        let (mut producer, mut consumer) = create_audio_ring_with_capacity(4);
        let written = producer.push_slice(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(written, 4);

        let mut out = [0f32; 8];
        let n = consumer.pop_slice(&mut out);
        assert_eq!(&out[..n], &[0.1, 0.2, 0.3, 0.4]);
    }
}
