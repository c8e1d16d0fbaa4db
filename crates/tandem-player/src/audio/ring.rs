use std::sync::atomic::{AtomicU32, Ordering};

pub const RING_SIZE: usize = 16384; // power of 2
const RING_MASK: u32 = (RING_SIZE as u32) - 1;

/// Single-producer single-consumer sample ring for frame-sink audio output.
///
/// Samples are stored as raw `f32` bits so the buffer stays lock-free without unsafe.
/// The reader can see stale samples if it is lapped, which is tolerable for audio.
pub struct SampleRing {
    data: Box<[AtomicU32]>,
    write_pos: AtomicU32,
    read_pos: AtomicU32,
}

impl SampleRing {
    pub fn new() -> Self {
        Self {
            data: (0..RING_SIZE).map(|_| AtomicU32::new(0)).collect(),
            write_pos: AtomicU32::new(0),
            read_pos: AtomicU32::new(0),
        }
    }

    /// Push samples. Only the audio graph's render thread writes.
    pub fn push(&self, samples: &[f32]) {
        let mut wp = self.write_pos.load(Ordering::Relaxed);
        for &sample in samples {
            let idx = (wp & RING_MASK) as usize;
            self.data[idx].store(sample.to_bits(), Ordering::Relaxed);
            wp = wp.wrapping_add(1);
        }
        self.write_pos.store(wp, Ordering::Release);
    }

    /// Read available samples into dst. Returns number of samples read.
    pub fn read(&self, dst: &mut [f32]) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let mut rp = self.read_pos.load(Ordering::Relaxed);
        let available = wp.wrapping_sub(rp) as usize;
        if available > RING_SIZE {
            // Overrun: skip to the oldest sample still in the ring.
            rp = wp.wrapping_sub(RING_SIZE as u32);
        }
        let to_read = available.min(RING_SIZE).min(dst.len());

        for (i, out) in dst.iter_mut().take(to_read).enumerate() {
            let idx = (rp.wrapping_add(i as u32) & RING_MASK) as usize;
            *out = f32::from_bits(self.data[idx].load(Ordering::Relaxed));
        }

        self.read_pos
            .store(rp.wrapping_add(to_read as u32), Ordering::Release);
        to_read
    }

    pub fn available(&self) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let rp = self.read_pos.load(Ordering::Relaxed);
        (wp.wrapping_sub(rp) as usize).min(RING_SIZE)
    }
}

impl Default for SampleRing {
    fn default() -> Self {
        Self::new()
    }
}
