use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Lock-free single-producer single-consumer ring of audio samples.
///
/// The renderer thread pushes, the device callback reads. Samples are stored as `f32` bits
/// in atomics. Positions are running totals, so the consumer's total doubles as a
/// played-samples counter.
pub struct SampleRing {
    data: Box<[AtomicU32]>,
    mask: u64,
    write_pos: AtomicU64,
    read_pos: AtomicU64,
}

impl SampleRing {
    /// Capacity is rounded up to a power of two.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(2).next_power_of_two();
        let data = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self {
            data,
            mask: capacity as u64 - 1,
            write_pos: AtomicU64::new(0),
            read_pos: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Push as many samples as fit. Returns how many were written.
    pub fn push(&self, samples: &[f32]) -> usize {
        let wp = self.write_pos.load(Ordering::Relaxed);
        let rp = self.read_pos.load(Ordering::Acquire);
        let free = self.capacity() - (wp - rp) as usize;
        let count = free.min(samples.len());

        for (i, &sample) in samples[..count].iter().enumerate() {
            let idx = ((wp + i as u64) & self.mask) as usize;
            self.data[idx].store(sample.to_bits(), Ordering::Relaxed);
        }
        self.write_pos.store(wp + count as u64, Ordering::Release);
        count
    }

    /// Read available samples into dst. Returns number of samples read.
    pub fn read(&self, dst: &mut [f32]) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let rp = self.read_pos.load(Ordering::Relaxed);
        let to_read = ((wp - rp) as usize).min(dst.len());

        for (i, slot) in dst[..to_read].iter_mut().enumerate() {
            let idx = ((rp + i as u64) & self.mask) as usize;
            *slot = f32::from_bits(self.data[idx].load(Ordering::Relaxed));
        }
        self.read_pos.store(rp + to_read as u64, Ordering::Release);
        to_read
    }

    /// Number of samples available to read.
    pub fn available(&self) -> usize {
        let wp = self.write_pos.load(Ordering::Acquire);
        let rp = self.read_pos.load(Ordering::Acquire);
        (wp - rp) as usize
    }

    /// Number of samples that can be pushed right now.
    pub fn free(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Samples consumed since creation.
    pub fn total_read(&self) -> u64 {
        self.read_pos.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn capacity_rounds_to_power_of_two() {
        assert_eq!(SampleRing::new(1000).capacity(), 1024);
        assert_eq!(SampleRing::new(0).capacity(), 2);
    }

    #[test]
    fn push_stops_when_full() {
        let ring = SampleRing::new(4);
        assert_eq!(ring.push(&[1.0, 2.0, 3.0, 4.0, 5.0]), 4);
        assert_eq!(ring.free(), 0);

        let mut out = [0.0; 2];
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(ring.push(&[5.0, 6.0, 7.0]), 2);

        let mut rest = [0.0; 8];
        assert_eq!(ring.read(&mut rest), 4);
        assert_eq!(&rest[..4], &[3.0, 4.0, 5.0, 6.0]);
        assert_eq!(ring.total_read(), 6);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn wraps_around_many_times() {
        let ring = SampleRing::new(8);
        let mut out = [0.0; 3];
        for round in 0..100 {
            let base = round as f32 * 3.0;
            assert_eq!(ring.push(&[base, base + 1.0, base + 2.0]), 3);
            assert_eq!(ring.read(&mut out), 3);
            assert_eq!(out, [base, base + 1.0, base + 2.0]);
        }
        assert_eq!(ring.total_read(), 300);
    }

    #[test]
    fn producer_and_consumer_threads() {
        let ring = Arc::new(SampleRing::new(64));
        let reader = {
            let ring = ring.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                let mut buf = [0.0; 16];
                while seen.len() < 1000 {
                    let n = ring.read(&mut buf);
                    seen.extend_from_slice(&buf[..n]);
                    if n == 0 {
                        std::thread::yield_now();
                    }
                }
                seen
            })
        };

        let samples: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let mut offset = 0;
        while offset < samples.len() {
            offset += ring.push(&samples[offset..]);
            std::thread::yield_now();
        }
        assert_eq!(reader.join().unwrap(), samples);
    }
}
