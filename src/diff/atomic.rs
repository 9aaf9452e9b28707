//! Lock-free f32 accumulation for the pixel pass.
//!
//! Many pixels add into the same splat's screen-space gradient concurrently.
//! Floats are stored as their bit pattern in an `AtomicU32` and updated with
//! a compare-exchange loop.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn add(&self, v: f32) {
        if v == 0.0 {
            return;
        }
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + v).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let acc = AtomicF32::default();
        (0..10_000).into_par_iter().for_each(|_| acc.add(0.5));
        assert_eq!(acc.load(), 5000.0);
    }
}
