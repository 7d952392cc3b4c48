//! Shared helpers for the unit tests.

use rand_core::RngCore;

/// Deterministic xorshift stream.
pub(crate) struct TestRng(pub u32);

impl RngCore for TestRng {
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "the xorshift constants stay inside the word width"
    )]
    fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    #[expect(
        clippy::arithmetic_side_effects,
        reason = "a 32-bit shift always fits in a u64"
    )]
    fn next_u64(&mut self) -> u64 {
        (u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())
    }

    #[expect(clippy::indexing_slicing, reason = "chunks are never wider than the word")]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}
