//! Pre-instantiated renderable-handle pool, keyed by (color, piece type).
//!
//! The UI layer creates every handle it will ever need up front (the handles
//! of one (color, type) bucket are interchangeable). During `welcome`
//! processing the session pops one handle per authoritative piece; handles go
//! back only on `reset()`. Fixed-capacity buckets with a cursor, no
//! allocation per piece.

use crate::board::{PieceColor, PieceType, PIECE_TYPES};

pub struct EntityPool<H> {
    // 12 buckets: color index * 6 + type index.
    buckets: Vec<Bucket<H>>,
}

struct Bucket<H> {
    slots: Vec<Option<H>>,
    cursor: usize,
}

fn bucket_index(color: PieceColor, kind: PieceType) -> usize {
    color.index() as usize * PIECE_TYPES.len() + kind.index() as usize
}

impl<H> EntityPool<H> {
    /// Builds a pool with the standard-layout capacity per bucket (8 pawns,
    /// 2 rooks/knights/bishops, 1 queen/king per color), asking `fill` for
    /// each handle.
    pub fn new(mut fill: impl FnMut(PieceColor, PieceType) -> H) -> EntityPool<H> {
        let mut buckets = Vec::with_capacity(2 * PIECE_TYPES.len());
        for color in [PieceColor::Black, PieceColor::White] {
            for kind in PIECE_TYPES {
                let slots = (0..kind.standard_count())
                    .map(|_| Some(fill(color, kind)))
                    .collect();
                buckets.push(Bucket { slots, cursor: 0 });
            }
        }
        EntityPool { buckets }
    }

    /// Pops one handle. Exhaustion is a configuration error: the pool is
    /// sized for the fixed 16-piece-per-color layout, so running dry means
    /// the authoritative board disagrees with the pool capacity.
    pub fn take(&mut self, color: PieceColor, kind: PieceType) -> H {
        let bucket = &mut self.buckets[bucket_index(color, kind)];
        assert!(
            bucket.cursor < bucket.slots.len(),
            "entity pool exhausted for {:?} {:?}",
            color,
            kind
        );
        let handle = bucket.slots[bucket.cursor]
            .take()
            .expect("pool slot already taken");
        bucket.cursor += 1;
        handle
    }

    /// Returns a handle popped earlier. Handles within a bucket are
    /// interchangeable, so the slot it lands in doesn't matter.
    pub fn put_back(&mut self, color: PieceColor, kind: PieceType, handle: H) {
        let bucket = &mut self.buckets[bucket_index(color, kind)];
        assert!(bucket.cursor > 0, "pool bucket {:?} {:?} is already full", color, kind);
        bucket.cursor -= 1;
        bucket.slots[bucket.cursor] = Some(handle);
    }

    pub fn available(&self, color: PieceColor, kind: PieceType) -> usize {
        let bucket = &self.buckets[bucket_index(color, kind)];
        bucket.slots.len() - bucket.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_pool() -> EntityPool<u32> {
        let mut next = 0;
        EntityPool::new(|_, _| {
            next += 1;
            next
        })
    }

    #[test]
    fn buckets_have_standard_capacities() {
        let pool = counting_pool();
        for color in [PieceColor::Black, PieceColor::White] {
            for kind in PIECE_TYPES {
                assert_eq!(pool.available(color, kind), kind.standard_count());
            }
        }
    }

    #[test]
    fn take_and_put_back_round_trip() {
        let mut pool = counting_pool();

        let a = pool.take(PieceColor::White, PieceType::Rook);
        let b = pool.take(PieceColor::White, PieceType::Rook);
        assert_ne!(a, b);
        assert_eq!(pool.available(PieceColor::White, PieceType::Rook), 0);

        pool.put_back(PieceColor::White, PieceType::Rook, a);
        pool.put_back(PieceColor::White, PieceType::Rook, b);
        assert_eq!(pool.available(PieceColor::White, PieceType::Rook), 2);
    }

    #[test]
    #[should_panic(expected = "entity pool exhausted")]
    fn exhaustion_is_fatal() {
        let mut pool = counting_pool();
        pool.take(PieceColor::Black, PieceType::King);
        pool.take(PieceColor::Black, PieceType::King);
    }
}
