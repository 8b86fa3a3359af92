//! Bounded top-K selection over a stream of scored items.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Keep the K highest scores.
    Highest,
    /// Keep the K lowest scores.
    Lowest,
}

struct Ranked<T> {
    key: f64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Ranked<T> {}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ranked<T> {
    // Ties: the earlier insertion ranks higher and survives eviction.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Keeps only the best K items seen so far; memory is O(K).
pub struct TopK<T> {
    limit: usize,
    direction: Direction,
    heap: BinaryHeap<Reverse<Ranked<T>>>,
    seq: u64,
}

impl<T> TopK<T> {
    pub fn new(limit: usize, direction: Direction) -> Self {
        Self {
            limit,
            direction,
            heap: BinaryHeap::with_capacity(limit.saturating_add(1)),
            seq: 0,
        }
    }

    pub fn highest(limit: usize) -> Self {
        Self::new(limit, Direction::Highest)
    }

    pub fn lowest(limit: usize) -> Self {
        Self::new(limit, Direction::Lowest)
    }

    pub fn push(&mut self, score: f64, item: T) {
        if self.limit == 0 || score.is_nan() {
            return;
        }
        let key = match self.direction {
            Direction::Highest => score,
            Direction::Lowest => -score,
        };
        let ranked = Ranked {
            key,
            seq: self.seq,
            item,
        };
        self.seq += 1;

        if self.heap.len() < self.limit {
            self.heap.push(Reverse(ranked));
            return;
        }
        let beats_weakest = self
            .heap
            .peek()
            .map(|Reverse(weakest)| ranked > *weakest)
            .unwrap_or(true);
        if beats_weakest {
            self.heap.pop();
            self.heap.push(Reverse(ranked));
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Best first, with the original scores.
    pub fn into_sorted_vec(self) -> Vec<(f64, T)> {
        let direction = self.direction;
        let mut ranked: Vec<Ranked<T>> = self.heap.into_iter().map(|Reverse(r)| r).collect();
        ranked.sort_by(|a, b| b.cmp(a));
        ranked
            .into_iter()
            .map(|r| {
                let score = match direction {
                    Direction::Highest => r.key,
                    Direction::Lowest => -r.key,
                };
                (score, r.item)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_highest() {
        let mut top = TopK::highest(3);
        for (i, s) in [5.0, 1.0, 9.0, 7.0, 3.0].into_iter().enumerate() {
            top.push(s, i);
        }
        let kept: Vec<f64> = top.into_sorted_vec().into_iter().map(|(s, _)| s).collect();
        assert_eq!(kept, vec![9.0, 7.0, 5.0]);
    }

    #[test]
    fn keeps_lowest() {
        let mut top = TopK::lowest(2);
        for s in [5.0, -1.0, 9.0, -7.0] {
            top.push(s, s as i32);
        }
        let kept: Vec<i32> = top.into_sorted_vec().into_iter().map(|(_, v)| v).collect();
        assert_eq!(kept, vec![-7, -1]);
    }

    #[test]
    fn ties_keep_first_seen() {
        let mut top = TopK::highest(1);
        top.push(1.0, "first");
        top.push(1.0, "second");
        assert_eq!(top.into_sorted_vec()[0].1, "first");
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let mut top = TopK::highest(0);
        top.push(1.0, ());
        assert!(top.is_empty());
    }
}
