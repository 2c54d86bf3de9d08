use std::cmp::Ordering;

use crate::model::Test;

/// Tie-breaking order among siblings that have no dependency between them.
pub trait TestOrderStrategy: Send + Sync {
    fn compare(&self, a: &Test, b: &Test) -> Ordering;
}

impl<F> TestOrderStrategy for F
where
    F: Fn(&Test, &Test) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &Test, b: &Test) -> Ordering {
        self(a, b)
    }
}

/// Ascending `order`, then case-insensitive name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTestOrderStrategy;

impl TestOrderStrategy for DefaultTestOrderStrategy {
    fn compare(&self, a: &Test, b: &Test) -> Ordering {
        a.order().cmp(&b.order()).then_with(|| {
            let lower = |t: &Test| t.name().chars().flat_map(char::to_lowercase).collect::<Vec<_>>();
            lower(a).cmp(&lower(b))
        })
    }
}
