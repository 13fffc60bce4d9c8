//! Computes stripe count and per-stripe capacity from user input.

/// Derives the stripe count and each stripe's capacity for a pool of
/// `max_resources` total permits and a caller-requested stripe count.
///
/// `requested_stripes` is clamped down to `max_resources`, since a stripe
/// with zero capacity could never serve a caller. The returned `Vec` is
/// ordered: `remainder` stripes of size `⌈max_resources / stripes⌉` come
/// first, followed by the rest at `⌊max_resources / stripes⌋` — tests (and
/// the stripe selector, which assumes stripe `i`'s capacity is
/// `per_stripe[i]`) rely on this exact order.
pub(crate) fn per_stripe_capacities(max_resources: usize, requested_stripes: usize) -> Vec<usize> {
    debug_assert!(max_resources >= 1);
    debug_assert!(requested_stripes >= 1);

    let stripes = requested_stripes.min(max_resources);
    let base = max_resources / stripes;
    let remainder = max_resources % stripes;

    let mut capacities = Vec::with_capacity(stripes);
    capacities.extend(std::iter::repeat(base + 1).take(remainder));
    capacities.extend(std::iter::repeat(base).take(stripes - remainder));
    capacities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_five_over_three() {
        assert_eq!(per_stripe_capacities(5, 3), vec![2, 2, 1]);
    }

    #[test]
    fn round_robin_even_split() {
        assert_eq!(per_stripe_capacities(4, 2), vec![2, 2]);
    }

    #[test]
    fn clamps_stripes_to_capacity() {
        assert_eq!(per_stripe_capacities(3, 5), vec![1, 1, 1]);
    }

    #[test]
    fn single_stripe_gets_everything() {
        assert_eq!(per_stripe_capacities(7, 1), vec![7]);
    }

    #[test]
    fn sum_always_equals_max_resources() {
        for max in 1..40 {
            for requested in 1..40 {
                let caps = per_stripe_capacities(max, requested);
                assert_eq!(caps.iter().sum::<usize>(), max);
                assert!(caps.len() <= requested);
                assert!(caps.iter().all(|&c| c >= 1));
            }
        }
    }
}
