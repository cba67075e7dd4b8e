//! # cancellable_loops
//!
//! Order-preserving map loops, sequential and parallel, that stop early when an abort flag is set.
//!
//! Every function returns `None` when the loop was cancelled, so callers never mistake a partial
//! result for a complete one. Results of completed loops are always in input order, also for the
//! parallel variants (they require an indexed parallel iterator).
//!
//! ## Example
//!
//! ```
//! use std::sync::atomic::AtomicBool;
//! use cancellable_loops::par_map_cancellable;
//!
//! let abort_flag = AtomicBool::new(false);
//! let squares = par_map_cancellable(vec![1, 2, 3, 4], &abort_flag, |i| i * i);
//!
//! assert_eq!(squares, Some(vec![1, 4, 9, 16]));
//! ```

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Why a fallible loop stopped before producing every item.
enum Stop<E> {
    Aborted,
    Failed(E),
}

/// Maps every element of `iter` sequentially, stopping as soon as `abort_flag` is set.
///
/// # Returns
///
/// `Some(results)` in input order, or `None` if the loop was cancelled.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use cancellable_loops::map_cancellable;
///
/// let abort_flag = AtomicBool::new(false);
///
/// let doubled = map_cancellable(1..=3, &abort_flag, |i| i * 2);
/// assert_eq!(doubled, Some(vec![2, 4, 6]));
///
/// let cancelled = map_cancellable(1..=10, &abort_flag, |i| {
///     if i == 5 {
///         abort_flag.store(true, Ordering::Relaxed);
///     }
///     i
/// });
/// assert_eq!(cancelled, None);
/// ```
pub fn map_cancellable<I, F, T, R>(iter: I, abort_flag: &AtomicBool, mut func: F) -> Option<Vec<R>>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> R,
{
    let iter = iter.into_iter();
    let mut results = Vec::with_capacity(iter.size_hint().0);
    for item in iter {
        if abort_flag.load(Ordering::Relaxed) {
            return None;
        }
        results.push(func(item));
    }
    if abort_flag.load(Ordering::Relaxed) {
        return None;
    }
    Some(results)
}

/// Sequential fallible map. Stops at the first error or when `abort_flag` is set.
///
/// # Returns
///
/// - `Some(Ok(results))` when every item succeeded,
/// - `Some(Err(err))` with the first error encountered,
/// - `None` if the loop was cancelled.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::AtomicBool;
/// use cancellable_loops::try_map_cancellable;
///
/// let abort_flag = AtomicBool::new(false);
/// let parsed = try_map_cancellable(["1", "x", "3"], &abort_flag, |s| s.parse::<i32>());
///
/// assert!(matches!(parsed, Some(Err(_))));
/// ```
pub fn try_map_cancellable<I, F, T, R, E>(
    iter: I,
    abort_flag: &AtomicBool,
    mut func: F,
) -> Option<Result<Vec<R>, E>>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Result<R, E>,
{
    let iter = iter.into_iter();
    let mut results = Vec::with_capacity(iter.size_hint().0);
    for item in iter {
        if abort_flag.load(Ordering::Relaxed) {
            return None;
        }
        match func(item) {
            Ok(result) => results.push(result),
            Err(err) => return Some(Err(err)),
        }
    }
    if abort_flag.load(Ordering::Relaxed) {
        return None;
    }
    Some(Ok(results))
}

/// Parallel map over an indexed parallel iterator, cancelled via `abort_flag`.
///
/// Items that have not started when the flag is raised are skipped and the whole loop returns
/// `None`. The order of the results matches the order of the input.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use cancellable_loops::par_map_cancellable;
///
/// let abort_flag = AtomicBool::new(false);
///
/// let cancelled = par_map_cancellable(0..1000, &abort_flag, |i| {
///     if i == 3 {
///         abort_flag.store(true, Ordering::Relaxed);
///     }
///     i
/// });
///
/// assert_eq!(cancelled, None);
/// ```
pub fn par_map_cancellable<I, F, R>(iter: I, abort_flag: &AtomicBool, func: F) -> Option<Vec<R>>
where
    I: IntoParallelIterator,
    I::Iter: IndexedParallelIterator,
    F: Fn(I::Item) -> R + Sync + Send,
    R: Send,
{
    let results = iter
        .into_par_iter()
        .map(|item| {
            if abort_flag.load(Ordering::Relaxed) {
                None
            } else {
                Some(func(item))
            }
        })
        .collect::<Option<Vec<R>>>()?;

    if abort_flag.load(Ordering::Relaxed) {
        None
    } else {
        Some(results)
    }
}

/// Parallel fallible map. The first error stops the remaining items from starting.
///
/// # Returns
///
/// - `Some(Ok(results))` in input order when every item succeeded,
/// - `Some(Err(err))` with one of the errors encountered,
/// - `None` if the loop was cancelled.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::AtomicBool;
/// use cancellable_loops::try_par_map_cancellable;
///
/// let abort_flag = AtomicBool::new(false);
/// let halves = try_par_map_cancellable(vec![2, 4, 6], &abort_flag, |i: i32| {
///     if i % 2 == 0 { Ok(i / 2) } else { Err(format!("{i} is odd")) }
/// });
///
/// assert_eq!(halves, Some(Ok(vec![1, 2, 3])));
/// ```
pub fn try_par_map_cancellable<I, F, R, E>(
    iter: I,
    abort_flag: &AtomicBool,
    func: F,
) -> Option<Result<Vec<R>, E>>
where
    I: IntoParallelIterator,
    I::Iter: IndexedParallelIterator,
    F: Fn(I::Item) -> Result<R, E> + Sync + Send,
    R: Send,
    E: Send,
{
    let outcome = iter
        .into_par_iter()
        .map(|item| {
            if abort_flag.load(Ordering::Relaxed) {
                Err(Stop::Aborted)
            } else {
                func(item).map_err(Stop::Failed)
            }
        })
        .collect::<Result<Vec<R>, Stop<E>>>();

    match outcome {
        Ok(_) if abort_flag.load(Ordering::Relaxed) => None,
        Ok(results) => Some(Ok(results)),
        Err(Stop::Failed(err)) => Some(Err(err)),
        Err(Stop::Aborted) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn sequential_map_preserves_order() {
        let abort_flag = AtomicBool::new(false);
        let result = map_cancellable(vec!["a", "b", "c"], &abort_flag, |s| s.to_uppercase());
        assert_eq!(
            result,
            Some(vec!["A".to_string(), "B".to_string(), "C".to_string()])
        );
    }

    #[test]
    fn sequential_map_stops_after_abort() {
        let abort_flag = AtomicBool::new(false);
        let calls = AtomicUsize::new(0);
        let result = map_cancellable(0..100, &abort_flag, |i| {
            calls.fetch_add(1, Ordering::Relaxed);
            if i == 2 {
                abort_flag.store(true, Ordering::Relaxed);
            }
            i
        });
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn sequential_try_map_returns_first_error() {
        let abort_flag = AtomicBool::new(false);
        let calls = AtomicUsize::new(0);
        let result = try_map_cancellable(0..10, &abort_flag, |i| {
            calls.fetch_add(1, Ordering::Relaxed);
            if i >= 4 { Err(i) } else { Ok(i) }
        });
        assert_eq!(result, Some(Err(4)));
        assert_eq!(calls.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn parallel_map_preserves_order() {
        let abort_flag = AtomicBool::new(false);
        let result = par_map_cancellable(0..256usize, &abort_flag, |i| i * 3);
        let expected: Vec<usize> = (0..256).map(|i| i * 3).collect();
        assert_eq!(result, Some(expected));
    }

    #[test]
    fn parallel_map_with_preset_abort_does_nothing() {
        let abort_flag = AtomicBool::new(true);
        let calls = AtomicUsize::new(0);
        let result = par_map_cancellable(0..64, &abort_flag, |i| {
            calls.fetch_add(1, Ordering::Relaxed);
            i
        });
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn parallel_try_map_surfaces_error() {
        let abort_flag = AtomicBool::new(false);
        let result = try_par_map_cancellable(0..32, &abort_flag, |i| {
            if i == 17 { Err("bad item") } else { Ok(i) }
        });
        assert_eq!(result, Some(Err("bad item")));
    }

    #[test]
    fn parallel_try_map_with_preset_abort_is_cancelled() {
        let abort_flag = AtomicBool::new(true);
        let result = try_par_map_cancellable(0..8, &abort_flag, |i| Ok::<_, ()>(i));
        assert_eq!(result, None);
    }
}
