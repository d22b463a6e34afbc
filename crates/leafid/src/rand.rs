use rand::{Rng, rng};

/// A trait for random sources that return random integers.
///
/// This abstraction allows you to plug in a real random source or a mocked
/// random source in tests.
///
/// # Example
/// ```
/// use leafid::RandSource;
///
/// struct FixedRand;
/// impl RandSource for FixedRand {
///     fn rand(&self) -> u64 {
///         1234
///     }
/// }
///
/// let rng = FixedRand;
/// assert_eq!(rng.rand(), 1234);
/// ```
pub trait RandSource {
    /// Returns a random integer.
    fn rand(&self) -> u64;
}

/// A `RandSource` that uses the thread-local RNG (`rand::rng()`).
///
/// Each OS thread has its own RNG instance, so calls from multiple threads are
/// contention-free. This type does not store the RNG itself; it accesses the
/// thread-local generator on each call, so it is freely `Send + Sync`.
#[derive(Default, Clone, Copy, Debug)]
pub struct ThreadRandom;

impl RandSource for ThreadRandom {
    fn rand(&self) -> u64 {
        rng().random()
    }
}
