//! Various small helper functions

use std::num::ParseIntError;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Parses a Duration from a string containing milliseconds.
/// Useful for command line parsing
pub fn parse_millis(src: &str) -> Result<Duration, ParseIntError> {
    let millis = src.parse::<u64>()?;
    Ok(Duration::from_millis(millis))
}

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// Every structure guarded this way is left consistent between statements, so a panicking
/// job function must not take the whole scheduler or hub down with it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn parse_millis_from_string() {
        assert_eq!(parse_millis("2000"), Ok(Duration::from_millis(2000)));
        assert!(parse_millis("two seconds").is_err());
    }

    #[test]
    fn recover_poisoned_lock() {
        let mutex = std::sync::Arc::new(Mutex::new(42));
        let cloned = mutex.clone();

        std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poisoning the lock");
        })
        .join()
        .ok();

        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 42);
    }
}
