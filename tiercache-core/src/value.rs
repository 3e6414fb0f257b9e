//! Cache value wrapper distinguishing misses from cached nulls

/// A value read from or written to a cache.
///
/// Distinguishes "nothing was ever cached" (`no_value`) from "null was
/// intentionally cached" (`null`), so populate-on-miss callers can avoid
/// re-invoking a factory for keys known to be empty. Immutable once
/// constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValue<T> {
    value: Option<T>,
    has_value: bool,
}

impl<T> CacheValue<T> {
    /// Wrap a concrete value
    pub fn new(value: T) -> Self {
        Self {
            value: Some(value),
            has_value: true,
        }
    }

    /// The cached-null sentinel: the entry exists, its value is the default
    pub const fn null() -> Self {
        Self {
            value: None,
            has_value: true,
        }
    }

    /// The miss sentinel: no entry exists under the key
    pub const fn no_value() -> Self {
        Self {
            value: None,
            has_value: false,
        }
    }

    /// Whether an entry exists (possibly a cached null)
    pub fn has_value(&self) -> bool {
        self.has_value
    }

    /// Whether the entry exists and is a cached null
    pub fn is_null(&self) -> bool {
        self.has_value && self.value.is_none()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// The wrapped value, or `T::default()` for the null sentinel and misses
    pub fn value_or_default(self) -> T
    where
        T: Default,
    {
        self.value.unwrap_or_default()
    }

    /// Map the wrapped value, preserving the sentinel flags
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CacheValue<U> {
        CacheValue {
            value: self.value.map(f),
            has_value: self.has_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_exists_with_default_value() {
        let null = CacheValue::<i32>::null();
        assert!(null.has_value());
        assert!(null.is_null());
        assert_eq!(null.value_or_default(), i32::default());
    }

    #[test]
    fn no_value_is_a_miss() {
        let miss = CacheValue::<String>::no_value();
        assert!(!miss.has_value());
        assert!(!miss.is_null());
        assert_eq!(miss.value(), None);
    }

    #[test]
    fn wrapped_value_round_trips() {
        let v = CacheValue::new(vec![1u8, 2, 3]);
        assert!(v.has_value());
        assert!(!v.is_null());
        assert_eq!(v.into_value(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn map_preserves_sentinels() {
        let v = CacheValue::new(2).map(|n| n * 10);
        assert_eq!(v.value(), Some(&20));

        let null = CacheValue::<i32>::null().map(|n| n * 10);
        assert!(null.is_null());

        let miss = CacheValue::<i32>::no_value().map(|n| n * 10);
        assert!(!miss.has_value());
    }
}
