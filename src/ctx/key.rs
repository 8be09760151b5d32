//! Identity-compared keys for context value bindings.

use core::fmt;
use std::rc::Rc;

struct KeyData {
    name: String,
}

/// A key for a context value binding.
///
/// Keys compare by identity: two keys are equal only when one was cloned
/// from the other. The name is carried for diagnostics and has no bearing
/// on equality, so independent modules can use the same name without
/// colliding.
///
/// # Example
///
/// ```
/// use cxtree::Key;
///
/// let key = Key::new("request-id");
/// assert_eq!(key, key.clone());
/// assert_ne!(key, Key::new("request-id"));
/// ```
#[derive(Clone)]
pub struct Key {
    data: Rc<KeyData>,
}

impl Key {
    /// Creates a fresh key with a diagnostic name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            data: Rc::new(KeyData { name: name.into() }),
        }
    }

    /// Returns the diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.data.name
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl Eq for Key {}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", self.data.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_identity() {
        let key = Key::new("k");
        assert_eq!(key, key.clone());
        assert_ne!(key, Key::new("k"));
        assert_eq!(key.name(), "k");
    }
}
