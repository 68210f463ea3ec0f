//! Atom Implementation
//!
//! An Atom is the smallest value cell in the graph. It holds an optional
//! JSON payload and a set of capability flags.
//!
//! # Observable Atoms
//!
//! An atom created with a comparator is "observable": a write only applies
//! (and only counts as a change for propagation) when the comparator reports
//! the new value as different from the current one. Equal writes are a no-op.
//! This is the dirty-checking gate that stops needless recomputation.
//!
//! Atoms do not notify anybody themselves. The owning graph collects written
//! atoms into the frontier of the next propagation pass.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ChronoError, ChronoResult};

/// Read access to a payload.
pub trait Readable {
    /// The current payload, or `None` when no value has been set.
    fn get(&self) -> Option<&Value>;

    /// Whether a payload is present. `Some(Value::Null)` counts as present.
    fn has_value(&self) -> bool {
        self.get().is_some()
    }
}

/// Write access to a payload.
pub trait Writable: Readable {
    /// Replace the payload. Returns `self` for chaining.
    fn set(&mut self, value: Value) -> ChronoResult<&mut Self>;
}

/// Capability flags of an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub readable: bool,
    pub writable: bool,
    /// Once a value is set, further writes are rejected.
    pub immutable: bool,
}

impl Capabilities {
    /// Readable and writable.
    pub const READ_WRITE: Self = Self {
        readable: true,
        writable: true,
        immutable: false,
    };

    /// Readable, writable once.
    pub const WRITE_ONCE: Self = Self {
        readable: true,
        writable: true,
        immutable: true,
    };
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

/// Compares an old payload to a new one. `Ordering::Equal` means "same value".
#[derive(Clone)]
pub struct Comparator(Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>);

impl Comparator {
    /// Wrap a comparison function.
    pub fn new<F>(compare: F) -> Self
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        Self(Arc::new(compare))
    }

    /// Compare two payloads.
    pub fn compare(&self, old: &Value, new: &Value) -> Ordering {
        (self.0)(old, new)
    }

    /// Whether `new` differs from `old`. A missing old value always differs.
    pub fn differs(&self, old: Option<&Value>, new: &Value) -> bool {
        match old {
            Some(old) => self.compare(old, new) != Ordering::Equal,
            None => true,
        }
    }
}

impl Default for Comparator {
    /// Strict value inequality. Numbers are ordered numerically; any other
    /// pair of unequal values reports `Greater`.
    fn default() -> Self {
        Self::new(|old, new| {
            if old == new {
                return Ordering::Equal;
            }
            match (old.as_f64(), new.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Greater),
                _ => Ordering::Greater,
            }
        })
    }
}

impl Debug for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Comparator")
    }
}

/// A single value cell.
///
/// # Example
///
/// ```rust
/// use chrono_core::chrono::{Atom, Readable, Writable};
/// use serde_json::json;
///
/// let mut atom = Atom::observable();
/// atom.set(json!(1)).unwrap().set(json!(2)).unwrap();
/// assert_eq!(atom.get(), Some(&json!(2)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Atom {
    value: Option<Value>,
    capabilities: Capabilities,
    comparator: Option<Comparator>,
    writes: u64,
}

impl Atom {
    /// Create an empty plain atom. Every write applies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a plain atom holding `value`.
    pub fn with_value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// Create an empty observable atom using the default comparator.
    pub fn observable() -> Self {
        Self::default().with_comparator(Comparator::default())
    }

    /// Attach a comparator, turning this into an observable atom.
    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Override the capability flags.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Get the capability flags.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether writes pass through a comparator.
    pub fn is_observable(&self) -> bool {
        self.comparator.is_some()
    }

    /// Number of writes actually applied to this atom.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Apply a write. Returns `true` when the payload changed.
    ///
    /// Observable atoms skip writes their comparator reports as equal.
    pub fn write(&mut self, value: Value) -> ChronoResult<bool> {
        if !self.capabilities.writable {
            return Err(ChronoError::ReadOnly);
        }
        if self.capabilities.immutable && self.value.is_some() {
            return Err(ChronoError::AlreadySet);
        }
        if let Some(comparator) = &self.comparator {
            if !comparator.differs(self.value.as_ref(), &value) {
                return Ok(false);
            }
        }
        self.value = Some(value);
        self.writes += 1;
        Ok(true)
    }
}

impl Readable for Atom {
    fn get(&self) -> Option<&Value> {
        if self.capabilities.readable {
            self.value.as_ref()
        } else {
            None
        }
    }
}

impl Writable for Atom {
    fn set(&mut self, value: Value) -> ChronoResult<&mut Self> {
        self.write(value)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_atom_has_no_value() {
        let atom = Atom::new();
        assert!(!atom.has_value());
        assert_eq!(atom.get(), None);
    }

    #[test]
    fn null_is_a_value() {
        let atom = Atom::with_value(Value::Null);
        assert!(atom.has_value());
        assert_eq!(atom.get(), Some(&Value::Null));
    }

    #[test]
    fn plain_atom_applies_every_write() {
        let mut atom = Atom::new();
        atom.set(json!(1)).unwrap().set(json!(1)).unwrap();
        assert_eq!(atom.write_count(), 2);
    }

    #[test]
    fn observable_atom_skips_equal_writes() {
        let mut atom = Atom::observable();

        assert!(atom.write(json!("a")).unwrap());
        assert!(!atom.write(json!("a")).unwrap());
        assert!(atom.write(json!("b")).unwrap());

        assert_eq!(atom.write_count(), 2);
        assert_eq!(atom.get(), Some(&json!("b")));
    }

    #[test]
    fn custom_comparator_controls_the_gate() {
        // Treat values as equal when they agree modulo 10.
        let mut atom = Atom::new().with_comparator(Comparator::new(|a, b| {
            let a = a.as_i64().unwrap_or_default() % 10;
            let b = b.as_i64().unwrap_or_default() % 10;
            a.cmp(&b)
        }));

        assert!(atom.write(json!(3)).unwrap());
        assert!(!atom.write(json!(13)).unwrap());
        assert_eq!(atom.get(), Some(&json!(3)));
    }

    #[test]
    fn immutable_atom_rejects_second_write() {
        let mut atom = Atom::new().with_capabilities(Capabilities::WRITE_ONCE);
        atom.set(json!(1)).unwrap();
        assert!(matches!(atom.write(json!(2)), Err(ChronoError::AlreadySet)));
        assert_eq!(atom.get(), Some(&json!(1)));
    }

    #[test]
    fn default_comparator_orders_numbers() {
        let comparator = Comparator::default();
        assert_eq!(comparator.compare(&json!(1), &json!(2)), Ordering::Less);
        assert_eq!(comparator.compare(&json!(2), &json!(2.0)), Ordering::Equal);
        assert_eq!(comparator.compare(&json!("x"), &json!("y")), Ordering::Greater);
    }
}
