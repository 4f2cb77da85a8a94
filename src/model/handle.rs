use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::{Rc, Weak};

/// Shared reference to a mutable record.
///
/// Equality and hashing are by identity, so the same record can sit in
/// several tracked lists (display order, night orders) and be found or
/// removed in each of them regardless of its current field values.
pub struct Handle<T>(Rc<T>);

impl<T> Handle<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(value))
    }

    pub fn from_rc(rc: Rc<T>) -> Self {
        Self(rc)
    }

    pub fn downgrade(&self) -> Weak<T> {
        Rc::downgrade(&self.0)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.0), state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
