//! Value Equality
//!
//! Writes and recomputations only propagate when the new value differs from
//! the old one. "Differs" is decided by a per-node equality function, which
//! defaults to [`same`].

use std::any::Any;
use std::fmt::Debug;
use std::rc::Rc;

/// Values that can be stored in the graph.
///
/// Blanket-implemented for every `Clone + PartialEq + Debug + 'static` type.
/// `Debug` is used to name rejected values in validation errors.
pub trait Datum: Clone + PartialEq + Debug + 'static {}

impl<T> Datum for T where T: Clone + PartialEq + Debug + 'static {}

/// A node's equality function.
pub(crate) type Equality<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Default equality.
///
/// Tried in order: the two references point at the same value; both are
/// floats and both are NaN; `PartialEq` says they are equal.
pub fn same<T: Datum>(a: &T, b: &T) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    let (any_a, any_b): (&dyn Any, &dyn Any) = (a, b);
    if let (Some(x), Some(y)) = (any_a.downcast_ref::<f64>(), any_b.downcast_ref::<f64>()) {
        if x.is_nan() && y.is_nan() {
            return true;
        }
    }
    if let (Some(x), Some(y)) = (any_a.downcast_ref::<f32>(), any_b.downcast_ref::<f32>()) {
        if x.is_nan() && y.is_nan() {
            return true;
        }
    }
    a == b
}

pub(crate) fn default_equality<T: Datum>() -> Equality<T> {
    Rc::new(same::<T>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_same_as_nan() {
        assert!(same(&f64::NAN, &f64::NAN));
        assert!(same(&f32::NAN, &f32::NAN));
        assert!(!same(&f64::NAN, &1.0));
    }

    #[test]
    fn falls_back_to_partial_eq() {
        assert!(same(&vec![1, 2], &vec![1, 2]));
        assert!(!same(&"a".to_string(), &"b".to_string()));
    }

    #[test]
    fn identical_reference_is_same() {
        let value = vec![f64::NAN];
        assert!(same(&value, &value));
        assert!(!same(&value, &value.clone()));
    }
}
