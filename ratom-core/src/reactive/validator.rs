//! Validators
//!
//! A validator is a predicate attached to an atom or derivation. Every new
//! value is checked before it is stored; a rejected value leaves the node
//! exactly as it was.

use std::fmt::Display;
use std::rc::Rc;

use super::equality::Datum;
use crate::error::{Error, Result};

/// The outcome of a validator call.
///
/// Implemented for `bool` (`false` rejects) and for `Result<(), E>` where the
/// error explains the rejection.
pub trait Verdict {
    /// `Ok(())` to accept, `Err(outcome)` to reject.
    fn into_verdict(self) -> Result<(), String>;
}

impl Verdict for bool {
    fn into_verdict(self) -> Result<(), String> {
        if self {
            Ok(())
        } else {
            Err("false".to_string())
        }
    }
}

impl<E: Display> Verdict for Result<(), E> {
    fn into_verdict(self) -> Result<(), String> {
        self.map_err(|e| e.to_string())
    }
}

/// A type-erased validator.
pub(crate) type Validator<T> = Rc<dyn Fn(&T) -> Result<(), String>>;

pub(crate) fn validator<T, V, F>(f: F) -> Validator<T>
where
    T: Datum,
    V: Verdict,
    F: Fn(&T) -> V + 'static,
{
    Rc::new(move |value| f(value).into_verdict())
}

/// Run `validator` (if any) against `value`.
pub(crate) fn check<T: Datum>(validator: Option<&Validator<T>>, value: &T) -> Result<()> {
    match validator {
        Some(validator) => validator(value).map_err(|outcome| Error::Validation {
            value: format!("{value:?}"),
            outcome,
        }),
        None => Ok(()),
    }
}
