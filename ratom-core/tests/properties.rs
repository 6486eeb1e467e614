//! Property Tests for Propagation
//!
//! Random write sequences against a small graph, checked against a direct
//! recomputation of the same function.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use ratom_core::{Derivable, Error, Runtime};

/// One step applied to the pair of atoms.
#[derive(Debug, Clone)]
enum Step {
    SetA(i8),
    SetB(i8),
    /// Both writes inside one transaction, committed or aborted.
    Both { a: i8, b: i8, commit: bool },
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<i8>().prop_map(Step::SetA),
        any::<i8>().prop_map(Step::SetB),
        (any::<i8>(), any::<i8>(), any::<bool>())
            .prop_map(|(a, b, commit)| Step::Both { a, b, commit }),
    ]
}

fn model(a: i32, b: i32) -> i32 {
    if a >= 0 {
        a * 2 + b
    } else {
        b - a
    }
}

proptest! {
    /// A derivation always agrees with a direct evaluation of its function,
    /// and its reaction fires exactly when the result changes.
    #[test]
    fn derivation_matches_model(steps in prop::collection::vec(arb_step(), 1..40)) {
        let rt = Runtime::new();
        let a = rt.atom(0_i32);
        let b = rt.atom(0_i32);
        let shaped = {
            let (a, b) = (a.clone(), b.clone());
            rt.derive(move || model(a.get(), b.get()))
        };
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _reaction = shaped.react(move |v: &i32| sink.borrow_mut().push(*v)).unwrap();

        let mut expected = vec![0];
        let (mut va, mut vb) = (0, 0);
        for step in steps {
            match step {
                Step::SetA(x) => {
                    a.set(i32::from(x)).unwrap();
                    va = i32::from(x);
                }
                Step::SetB(x) => {
                    b.set(i32::from(x)).unwrap();
                    vb = i32::from(x);
                }
                Step::Both { a: x, b: y, commit } => {
                    let result: Result<(), Error> = rt.transact(|| {
                        a.set(i32::from(x))?;
                        b.set(i32::from(y))?;
                        if commit { Ok(()) } else { Err(Error::failed("rolled back")) }
                    });
                    prop_assert_eq!(result.is_ok(), commit);
                    if commit {
                        va = i32::from(x);
                        vb = i32::from(y);
                    }
                }
            }
            let now = model(va, vb);
            if expected.last() != Some(&now) {
                expected.push(now);
            }
            prop_assert_eq!(shaped.get().unwrap(), Some(now));
        }

        prop_assert_eq!(&*seen.borrow(), &expected);
    }

    /// A reaction never fires more often than its input was written.
    #[test]
    fn reaction_fires_at_most_once_per_write(values in prop::collection::vec(0_u8..4, 0..50)) {
        let rt = Runtime::new();
        let a = rt.atom(0_u8);
        let left = a.derive(|x| u32::from(*x) + 1);
        let right = a.derive(|x| u32::from(*x) * 3);
        let sum = rt.derive2(&left, &right, |l, r| l + r);
        let fired = Rc::new(Cell::new(0_usize));
        let count = fired.clone();
        let _reaction = sum.react(move |_: &u32| count.set(count.get() + 1)).unwrap();

        let mut changes = 0;
        let mut current = 0;
        for value in values {
            a.set(value).unwrap();
            if value != current {
                changes += 1;
                current = value;
            }
        }

        prop_assert_eq!(fired.get(), changes + 1);
        prop_assert_eq!(sum.get().unwrap(), Some(u32::from(current) * 4 + 1));
    }
}
