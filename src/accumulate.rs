//! Gradient accumulation policies.
//!
//! # Combining Gradient Contributions
//!
//! When a value feeds several consumers, the backward pass collects one
//! gradient contribution per consumer and combines them into the single
//! upstream gradient that the producer's own gradient function needs.
//! [`Accumulate`] is the policy that performs the combination: a zero
//! element plus an addition, forming a commutative monoid so that the
//! order in which consumer edges are folded is never observable.
//!
//! The policy also supplies [`Accumulate::unit`], the gradient of a value
//! with respect to itself. It seeds the backward pass at the declared
//! output when the caller does not provide an explicit upstream gradient.
//!
//! Numeric primitives get their policy from the usual algebraic identities
//! (`num_traits::Zero` / `num_traits::One`); pairs and triples combine
//! component-wise, which is all the fixed-arity tuple support the engine
//! needs.

use num_traits::{One, Zero};

/// Zero element, commutative addition and identity seed for one value type.
///
/// `accumulate` must be commutative and associative with `zero` as its
/// identity; multi-consumer summation folds contributions in an
/// unspecified order.
pub trait Accumulate: Clone {
    /// The empty gradient. Contributed by values that were computed but
    /// never consumed toward the differentiated quantity.
    fn zero() -> Self;

    /// Combines two gradient contributions flowing into the same value.
    fn accumulate(self, rhs: Self) -> Self;

    /// The gradient of a value with respect to itself, used to seed the
    /// backward pass when no explicit upstream gradient is supplied.
    fn unit() -> Self;
}

macro_rules! numeric_accumulate {
    ($($ty:ty),* $(,)?) => {$(
        impl Accumulate for $ty {
            fn zero() -> Self {
                <$ty as Zero>::zero()
            }

            fn accumulate(self, rhs: Self) -> Self {
                self + rhs
            }

            fn unit() -> Self {
                <$ty as One>::one()
            }
        }
    )*};
}

numeric_accumulate!(f32, f64, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128);

impl<A: Accumulate, B: Accumulate> Accumulate for (A, B) {
    fn zero() -> Self {
        (A::zero(), B::zero())
    }

    fn accumulate(self, rhs: Self) -> Self {
        (self.0.accumulate(rhs.0), self.1.accumulate(rhs.1))
    }

    fn unit() -> Self {
        (A::unit(), B::unit())
    }
}

impl<A: Accumulate, B: Accumulate, C: Accumulate> Accumulate for (A, B, C) {
    fn zero() -> Self {
        (A::zero(), B::zero(), C::zero())
    }

    fn accumulate(self, rhs: Self) -> Self {
        (
            self.0.accumulate(rhs.0),
            self.1.accumulate(rhs.1),
            self.2.accumulate(rhs.2),
        )
    }

    fn unit() -> Self {
        (A::unit(), B::unit(), C::unit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_identity() {
        assert_eq!(<f64 as Accumulate>::zero().accumulate(3.5), 3.5);
        assert_eq!(3.5f64.accumulate(<f64 as Accumulate>::zero()), 3.5);
    }

    #[test]
    fn accumulation_is_grouping_independent() {
        let grouped_left = 1.0f64.accumulate(2.0).accumulate(4.0);
        let grouped_right = 1.0f64.accumulate(2.0f64.accumulate(4.0));
        assert_eq!(grouped_left, grouped_right);
        assert_eq!(grouped_left, 7.0);
    }

    #[test]
    fn tuple_policy_is_component_wise() {
        let a = (1.0f64, 2.0f64);
        let b = (10.0f64, 20.0f64);
        assert_eq!(a.accumulate(b), (11.0, 22.0));
        assert_eq!(<(f64, f64)>::zero(), (0.0, 0.0));
        assert_eq!(<(f64, f64, f64)>::unit(), (1.0, 1.0, 1.0));
    }
}
