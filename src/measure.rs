//! Simple zero-overhead unit of measure types
//!
//! A poor man's version of F#'s units of measure, in order to keep units
//! correct by construction.  I wrote these rather than use the popular `uom`
//! crate because the latter obscures the actual storage unit and numeric type.

use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

use num_traits::Num;

pub trait UnitOfMeasure<N>
where
    N: Num + Copy,
{
    fn value(&self) -> N;
}

macro_rules! unit_of_measure {
    ($u:tt) => {
        #[derive(Clone, Copy, Default, PartialEq, PartialOrd, Debug)]
        pub struct $u<N: Num + Copy>(pub N);

        impl<N> UnitOfMeasure<N> for $u<N>
        where
            N: Num + Copy,
        {
            fn value(&self) -> N {
                self.0
            }
        }

        impl<N> Add for $u<N>
        where
            N: Num + Copy + Add,
        {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl<N> AddAssign for $u<N>
        where
            N: Num + Copy + AddAssign,
        {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl<N> Sub for $u<N>
        where
            N: Num + Copy + Sub,
        {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl<N> Neg for $u<N>
        where
            N: Num + Copy + Neg<Output = N>,
        {
            type Output = Self;

            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl<N> Mul<N> for $u<N>
        where
            N: Num + Copy + Mul,
        {
            type Output = Self;

            fn mul(self, rhs: N) -> Self {
                Self(self.0 * rhs)
            }
        }

        impl<N> Div<N> for $u<N>
        where
            N: Num + Copy + Div,
        {
            type Output = Self;

            fn div(self, rhs: N) -> Self {
                Self(self.0 / rhs)
            }
        }
    };
}

// Time units:
unit_of_measure![Seconds];

// Distance and area units:
unit_of_measure![Meters];
unit_of_measure![SquareMeters];

// Angular units:
unit_of_measure![Degrees];

impl Degrees<f64> {
    /// The angle in radians, for trigonometry at call sites.
    pub fn to_radians(self) -> f64 {
        self.0.to_radians()
    }

    pub fn from_radians(rad: f64) -> Self {
        Degrees(rad.to_degrees())
    }
}

impl<T> Display for Meters<T>
where
    T: Num + Copy + Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}m", self.0)
    }
}

impl<T> Display for Degrees<T>
where
    T: Num + Copy + Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\u{00b0}", self.0)
    }
}

impl<T> Display for Seconds<T>
where
    T: Num + Copy + Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_arithmetic() {
        assert_eq!(Meters(3.0) + Meters(4.0), Meters(7.0));
        assert_eq!(Meters(10.0) - Meters(4.0), Meters(6.0));
        assert_eq!(Meters(3.0) * 2.0, Meters(6.0));
        assert_eq!(Meters(8.0) / 2.0, Meters(4.0));
        assert!(Meters(1.0) < Meters(2.0));
    }

    #[test]
    fn degree_radian_round_trip() {
        let d = Degrees(45.0);
        assert!((Degrees::from_radians(d.to_radians()).0 - 45.0).abs() < 1e-12);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Meters(5.0)), "5m");
        assert_eq!(format!("{}", Degrees(5.0)), "5°");
    }
}
