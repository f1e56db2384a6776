/// Q17.14 fixed-point arithmetic.
///
/// Unused by the donation-based scheduler itself — this is the seam an
/// MLFQS `recent_cpu`/`load_avg` implementation would need, ported ahead
/// of time because it's small and self-contained. See
/// `crate::thread::mlfqs` for the stub surface that would consume it.

const FRACTION_BITS: i32 = 14;
const F: i64 = 1 << FRACTION_BITS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fixed(i64);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    pub fn from_int(n: i32) -> Fixed {
        Fixed(n as i64 * F)
    }

    pub fn to_int_trunc(self) -> i32 {
        (self.0 / F) as i32
    }

    pub fn to_int_round(self) -> i32 {
        if self.0 >= 0 {
            ((self.0 + F / 2) / F) as i32
        } else {
            ((self.0 - F / 2) / F) as i32
        }
    }

    pub fn add(self, other: Fixed) -> Fixed {
        Fixed(self.0 + other.0)
    }

    pub fn sub(self, other: Fixed) -> Fixed {
        Fixed(self.0 - other.0)
    }

    pub fn add_int(self, n: i32) -> Fixed {
        Fixed(self.0 + n as i64 * F)
    }

    pub fn sub_int(self, n: i32) -> Fixed {
        Fixed(self.0 - n as i64 * F)
    }

    pub fn mul(self, other: Fixed) -> Fixed {
        Fixed(self.0 * other.0 / F)
    }

    pub fn mul_int(self, n: i32) -> Fixed {
        Fixed(self.0 * n as i64)
    }

    pub fn div(self, other: Fixed) -> Fixed {
        Fixed(self.0 * F / other.0)
    }

    pub fn div_int(self, n: i32) -> Fixed {
        Fixed(self.0 / n as i64)
    }
}
