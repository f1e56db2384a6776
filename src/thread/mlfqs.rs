/// Multi-level feedback queue scheduling mode: flag and stub accessors
/// only (spec.md §9, SPEC_FULL.md §3.10). `config::mlfqs_enabled()` is
/// checked by `sync::lock::Lock` to skip the donation walk when set, but
/// nothing in this crate ever flips it on — there is no `recent_cpu`/
/// `load_avg` scheduler driving `nice` here, just the surface a real one
/// would plug into.
use crate::fixed_point::Fixed;

pub fn get_nice() -> i32 {
    0
}

pub fn set_nice(_nice: i32) {
    // No-op: niceness only matters to the MLFQS scheduler, which this
    // core doesn't implement.
}

pub fn get_recent_cpu() -> Fixed {
    Fixed::ZERO
}

pub fn get_load_avg() -> Fixed {
    Fixed::ZERO
}
