use crate::types::{Condition, Fine};

/// Fine for a unit returned worn out.
pub const FINE_WORNOUT: Fine = 100;
/// Fine for a unit returned lost.
pub const FINE_LOST: Fine = 200;

/// Fine levied for a return in the given condition. The schedule is fixed.
pub const fn fine_for(condition: Condition) -> Fine {
    match condition {
        Condition::Good => 0,
        Condition::Wornout => FINE_WORNOUT,
        Condition::Lost => FINE_LOST,
    }
}
