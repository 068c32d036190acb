//! Epoch-interval policy values

use crate::{Error, Result};

/// A closed interval `[first, last]` over epoch indices with a policy value
/// applied inside the interval and another outside it.
///
/// Used to gate per-epoch decisions such as freezing auxiliary models or
/// turning off mutual learning. An open bound (`None`) extends the interval
/// to the respective end; both bounds open is a configuration error.
#[derive(Clone, Copy, Debug)]
pub struct EpochIntervalToValue<T = bool> {
    first: Option<usize>,
    last: Option<usize>,
    value_inside: T,
    value_outside: T,
}

impl<T: Copy> EpochIntervalToValue<T> {
    /// Build an interval policy; fails fast if both bounds are open
    pub fn new(
        first: Option<usize>,
        last: Option<usize>,
        value_inside: T,
        value_outside: T,
    ) -> Result<Self> {
        if first.is_none() && last.is_none() {
            return Err(Error::Configuration(
                "epoch interval needs at least one bound".to_string(),
            ));
        }
        Ok(Self { first, last, value_inside, value_outside })
    }

    /// The policy value for `epoch`
    pub fn value_at(&self, epoch: usize) -> T {
        if let Some(first) = self.first {
            if epoch < first {
                return self.value_outside;
            }
        }
        if let Some(last) = self.last {
            if epoch > last {
                return self.value_outside;
            }
        }
        self.value_inside
    }
}
