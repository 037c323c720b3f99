use core::fmt;

/// The kind of contract a caller or the crate itself broke.
///
/// Violations are never returned as values: the checks below log the failure
/// and panic, because a broken reference count means the ownership graph can
/// no longer be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Violation {
    /// The caller supplied an invalid argument or called an operation in a
    /// state that does not allow it, e.g. dereferencing a void [`Ref`].
    ///
    /// [`Ref`]: crate::Ref
    Precondition,
    /// Internal bookkeeping is inconsistent, e.g. the sentinel reached a zero
    /// count.
    Invariant,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Precondition => f.write_str("precondition violated"),
            Violation::Invariant => f.write_str("invariant violated"),
        }
    }
}

#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn fail(violation: Violation, message: fmt::Arguments<'_>) -> ! {
    log::error!("{}: {}", violation, message);
    panic!("{}: {}", violation, message)
}

macro_rules! require {
    ($cond:expr, $($arg:tt)+) => {
        if ::branches::unlikely(!$cond) {
            $crate::contract::fail(
                $crate::contract::Violation::Precondition,
                format_args!($($arg)+),
            )
        }
    };
}

macro_rules! verify {
    ($cond:expr, $($arg:tt)+) => {
        if ::branches::unlikely(!$cond) {
            $crate::contract::fail(
                $crate::contract::Violation::Invariant,
                format_args!($($arg)+),
            )
        }
    };
}
