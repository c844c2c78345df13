pub(crate) use core::fmt::*;

/// Formats a value using a provided formatting function, so that it can be
/// recorded as a `tracing` field.
#[cfg(any(test, feature = "tracing", loom))]
pub(crate) struct FormatWith<T, F = fn(&T, &mut Formatter<'_>) -> Result>
where
    F: Fn(&T, &mut Formatter<'_>) -> Result,
{
    value: T,
    fmt: F,
}

#[cfg(any(test, feature = "tracing", loom))]
#[inline]
#[must_use]
pub(crate) fn ptr<T: Pointer>(value: T) -> FormatWith<T> {
    FormatWith {
        value,
        fmt: Pointer::fmt,
    }
}

#[cfg(any(test, feature = "tracing", loom))]
impl<T, F> Debug for FormatWith<T, F>
where
    F: Fn(&T, &mut Formatter<'_>) -> Result,
{
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        (self.fmt)(&self.value, f)
    }
}
