use core::{fmt, panic};

use snafu::GenerateImplicitData;

/// Source location at which an [`Error`](crate::Error) was created.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location(&'static panic::Location<'static>);

impl Location {
    /// Returns the location of the caller.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        Self(panic::Location::caller())
    }

    #[must_use]
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line()
    }

    #[must_use]
    pub fn column(&self) -> u32 {
        self.0.column()
    }

    #[must_use]
    pub fn as_panic_location(&self) -> &'static panic::Location<'static> {
        self.0
    }
}

impl From<&'static panic::Location<'static>> for Location {
    fn from(location: &'static panic::Location<'static>) -> Self {
        Self(location)
    }
}

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self::caller()
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::caller()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
