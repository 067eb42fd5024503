use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    DarkGray,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
}

impl Color {
    fn code(self) -> (u8, bool) {
        match self {
            Self::DarkGray => (0, true),
            Self::Red => (1, false),
            Self::Green => (2, false),
            Self::Yellow => (3, false),
            Self::Blue => (4, false),
            Self::Magenta => (5, false),
        }
    }

    fn fg(self) -> u8 {
        let (code, light) = self.code();
        if light { code + 90 } else { code + 30 }
    }
}

/// Displays a value in bold with the given foreground color.
pub struct WithFg<T>(Color, T);

impl<T> fmt::Display for WithFg<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fg = self.0.fg();
        let value = &self.1;
        write!(f, "\x1B[{fg};1m{value}\x1B[0m")
    }
}

impl<T> WithFg<T> {
    pub fn new(color: Color, value: T) -> Self {
        Self(color, value)
    }
}

#[cfg(test)]
mod tests {
    use std::format;

    use super::*;

    #[test]
    fn test_escape_codes() {
        assert_eq!(format!("{}", WithFg::new(Color::Red, "x")), "\x1B[31;1mx\x1B[0m");
        assert_eq!(format!("{}", WithFg::new(Color::DarkGray, 1)), "\x1B[90;1m1\x1B[0m");
        assert_eq!(format!("{}", WithFg::new(Color::Magenta, 'm')), "\x1B[35;1mm\x1B[0m");
    }
}
