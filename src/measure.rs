use unicode_width::UnicodeWidthStr;

/// Monospace text measurement for text marks.
#[derive(Debug, Clone)]
pub struct TextMetrics {
    pub char_width: f64,
    pub line_height: f64,
    pub padding_x: f64,
    pub padding_y: f64,
}

impl Default for TextMetrics {
    fn default() -> Self {
        Self {
            char_width: 8.0,
            line_height: 16.0,
            padding_x: 2.0,
            padding_y: 2.0,
        }
    }
}

impl TextMetrics {
    pub fn text_width(&self, text: &str) -> f64 {
        let width = UnicodeWidthStr::width(text);
        width as f64 * self.char_width
    }

    /// Padded box around `text`, one line per `\n`.
    pub fn text_size(&self, text: &str) -> (f64, f64) {
        let widest = text
            .lines()
            .map(|line| self.text_width(line))
            .fold(0.0, f64::max);
        let lines = text.lines().count().max(1);

        (
            widest + self.padding_x * 2.0,
            lines as f64 * self.line_height + self.padding_y * 2.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_width() {
        let m = TextMetrics::default();
        assert_eq!(m.text_width("User"), 4.0 * 8.0);
    }

    #[test]
    fn test_unicode_width() {
        let m = TextMetrics::default();
        // Full-width characters take two cells.
        assert_eq!(m.text_width("ユーザー"), 8.0 * 8.0);
    }

    #[test]
    fn test_text_size_multiline() {
        let m = TextMetrics::default();
        let (w, h) = m.text_size("ab\nabcd");
        assert_eq!(w, 4.0 * 8.0 + 4.0);
        assert_eq!(h, 2.0 * 16.0 + 4.0);
    }

    #[test]
    fn test_empty_text_has_one_line() {
        let m = TextMetrics::default();
        assert_eq!(m.text_size(""), (4.0, 20.0));
    }
}
