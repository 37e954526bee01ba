use serde::{Deserialize, Serialize};

use crate::error::{BugreportError, Result};

/// Anything that can be walked by a [`Lines`] cursor: a line of text with the
/// line number it had in the original input.
pub trait TextLine {
    fn text(&self) -> &str;
    fn lineno(&self) -> usize;
}

/// One raw line of bugreport input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    /// 1-based line number in the original input.
    pub lineno: usize,
    pub text: String,
}

impl Line {
    pub fn new(lineno: usize, text: impl Into<String>) -> Self {
        Line {
            lineno,
            text: text.into(),
        }
    }

    /// Splits text into numbered lines. Trailing `\r` is dropped so that
    /// reports pulled from Windows hosts parse the same way.
    pub fn split(content: &str) -> Vec<Line> {
        content
            .lines()
            .enumerate()
            .map(|(i, text)| Line::new(i + 1, text.trim_end_matches('\r')))
            .collect()
    }
}

impl TextLine for Line {
    fn text(&self) -> &str {
        &self.text
    }

    fn lineno(&self) -> usize {
        self.lineno
    }
}

/// A bounded view over a shared slice of lines, with a read cursor.
///
/// Views never own or copy the lines they expose: [`Lines::copy`] hands out a
/// narrower view over the same storage with its own independent cursor. All
/// positions taken and returned by this type are relative to the view.
#[derive(Debug, Clone)]
pub struct Lines<'a, T> {
    items: &'a [T],
    min: usize,
    max: usize,
    pos: usize,
}

impl<'a, T> Lines<'a, T> {
    /// A view over the whole slice, cursor at the beginning.
    pub fn new(items: &'a [T]) -> Self {
        Lines {
            items,
            min: 0,
            max: items.len(),
            pos: 0,
        }
    }

    pub fn has_next(&self) -> bool {
        self.pos < self.max
    }

    /// Returns the line under the cursor and advances past it.
    pub fn next(&mut self) -> Result<&'a T> {
        if !self.has_next() {
            return Err(BugreportError::OutOfRange {
                pos: self.pos(),
                len: self.size(),
            });
        }
        let item = &self.items[self.pos];
        self.pos += 1;
        Ok(item)
    }

    /// Undoes the last [`Lines::next`]. Does nothing at the start of the view.
    pub fn rewind(&mut self) {
        if self.pos > self.min {
            self.pos -= 1;
        }
    }

    /// Moves the cursor back to the start of the view.
    pub fn start(&mut self) {
        self.pos = self.min;
    }

    /// Cursor position, in `[0, size()]`.
    pub fn pos(&self) -> usize {
        self.pos - self.min
    }

    pub fn size(&self) -> usize {
        self.max - self.min
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn get(&self, index: usize) -> Option<&'a T> {
        if index < self.size() {
            self.items.get(self.min + index)
        } else {
            None
        }
    }

    /// A new view over `[start, end)` of this view, sharing storage.
    pub fn copy(&self, start: usize, end: usize) -> Result<Lines<'a, T>> {
        if start > end || end > self.size() {
            return Err(BugreportError::InvalidRange {
                start,
                end,
                len: self.size(),
            });
        }
        Ok(Lines {
            items: self.items,
            min: self.min + start,
            max: self.min + end,
            pos: self.min + start,
        })
    }

    /// Iterates over every line of the view, independent of the cursor.
    pub fn iter(&self) -> std::slice::Iter<'a, T> {
        self.items[self.min..self.max].iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> Vec<Line> {
        (0..n).map(|i| Line::new(i + 1, format!("line {}", i))).collect()
    }

    #[test]
    fn test_split_numbers_lines_from_one() {
        let lines = Line::split("first\r\nsecond\nthird");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], Line::new(1, "first"));
        assert_eq!(lines[2].lineno, 3);
        assert_eq!(lines[2].text, "third");
    }

    #[test]
    fn test_next_and_rewind() {
        let storage = sample(3);
        let mut lines = Lines::new(&storage);
        assert!(lines.has_next());
        assert_eq!(lines.next().unwrap().text, "line 0");
        assert_eq!(lines.next().unwrap().text, "line 1");
        lines.rewind();
        assert_eq!(lines.pos(), 1);
        assert_eq!(lines.next().unwrap().text, "line 1");
        assert_eq!(lines.next().unwrap().text, "line 2");
        assert!(!lines.has_next());
    }

    #[test]
    fn test_next_past_end_is_out_of_range() {
        let storage = sample(1);
        let mut lines = Lines::new(&storage);
        lines.next().unwrap();
        match lines.next() {
            Err(BugreportError::OutOfRange { pos, len }) => {
                assert_eq!(pos, 1);
                assert_eq!(len, 1);
            }
            other => panic!("expected OutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_rewind_at_start_stays_put() {
        let storage = sample(2);
        let mut lines = Lines::new(&storage);
        lines.rewind();
        assert_eq!(lines.pos(), 0);
    }

    #[test]
    fn test_copy_size_for_every_valid_range() {
        let storage = sample(6);
        let lines = Lines::new(&storage);
        for a in 0..=lines.size() {
            for b in a..=lines.size() {
                assert_eq!(lines.copy(a, b).unwrap().size(), b - a);
            }
        }
    }

    #[test]
    fn test_copy_does_not_move_original_cursor() {
        let storage = sample(5);
        let mut lines = Lines::new(&storage);
        lines.next().unwrap();

        let mut sub = lines.copy(2, 4).unwrap();
        assert_eq!(sub.pos(), 0);
        assert_eq!(sub.next().unwrap().text, "line 2");
        assert_eq!(sub.next().unwrap().text, "line 3");
        assert!(!sub.has_next());

        assert_eq!(lines.pos(), 1);
        assert_eq!(lines.next().unwrap().text, "line 1");
    }

    #[test]
    fn test_copy_of_copy_is_relative() {
        let storage = sample(10);
        let lines = Lines::new(&storage);
        let outer = lines.copy(3, 9).unwrap();
        let inner = outer.copy(1, 3).unwrap();
        let texts: Vec<&str> = inner.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["line 4", "line 5"]);
        assert_eq!(inner.get(0).unwrap().lineno, 5);
        assert!(inner.get(2).is_none());
    }

    #[test]
    fn test_invalid_copy_ranges() {
        let storage = sample(3);
        let lines = Lines::new(&storage);
        assert!(matches!(
            lines.copy(2, 1),
            Err(BugreportError::InvalidRange { start: 2, end: 1, len: 3 })
        ));
        assert!(matches!(
            lines.copy(0, 4),
            Err(BugreportError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_start_resets_cursor() {
        let storage = sample(3);
        let mut lines = Lines::new(&storage).copy(1, 3).unwrap();
        lines.next().unwrap();
        lines.next().unwrap();
        lines.start();
        assert_eq!(lines.pos(), 0);
        assert_eq!(lines.next().unwrap().text, "line 1");
    }
}
