use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::file_loader;

/// One line of an input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    /// 1-based line number in the source file.
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
}

/// Anything a line-oriented parser can read: a raw [`Line`] or an already
/// parsed log entry whose message is the interesting text.
pub trait TextLine {
    fn lineno(&self) -> usize;
    fn text(&self) -> &str;
}

impl TextLine for Line {
    fn lineno(&self) -> usize {
        self.lineno
    }

    fn text(&self) -> &str {
        &self.text
    }
}

impl<T: TextLine + ?Sized> TextLine for &T {
    fn lineno(&self) -> usize {
        (**self).lineno()
    }

    fn text(&self) -> &str {
        (**self).text()
    }
}

/// A rewindable cursor over a window of a shared, immutable line buffer.
///
/// Invariant: `min <= pos <= max <= items.len()`. Sub-cursors made with
/// [`Lines::copy`] borrow the same buffer and can never see past the
/// parent's window.
#[derive(Debug)]
pub struct Lines<'a, T> {
    items: &'a [T],
    min: usize,
    max: usize,
    pos: usize,
}

// Derived Clone/Copy would require `T: Clone`; the cursor only holds a slice.
impl<'a, T> Clone for Lines<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T> Copy for Lines<'a, T> {}

impl<'a, T> Lines<'a, T> {
    /// A cursor over the whole buffer, positioned at the first line.
    pub fn new(items: &'a [T]) -> Self {
        Lines {
            items,
            min: 0,
            max: items.len(),
            pos: 0,
        }
    }

    pub fn has_next(&self) -> bool {
        self.pos >= self.min && self.pos < self.max
    }

    /// Steps back one line. Only meaningful right after a successful `next`.
    pub fn rewind(&mut self) {
        if self.pos > self.min {
            self.pos -= 1;
        }
    }

    /// Jumps to an absolute position, clamped into the window.
    pub fn rewind_to(&mut self, pos: usize) {
        self.pos = pos.clamp(self.min, self.max);
    }

    /// Returns the line `next` would yield without consuming it.
    pub fn peek(&self) -> Option<&'a T> {
        if self.has_next() {
            Some(&self.items[self.pos])
        } else {
            None
        }
    }

    /// A new cursor over `[from, to)` of the same buffer, clamped into this
    /// cursor's window and positioned at its start.
    pub fn copy(&self, from: usize, to: usize) -> Lines<'a, T> {
        let min = from.clamp(self.min, self.max);
        let max = to.clamp(min, self.max);
        Lines {
            items: self.items,
            min,
            max,
            pos: min,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// First index of the window.
    pub fn start(&self) -> usize {
        self.min
    }

    /// One past the last index of the window.
    pub fn end(&self) -> usize {
        self.max
    }

    /// Number of lines inside the window.
    pub fn len(&self) -> usize {
        self.max - self.min
    }

    pub fn is_empty(&self) -> bool {
        self.max == self.min
    }

    /// Absolute index access, restricted to the window.
    pub fn get(&self, index: usize) -> Option<&'a T> {
        if index >= self.min && index < self.max {
            Some(&self.items[index])
        } else {
            None
        }
    }
}

impl<'a, T> Iterator for Lines<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if !self.has_next() {
            return None;
        }
        let item = &self.items[self.pos];
        self.pos += 1;
        Some(item)
    }
}

/// Splits text into numbered lines; the terminators are not kept.
pub fn split_lines(content: &str) -> Vec<Line> {
    content
        .lines()
        .enumerate()
        .map(|(i, text)| Line::new(i + 1, text))
        .collect()
}

/// Reads a whole file (or the bugreport inside a zip) into numbered lines.
pub fn read_lines<P: AsRef<Path>>(path: P) -> Result<Vec<Line>> {
    let (content, _is_zip) = file_loader::load_bugreport_file(path.as_ref())?;
    let text = String::from_utf8_lossy(&content);
    Ok(split_lines(&text))
}
