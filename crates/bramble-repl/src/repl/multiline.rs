//! Multi-line input collection for the REPL
//!
//! Markup fragments are typed as JSON, so a fragment is complete once every
//! bracket and brace opened outside a string literal has been closed.

/// Result of processing a line of input
#[derive(Debug, PartialEq)]
pub enum LineProcessResult {
    /// Input is complete and ready for rendering
    Complete(String),
    /// More input is needed to complete the fragment
    NeedMore,
}

/// Buffers typed lines until the fragment's brackets balance
pub struct MultiLineCollector {
    buffer: String,
    /// Closers still owed, innermost last
    open: Vec<char>,
    in_string: bool,
    escaped: bool,
    /// A closer arrived that nothing opened; hand the text to the JSON parser
    mismatched: bool,
}

impl MultiLineCollector {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            open: Vec::new(),
            in_string: false,
            escaped: false,
            mismatched: false,
        }
    }

    /// Continuation prompt while a fragment is open
    pub fn get_prompt(&self) -> &'static str {
        if self.is_collecting() {
            ".. "
        } else {
            ">> "
        }
    }

    pub fn is_collecting(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Drop any partial fragment
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.open.clear();
        self.in_string = false;
        self.escaped = false;
        self.mismatched = false;
    }

    pub fn process_line(&mut self, line: &str) -> LineProcessResult {
        if self.is_collecting() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
        line.chars().for_each(|ch| self.scan(ch));

        let open = self.in_string || !self.open.is_empty();
        if open && !self.mismatched {
            return LineProcessResult::NeedMore;
        }
        let fragment = std::mem::take(&mut self.buffer);
        self.reset();
        LineProcessResult::Complete(fragment)
    }

    fn scan(&mut self, ch: char) {
        if self.in_string {
            match (self.escaped, ch) {
                (true, _) => self.escaped = false,
                (false, '\\') => self.escaped = true,
                (false, '"') => self.in_string = false,
                _ => {}
            }
            return;
        }
        match ch {
            '"' => self.in_string = true,
            '[' => self.open.push(']'),
            '{' => self.open.push('}'),
            ']' | '}' => {
                if self.open.pop() != Some(ch) {
                    self.mismatched = true;
                }
            }
            _ => {}
        }
    }
}

impl Default for MultiLineCollector {
    fn default() -> Self {
        Self::new()
    }
}
