//! Word splitting for plugin protocol lines.
//!
//! Plugins write one command per line. Words are separated by the whitespace
//! class (space, tab, CR, LF and `=`, so `SET x = 5` and `SET x 5` are the same
//! command), a word may be wrapped in single or double quotes to carry
//! whitespace, and a backslash protects the following byte from being read as a
//! delimiter or quote terminator. Escapes are not interpreted: the backslash and
//! the escaped byte both stay in the word.
//!
//! [`split_words`] never allocates. It returns byte spans into the borrowed
//! line, capped at a compile-time word count.

/// Maximum number of words the interpreter looks at on one line.
pub const MAX_WORDS: usize = 20;

#[inline]
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'=')
}

#[inline]
fn is_quote(b: u8) -> bool {
    b == b'\'' || b == b'"'
}

fn skip_spaces(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && is_space(bytes[pos]) {
        pos += 1;
    }
    pos
}

/// The words of one line, as spans over the original text.
#[derive(Debug, Clone, Copy)]
pub struct Words<'a, const N: usize> {
    line: &'a str,
    spans: [(usize, usize); N],
    len: usize,
}

impl<'a, const N: usize> Words<'a, N> {
    /// Word at `index`, or `None` when the line had fewer words.
    pub fn get(&self, index: usize) -> Option<&'a str> {
        if index >= self.len {
            return None;
        }
        let (start, end) = self.spans[index];
        // Spans start and end next to ASCII delimiters, so they always fall on
        // char boundaries.
        Some(&self.line[start..end])
    }

    /// Word at `index` when present and non-empty.
    pub fn non_empty(&self, index: usize) -> Option<&'a str> {
        self.get(index).filter(|word| !word.is_empty())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}

/// Split `line` into at most `N` words.
///
/// Splitting stops when the line is exhausted or `N` words have been captured;
/// anything after the `N`th word is ignored. A line holding only whitespace
/// yields no words. An unterminated quote extends the last word to the end of
/// the line.
pub fn split_words<const N: usize>(line: &str) -> Words<'_, N> {
    let bytes = line.as_bytes();
    let mut words = Words {
        line,
        spans: [(0, 0); N],
        len: 0,
    };
    if N == 0 {
        return words;
    }

    let mut quote: Option<u8> = None;
    let mut pos = skip_spaces(bytes, 0);
    if pos < bytes.len() && is_quote(bytes[pos]) {
        quote = Some(bytes[pos]);
        pos += 1;
    } else if pos == bytes.len() {
        return words;
    }

    let mut start = pos;
    loop {
        if pos >= bytes.len() {
            words.spans[words.len] = (start, pos);
            words.len += 1;
            break;
        }

        let b = bytes[pos];
        if b == b'\\' && pos + 1 < bytes.len() {
            pos += 2;
            continue;
        }

        if quote == Some(b) || (quote.is_none() && is_space(b)) {
            quote = None;
            words.spans[words.len] = (start, pos);
            words.len += 1;

            pos = skip_spaces(bytes, pos + 1);
            if pos < bytes.len() && is_quote(bytes[pos]) {
                quote = Some(bytes[pos]);
                pos += 1;
            }

            if pos >= bytes.len() || words.len == N {
                break;
            }
            start = pos;
            continue;
        }

        pos += 1;
    }

    words
}
