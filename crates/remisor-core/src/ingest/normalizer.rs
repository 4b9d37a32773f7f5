use std::io::{self, BufRead, Write};

use serde::Serialize;

const QUOTES: [char; 7] = ['"', '\'', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}', '\u{201E}'];

/// Scrub one raw line. Returns `None` when nothing is left.
///
/// Commas become periods (decimal commas in the exports), colons, quotes and
/// tabs are removed, and surrounding whitespace is trimmed.
#[must_use]
pub fn normalize_line(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            ',' => out.push('.'),
            ':' | '\t' => {}
            c if QUOTES.contains(&c) => {}
            c => out.push(c),
        }
    }

    let trimmed = out.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == out.len() {
        Some(out)
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_dropped: u64,
}

/// Lazily normalized lines of a reader; one raw line resident at a time.
///
/// Invalid UTF-8 sequences are dropped rather than failing the file.
pub struct NormalizedLines<R> {
    reader: R,
    buf: Vec<u8>,
    stats: NormalizeStats,
}

impl<R: BufRead> NormalizedLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            stats: NormalizeStats::default(),
        }
    }

    pub const fn stats(&self) -> NormalizeStats {
        self.stats
    }
}

impl<R: BufRead> Iterator for NormalizedLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
            self.stats.lines_read += 1;

            let decoded = String::from_utf8_lossy(&self.buf);
            let raw: String = decoded.chars().filter(|c| *c != '\u{FFFD}').collect();

            if let Some(line) = normalize_line(&raw) {
                self.stats.lines_written += 1;
                return Some(Ok(line));
            }
            self.stats.lines_dropped += 1;
        }
    }
}

/// Stream normalized lines from `reader` into `writer`, one per line.
pub fn normalize_to<R: BufRead, W: Write>(reader: R, mut writer: W) -> io::Result<NormalizeStats> {
    let mut lines = NormalizedLines::new(reader);
    for line in lines.by_ref() {
        let line = line?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(lines.stats())
}
