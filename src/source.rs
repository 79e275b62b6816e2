//! Character source: an indexable view over the input with line/column
//! tracking, used to turn byte offsets into human-readable positions for
//! diagnostics.

/// Precomputed line-start offsets for a source buffer, so any byte offset
/// can be resolved to a 1-based (line, column) pair without rescanning the
/// whole buffer on every error.
pub struct SourceMap {
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    /// Resolve a byte offset into a 1-based (line, column) pair. Columns are
    /// counted in UTF-8 chars, not bytes, so non-ASCII identifiers and
    /// string contents report sensible positions.
    pub fn line_col(&self, source: &str, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[line];
        let column = source
            .get(line_start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(0);
        (line + 1, column + 1)
    }
}
