//! Dependency specifier scanner.
//!
//! Finds `import`/`export … from`/`require()`/`import()` specifiers in script
//! code without parsing it. Comments and string literals are skipped so
//! commented-out imports and strings that merely look like imports are not
//! reported.

/// How a module refers to a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    /// `import … from`, `import "x"`, `export … from`.
    Static,
    /// `import("x")`: a split point.
    Dynamic,
    /// `require("x")`.
    Require,
}

impl ImportKind {
    /// Static and require edges pull the target into the importer's chunk.
    #[must_use]
    pub fn is_static(self) -> bool {
        !matches!(self, Self::Dynamic)
    }
}

/// One specifier found in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub specifier: String,
    pub kind: ImportKind,
    /// 1-based line of the keyword.
    pub line: u32,
}

/// Scan `source` for dependency specifiers.
///
/// Results are in first-appearance order and deduplicated by specifier. A
/// specifier seen both dynamically and statically is reported once, with the
/// static kind.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ImportRef> {
    let mut scanner = Scanner {
        src: source.as_bytes(),
        pos: 0,
        line: 1,
        found: Vec::new(),
    };
    scanner.run();
    scanner.found
}

struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    found: Vec<ImportRef>,
}

impl Scanner<'_> {
    fn peek(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) {
        if self.src.get(self.pos) == Some(&b'\n') {
            self.line += 1;
        }
        self.pos += 1;
    }

    fn run(&mut self) {
        while let Some(c) = self.peek(0) {
            match c {
                b'/' if self.peek(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment(),
                b'"' | b'\'' | b'`' => {
                    self.read_string();
                }
                b'i' if self.at_keyword("import") => self.import(),
                b'e' if self.at_keyword("export") => self.export(),
                b'r' if self.at_keyword("require") => self.require(),
                _ => self.bump(),
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == b'\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while self.peek(0).is_some() {
            if self.peek(0) == Some(b'*') && self.peek(1) == Some(b'/') {
                self.pos += 2;
                return;
            }
            self.bump();
        }
    }

    fn skip_ws(&mut self) {
        while self.peek(0).is_some_and(|c| c.is_ascii_whitespace()) {
            self.bump();
        }
    }

    /// Keyword at the cursor with identifier boundaries on both sides. A
    /// preceding `.` (member access) also disqualifies it.
    fn at_keyword(&self, keyword: &str) -> bool {
        let kw = keyword.as_bytes();
        let end = self.pos + kw.len();
        if end > self.src.len() || &self.src[self.pos..end] != kw {
            return false;
        }
        if self.pos > 0 {
            let before = self.src[self.pos - 1];
            if is_ident(before) || before == b'.' {
                return false;
            }
        }
        !self.src.get(end).copied().is_some_and(is_ident)
    }

    /// Read a string literal starting at the cursor; `None` for templates
    /// with substitutions.
    fn read_string(&mut self) -> Option<String> {
        let quote = self.peek(0)?;
        self.bump();
        let start = self.pos;
        let mut interpolated = false;
        while let Some(c) = self.peek(0) {
            if c == b'\\' {
                self.bump();
                self.bump();
                continue;
            }
            if c == quote {
                let value = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                self.bump();
                return (!interpolated).then_some(value);
            }
            if quote == b'`' && c == b'$' && self.peek(1) == Some(b'{') {
                interpolated = true;
            }
            if c == b'\n' && quote != b'`' {
                // Unterminated literal.
                return None;
            }
            self.bump();
        }
        None
    }

    fn record(&mut self, specifier: String, kind: ImportKind, line: u32) {
        if specifier.is_empty() {
            return;
        }
        if let Some(existing) = self.found.iter_mut().find(|r| r.specifier == specifier) {
            if existing.kind == ImportKind::Dynamic && kind.is_static() {
                existing.kind = kind;
            }
            return;
        }
        self.found.push(ImportRef {
            specifier,
            kind,
            line,
        });
    }

    fn at_quote(&self) -> bool {
        matches!(self.peek(0), Some(b'"' | b'\'' | b'`'))
    }

    fn import(&mut self) {
        let line = self.line;
        self.pos += "import".len();
        self.skip_ws();
        match self.peek(0) {
            Some(b'(') => {
                self.bump();
                self.skip_ws();
                if self.at_quote() {
                    if let Some(spec) = self.read_string() {
                        self.record(spec, ImportKind::Dynamic, line);
                    }
                }
            }
            // import.meta
            Some(b'.') => {}
            _ => {
                if let Some(spec) = self.statement_specifier(true) {
                    self.record(spec, ImportKind::Static, line);
                }
            }
        }
    }

    fn export(&mut self) {
        let line = self.line;
        self.pos += "export".len();
        if let Some(spec) = self.statement_specifier(false) {
            self.record(spec, ImportKind::Static, line);
        }
    }

    /// Walk an import/export statement up to its `from "x"` clause (or a bare
    /// `import "x"`). Gives up at `;`, or at `=`/`(` for exports, which mark
    /// a declaration rather than a re-export.
    fn statement_specifier(&mut self, allow_bare: bool) -> Option<String> {
        let limit = self.pos + 1000;
        let mut first = true;
        while self.pos < limit {
            self.skip_ws();
            let c = self.peek(0)?;
            match c {
                b';' => return None,
                b'=' | b'(' if !allow_bare => return None,
                b'"' | b'\'' | b'`' if allow_bare && first => return self.read_string(),
                b'"' | b'\'' | b'`' => {
                    self.read_string();
                }
                b'/' if self.peek(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment(),
                b'f' if self.at_keyword("from") => {
                    self.pos += "from".len();
                    self.skip_ws();
                    return if self.at_quote() {
                        self.read_string()
                    } else {
                        None
                    };
                }
                _ => self.bump(),
            }
            first = false;
        }
        None
    }

    fn require(&mut self) {
        let line = self.line;
        self.pos += "require".len();
        self.skip_ws();
        if self.peek(0) != Some(b'(') {
            return;
        }
        self.bump();
        self.skip_ws();
        if !self.at_quote() {
            return;
        }
        if let Some(spec) = self.read_string() {
            self.skip_ws();
            if self.peek(0) == Some(b')') {
                self.record(spec, ImportKind::Require, line);
            }
        }
    }
}

fn is_ident(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}
