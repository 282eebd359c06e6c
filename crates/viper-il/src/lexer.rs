//! A small hand-rolled tokenizer for the textual IL grammar. `#`-prefixed
//! lines and C-style `//` line comments are stripped before tokenizing
//! (§4.3); the lexer otherwise has no statefulness beyond its cursor.

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Global(String),   // @name
    Temp(String),     // %name  (numeric or symbolic, the parser decides)
    Label(String),    // ^name
    Int(i64),
    Float(f64),
    Str(String),
    Punct(char), // ( ) { } : , -> = . etc. single-char punctuation
    Arrow,       // ->
    Newline,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { chars: src.char_indices().peekable(), line: 1, col: 1 }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    pub fn tokenize(mut self) -> Result<Vec<(Tok, Pos)>, String> {
        let mut out = Vec::new();
        loop {
            // skip whitespace (not newlines, which terminate statements)
            while let Some(c) = self.peek() {
                if c == ' ' || c == '\t' || c == '\r' {
                    self.bump();
                } else {
                    break;
                }
            }
            let pos = Pos { line: self.line, col: self.col };
            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };
            if c == '\n' {
                self.bump();
                out.push((Tok::Newline, pos));
                continue;
            }
            if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
                continue;
            }
            if c == '/' {
                let mut it = self.chars.clone();
                it.next();
                if let Some((_, '/')) = it.next() {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
            }
            if c == '"' {
                self.bump();
                let mut s = String::new();
                loop {
                    match self.bump() {
                        Some('"') => break,
                        Some('\\') => match self.bump() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('"') => s.push('"'),
                            Some('\\') => s.push('\\'),
                            Some(other) => s.push(other),
                            None => return Err("unterminated string".into()),
                        },
                        Some(c) => s.push(c),
                        None => return Err("unterminated string".into()),
                    }
                }
                out.push((Tok::Str(s), pos));
                continue;
            }
            if c == '@' {
                self.bump();
                let s = self.scan_symbol_body();
                out.push((Tok::Global(format!("@{}", s)), pos));
                continue;
            }
            if c == '%' {
                self.bump();
                let s = self.scan_symbol_body();
                out.push((Tok::Temp(s), pos));
                continue;
            }
            if c == '^' {
                self.bump();
                let s = self.scan_symbol_body();
                out.push((Tok::Label(s), pos));
                continue;
            }
            if c.is_ascii_digit() || (c == '-' && self.looks_like_number()) {
                let tok = self.scan_number()?;
                out.push((tok, pos));
                continue;
            }
            if c.is_alphabetic() || c == '_' || c == '.' {
                let s = self.scan_symbol_body();
                out.push((Tok::Ident(s), pos));
                continue;
            }
            if c == '-' {
                let mut it = self.chars.clone();
                it.next();
                if let Some((_, '>')) = it.next() {
                    self.bump();
                    self.bump();
                    out.push((Tok::Arrow, pos));
                    continue;
                }
            }
            // single-char punctuation
            self.bump();
            out.push((Tok::Punct(c), pos));
        }
        Ok(out)
    }

    fn looks_like_number(&mut self) -> bool {
        let mut it = self.chars.clone();
        it.next();
        matches!(it.next(), Some((_, c)) if c.is_ascii_digit())
    }

    fn scan_symbol_body(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    fn scan_number(&mut self) -> Result<Tok, String> {
        let mut s = String::new();
        if self.peek() == Some('-') {
            s.push('-');
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.bump();
            } else if c == '.' && !is_float {
                // only consume as float if followed by a digit; otherwise
                // a bare integer precedes a `.` that belongs to the caller
                let mut it = self.chars.clone();
                it.next();
                if matches!(it.next(), Some((_, d)) if d.is_ascii_digit()) {
                    is_float = true;
                    s.push(c);
                    self.bump();
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        if is_float {
            s.parse::<f64>().map(Tok::Float).map_err(|e| e.to_string())
        } else {
            s.parse::<i64>().map(Tok::Int).map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_hello_world_header() {
        let toks = Lexer::new("il 0.1\n").tokenize().unwrap();
        assert_eq!(
            toks.iter().map(|(t, _)| t.clone()).collect::<Vec<_>>(),
            vec![Tok::Ident("il".into()), Tok::Float(0.1), Tok::Newline]
        );
    }

    #[test]
    fn strips_comments() {
        let toks = Lexer::new("# a comment\nil 0.1 // trailing\n").tokenize().unwrap();
        let idents: Vec<_> = toks.iter().filter(|(t, _)| !matches!(t, Tok::Newline)).collect();
        assert_eq!(idents.len(), 2);
    }

    #[test]
    fn negative_int_literal() {
        let toks = Lexer::new("-5").tokenize().unwrap();
        assert_eq!(toks[0].0, Tok::Int(-5));
    }

    #[test]
    fn string_escapes() {
        let toks = Lexer::new("\"a\\nb\"").tokenize().unwrap();
        assert_eq!(toks[0].0, Tok::Str("a\nb".into()));
    }
}
