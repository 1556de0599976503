use crate::error::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Number(f64),
    Str(String),
    Ident(String),
    Regex { pattern: String, flags: String },
    /// Template literal text around each `${...}`, plus the raw source of
    /// every substitution with its offset.
    Template {
        quasis: Vec<String>,
        exprs: Vec<(usize, String)>,
    },
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub pos: usize,
}

// Longest first so that `===` wins over `==` and `=`.
const PUNCTUATION: &[&str] = &[
    "===", "!==", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=",
    "*=", "/=", "%=", "(", ")", "[", "]", "{", "}", ",", ";", ".", "?", ":", "<", ">", "!", "+",
    "-", "*", "/", "%", "=",
];

pub fn tokenize(src: &str) -> Result<Vec<Token>, ScriptError> {
    Lexer {
        src,
        bytes: src.as_bytes(),
        pos: 0,
        tokens: Vec::new(),
    }
    .run()
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
}

impl Lexer<'_> {
    fn run(mut self) -> Result<Vec<Token>, ScriptError> {
        loop {
            self.skip_trivia()?;
            let start = self.pos;
            let Some(ch) = self.peek_char() else {
                self.tokens.push(Token {
                    tok: Tok::Eof,
                    pos: start,
                });
                return Ok(self.tokens);
            };

            let tok = if ch.is_ascii_digit()
                || (ch == '.' && self.byte_at(self.pos + 1).is_some_and(|b| b.is_ascii_digit()))
            {
                self.read_number()?
            } else if ch == '"' || ch == '\'' {
                self.read_string(ch)?
            } else if ch == '`' {
                self.read_template()?
            } else if is_ident_start(ch) {
                self.read_ident()
            } else if ch == '/' && self.regex_allowed() {
                self.read_regex()?
            } else {
                self.read_punct()?
            };
            self.tokens.push(Token { tok, pos: start });
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn byte_at(&self, idx: usize) -> Option<u8> {
        self.bytes.get(idx).copied()
    }

    fn skip_trivia(&mut self) -> Result<(), ScriptError> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => self.pos += c.len_utf8(),
                Some('/') if self.byte_at(self.pos + 1) == Some(b'/') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += c.len_utf8();
                    }
                }
                Some('/') if self.byte_at(self.pos + 1) == Some(b'*') => {
                    let start = self.pos;
                    match self.src[self.pos + 2..].find("*/") {
                        Some(end) => self.pos += end + 4,
                        None => return Err(ScriptError::syntax(start, "unterminated comment")),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// A `/` starts a regex literal unless the previous token ends a value.
    fn regex_allowed(&self) -> bool {
        match self.tokens.last().map(|t| &t.tok) {
            None => true,
            Some(Tok::Number(_))
            | Some(Tok::Str(_))
            | Some(Tok::Regex { .. })
            | Some(Tok::Template { .. }) => false,
            Some(Tok::Ident(word)) => matches!(word.as_str(), "return" | "typeof"),
            Some(Tok::Punct(p)) => !matches!(*p, ")" | "]" | "++" | "--"),
            Some(Tok::Eof) => false,
        }
    }

    fn read_number(&mut self) -> Result<Tok, ScriptError> {
        let start = self.pos;
        if self.bytes[self.pos] == b'0'
            && matches!(self.byte_at(self.pos + 1), Some(b'x') | Some(b'X'))
        {
            self.pos += 2;
            let digits_start = self.pos;
            while self.byte_at(self.pos).is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            return i64::from_str_radix(&self.src[digits_start..self.pos], 16)
                .map(|n| Tok::Number(n as f64))
                .map_err(|_| ScriptError::syntax(start, "invalid hex literal"));
        }
        while self.byte_at(self.pos).is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.byte_at(self.pos) == Some(b'.') {
            self.pos += 1;
            while self.byte_at(self.pos).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.byte_at(self.pos), Some(b'e') | Some(b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.byte_at(self.pos), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if self.byte_at(self.pos).is_some_and(|b| b.is_ascii_digit()) {
                while self.byte_at(self.pos).is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
            }
        }
        self.src[start..self.pos]
            .parse::<f64>()
            .map(Tok::Number)
            .map_err(|_| ScriptError::syntax(start, "invalid number literal"))
    }

    fn read_string(&mut self, quote: char) -> Result<Tok, ScriptError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek_char() else {
                return Err(ScriptError::syntax(start, "unterminated string"));
            };
            self.pos += c.len_utf8();
            match c {
                c if c == quote => return Ok(Tok::Str(out)),
                '\n' => return Err(ScriptError::syntax(start, "unterminated string")),
                '\\' => out.push(self.read_escape(start, "unterminated string")?),
                other => out.push(other),
            }
        }
    }

    /// Decodes the escape after a backslash.
    fn read_escape(&mut self, start: usize, unterminated: &str) -> Result<char, ScriptError> {
        let Some(esc) = self.peek_char() else {
            return Err(ScriptError::syntax(start, unterminated));
        };
        self.pos += esc.len_utf8();
        Ok(match esc {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'u' => {
                let code = self
                    .src
                    .get(self.pos..self.pos + 4)
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .and_then(char::from_u32)
                    .ok_or_else(|| ScriptError::syntax(self.pos, "bad \\u escape"))?;
                self.pos += 4;
                code
            }
            other => other,
        })
    }

    fn read_template(&mut self) -> Result<Tok, ScriptError> {
        let start = self.pos;
        self.pos += 1;
        let mut quasis = Vec::new();
        let mut exprs = Vec::new();
        let mut current = String::new();
        loop {
            let Some(c) = self.peek_char() else {
                return Err(ScriptError::syntax(start, "unterminated template literal"));
            };
            self.pos += c.len_utf8();
            match c {
                '`' => {
                    quasis.push(current);
                    return Ok(Tok::Template { quasis, exprs });
                }
                '$' if self.byte_at(self.pos) == Some(b'{') => {
                    self.pos += 1;
                    let body_start = self.pos;
                    let body_end = self.skip_substitution(start)?;
                    exprs.push((body_start, self.src[body_start..body_end].to_string()));
                    quasis.push(std::mem::take(&mut current));
                }
                '\\' => current.push(self.read_escape(start, "unterminated template literal")?),
                other => current.push(other),
            }
        }
    }

    /// Moves past the body of a `${`, returning the offset of its closing
    /// brace. Nested templates are tracked on a stack of brace depths, where
    /// `None` marks template text.
    fn skip_substitution(&mut self, start: usize) -> Result<usize, ScriptError> {
        let mut stack: Vec<Option<usize>> = vec![Some(1)];
        loop {
            let Some(c) = self.peek_char() else {
                return Err(ScriptError::syntax(start, "unterminated template literal"));
            };
            let at = self.pos;
            self.pos += c.len_utf8();
            let top = stack.len() - 1;
            match (stack[top], c) {
                (Some(_), '"' | '\'') => {
                    self.pos = at;
                    self.read_string(c)?;
                }
                (Some(_), '`') => stack.push(None),
                (Some(1), '}') => {
                    stack.pop();
                    if stack.is_empty() {
                        return Ok(at);
                    }
                }
                (Some(depth), '{') => stack[top] = Some(depth + 1),
                (Some(depth), '}') => stack[top] = Some(depth - 1),
                (None, '\\') => {
                    if let Some(next) = self.peek_char() {
                        self.pos += next.len_utf8();
                    }
                }
                (None, '`') => {
                    stack.pop();
                }
                (None, '$') if self.byte_at(self.pos) == Some(b'{') => {
                    self.pos += 1;
                    stack.push(Some(1));
                }
                _ => {}
            }
        }
    }

    fn read_ident(&mut self) -> Tok {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if !is_ident_continue(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        Tok::Ident(self.src[start..self.pos].to_string())
    }

    fn read_regex(&mut self) -> Result<Tok, ScriptError> {
        let start = self.pos;
        self.pos += 1;
        let mut pattern = String::new();
        let mut in_class = false;
        loop {
            let Some(c) = self.peek_char() else {
                return Err(ScriptError::syntax(start, "unterminated regex literal"));
            };
            self.pos += c.len_utf8();
            match c {
                '\n' => return Err(ScriptError::syntax(start, "unterminated regex literal")),
                '\\' => {
                    pattern.push('\\');
                    if let Some(next) = self.peek_char() {
                        pattern.push(next);
                        self.pos += next.len_utf8();
                    }
                }
                '[' => {
                    in_class = true;
                    pattern.push(c);
                }
                ']' => {
                    in_class = false;
                    pattern.push(c);
                }
                '/' if !in_class => break,
                other => pattern.push(other),
            }
        }
        let flags_start = self.pos;
        while self.peek_char().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        Ok(Tok::Regex {
            pattern,
            flags: self.src[flags_start..self.pos].to_string(),
        })
    }

    fn read_punct(&mut self) -> Result<Tok, ScriptError> {
        let rest = &self.src[self.pos..];
        for p in PUNCTUATION {
            // `a?.5:b` is a conditional, not optional chaining.
            if *p == "?." && rest.as_bytes().get(2).is_some_and(u8::is_ascii_digit) {
                continue;
            }
            if rest.starts_with(p) {
                self.pos += p.len();
                return Ok(Tok::Punct(p));
            }
        }
        let c = self.peek_char().unwrap_or('?');
        Err(ScriptError::syntax(self.pos, format!("unexpected character {c:?}")))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn slash_after_value_is_division() {
        assert_eq!(
            toks("a / 2"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("/"),
                Tok::Number(2.0),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn slash_after_paren_open_is_regex() {
        let t = toks(r"x.match(/Tensor\[(.*?)\]/)");
        assert!(t.contains(&Tok::Regex {
            pattern: r"Tensor\[(.*?)\]".into(),
            flags: String::new()
        }));
    }

    #[test]
    fn regex_keeps_slash_inside_class_and_reads_flags() {
        let t = toks(r"s.replace(/[/]x/gi, '')");
        assert!(t.contains(&Tok::Regex {
            pattern: "[/]x".into(),
            flags: "gi".into()
        }));
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            toks("1 // one\n /* two */ + 2"),
            vec![
                Tok::Number(1.0),
                Tok::Punct("+"),
                Tok::Number(2.0),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn strict_equality_is_one_token() {
        assert_eq!(
            toks("a===b"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("==="),
                Tok::Ident("b".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn compound_operators_are_single_tokens() {
        assert_eq!(
            toks("i++ ; n += 2 ; a?.b ?? c"),
            vec![
                Tok::Ident("i".into()),
                Tok::Punct("++"),
                Tok::Punct(";"),
                Tok::Ident("n".into()),
                Tok::Punct("+="),
                Tok::Number(2.0),
                Tok::Punct(";"),
                Tok::Ident("a".into()),
                Tok::Punct("?."),
                Tok::Ident("b".into()),
                Tok::Punct("??"),
                Tok::Ident("c".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn question_dot_before_a_digit_is_a_conditional() {
        assert_eq!(
            toks("a?.5:1")[1..3],
            [Tok::Punct("?"), Tok::Number(0.5)]
        );
    }

    #[test]
    fn template_splits_text_and_substitutions() {
        let t = toks("`dims: ${shape.join('x')} (${`n=${n}`})`");
        let Tok::Template { quasis, exprs } = &t[0] else {
            panic!("expected a template, got {:?}", t[0]);
        };
        assert_eq!(quasis, &vec!["dims: ".to_string(), " (".into(), ")".into()]);
        assert_eq!(exprs[0], (9, "shape.join('x')".to_string()));
        assert_eq!(exprs[1].1, "`n=${n}`");
    }

    #[test]
    fn braces_inside_substitution_strings_are_ignored() {
        let t = toks("`${ '}' + x }`");
        assert!(matches!(&t[0], Tok::Template { exprs, .. } if exprs[0].1 == " '}' + x "));
    }

    #[test]
    fn unterminated_template_is_an_error() {
        assert!(matches!(
            tokenize("`abc ${x"),
            Err(ScriptError::Syntax { pos: 0, .. })
        ));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(matches!(
            tokenize("'abc"),
            Err(ScriptError::Syntax { pos: 0, .. })
        ));
    }
}
