// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Marker-driven tokenizer for template source
//!
//! Splits template text into data runs and tag contents. The start and end
//! markers come from the environment's [`Syntax`], so nothing here assumes
//! `{{`/`{%`/`{#`. Whitespace control (`{%-`, `-%}`), leading-newline trimming
//! after block tags and line statements are handled here so the parser only
//! ever sees begin/end tokens.

use super::lexer::{is_identifier_continue, is_identifier_start};
use crate::environment::Syntax;
use crate::error::{Result, TemplateError};
use std::fmt;

/// Operators recognised inside tags, longest first
const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "~", "<", ">", "=", "(", ")",
    "[", "]", "{", "}", ".", ",", ":", "|",
];

/// Token kinds produced by the tokenizer
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Literal template text
    Data(String),
    /// Start of a block tag
    BlockBegin,
    /// End of a block tag
    BlockEnd,
    /// Start of a variable tag
    VariableBegin,
    /// End of a variable tag
    VariableEnd,
    /// Start of a line statement
    LineStatementBegin,
    /// End of a line statement
    LineStatementEnd,
    /// Identifier or keyword
    Name(String),
    /// String literal
    String(String),
    /// Integer literal
    Integer(i64),
    /// Float literal
    Float(f64),
    /// Operator or punctuation
    Operator(&'static str),
    /// End of input
    Eof,
}

impl TokenKind {
    /// Short token type name, as reported by `Environment::lex`
    pub fn type_name(&self) -> &'static str {
        match self {
            TokenKind::Data(_) => "data",
            TokenKind::BlockBegin => "block_begin",
            TokenKind::BlockEnd => "block_end",
            TokenKind::VariableBegin => "variable_begin",
            TokenKind::VariableEnd => "variable_end",
            TokenKind::LineStatementBegin => "linestatement_begin",
            TokenKind::LineStatementEnd => "linestatement_end",
            TokenKind::Name(_) => "name",
            TokenKind::String(_) => "string",
            TokenKind::Integer(_) => "integer",
            TokenKind::Float(_) => "float",
            TokenKind::Operator(_) => "operator",
            TokenKind::Eof => "eof",
        }
    }

    /// Check for a specific operator
    pub fn is_operator(&self, op: &str) -> bool {
        matches!(self, TokenKind::Operator(o) if *o == op)
    }

    /// Check for a specific name or keyword
    pub fn is_name(&self, name: &str) -> bool {
        matches!(self, TokenKind::Name(n) if n == name)
    }

    /// Check for either kind of statement end
    pub fn is_block_end(&self) -> bool {
        matches!(self, TokenKind::BlockEnd | TokenKind::LineStatementEnd)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Data(_) => f.write_str("template data"),
            TokenKind::Name(n) => write!(f, "'{n}'"),
            TokenKind::String(s) => write!(f, "string '{s}'"),
            TokenKind::Integer(i) => write!(f, "integer {i}"),
            TokenKind::Float(x) => write!(f, "float {x}"),
            TokenKind::Operator(op) => write!(f, "'{op}'"),
            TokenKind::Eof => f.write_str("end of template"),
            other => f.write_str(other.type_name()),
        }
    }
}

/// A token with the source line it starts on
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token kind and payload
    pub kind: TokenKind,
    /// Source line (1-based)
    pub line: usize,
}

impl Token {
    /// Textual value of the token
    pub fn value(&self) -> String {
        match &self.kind {
            TokenKind::Data(s) | TokenKind::Name(s) | TokenKind::String(s) => s.clone(),
            TokenKind::Integer(i) => i.to_string(),
            TokenKind::Float(x) => x.to_string(),
            TokenKind::Operator(op) => (*op).to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Block,
    Variable,
    Comment,
    LineStatement,
}

/// Tokenizer over one template source
pub struct Tokenizer<'a> {
    src: &'a str,
    syntax: &'a Syntax,
    trim_blocks: bool,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
}

impl<'a> Tokenizer<'a> {
    /// Create a tokenizer; `src` must already use `\n` line endings
    pub fn new(src: &'a str, syntax: &'a Syntax, trim_blocks: bool) -> Self {
        Self {
            src,
            syntax,
            trim_blocks,
            pos: 0,
            line: 1,
            tokens: Vec::new(),
        }
    }

    /// Tokenize the whole source, ending with an `Eof` token
    pub fn tokenize_all(mut self) -> Result<Vec<Token>> {
        while self.pos < self.src.len() {
            let rest = &self.src[self.pos..];
            match self.find_next_tag(rest) {
                None => {
                    self.push_data(rest);
                    self.advance(rest.len());
                }
                Some((offset, tag, marker_len)) => {
                    let strip = tag != TagKind::LineStatement
                        && rest[offset + marker_len..].starts_with('-');
                    let data = &rest[..offset];
                    self.push_data(if strip { data.trim_end() } else { data });
                    self.advance(offset);
                    match tag {
                        TagKind::Comment => self.lex_comment()?,
                        TagKind::Variable => self.lex_tag(
                            TokenKind::VariableBegin,
                            TokenKind::VariableEnd,
                            self.syntax.variable_start.len(),
                            self.syntax.variable_end.as_str(),
                        )?,
                        TagKind::Block => self.lex_tag(
                            TokenKind::BlockBegin,
                            TokenKind::BlockEnd,
                            self.syntax.block_start.len(),
                            self.syntax.block_end.as_str(),
                        )?,
                        TagKind::LineStatement => self.lex_line_statement()?,
                    }
                }
            }
        }
        self.push(TokenKind::Eof, self.line);
        Ok(self.tokens)
    }

    fn push(&mut self, kind: TokenKind, line: usize) {
        self.tokens.push(Token { kind, line });
    }

    fn push_data(&mut self, text: &str) {
        if !text.is_empty() {
            self.push(TokenKind::Data(text.to_string()), self.line);
        }
    }

    fn advance(&mut self, len: usize) {
        let end = self.pos + len;
        self.line += self.src[self.pos..end].matches('\n').count();
        self.pos = end;
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.advance(rest.len() - trimmed.len());
    }

    fn find_next_tag(&self, rest: &str) -> Option<(usize, TagKind, usize)> {
        let candidates = [
            (TagKind::Block, self.syntax.block_start.as_str()),
            (TagKind::Variable, self.syntax.variable_start.as_str()),
            (TagKind::Comment, self.syntax.comment_start.as_str()),
        ];

        let mut best: Option<(usize, TagKind, usize)> = None;
        for (kind, marker) in candidates {
            if let Some(offset) = rest.find(marker) {
                let better = match best {
                    None => true,
                    Some((o, _, len)) => offset < o || (offset == o && marker.len() > len),
                };
                if better {
                    best = Some((offset, kind, marker.len()));
                }
            }
        }

        if let Some(offset) = self.find_line_statement(rest) {
            if best.is_none_or(|(o, _, _)| offset <= o) {
                best = Some((offset, TagKind::LineStatement, 0));
            }
        }
        best
    }

    /// Offset of the first line in `rest` whose text starts with the line statement prefix
    fn find_line_statement(&self, rest: &str) -> Option<usize> {
        let prefix = self.syntax.line_statement_prefix.as_deref()?;
        let at_line_start = self.pos == 0 || self.src[..self.pos].ends_with('\n');
        let mut start = if at_line_start { Some(0) } else { None };
        let mut search_from = 0;
        loop {
            if let Some(s) = start {
                if rest[s..].trim_start_matches([' ', '\t']).starts_with(prefix) {
                    return Some(s);
                }
            }
            let newline = rest[search_from..].find('\n')?;
            let s = search_from + newline + 1;
            start = Some(s);
            search_from = s;
        }
    }

    fn lex_comment(&mut self) -> Result<()> {
        let start_line = self.line;
        self.advance(self.syntax.comment_start.len());
        let end_marker = self.syntax.comment_end.as_str();
        let offset = self.rest().find(end_marker).ok_or_else(|| {
            TemplateError::syntax("missing end of comment tag", start_line)
        })?;
        let strip_after = self.rest()[..offset].ends_with('-');
        self.advance(offset + end_marker.len());
        if strip_after {
            self.skip_whitespace();
        } else if self.trim_blocks && self.rest().starts_with('\n') {
            self.advance(1);
        }
        Ok(())
    }

    fn lex_tag(
        &mut self,
        begin: TokenKind,
        end: TokenKind,
        start_len: usize,
        end_marker: &str,
    ) -> Result<()> {
        let start_line = self.line;
        self.push(begin, start_line);
        self.advance(start_len);
        if self.rest().starts_with('-') {
            self.advance(1);
        }

        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(TemplateError::syntax(
                    format!("unexpected end of template, expected '{end_marker}'"),
                    start_line,
                ));
            }
            if rest.starts_with('-') && rest[1..].starts_with(end_marker) {
                let line = self.line;
                self.advance(1 + end_marker.len());
                self.push(end, line);
                self.skip_whitespace();
                return Ok(());
            }
            if rest.starts_with(end_marker) {
                let line = self.line;
                self.advance(end_marker.len());
                let trim = end == TokenKind::BlockEnd && self.trim_blocks;
                self.push(end, line);
                if trim && self.rest().starts_with('\n') {
                    self.advance(1);
                }
                return Ok(());
            }
            self.lex_expression_token()?;
        }
    }

    fn lex_line_statement(&mut self) -> Result<()> {
        let prefix_len = self
            .syntax
            .line_statement_prefix
            .as_ref()
            .map_or(0, String::len);
        let rest = self.rest();
        let indent = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        self.advance(indent + prefix_len);
        self.push(TokenKind::LineStatementBegin, self.line);

        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start_matches([' ', '\t', '\r']);
            self.advance(rest.len() - trimmed.len());
            let line = self.line;
            if trimmed.is_empty() {
                self.push(TokenKind::LineStatementEnd, line);
                return Ok(());
            }
            if trimmed.starts_with('\n') {
                self.advance(1);
                self.push(TokenKind::LineStatementEnd, line);
                return Ok(());
            }
            self.lex_expression_token()?;
        }
    }

    fn lex_expression_token(&mut self) -> Result<()> {
        let rest = self.rest();
        let line = self.line;
        let Some(c) = rest.chars().next() else {
            return Ok(());
        };

        if is_identifier_start(c) {
            let len = rest
                .char_indices()
                .find(|&(_, ch)| !is_identifier_continue(ch))
                .map_or(rest.len(), |(i, _)| i);
            self.push(TokenKind::Name(rest[..len].to_string()), line);
            self.advance(len);
            return Ok(());
        }

        if c.is_ascii_digit() {
            return self.lex_number();
        }

        if c == '\'' || c == '"' {
            return self.lex_string(c);
        }

        for op in OPERATORS {
            if rest.starts_with(op) {
                self.push(TokenKind::Operator(op), line);
                self.advance(op.len());
                return Ok(());
            }
        }

        Err(TemplateError::syntax(
            format!("unexpected character '{c}'"),
            line,
        ))
    }

    fn lex_number(&mut self) -> Result<()> {
        let rest = self.rest();
        let line = self.line;
        let int_len = rest
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(rest.len());
        let after = &rest[int_len..];
        let frac_len = if after.starts_with('.')
            && after[1..].starts_with(|ch: char| ch.is_ascii_digit())
        {
            1 + after[1..]
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(after.len() - 1)
        } else {
            0
        };

        let text = &rest[..int_len + frac_len];
        let kind = if frac_len > 0 {
            let value = text
                .parse::<f64>()
                .map_err(|e| TemplateError::syntax(format!("invalid float '{text}': {e}"), line))?;
            TokenKind::Float(value)
        } else {
            let value = text.parse::<i64>().map_err(|e| {
                TemplateError::syntax(format!("invalid integer '{text}': {e}"), line)
            })?;
            TokenKind::Integer(value)
        };
        self.push(kind, line);
        self.advance(text.len());
        Ok(())
    }

    fn lex_string(&mut self, quote: char) -> Result<()> {
        let line = self.line;
        let rest = self.rest();
        let mut value = String::new();
        let mut chars = rest.char_indices().skip(1);

        while let Some((i, ch)) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '\'')) => value.push('\''),
                    Some((_, '"')) => value.push('"'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => break,
                },
                c if c == quote => {
                    self.push(TokenKind::String(value), line);
                    self.advance(i + c.len_utf8());
                    return Ok(());
                }
                c => value.push(c),
            }
        }

        Err(TemplateError::syntax("unterminated string literal", line))
    }
}

/// Tokenize template source with the given syntax
pub fn tokenize(source: &str, syntax: &Syntax, trim_blocks: bool) -> Result<Vec<Token>> {
    let normalized = source.replace("\r\n", "\n");
    Tokenizer::new(&normalized, syntax, trim_blocks).tokenize_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str, syntax: &Syntax, trim: bool) -> Vec<TokenKind> {
        tokenize(source, syntax, trim)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_variable_tag() {
        let tokens = kinds("Hello {{ name }}!", &Syntax::default(), false);
        assert_eq!(
            tokens,
            vec![
                TokenKind::Data("Hello ".into()),
                TokenKind::VariableBegin,
                TokenKind::Name("name".into()),
                TokenKind::VariableEnd,
                TokenKind::Data("!".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        let tokens = kinds("a{# note #}b", &Syntax::default(), false);
        assert_eq!(
            tokens,
            vec![
                TokenKind::Data("a".into()),
                TokenKind::Data("b".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_whitespace_control() {
        let tokens = kinds("a  {%- if x -%}  \n b", &Syntax::default(), false);
        assert_eq!(
            tokens,
            vec![
                TokenKind::Data("a".into()),
                TokenKind::BlockBegin,
                TokenKind::Name("if".into()),
                TokenKind::Name("x".into()),
                TokenKind::BlockEnd,
                TokenKind::Data("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_trim_leading_newline_after_block() {
        let trimmed = kinds("{% if x %}\nyes", &Syntax::default(), true);
        assert_eq!(trimmed[4], TokenKind::Data("yes".into()));

        let kept = kinds("{% if x %}\nyes", &Syntax::default(), false);
        assert_eq!(kept[4], TokenKind::Data("\nyes".into()));

        let variable = kinds("{{ x }}\nyes", &Syntax::default(), true);
        assert_eq!(variable[3], TokenKind::Data("\nyes".into()));
    }

    #[test]
    fn test_custom_markers() {
        let syntax = Syntax {
            block_start: "<%".into(),
            block_end: "%>".into(),
            variable_start: "${".into(),
            variable_end: "}".into(),
            comment_start: "<#".into(),
            comment_end: "#>".into(),
            line_statement_prefix: None,
        };
        let tokens = kinds("${ a }<# c #><% if b %>", &syntax, false);
        assert_eq!(
            tokens,
            vec![
                TokenKind::VariableBegin,
                TokenKind::Name("a".into()),
                TokenKind::VariableEnd,
                TokenKind::BlockBegin,
                TokenKind::Name("if".into()),
                TokenKind::Name("b".into()),
                TokenKind::BlockEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_statements() {
        let syntax = Syntax {
            line_statement_prefix: Some("#".into()),
            ..Syntax::default()
        };
        let tokens = kinds("a\n  # for x in y\nb\n", &syntax, false);
        assert_eq!(
            tokens,
            vec![
                TokenKind::Data("a\n".into()),
                TokenKind::LineStatementBegin,
                TokenKind::Name("for".into()),
                TokenKind::Name("x".into()),
                TokenKind::Name("in".into()),
                TokenKind::Name("y".into()),
                TokenKind::LineStatementEnd,
                TokenKind::Data("b\n".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_literals_and_operators() {
        let tokens = kinds("{{ 'it\\'s' ~ 1.5 // 2 ** 3 }}", &Syntax::default(), false);
        assert_eq!(
            tokens,
            vec![
                TokenKind::VariableBegin,
                TokenKind::String("it's".into()),
                TokenKind::Operator("~"),
                TokenKind::Float(1.5),
                TokenKind::Operator("//"),
                TokenKind::Integer(2),
                TokenKind::Operator("**"),
                TokenKind::Integer(3),
                TokenKind::VariableEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let tokens = tokenize("a\nb\n{{ x }}", &Syntax::default(), false).unwrap();
        let name = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Name("x".into()))
            .unwrap();
        assert_eq!(name.line, 3);
    }

    #[test]
    fn test_unclosed_tag_is_syntax_error() {
        let err = tokenize("line\n{{ x", &Syntax::default(), false).unwrap_err();
        assert_eq!(err.line(), Some(2));
    }
}
