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

//! Lexical analysis utilities

use super::tokenizer::{Token, TokenKind};
use crate::error::{Result, TemplateError};

/// Check if a character can start an identifier
pub fn is_identifier_start(c: char) -> bool {
    unicode_xid::UnicodeXID::is_xid_start(c) || c == '_'
}

/// Check if a character can continue an identifier
pub fn is_identifier_continue(c: char) -> bool {
    unicode_xid::UnicodeXID::is_xid_continue(c)
}

/// Check if a whole string is a valid identifier
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_identifier_start) && chars.all(is_identifier_continue)
}

/// Token stream with lookahead capability
#[derive(Debug)]
pub struct TokenStream {
    tokens: Vec<Token>,
    position: usize,
}

impl TokenStream {
    /// Create a new token stream; an `Eof` token is appended if missing
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            let line = tokens.last().map_or(1, |t| t.line);
            tokens.push(Token {
                kind: TokenKind::Eof,
                line,
            });
        }
        Self {
            tokens,
            position: 0,
        }
    }

    /// Peek at the current token without consuming
    pub fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.position.min(last)]
    }

    /// Peek at a token n positions ahead
    pub fn peek_ahead(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.position + n).min(last)]
    }

    /// Consume and return the current token
    pub fn next_token(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    /// Check if we're at the end of the stream
    pub fn is_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    /// Line of the current token
    pub fn line(&self) -> usize {
        self.peek().line
    }

    /// Consume a token if it matches the predicate
    pub fn consume_if<F>(&mut self, predicate: F) -> Option<Token>
    where
        F: FnOnce(&TokenKind) -> bool,
    {
        if predicate(&self.peek().kind) {
            Some(self.next_token())
        } else {
            None
        }
    }

    /// Consume the operator if it is next
    pub fn skip_operator(&mut self, op: &str) -> bool {
        self.consume_if(|k| k.is_operator(op)).is_some()
    }

    /// Consume the name or keyword if it is next
    pub fn skip_name(&mut self, name: &str) -> bool {
        self.consume_if(|k| k.is_name(name)).is_some()
    }

    /// Require an operator
    pub fn expect_operator(&mut self, op: &str) -> Result<()> {
        if self.skip_operator(op) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{op}'")))
        }
    }

    /// Require a specific keyword
    pub fn expect_keyword(&mut self, name: &str) -> Result<()> {
        if self.skip_name(name) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{name}'")))
        }
    }

    /// Require any identifier and return it
    pub fn expect_name(&mut self) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Name(n) => {
                let n = n.clone();
                self.next_token();
                Ok(n)
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    /// Require the end of the current statement
    pub fn expect_block_end(&mut self) -> Result<()> {
        if self.consume_if(TokenKind::is_block_end).is_some() {
            Ok(())
        } else {
            Err(self.unexpected("end of statement block"))
        }
    }

    /// Require the end of a variable tag
    pub fn expect_variable_end(&mut self) -> Result<()> {
        if self
            .consume_if(|k| *k == TokenKind::VariableEnd)
            .is_some()
        {
            Ok(())
        } else {
            Err(self.unexpected("end of print statement"))
        }
    }

    /// Build an "expected X" syntax error at the current token
    pub fn unexpected(&self, expected: &str) -> TemplateError {
        let token = self.peek();
        TemplateError::syntax(
            format!("expected {expected}, got {}", token.kind),
            token.line,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Syntax;
    use crate::parser::tokenizer::tokenize;

    #[test]
    fn test_identifier_chars() {
        assert!(is_identifier_start('a'));
        assert!(is_identifier_start('_'));
        assert!(is_identifier_start('é'));
        assert!(!is_identifier_start('1'));
        assert!(is_identifier_continue('1'));
        assert!(is_identifier("loop_1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_stream_navigation() {
        let tokens = tokenize("{{ a.b }}", &Syntax::default(), false).unwrap();
        let mut stream = TokenStream::new(tokens);
        assert_eq!(stream.peek().kind, TokenKind::VariableBegin);
        assert!(stream.peek_ahead(2).kind.is_operator("."));
        stream.next_token();
        assert_eq!(stream.expect_name().unwrap(), "a");
        assert!(stream.expect_operator(".").is_ok());
        assert!(stream.expect_operator(".").is_err());
        assert_eq!(stream.expect_name().unwrap(), "b");
        assert!(stream.expect_variable_end().is_ok());
        assert!(stream.is_eof());
        // Stays on Eof
        stream.next_token();
        assert!(stream.is_eof());
    }
}
