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

//! Template parser
//!
//! Source text goes through the [`tokenizer`] (marker handling and whitespace
//! control), then [`statements`] builds the statement tree using the
//! [`pratt`] expression parser.

#![warn(missing_docs)]

pub mod lexer;
pub mod pratt;
pub mod statements;
pub mod tokenizer;

pub use lexer::TokenStream;
pub use tokenizer::{Token, TokenKind, tokenize};

use crate::ast::Template;
use crate::environment::Syntax;
use crate::error::Result;

/// Parse template source into its AST
pub fn parse(source: &str, syntax: &Syntax, trim_blocks: bool) -> Result<Template> {
    let tokens = tokenize(source, syntax, trim_blocks)?;
    statements::Parser::new(TokenStream::new(tokens)).parse_template()
}
