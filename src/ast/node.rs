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

//! Statement nodes and the template root

use super::expression::Expr;

/// A parsed template
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    /// Top-level nodes
    pub body: Vec<Node>,
}

impl Template {
    /// `extends` target if the template extends another
    pub fn extends(&self) -> Option<&Expr> {
        self.body.iter().find_map(|node| match node {
            Node::Extends { template, .. } => Some(template),
            _ => None,
        })
    }
}

/// Macro parameter
#[derive(Debug, Clone, PartialEq)]
pub struct MacroParam {
    /// Parameter name
    pub name: String,
    /// Default value expression
    pub default: Option<Expr>,
}

/// Statement node; every variant records its source line
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal template text
    Text {
        /// The text
        text: String,
        /// Source line
        line: usize,
    },

    /// `{{ expr }}`
    Output {
        /// Printed expression
        expr: Expr,
        /// Source line
        line: usize,
    },

    /// `{% if %}` with optional `elif` / `else`
    If {
        /// Condition / body pairs in source order
        branches: Vec<(Expr, Vec<Node>)>,
        /// `else` body
        else_body: Vec<Node>,
        /// Source line
        line: usize,
    },

    /// `{% for targets in iter %}`
    For {
        /// Loop variable names; more than one unpacks each item
        targets: Vec<String>,
        /// Iterated expression
        iter: Expr,
        /// Loop body
        body: Vec<Node>,
        /// Body rendered when nothing was iterated
        else_body: Vec<Node>,
        /// Source line
        line: usize,
    },

    /// `{% set name = value %}`
    Set {
        /// Assigned name
        name: String,
        /// Assigned value
        value: Expr,
        /// Source line
        line: usize,
    },

    /// `{% macro name(params) %}`
    Macro {
        /// Macro name
        name: String,
        /// Parameters
        params: Vec<MacroParam>,
        /// Macro body
        body: Vec<Node>,
        /// Source line
        line: usize,
    },

    /// `{% block name %}`
    Block {
        /// Block name
        name: String,
        /// Block body
        body: Vec<Node>,
        /// Source line
        line: usize,
    },

    /// `{% extends template %}`
    Extends {
        /// Parent template name expression
        template: Expr,
        /// Source line
        line: usize,
    },

    /// `{% include template %}`
    Include {
        /// Included template name expression
        template: Expr,
        /// Skip silently when the template does not exist
        ignore_missing: bool,
        /// Source line
        line: usize,
    },

    /// `{% import template as alias %}`
    Import {
        /// Imported template name expression
        template: Expr,
        /// Name the module is bound to
        alias: String,
        /// Source line
        line: usize,
    },

    /// `{% from template import name [as alias], ... %}`
    FromImport {
        /// Imported template name expression
        template: Expr,
        /// (exported name, local alias) pairs
        names: Vec<(String, Option<String>)>,
        /// Source line
        line: usize,
    },
}

impl Node {
    /// Source line of the node
    pub fn line(&self) -> usize {
        match self {
            Node::Text { line, .. }
            | Node::Output { line, .. }
            | Node::If { line, .. }
            | Node::For { line, .. }
            | Node::Set { line, .. }
            | Node::Macro { line, .. }
            | Node::Block { line, .. }
            | Node::Extends { line, .. }
            | Node::Include { line, .. }
            | Node::Import { line, .. }
            | Node::FromImport { line, .. } => *line,
        }
    }
}
