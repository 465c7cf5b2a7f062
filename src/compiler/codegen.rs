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

//! Code generator: template AST to bytecode

use super::bytecode::{Bytecode, BytecodeBuilder, BytecodeMetadata, Instruction, MacroInfo, NameIndex};
use crate::ast::{BinaryOperator, Expr, MacroParam, Node, Template, UnaryOperator};
use crate::environment::Environment;
use crate::error::{Result, TemplateError};
use crate::model::{Undefined, Value};
use rustc_hash::{FxHashMap, FxHashSet};

/// Routine waiting to be generated after the root routine
enum Pending {
    Block {
        name: String,
        body: Vec<Node>,
        line: usize,
    },
    Macro {
        index: u32,
        params: Vec<MacroParam>,
        body: Vec<Node>,
        line: usize,
    },
}

/// Generates one bytecode program from a template AST
pub struct CodeGenerator<'e> {
    environment: &'e Environment,
    builder: BytecodeBuilder,
    names: FxHashMap<String, NameIndex>,
    block_names: FxHashSet<String>,
    pending: Vec<Pending>,
    extends: bool,
}

impl<'e> CodeGenerator<'e> {
    /// Create a generator for one template
    pub fn new(environment: &'e Environment, name: Option<&str>, filename: &str) -> Self {
        Self {
            environment,
            builder: BytecodeBuilder::new(BytecodeMetadata {
                name: name.map(str::to_string),
                filename: filename.to_string(),
                extends: false,
            }),
            names: FxHashMap::default(),
            block_names: FxHashSet::default(),
            pending: Vec::new(),
            extends: false,
        }
    }

    /// Generate the program: root routine first, then block and macro routines
    pub fn generate(mut self, template: &Template) -> Result<Bytecode> {
        self.extends = template.extends().is_some();
        self.collect_blocks(&template.body)?;

        for node in &template.body {
            self.node(node, true)?;
        }
        self.builder.emit(Instruction::Return);

        // Routines may queue further routines (nested blocks, macros in blocks)
        loop {
            let batch = std::mem::take(&mut self.pending);
            if batch.is_empty() {
                break;
            }
            for routine in batch {
                self.routine(routine)?;
            }
        }

        let mut bytecode = self
            .builder
            .finalize()
            .map_err(|e| TemplateError::evaluation(format!("internal compiler error: {e}")))?;
        bytecode.metadata.extends = self.extends;
        Ok(bytecode)
    }

    fn collect_blocks(&mut self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            match node {
                Node::Block { name, body, line } => {
                    if !self.block_names.insert(name.clone()) {
                        return Err(TemplateError::syntax(
                            format!("block '{name}' defined twice"),
                            *line,
                        ));
                    }
                    self.collect_blocks(body)?;
                }
                Node::If {
                    branches,
                    else_body,
                    ..
                } => {
                    for (_, body) in branches {
                        self.collect_blocks(body)?;
                    }
                    self.collect_blocks(else_body)?;
                }
                Node::For {
                    body, else_body, ..
                } => {
                    self.collect_blocks(body)?;
                    self.collect_blocks(else_body)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn routine(&mut self, routine: Pending) -> Result<()> {
        match routine {
            Pending::Block { name, body, line } => {
                let entry = self.builder.position();
                self.builder.add_block(&name, entry);
                self.builder.mark_line(line);
                for node in &body {
                    self.node(node, false)?;
                }
            }
            Pending::Macro {
                index,
                params,
                body,
                line,
            } => {
                let entry = self.builder.position();
                self.builder.set_macro_entry(index, entry);
                self.builder.mark_line(line);
                // Defaults are evaluated only for parameters the caller left unbound
                for param in &params {
                    if let Some(default) = &param.default {
                        let name = self.name(&param.name);
                        let bound = self.builder.new_label();
                        self.builder
                            .jump_to(bound, |t| Instruction::JumpIfBound(name, t));
                        self.expr(default, line)?;
                        self.builder.emit(Instruction::StoreName(name));
                        self.builder.place(bound);
                    }
                }
                for node in &body {
                    self.node(node, false)?;
                }
            }
        }
        self.builder.emit(Instruction::Return);
        Ok(())
    }

    fn name(&mut self, name: &str) -> NameIndex {
        if let Some(index) = self.names.get(name) {
            return *index;
        }
        let index = self.builder.name(name);
        self.names.insert(name.to_string(), index);
        index
    }

    fn node(&mut self, node: &Node, top_level: bool) -> Result<()> {
        // A template that extends another only runs its top-level
        // definitions; the parent produces the output
        let suppressed = top_level && self.extends;
        self.builder.mark_line(node.line());

        match node {
            Node::Text { text, .. } => {
                if !suppressed {
                    self.builder.emit_text(text);
                }
            }
            Node::Output { expr, line } => {
                if !suppressed {
                    self.expr(expr, *line)?;
                    self.builder.emit(Instruction::Emit);
                }
            }
            Node::If {
                branches,
                else_body,
                line,
            } => {
                if suppressed {
                    return Ok(());
                }
                let end = self.builder.new_label();
                for (condition, body) in branches {
                    let next = self.builder.new_label();
                    self.expr(condition, *line)?;
                    self.builder.jump_to(next, Instruction::JumpIfFalse);
                    self.body(body)?;
                    self.builder.jump_to(end, Instruction::Jump);
                    self.builder.place(next);
                }
                self.body(else_body)?;
                self.builder.place(end);
            }
            Node::For {
                targets,
                iter,
                body,
                else_body,
                line,
            } => {
                if suppressed {
                    return Ok(());
                }
                self.for_loop(targets, iter, body, else_body, *line)?;
            }
            Node::Set { name, value, line } => {
                self.expr(value, *line)?;
                let name = self.name(name);
                self.builder.emit(Instruction::StoreName(name));
            }
            Node::Macro {
                name,
                params,
                body,
                line,
            } => {
                let index = self.builder.add_macro(MacroInfo {
                    name: name.clone(),
                    params: params
                        .iter()
                        .map(|p| (p.name.clone(), p.default.is_some()))
                        .collect(),
                    entry: 0,
                });
                self.pending.push(Pending::Macro {
                    index,
                    params: params.clone(),
                    body: body.clone(),
                    line: *line,
                });
                let name = self.name(name);
                self.builder
                    .emit(Instruction::MakeMacro(index))
                    .emit(Instruction::StoreName(name));
            }
            Node::Block { name, body, line } => {
                self.pending.push(Pending::Block {
                    name: name.clone(),
                    body: body.clone(),
                    line: *line,
                });
                if !suppressed {
                    let name = self.name(name);
                    self.builder.emit(Instruction::CallBlock(name));
                }
            }
            Node::Extends { template, line } => {
                self.expr(template, *line)?;
                self.builder.emit(Instruction::Extends);
            }
            Node::Include {
                template,
                ignore_missing,
                line,
            } => {
                if !suppressed {
                    self.expr(template, *line)?;
                    self.builder.emit(Instruction::Include(*ignore_missing));
                }
            }
            Node::Import {
                template,
                alias,
                line,
            } => {
                self.expr(template, *line)?;
                let alias = self.name(alias);
                self.builder
                    .emit(Instruction::Import)
                    .emit(Instruction::StoreName(alias));
            }
            Node::FromImport {
                template,
                names,
                line,
            } => {
                self.expr(template, *line)?;
                self.builder.emit(Instruction::Import);
                for (name, alias) in names {
                    let attr = self.name(name);
                    let target = self.name(alias.as_deref().unwrap_or(name));
                    self.builder
                        .emit(Instruction::Duplicate)
                        .emit(Instruction::GetAttr(attr))
                        .emit(Instruction::StoreName(target));
                }
                self.builder.emit(Instruction::Pop);
            }
        }
        Ok(())
    }

    fn body(&mut self, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            self.node(node, false)?;
        }
        Ok(())
    }

    fn for_loop(
        &mut self,
        targets: &[String],
        iter: &Expr,
        body: &[Node],
        else_body: &[Node],
        line: usize,
    ) -> Result<()> {
        let next = self.builder.new_label();
        let exit = self.builder.new_label();
        let end = self.builder.new_label();

        self.expr(iter, line)?;
        self.builder
            .emit(Instruction::IterStart)
            .emit(Instruction::PushScope);
        self.builder.place(next);
        self.builder.jump_to(exit, Instruction::IterNext);

        if let [target] = targets {
            let target = self.name(target);
            self.builder.emit(Instruction::StoreName(target));
        } else {
            self.builder.emit(Instruction::Unpack(targets.len() as u32));
            for target in targets.iter().rev() {
                let target = self.name(target);
                self.builder.emit(Instruction::StoreName(target));
            }
        }

        self.body(body)?;
        self.builder.jump_to(next, Instruction::Jump);
        self.builder.place(exit);
        self.builder
            .emit(Instruction::PopScope)
            .emit(Instruction::IterEnd);
        self.builder.jump_to(end, Instruction::JumpIfTrue);
        self.body(else_body)?;
        self.builder.place(end);
        Ok(())
    }

    fn expr(&mut self, expr: &Expr, line: usize) -> Result<()> {
        match expr {
            Expr::Const(literal) => {
                self.builder.load_constant(literal.to_value());
            }
            Expr::Name(name) => {
                let name = self.name(name);
                self.builder.emit(Instruction::LoadName(name));
            }
            Expr::List(items) => {
                for item in items {
                    self.expr(item, line)?;
                }
                self.builder.emit(Instruction::BuildList(items.len() as u32));
            }
            Expr::Dict(pairs) => {
                for (key, value) in pairs {
                    self.expr(key, line)?;
                    self.expr(value, line)?;
                }
                self.builder.emit(Instruction::BuildMap(pairs.len() as u32));
            }
            Expr::GetAttr { obj, name } => {
                self.expr(obj, line)?;
                let name = self.name(name);
                self.builder.emit(Instruction::GetAttr(name));
            }
            Expr::GetItem { obj, key } => {
                self.expr(obj, line)?;
                self.expr(key, line)?;
                self.builder.emit(Instruction::GetItem);
            }
            Expr::Call { func, args, kwargs } => {
                self.expr(func, line)?;
                self.arguments(args, kwargs, line)?;
                self.builder
                    .emit(Instruction::Call(args.len() as u32, kwargs.len() as u32));
            }
            Expr::Filter {
                expr,
                name,
                args,
                kwargs,
            } => {
                if !self.environment.has_filter(name) {
                    return Err(TemplateError::syntax(format!("no filter named '{name}'"), line));
                }
                self.expr(expr, line)?;
                self.arguments(args, kwargs, line)?;
                let name = self.name(name);
                self.builder.emit(Instruction::CallFilter(
                    name,
                    args.len() as u32,
                    kwargs.len() as u32,
                ));
            }
            Expr::Test {
                expr,
                name,
                args,
                negated,
            } => {
                if !self.environment.has_test(name) {
                    return Err(TemplateError::syntax(format!("no test named '{name}'"), line));
                }
                self.expr(expr, line)?;
                self.arguments(args, &[], line)?;
                let name = self.name(name);
                self.builder
                    .emit(Instruction::CallTest(name, args.len() as u32));
                if *negated {
                    self.builder.emit(Instruction::Unary(UnaryOperator::Not));
                }
            }
            Expr::Unary { op, operand } => {
                self.expr(operand, line)?;
                self.builder.emit(Instruction::Unary(*op));
            }
            Expr::Binary { op, left, right } => {
                self.expr(left, line)?;
                match op {
                    BinaryOperator::And | BinaryOperator::Or => {
                        let end = self.builder.new_label();
                        let jump = if *op == BinaryOperator::And {
                            Instruction::JumpIfFalseOrPop
                        } else {
                            Instruction::JumpIfTrueOrPop
                        };
                        self.builder.jump_to(end, jump);
                        self.expr(right, line)?;
                        self.builder.place(end);
                    }
                    _ => {
                        self.expr(right, line)?;
                        self.builder.emit(Instruction::Binary(*op));
                    }
                }
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let alternative = self.builder.new_label();
                let end = self.builder.new_label();
                self.expr(condition, line)?;
                self.builder.jump_to(alternative, Instruction::JumpIfFalse);
                self.expr(then, line)?;
                self.builder.jump_to(end, Instruction::Jump);
                self.builder.place(alternative);
                match otherwise {
                    Some(otherwise) => self.expr(otherwise, line)?,
                    None => {
                        let undefined =
                            Undefined::new(self.environment.undefined_policy(), None, None);
                        self.builder.load_constant(Value::Undefined(undefined));
                    }
                }
                self.builder.place(end);
            }
        }
        Ok(())
    }

    fn arguments(&mut self, args: &[Expr], kwargs: &[(String, Expr)], line: usize) -> Result<()> {
        for arg in args {
            self.expr(arg, line)?;
        }
        for (name, value) in kwargs {
            self.builder.load_constant(Value::from(name.as_str()));
            self.expr(value, line)?;
        }
        Ok(())
    }
}

/// Generate bytecode for a parsed template
pub fn generate(
    template: &Template,
    environment: &Environment,
    name: Option<&str>,
    filename: &str,
) -> Result<Bytecode> {
    CodeGenerator::new(environment, name, filename).generate(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn compile(source: &str) -> Result<Bytecode> {
        let environment = Environment::new();
        let ast = parse(source, environment.syntax(), false)?;
        generate(&ast, &environment, Some("test"), "test.html")
    }

    #[test]
    fn test_root_routine_comes_first() {
        let code = compile("Hello {{ name }}!").unwrap();
        assert!(matches!(code.instructions[0], Instruction::EmitText(_)));
        assert_eq!(code.instructions.last(), Some(&Instruction::Return));
        assert_eq!(code.metadata.name.as_deref(), Some("test"));
    }

    #[test]
    fn test_blocks_and_macros_get_routines() {
        let code = compile(
            "{% block head %}H{% endblock %}{% macro m(a, b=1) %}{{ a }}{% endmacro %}",
        )
        .unwrap();
        let head = code.blocks["head"];
        assert!(head > 0);
        assert_eq!(code.instructions[head - 1], Instruction::Return);
        assert_eq!(code.macros[0].name, "m");
        assert_eq!(
            code.macros[0].params,
            vec![("a".to_string(), false), ("b".to_string(), true)]
        );
        assert!(matches!(
            code.instructions[code.macros[0].entry],
            Instruction::JumpIfBound(_, _)
        ));
    }

    #[test]
    fn test_extends_suppresses_top_level_output() {
        let code = compile("{% extends 'base' %}ignored{% block b %}kept{% endblock %}").unwrap();
        assert!(code.metadata.extends);
        let texts: Vec<Value> = code
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::EmitText(idx) => Some(code.constant(*idx)),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec![Value::from("kept")]);
        assert!(!code
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::CallBlock(_))));
    }

    #[test]
    fn test_unknown_filter_is_rejected_at_compile_time() {
        let err = compile("\n{{ x|nope }}").unwrap_err();
        assert!(err.to_string().contains("no filter named 'nope'"));
        assert_eq!(err.line(), Some(2));
        assert!(compile("{{ x is nope }}").is_err());
    }

    #[test]
    fn test_duplicate_blocks_are_rejected() {
        assert!(compile("{% block a %}{% endblock %}{% block a %}{% endblock %}").is_err());
    }

    #[test]
    fn test_debug_info_tracks_lines() {
        let code = compile("a\n{{ x }}\n{% if y %}\n{{ z }}{% endif %}").unwrap();
        let lines: Vec<usize> = code.debug_info.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4]);
    }
}
