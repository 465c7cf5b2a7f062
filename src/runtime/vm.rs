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

//! Bytecode virtual machine
//!
//! The VM executes one render lazily: [`Vm::next_chunk`] runs instructions
//! until an output instruction produces a chunk, so a consumer that stops
//! pulling simply stops execution. Macro calls, blocks and includes are
//! frames on an explicit frame stack rather than native recursion. Output of
//! a macro frame is captured into a buffer and becomes the call's result.

use super::context::Context;
use super::macros::Macro;
use super::{operators, resolver};
use crate::compiler::{Bytecode, Instruction};
use crate::error::{Result, SourceLocation, TemplateError};
use crate::model::{Kwargs, Namespace, UndefinedPolicy, Value};
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::sync::Arc;

/// Frame depth at which rendering fails instead of recursing further
const MAX_FRAMES: usize = 256;

/// Templates that may be in progress at once across renders nested through
/// imports and separately rendered includes
const MAX_NESTING: usize = 64;

type Args = SmallVec<[Value; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Root,
    Block,
    Macro,
    Include,
}

#[derive(Debug)]
struct Frame {
    program: Arc<Bytecode>,
    pc: usize,
    kind: FrameKind,
    /// Lowest scope visible to name lookups
    scope_base: usize,
    /// Scope depth to restore on return
    scope_entry: usize,
    loop_entry: usize,
    stack_entry: usize,
    /// Resolve blocks through the context's inheritance chain
    context_blocks: bool,
}

#[derive(Debug)]
struct LoopState {
    items: Vec<Value>,
    index: usize,
}

impl LoopState {
    fn record(&self) -> Value {
        let length = self.items.len();
        let index0 = self.index;
        let mut record = IndexMap::with_capacity(7);
        record.insert("index".to_string(), Value::from(index0 + 1));
        record.insert("index0".to_string(), Value::from(index0));
        record.insert("revindex".to_string(), Value::from(length - index0));
        record.insert("revindex0".to_string(), Value::from(length - index0 - 1));
        record.insert("first".to_string(), Value::Bool(index0 == 0));
        record.insert("last".to_string(), Value::Bool(index0 + 1 == length));
        record.insert("length".to_string(), Value::from(length));
        Value::from(record)
    }
}

/// Virtual machine for one render
pub struct Vm {
    context: Context,
    frames: Vec<Frame>,
    stack: Vec<Value>,
    scopes: Vec<IndexMap<String, Value>>,
    loops: Vec<LoopState>,
    captures: Vec<String>,
    pending_parent: Option<Arc<Bytecode>>,
    /// Names of the templates in the inheritance chain, child first
    lineage: Vec<String>,
    finished: bool,
}

impl Vm {
    /// Prepare a render of `program`'s root routine
    pub fn new(context: Context, program: Arc<Bytecode>) -> Self {
        let root = Frame {
            program,
            pc: 0,
            kind: FrameKind::Root,
            scope_base: 0,
            scope_entry: 0,
            loop_entry: 0,
            stack_entry: 0,
            context_blocks: true,
        };
        let lineage = context.name().map(str::to_string).into_iter().collect();
        Self {
            context,
            frames: vec![root],
            stack: Vec::new(),
            scopes: Vec::new(),
            loops: Vec::new(),
            captures: Vec::new(),
            pending_parent: None,
            lineage,
            finished: false,
        }
    }

    /// Prepare a standalone call of a macro
    pub(crate) fn for_macro(
        context: Context,
        macro_: &Macro,
        scope: IndexMap<String, Value>,
    ) -> Self {
        let frame = Frame {
            program: Arc::clone(macro_.program()),
            pc: macro_.entry(),
            kind: FrameKind::Macro,
            scope_base: 0,
            scope_entry: 0,
            loop_entry: 0,
            stack_entry: 0,
            context_blocks: false,
        };
        let lineage = context.name().map(str::to_string).into_iter().collect();
        Self {
            context,
            frames: vec![frame],
            stack: Vec::new(),
            scopes: vec![scope],
            loops: Vec::new(),
            captures: vec![String::new()],
            pending_parent: None,
            lineage,
            finished: false,
        }
    }

    /// The render's context
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Consume the VM, returning its context
    pub fn into_context(self) -> Context {
        self.context
    }

    /// Run until the next output chunk; `None` once the root routine returned
    pub fn next_chunk(&mut self) -> Option<Result<String>> {
        if self.finished {
            return None;
        }
        match self.run() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }

    /// Run a standalone macro call to completion
    pub(crate) fn run_macro(mut self) -> Result<Value> {
        while self.run()?.is_some() {}
        Ok(self.stack.pop().unwrap_or(Value::None))
    }

    fn run(&mut self) -> Result<Option<String>> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(None);
            };
            let pc = frame.pc;
            let instruction = frame
                .program
                .instructions
                .get(pc)
                .copied()
                .unwrap_or(Instruction::Return);
            frame.pc += 1;

            match self.execute(instruction) {
                Ok(Some(chunk)) => return Ok(Some(chunk)),
                Ok(None) => {}
                Err(err) => return Err(self.locate(err, pc)),
            }
        }
    }

    fn locate(&self, err: TemplateError, pc: usize) -> TemplateError {
        match self.frames.last() {
            Some(frame) => {
                let meta = &frame.program.metadata;
                err.with_location(SourceLocation::new(
                    meta.name.clone(),
                    meta.filename.clone(),
                    frame.program.source_line(pc),
                ))
            }
            None => err,
        }
    }

    fn frame(&self) -> Result<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| TemplateError::evaluation("no active frame"))
    }

    fn program(&self) -> Result<Arc<Bytecode>> {
        self.frame().map(|f| Arc::clone(&f.program))
    }

    fn jump(&mut self, target: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = target as usize;
        }
    }

    fn policy(&self) -> UndefinedPolicy {
        self.context.environment().undefined_policy()
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| TemplateError::evaluation("value stack underflow"))
    }

    fn top(&self) -> Result<&Value> {
        self.stack
            .last()
            .ok_or_else(|| TemplateError::evaluation("value stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Args> {
        if self.stack.len() < n {
            return Err(TemplateError::evaluation("value stack underflow"));
        }
        let start = self.stack.len() - n;
        Ok(self.stack.drain(start..).collect())
    }

    fn pop_kwargs(&mut self, count: usize) -> Result<Kwargs> {
        let flat = self.pop_n(count * 2)?;
        let mut kwargs = Kwargs::with_capacity(count);
        for pair in flat.chunks(2) {
            if let [name, value] = pair {
                kwargs.insert(name.render()?, value.clone());
            }
        }
        Ok(kwargs)
    }

    fn truthy(&self, value: &Value) -> Result<bool> {
        match value {
            Value::Undefined(undefined) if undefined.policy() == UndefinedPolicy::Strict => {
                Err(undefined.error())
            }
            other => Ok(other.is_true()),
        }
    }

    fn output(&mut self, text: String) -> Option<String> {
        match self.captures.last_mut() {
            Some(buffer) => {
                buffer.push_str(&text);
                None
            }
            None => Some(text),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        let base = self.frame()?.scope_base;
        for scope in self.scopes[base.min(self.scopes.len())..].iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        Ok(self.context.resolve(name))
    }

    /// Visible variables of the current frame, for renders that need a fresh context
    fn locals_snapshot(&self) -> Result<Namespace> {
        let base = self.frame()?.scope_base;
        let mut all = self.context.get_all();
        for scope in &self.scopes[base.min(self.scopes.len())..] {
            all.extend(scope.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(Namespace::from(all))
    }

    /// Templates in progress for a render started from this one
    fn nesting(&self) -> Result<Vec<String>> {
        let outer = self.context.nesting();
        if outer.len() >= MAX_NESTING {
            return Err(TemplateError::evaluation(
                "maximum template nesting depth exceeded",
            ));
        }
        let mut nesting = outer.to_vec();
        nesting.extend(self.lineage.iter().cloned());
        Ok(nesting)
    }

    fn push_frame(&mut self, program: Arc<Bytecode>, pc: usize, kind: FrameKind) -> Result<()> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(TemplateError::evaluation("maximum recursion depth exceeded"));
        }
        let caller = self.frame()?;
        let scope_entry = self.scopes.len();
        let scope_base = match kind {
            FrameKind::Include => caller.scope_base,
            _ => scope_entry,
        };
        let context_blocks = match kind {
            FrameKind::Include => false,
            _ => caller.context_blocks,
        };
        self.frames.push(Frame {
            program,
            pc,
            kind,
            scope_base,
            scope_entry,
            loop_entry: self.loops.len(),
            stack_entry: self.stack.len(),
            context_blocks,
        });
        Ok(())
    }

    fn execute(&mut self, instruction: Instruction) -> Result<Option<String>> {
        match instruction {
            Instruction::EmitText(index) => {
                let text = self.program()?.constant(index).render()?;
                return Ok(self.output(text));
            }
            Instruction::Emit => {
                let value = self.pop()?;
                let text = self.context.environment().format_output(&value)?;
                return Ok(self.output(text));
            }
            Instruction::LoadConst(index) => {
                let value = self.program()?.constant(index);
                self.stack.push(value);
            }
            Instruction::LoadName(index) => {
                let program = self.program()?;
                let value = self.lookup(program.name(index))?;
                self.stack.push(value);
            }
            Instruction::StoreName(index) => {
                let program = self.program()?;
                let name = program.name(index);
                let value = self.pop()?;
                match self.scopes.last_mut() {
                    Some(scope) => {
                        scope.insert(name.to_string(), value);
                    }
                    None => {
                        self.context.set(name, value);
                        self.context.export(name);
                    }
                }
            }
            Instruction::Duplicate => {
                let value = self.top()?.clone();
                self.stack.push(value);
            }
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::GetAttr(index) => {
                let obj = self.pop()?;
                if let Value::Undefined(undefined) = &obj {
                    if undefined.policy() == UndefinedPolicy::Strict {
                        return Err(undefined.error());
                    }
                }
                let program = self.program()?;
                let value = resolver::getattr(self.policy(), &obj, program.name(index));
                self.stack.push(value);
            }
            Instruction::GetItem => {
                let key = self.pop()?;
                let obj = self.pop()?;
                if let Value::Undefined(undefined) = &obj {
                    if undefined.policy() == UndefinedPolicy::Strict {
                        return Err(undefined.error());
                    }
                }
                let value = resolver::getitem(self.policy(), &obj, &key);
                self.stack.push(value);
            }
            Instruction::BuildList(count) => {
                let items = self.pop_n(count as usize)?;
                self.stack.push(Value::List(Arc::new(items.into_vec())));
            }
            Instruction::BuildMap(count) => {
                let flat = self.pop_n(count as usize * 2)?;
                let mut map = IndexMap::with_capacity(count as usize);
                for pair in flat.chunks(2) {
                    if let [key, value] = pair {
                        let key = match key.as_str() {
                            Some(s) => s.to_string(),
                            None => key.render()?,
                        };
                        map.insert(key, value.clone());
                    }
                }
                self.stack.push(Value::from(map));
            }
            Instruction::Call(argc, kwcount) => {
                let kwargs = self.pop_kwargs(kwcount as usize)?;
                let args = self.pop_n(argc as usize)?;
                let func = self.pop()?;
                match &func {
                    Value::Macro(m) if m.defined_in(self.context.vars()) => {
                        let scope = m.bind_arguments(&args, &kwargs)?;
                        self.push_frame(Arc::clone(m.program()), m.entry(), FrameKind::Macro)?;
                        self.scopes.push(scope);
                        self.captures.push(String::new());
                    }
                    _ => {
                        let result = func.call(&args, &kwargs)?;
                        self.stack.push(result);
                    }
                }
            }
            Instruction::CallFilter(index, argc, kwcount) => {
                let kwargs = self.pop_kwargs(kwcount as usize)?;
                let args = self.pop_n(argc as usize)?;
                let value = self.pop()?;
                let program = self.program()?;
                let result = self.context.environment().apply_filter(
                    program.name(index),
                    value,
                    &args,
                    &kwargs,
                )?;
                self.stack.push(result);
            }
            Instruction::CallTest(index, argc) => {
                let args = self.pop_n(argc as usize)?;
                let value = self.pop()?;
                let program = self.program()?;
                let result =
                    self.context
                        .environment()
                        .apply_test(program.name(index), &value, &args)?;
                self.stack.push(Value::Bool(result));
            }
            Instruction::Unary(op) => {
                let operand = self.pop()?;
                let result = match op {
                    crate::ast::UnaryOperator::Not => Value::Bool(!self.truthy(&operand)?),
                    _ => operators::unary(op, &operand)?,
                };
                self.stack.push(result);
            }
            Instruction::Binary(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.stack.push(operators::binary(op, &left, &right)?);
            }
            Instruction::Jump(target) => self.jump(target),
            Instruction::JumpIfFalse(target) => {
                let value = self.pop()?;
                if !self.truthy(&value)? {
                    self.jump(target);
                }
            }
            Instruction::JumpIfTrue(target) => {
                let value = self.pop()?;
                if self.truthy(&value)? {
                    self.jump(target);
                }
            }
            Instruction::JumpIfFalseOrPop(target) => {
                if self.truthy(self.top()?)? {
                    self.pop()?;
                } else {
                    self.jump(target);
                }
            }
            Instruction::JumpIfTrueOrPop(target) => {
                if self.truthy(self.top()?)? {
                    self.jump(target);
                } else {
                    self.pop()?;
                }
            }
            Instruction::JumpIfBound(index, target) => {
                let program = self.program()?;
                let bound = self
                    .scopes
                    .last()
                    .is_some_and(|scope| scope.contains_key(program.name(index)));
                if bound {
                    self.jump(target);
                }
            }
            Instruction::PushScope => self.scopes.push(IndexMap::new()),
            Instruction::PopScope => {
                self.scopes.pop();
            }
            Instruction::IterStart => {
                let iterable = self.pop()?;
                let items = iterable.iterate()?;
                self.loops.push(LoopState { items, index: 0 });
            }
            Instruction::IterNext(exit) => {
                let state = self
                    .loops
                    .last_mut()
                    .ok_or_else(|| TemplateError::evaluation("no active loop"))?;
                match state.items.get(state.index).cloned() {
                    Some(item) => {
                        let record = state.record();
                        state.index += 1;
                        if let Some(scope) = self.scopes.last_mut() {
                            scope.insert("loop".to_string(), record);
                        }
                        self.stack.push(item);
                    }
                    None => self.jump(exit),
                }
            }
            Instruction::IterEnd => {
                let state = self
                    .loops
                    .pop()
                    .ok_or_else(|| TemplateError::evaluation("no active loop"))?;
                self.stack.push(Value::Bool(state.index > 0));
            }
            Instruction::Unpack(count) => {
                let value = self.pop()?;
                let items = value.iterate()?;
                if items.len() != count as usize {
                    return Err(TemplateError::evaluation(format!(
                        "cannot unpack {} value(s) into {count} name(s)",
                        items.len()
                    )));
                }
                self.stack.extend(items);
            }
            Instruction::MakeMacro(index) => {
                let program = self.program()?;
                let info = program
                    .macros
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| TemplateError::evaluation("unknown macro routine"))?;
                let value = Macro::new(info, Arc::clone(&program), &self.context);
                self.stack.push(Value::Macro(Arc::new(value)));
            }
            Instruction::CallBlock(index) => {
                let program = self.program()?;
                let name = program.name(index);
                let from_context = if self.frame()?.context_blocks {
                    self.context
                        .block(name)
                        .map(|b| (Arc::clone(&b.program), b.entry))
                } else {
                    None
                };
                let (block_program, entry) = match from_context {
                    Some(found) => found,
                    None => program
                        .blocks
                        .get(name)
                        .map(|entry| (Arc::clone(&program), *entry))
                        .ok_or_else(|| {
                            TemplateError::evaluation(format!("block '{name}' is not defined"))
                        })?,
                };
                self.push_frame(block_program, entry, FrameKind::Block)?;
                self.scopes.push(IndexMap::new());
            }
            Instruction::Extends => {
                let target = self.pop()?;
                if self.pending_parent.is_some() {
                    return Err(TemplateError::evaluation("extended multiple times"));
                }
                let name = target.render()?;
                let current = self.program()?;
                let template = self.context.environment().get_template(
                    &name,
                    current.metadata.name.as_deref(),
                    None,
                )?;
                if let Some(parent_name) = template.name() {
                    if self.lineage.iter().any(|seen| seen == parent_name) {
                        return Err(TemplateError::evaluation(format!(
                            "circular template inheritance: {} -> {parent_name}",
                            self.lineage.join(" -> ")
                        )));
                    }
                    self.lineage.push(parent_name.to_string());
                }
                if self.lineage.len() > MAX_FRAMES {
                    return Err(TemplateError::evaluation("template inheritance chain too long"));
                }
                let parent = Arc::clone(template.code());
                self.context.push_parent_blocks(&parent);
                self.pending_parent = Some(parent);
            }
            Instruction::Include(ignore_missing) => {
                let target = self.pop()?;
                return self.include(target, ignore_missing);
            }
            Instruction::Import => {
                let target = self.pop()?;
                let name = target.render()?;
                let current = self.program()?;
                let template = self.context.environment().get_template(
                    &name,
                    current.metadata.name.as_deref(),
                    None,
                )?;
                let nesting = self.nesting()?;
                if let Some(imported) = template.name() {
                    if nesting.iter().any(|active| active == imported) {
                        return Err(TemplateError::evaluation(format!(
                            "circular import: {} -> {imported}",
                            nesting.join(" -> ")
                        )));
                    }
                }
                let module = template.module_within(nesting)?;
                self.stack.push(Value::Object(module));
            }
            Instruction::Return => self.return_from_frame()?,
        }
        Ok(None)
    }

    fn include(&mut self, target: Value, ignore_missing: bool) -> Result<Option<String>> {
        let environment = Arc::clone(self.context.environment());
        let current = self.program()?;
        let parent_name = current.metadata.name.as_deref();

        let found = match &target {
            Value::List(names) => {
                let names: Vec<String> = names.iter().map(Value::render).collect::<Result<_>>()?;
                environment.select_template(&names, parent_name, None)
            }
            other => environment.get_template(&other.render()?, parent_name, None),
        };
        let template = match found {
            Ok(template) => template,
            Err(TemplateError::TemplateNotFound { .. }) if ignore_missing => return Ok(None),
            Err(err) => return Err(err),
        };

        if template.code().metadata.extends {
            // Inheritance needs its own block chain, so render separately
            let rendered = template.render_within(self.locals_snapshot()?, self.nesting()?)?;
            return Ok(self.output(rendered));
        }

        self.push_frame(Arc::clone(template.code()), 0, FrameKind::Include)?;
        self.scopes.push(IndexMap::new());
        Ok(None)
    }

    fn return_from_frame(&mut self) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| TemplateError::evaluation("no active frame"))?;
        self.scopes.truncate(frame.scope_entry);
        self.loops.truncate(frame.loop_entry);
        self.stack.truncate(frame.stack_entry);

        match frame.kind {
            FrameKind::Root => {
                if let Some(parent) = self.pending_parent.take() {
                    self.frames.push(Frame {
                        program: parent,
                        pc: 0,
                        kind: FrameKind::Root,
                        scope_base: 0,
                        scope_entry: 0,
                        loop_entry: 0,
                        stack_entry: 0,
                        context_blocks: true,
                    });
                }
            }
            FrameKind::Macro => {
                let output = self.captures.pop().unwrap_or_default();
                let value = if self.context.environment().autoescape() {
                    Value::safe(output)
                } else {
                    Value::from(output)
                };
                self.stack.push(value);
            }
            FrameKind::Block | FrameKind::Include => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("template", &self.context.name())
            .field("frames", &self.frames.len())
            .field("finished", &self.finished)
            .finish()
    }
}
