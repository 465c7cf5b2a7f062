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

//! Bytecode instruction set for compiled templates
//!
//! A compiled template is one flat instruction array. The root routine starts
//! at index 0; block and macro routines follow it, each ending in
//! [`Instruction::Return`]. Jump targets are absolute instruction indices.

use crate::ast::{BinaryOperator, UnaryOperator};
use crate::model::Value;
use indexmap::IndexMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// Index into the constant pool
pub type ConstantIndex = u32;

/// Index into the name pool
pub type NameIndex = u32;

/// Absolute instruction index
pub type Target = u32;

/// Bytecode instruction set for templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    // === Output ===
    /// Output a template data constant verbatim
    EmitText(ConstantIndex),

    /// Pop a value and output it (finalize and autoescape apply)
    Emit,

    // === Stack Operations ===
    /// Push a constant value onto the stack
    LoadConst(ConstantIndex),

    /// Resolve a name and push it
    LoadName(NameIndex),

    /// Pop a value and bind it to a name
    StoreName(NameIndex),

    /// Duplicate the top stack value
    Duplicate,

    /// Pop and discard the top stack value
    Pop,

    // === Lookup ===
    /// Attribute lookup on the top stack value
    GetAttr(NameIndex),

    /// Item lookup
    /// Stack: [obj, key] -> [value]
    GetItem,

    // === Construction ===
    /// Build a list from the top N values
    BuildList(u32),

    /// Build a map from the top N key/value pairs
    BuildMap(u32),

    // === Calls ===
    /// Call a value
    /// Stack: [func, arg1..argN, kw1_name, kw1_value, ...] -> [result]
    Call(u32, u32),

    /// Apply a named filter
    /// Stack: [value, arg1..argN, kw pairs] -> [result]
    CallFilter(NameIndex, u32, u32),

    /// Apply a named test
    /// Stack: [value, arg1..argN] -> [bool]
    CallTest(NameIndex, u32),

    // === Operators ===
    /// Unary operator on the top value
    Unary(UnaryOperator),

    /// Binary operator (never `and`/`or`, which compile to jumps)
    Binary(BinaryOperator),

    // === Control Flow ===
    /// Unconditional jump
    Jump(Target),

    /// Pop and jump if falsy
    JumpIfFalse(Target),

    /// Pop and jump if truthy
    JumpIfTrue(Target),

    /// Jump keeping the value if falsy, otherwise pop
    JumpIfFalseOrPop(Target),

    /// Jump keeping the value if truthy, otherwise pop
    JumpIfTrueOrPop(Target),

    /// Jump if the name is bound in the innermost scope
    JumpIfBound(NameIndex, Target),

    // === Scopes and Loops ===
    /// Open a local scope
    PushScope,

    /// Close the innermost local scope
    PopScope,

    /// Pop an iterable and start a loop over it
    IterStart,

    /// Push the next item and refresh `loop`, or jump when exhausted
    IterNext(Target),

    /// Finish the innermost loop, pushing whether it iterated at all
    IterEnd,

    /// Pop a sequence and push its N items in order
    Unpack(u32),

    // === Template Structure ===
    /// Push a macro defined in this program
    MakeMacro(u32),

    /// Render a block by name
    CallBlock(NameIndex),

    /// Pop a template name and make it this template's parent
    Extends,

    /// Pop a template name and render it in place
    Include(bool),

    /// Pop a template name and push its module
    Import,

    /// End the current routine
    Return,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmitText(idx) => write!(f, "EMIT_TEXT {idx}"),
            Self::Emit => write!(f, "EMIT"),
            Self::LoadConst(idx) => write!(f, "LOAD_CONST {idx}"),
            Self::LoadName(idx) => write!(f, "LOAD_NAME {idx}"),
            Self::StoreName(idx) => write!(f, "STORE_NAME {idx}"),
            Self::Duplicate => write!(f, "DUP"),
            Self::Pop => write!(f, "POP"),
            Self::GetAttr(idx) => write!(f, "GET_ATTR {idx}"),
            Self::GetItem => write!(f, "GET_ITEM"),
            Self::BuildList(n) => write!(f, "BUILD_LIST {n}"),
            Self::BuildMap(n) => write!(f, "BUILD_MAP {n}"),
            Self::Call(argc, kwc) => write!(f, "CALL {argc} {kwc}"),
            Self::CallFilter(idx, argc, kwc) => write!(f, "FILTER {idx} {argc} {kwc}"),
            Self::CallTest(idx, argc) => write!(f, "TEST {idx} {argc}"),
            Self::Unary(op) => write!(f, "UNARY {op}"),
            Self::Binary(op) => write!(f, "BINARY {op}"),
            Self::Jump(t) => write!(f, "JUMP {t}"),
            Self::JumpIfFalse(t) => write!(f, "JMP_FALSE {t}"),
            Self::JumpIfTrue(t) => write!(f, "JMP_TRUE {t}"),
            Self::JumpIfFalseOrPop(t) => write!(f, "JMP_FALSE_OR_POP {t}"),
            Self::JumpIfTrueOrPop(t) => write!(f, "JMP_TRUE_OR_POP {t}"),
            Self::JumpIfBound(idx, t) => write!(f, "JMP_BOUND {idx} {t}"),
            Self::PushScope => write!(f, "PUSH_SCOPE"),
            Self::PopScope => write!(f, "POP_SCOPE"),
            Self::IterStart => write!(f, "ITER_START"),
            Self::IterNext(t) => write!(f, "ITER_NEXT {t}"),
            Self::IterEnd => write!(f, "ITER_END"),
            Self::Unpack(n) => write!(f, "UNPACK {n}"),
            Self::MakeMacro(idx) => write!(f, "MAKE_MACRO {idx}"),
            Self::CallBlock(idx) => write!(f, "CALL_BLOCK {idx}"),
            Self::Extends => write!(f, "EXTENDS"),
            Self::Include(ignore_missing) => write!(f, "INCLUDE {ignore_missing}"),
            Self::Import => write!(f, "IMPORT"),
            Self::Return => write!(f, "RETURN"),
        }
    }
}

/// Macro routine descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct MacroInfo {
    /// Macro name
    pub name: String,
    /// Parameter names and whether each has a default
    pub params: Vec<(String, bool)>,
    /// First instruction of the routine
    pub entry: usize,
}

/// Metadata associated with bytecode
#[derive(Debug, Clone, Default)]
pub struct BytecodeMetadata {
    /// Template name, `None` for in-memory templates
    pub name: Option<String>,

    /// Filename used in diagnostics
    pub filename: String,

    /// Whether the template extends another one
    pub extends: bool,
}

/// Compiled template program
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    /// Instruction sequence
    pub instructions: Vec<Instruction>,

    /// Constant value pool
    pub constants: Vec<Value>,

    /// Name pool (variables, attributes, filters, tests, blocks)
    pub names: Vec<Arc<str>>,

    /// Block name to routine entry
    pub blocks: IndexMap<String, usize>,

    /// Macro routines
    pub macros: Vec<MacroInfo>,

    /// `(source_line, instruction_index)` pairs ordered by instruction index
    pub debug_info: Vec<(usize, usize)>,

    /// Metadata for diagnostics
    pub metadata: BytecodeMetadata,
}

impl Bytecode {
    /// Create new empty bytecode
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constant to the pool and return its index
    pub fn add_constant(&mut self, value: Value) -> ConstantIndex {
        // Only plain scalars are deduplicated; equality crosses numeric types
        let dedup = matches!(value, Value::String(_) | Value::None)
            || matches!(value, Value::Bool(_) | Value::Integer(_));
        if dedup {
            if let Some(index) = self
                .constants
                .iter()
                .position(|v| std::mem::discriminant(v) == std::mem::discriminant(&value) && v == &value)
            {
                return index as ConstantIndex;
            }
        }

        let index = self.constants.len();
        self.constants.push(value);
        index as ConstantIndex
    }

    /// Intern a name and return its index
    pub fn add_name(&mut self, name: &str) -> NameIndex {
        if let Some(index) = self.names.iter().position(|n| &**n == name) {
            return index as NameIndex;
        }
        self.names.push(Arc::from(name));
        (self.names.len() - 1) as NameIndex
    }

    /// Name at the given index
    pub fn name(&self, index: NameIndex) -> &str {
        self.names.get(index as usize).map_or("", |n| n)
    }

    /// Constant at the given index
    pub fn constant(&self, index: ConstantIndex) -> Value {
        self.constants
            .get(index as usize)
            .cloned()
            .unwrap_or(Value::None)
    }

    /// Add an instruction to the bytecode
    pub fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Template source line for an instruction index.
    ///
    /// Scans `debug_info` from the end and returns the first source line whose
    /// instruction index is not after `index`; line 1 when none qualifies.
    pub fn source_line(&self, index: usize) -> usize {
        self.debug_info
            .iter()
            .rev()
            .find(|(_, code_index)| *code_index <= index)
            .map_or(1, |(line, _)| *line)
    }

    /// Pretty print the bytecode for debugging
    pub fn disassemble(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "=== BYTECODE DISASSEMBLY ===");
        let _ = writeln!(
            output,
            "Template: {}",
            self.metadata.name.as_deref().unwrap_or("<anonymous>")
        );
        let _ = writeln!(output, "Filename: {}", self.metadata.filename);
        let _ = writeln!(output, "Constants: {}", self.constants.len());
        let _ = writeln!(output, "Names: {}", self.names.len());

        output.push_str("\n--- CONSTANTS ---\n");
        for (i, constant) in self.constants.iter().enumerate() {
            let _ = writeln!(output, "{i:4}: {constant:?}");
        }

        output.push_str("\n--- NAMES ---\n");
        for (i, name) in self.names.iter().enumerate() {
            let _ = writeln!(output, "{i:4}: \"{name}\"");
        }

        if !self.blocks.is_empty() {
            output.push_str("\n--- BLOCKS ---\n");
            for (name, entry) in &self.blocks {
                let _ = writeln!(output, "{name} -> {entry}");
            }
        }

        if !self.macros.is_empty() {
            output.push_str("\n--- MACROS ---\n");
            for (i, info) in self.macros.iter().enumerate() {
                let params: Vec<&str> = info.params.iter().map(|(p, _)| p.as_str()).collect();
                let _ = writeln!(
                    output,
                    "{i:4}: {}({}) -> {}",
                    info.name,
                    params.join(", "),
                    info.entry
                );
            }
        }

        output.push_str("\n--- INSTRUCTIONS ---\n");
        let mut lines = self.debug_info.iter().peekable();
        for (i, instruction) in self.instructions.iter().enumerate() {
            let mut marker = String::new();
            while let Some((line, index)) = lines.peek() {
                if *index > i {
                    break;
                }
                if *index == i {
                    marker = format!("  ; line {line}");
                }
                lines.next();
            }
            let _ = writeln!(output, "{i:4}: {instruction}{marker}");
        }

        output
    }
}

/// Forward-reference label handed out by [`BytecodeBuilder::new_label`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

/// Bytecode builder utility for constructing bytecode programs
pub struct BytecodeBuilder {
    bytecode: Bytecode,
    label_targets: Vec<Option<usize>>,
    pending_jumps: Vec<(usize, Label)>,
}

impl BytecodeBuilder {
    /// Create a new bytecode builder
    pub fn new(metadata: BytecodeMetadata) -> Self {
        Self {
            bytecode: Bytecode {
                metadata,
                ..Bytecode::default()
            },
            label_targets: Vec::new(),
            pending_jumps: Vec::new(),
        }
    }

    /// Index the next instruction will get
    pub fn position(&self) -> usize {
        self.bytecode.instructions.len()
    }

    /// Emit an instruction
    pub fn emit(&mut self, instruction: Instruction) -> &mut Self {
        self.bytecode.emit(instruction);
        self
    }

    /// Add a constant and emit a LoadConst instruction
    pub fn load_constant(&mut self, value: Value) -> &mut Self {
        let index = self.bytecode.add_constant(value);
        self.emit(Instruction::LoadConst(index))
    }

    /// Add template data and emit an EmitText instruction
    pub fn emit_text(&mut self, text: &str) -> &mut Self {
        let index = self.bytecode.add_constant(Value::from(text));
        self.emit(Instruction::EmitText(index))
    }

    /// Intern a name
    pub fn name(&mut self, name: &str) -> NameIndex {
        self.bytecode.add_name(name)
    }

    /// Allocate an unplaced label
    pub fn new_label(&mut self) -> Label {
        self.label_targets.push(None);
        Label(self.label_targets.len() - 1)
    }

    /// Place a label at the current position
    pub fn place(&mut self, label: Label) -> &mut Self {
        let position = self.position();
        self.label_targets[label.0] = Some(position);
        self
    }

    /// Emit a jump-style instruction whose target is a label
    ///
    /// `make` receives a placeholder target that is patched in [`finalize`](Self::finalize).
    pub fn jump_to(&mut self, label: Label, make: impl FnOnce(Target) -> Instruction) -> &mut Self {
        let position = self.position();
        self.pending_jumps.push((position, label));
        self.emit(make(0))
    }

    /// Record the source line of the next instruction
    pub fn mark_line(&mut self, line: usize) {
        let position = self.position();
        let info = &mut self.bytecode.debug_info;
        match info.last_mut() {
            Some((last_line, _)) if *last_line == line => {}
            Some((last_line, index)) if *index == position => *last_line = line,
            _ => info.push((line, position)),
        }
    }

    /// Register a block routine entry
    pub fn add_block(&mut self, name: &str, entry: usize) {
        self.bytecode.blocks.insert(name.to_string(), entry);
    }

    /// Register a macro routine; returns its index
    pub fn add_macro(&mut self, info: MacroInfo) -> u32 {
        self.bytecode.macros.push(info);
        (self.bytecode.macros.len() - 1) as u32
    }

    /// Set a macro's entry once its routine position is known
    pub fn set_macro_entry(&mut self, index: u32, entry: usize) {
        if let Some(info) = self.bytecode.macros.get_mut(index as usize) {
            info.entry = entry;
        }
    }

    /// Finalize the bytecode by resolving jumps
    pub fn finalize(mut self) -> Result<Bytecode, String> {
        for (position, label) in self.pending_jumps {
            let target = self
                .label_targets
                .get(label.0)
                .copied()
                .flatten()
                .ok_or_else(|| format!("Unplaced label: {}", label.0))?;
            let target = Target::try_from(target)
                .map_err(|_| format!("Jump target out of range: {target}"))?;

            let patched = match self.bytecode.instructions[position] {
                Instruction::Jump(_) => Instruction::Jump(target),
                Instruction::JumpIfFalse(_) => Instruction::JumpIfFalse(target),
                Instruction::JumpIfTrue(_) => Instruction::JumpIfTrue(target),
                Instruction::JumpIfFalseOrPop(_) => Instruction::JumpIfFalseOrPop(target),
                Instruction::JumpIfTrueOrPop(_) => Instruction::JumpIfTrueOrPop(target),
                Instruction::JumpIfBound(name, _) => Instruction::JumpIfBound(name, target),
                Instruction::IterNext(_) => Instruction::IterNext(target),
                other => return Err(format!("Not a jump instruction: {other}")),
            };
            self.bytecode.instructions[position] = patched;
        }

        Ok(self.bytecode)
    }
}
