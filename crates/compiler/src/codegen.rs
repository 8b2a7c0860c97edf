//! Code generation for the target stack machine
//!
//! A tree-walking pass over the validated AST. Emission goes into the
//! main instruction list or into one per-function list; `finalize` joins
//! them into the program text.
//!
//! # Frames and addressing
//!
//! Every block opens a memory frame with a `push 0` / `oframe` pair; the
//! push is a placeholder that is patched upward as declarations claim
//! slots. Symbols record their slot index and an absolute frame position;
//! since the machine addresses frames from the top of the frame stack,
//! the emitted depth is recomputed from the live scope count at every
//! reference.
//!
//! # Arrays
//!
//! An array value on the operand stack is its elements in reverse order
//! with the size on top, which keeps `sta` symmetric for stores. A named
//! array read additionally pushes a leading size word so the print
//! preamble can discard it.
//!
//! # Jumps
//!
//! Branches push a placeholder `push #PC+0`, emit the jump, and patch the
//! placeholder once the target's instruction index is known. Patching
//! goes through list-and-index pairs, never through pointers into the
//! growing lists.

use crate::ast::{BinOp, Block, DeclSize, Expr, FuncDecl, Program, Stmt, Target};
use crate::instructions::{render, Instr, InstrList};
use crate::symtab::{NotFound, ScopeEntry, SymbolTable};
use crate::types::Kind;
use std::fmt;

#[derive(Debug)]
pub enum CodeGenError {
    /// Emission reached a state the analyzer should have ruled out.
    Logic(String),
    /// A name lookup failed.
    Undefined(NotFound),
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeGenError::Logic(message) => write!(f, "{}", message),
            CodeGenError::Undefined(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<NotFound> for CodeGenError {
    fn from(e: NotFound) -> Self {
        CodeGenError::Undefined(e)
    }
}

/// Operator to mnemonic, in one place. `!=` is the only operator with no
/// dedicated instruction; it emits `eq` plus `not`.
const BINARY_OP_INSTRUCTIONS: &[(BinOp, Instr)] = &[
    (BinOp::Add, Instr::Add),
    (BinOp::Sub, Instr::Sub),
    (BinOp::Mul, Instr::Mul),
    (BinOp::Div, Instr::Div),
    (BinOp::Mod, Instr::Mod),
    (BinOp::And, Instr::And),
    (BinOp::Or, Instr::Or),
    (BinOp::Eq, Instr::Eq),
    (BinOp::Lt, Instr::Lt),
    (BinOp::Le, Instr::Le),
    (BinOp::Gt, Instr::Gt),
    (BinOp::Ge, Instr::Ge),
];

/// A variable's home: slot index, absolute frame position, and element
/// count for arrays.
#[derive(Debug, Clone, Copy)]
struct VarEntry {
    index: usize,
    frame: usize,
    size: Option<usize>,
}

impl ScopeEntry for VarEntry {
    fn is_function(&self) -> bool {
        false
    }
}

/// Which instruction list an index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListId {
    Main,
    Func(usize),
}

/// A lexically open frame and the placeholder push that carries its slot
/// count.
#[derive(Debug, Clone, Copy)]
struct FrameRef {
    list: ListId,
    push_index: usize,
}

pub struct CodeGen {
    symtab: SymbolTable<VarEntry>,
    main_list: InstrList,
    func_lists: Vec<InstrList>,
    current: ListId,
    frame_stack: Vec<FrameRef>,
    /// Array return size of the function being emitted, if any.
    ret_size: Option<usize>,
}

impl CodeGen {
    pub fn new() -> Self {
        CodeGen {
            symtab: SymbolTable::new(),
            main_list: Vec::new(),
            func_lists: vec![reverse_stub()],
            current: ListId::Main,
            frame_stack: Vec::new(),
            ret_size: None,
        }
    }

    pub fn gen_program(&mut self, program: &Program) -> Result<(), CodeGenError> {
        self.emit(Instr::Label("main".to_string()));
        self.gen_block(&program.block)?;
        self.emit(Instr::Halt);
        Ok(())
    }

    /// Assemble the final program text: the main section followed by each
    /// function section, one instruction per line, with no trailing
    /// newline.
    pub fn finalize(&self) -> String {
        let mut sections = vec![render(&self.main_list)];
        for list in &self.func_lists {
            sections.push(render(list));
        }
        sections.join("\n")
    }

    fn list_mut(&mut self, id: ListId) -> &mut InstrList {
        match id {
            ListId::Main => &mut self.main_list,
            ListId::Func(i) => &mut self.func_lists[i],
        }
    }

    fn emit(&mut self, instr: Instr) -> usize {
        let id = self.current;
        let list = self.list_mut(id);
        list.push(instr);
        list.len() - 1
    }

    /// Index the next emitted instruction will get.
    fn here(&self) -> usize {
        match self.current {
            ListId::Main => self.main_list.len(),
            ListId::Func(i) => self.func_lists[i].len(),
        }
    }

    fn patch_relative(&mut self, index: usize, offset: i64) {
        let id = self.current;
        match &mut self.list_mut(id)[index] {
            Instr::PushRelative(value) => *value = offset,
            _ => panic!("jump placeholder is not a relative push"),
        }
    }

    /// Claim `slots` slots in the innermost frame, patching its count
    /// placeholder, and return the base slot index.
    fn bump_frame_slots(&mut self, slots: usize) -> usize {
        let frame = *self.frame_stack.last().expect("no open frame");
        match &mut self.list_mut(frame.list)[frame.push_index] {
            Instr::PushInt(count) => {
                let base = *count as usize;
                *count += slots as i64;
                base
            }
            _ => panic!("frame slot placeholder is not a push"),
        }
    }

    /// Depth of a frame as the machine sees it, measured from the top of
    /// the live scope stack.
    fn depth(&self, frame: usize) -> usize {
        self.symtab.len() - frame - 1
    }

    fn push_scope(&mut self) {
        let push_index = self.emit(Instr::PushInt(0));
        self.emit(Instr::OpenFrame);
        self.frame_stack.push(FrameRef {
            list: self.current,
            push_index,
        });
        self.symtab.push_scope(false);
    }

    fn pop_scope(&mut self) {
        self.emit(Instr::CloseFrame);
        self.frame_stack.pop();
        self.symtab.pop_scope();
    }

    fn lookup(&self, name: &str) -> Result<VarEntry, CodeGenError> {
        Ok(*self.symtab.lookup(name)?)
    }

    fn gen_block(&mut self, block: &Block) -> Result<(), CodeGenError> {
        self.push_scope();
        for stmt in &block.statements {
            self.gen_stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        match stmt {
            Stmt::VarDecl {
                name, size, init, ..
            } => {
                let array_size = declared_slots(*size, init)?;
                let slots = array_size.unwrap_or(1);
                let index = self.bump_frame_slots(slots);
                let frame = self.symtab.len() - 1;
                if !self.symtab.insert(
                    name,
                    VarEntry {
                        index,
                        frame,
                        size: array_size,
                    },
                ) {
                    return Err(CodeGenError::Logic(format!(
                        "'{}' redeclared during emission",
                        name
                    )));
                }

                self.gen_expr(init)?;
                let depth = self.depth(frame);
                self.emit(Instr::PushInt(index as i64));
                self.emit(Instr::PushInt(depth as i64));
                self.emit(if array_size.is_some() {
                    Instr::StoreArray
                } else {
                    Instr::Store
                });
                Ok(())
            }

            Stmt::Assign { target, value } => self.gen_assign(target, value),

            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.gen_expr(cond)?;
                match else_block {
                    // Layout: condition, cjmp over the false part into the
                    // true part, jmp over the true part to the end.
                    Some(else_block) => {
                        let jmp_if_true = self.emit(Instr::PushRelative(0));
                        self.emit(Instr::CondJump);

                        self.gen_block(else_block)?;
                        let jmp_if_false = self.emit(Instr::PushRelative(0));
                        let jmp = self.emit(Instr::Jump);
                        self.patch_relative(jmp_if_true, (jmp + 1 - jmp_if_true) as i64);

                        self.gen_block(then_block)?;
                        let end = self.here();
                        self.patch_relative(jmp_if_false, (end - jmp_if_false) as i64);
                    }
                    None => {
                        // Invert so the jump is taken when the condition
                        // is false.
                        self.emit(Instr::Not);
                        let jmp_if_false = self.emit(Instr::PushRelative(0));
                        self.emit(Instr::CondJump);

                        self.gen_block(then_block)?;
                        let end = self.here();
                        self.patch_relative(jmp_if_false, (end - jmp_if_false) as i64);
                    }
                }
                Ok(())
            }

            Stmt::While { cond, body } => {
                let cond_pc = self.here();
                self.gen_expr(cond)?;
                self.emit(Instr::Not);
                let exit = self.emit(Instr::PushRelative(0));
                self.emit(Instr::CondJump);

                self.gen_block(body)?;

                let back = cond_pc as i64 - self.here() as i64;
                self.emit(Instr::PushRelative(back));
                self.emit(Instr::Jump);
                let end = self.here();
                self.patch_relative(exit, (end - exit) as i64);
                Ok(())
            }

            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.push_scope();
                if let Some(init) = init {
                    self.gen_stmt(init)?;
                }

                let cond_pc = self.here();
                self.gen_expr(cond)?;
                self.emit(Instr::Not);
                let exit = self.emit(Instr::PushRelative(0));
                self.emit(Instr::CondJump);

                self.gen_block(body)?;
                if let Some(step) = step {
                    self.gen_stmt(step)?;
                }

                let back = cond_pc as i64 - self.here() as i64;
                self.emit(Instr::PushRelative(back));
                self.emit(Instr::Jump);
                let end = self.here();
                self.patch_relative(exit, (end - exit) as i64);

                self.pop_scope();
                Ok(())
            }

            Stmt::Return(expr) => {
                let live_scopes = self.symtab.len()
                    - self
                        .symtab
                        .isolation_level()
                        .unwrap_or(self.symtab.len());
                match self.ret_size {
                    Some(k) => {
                        self.emit(Instr::PushInt(k as i64));
                        self.gen_expr(expr)?;
                        for _ in 0..live_scopes {
                            self.emit(Instr::CloseFrame);
                        }
                        self.emit(Instr::Drop);
                        self.emit(Instr::PushInt((k + 1) as i64));
                        self.emit(Instr::ReturnArray);
                    }
                    None => {
                        self.gen_expr(expr)?;
                        for _ in 0..live_scopes {
                            self.emit(Instr::CloseFrame);
                        }
                        self.emit(Instr::Return);
                    }
                }
                Ok(())
            }

            Stmt::FuncDecl(func) => self.gen_func_decl(func),

            Stmt::Print(expr) => {
                // A named array prints through the __Reverse preamble so
                // the output comes out in source order.
                if let Expr::Identifier(name) = expr {
                    let entry = self.lookup(name)?;
                    if let Some(n) = entry.size {
                        self.gen_array_identifier(entry);
                        self.emit(Instr::PushInt((n + 1) as i64));
                        self.emit(Instr::PushFunc("__Reverse".to_string()));
                        self.emit(Instr::Call);
                        self.emit(Instr::PrintArray);
                        return Ok(());
                    }
                }
                self.gen_expr(expr)?;
                self.emit(Instr::Print);
                Ok(())
            }

            Stmt::Delay(expr) => {
                self.gen_expr(expr)?;
                self.emit(Instr::Delay);
                Ok(())
            }

            Stmt::Write { x, y, colour } => {
                self.gen_expr(colour)?;
                self.gen_expr(y)?;
                self.gen_expr(x)?;
                self.emit(Instr::Write);
                Ok(())
            }

            Stmt::WriteBox { x, y, w, h, colour } => {
                self.gen_expr(colour)?;
                self.gen_expr(h)?;
                self.gen_expr(w)?;
                self.gen_expr(y)?;
                self.gen_expr(x)?;
                self.emit(Instr::WriteBox);
                Ok(())
            }

            Stmt::Clear(expr) => {
                self.gen_expr(expr)?;
                self.emit(Instr::Clear);
                Ok(())
            }
        }
    }

    fn gen_assign(&mut self, target: &Target, value: &Expr) -> Result<(), CodeGenError> {
        match target {
            Target::Variable(name) => {
                let entry = self.lookup(name)?;
                self.gen_expr(value)?;
                let depth = self.depth(entry.frame);
                self.emit(Instr::PushInt(entry.index as i64));
                self.emit(Instr::PushInt(depth as i64));
                if entry.size.is_some() {
                    // Whole-array copy: store the reversed value back,
                    // then leave the target in the usual form.
                    self.emit(Instr::StoreArray);
                    self.gen_array_identifier(entry);
                } else {
                    self.emit(Instr::Store);
                }
                Ok(())
            }
            Target::Index { name, index } => {
                let entry = self.lookup(name)?;
                let n = entry.size.ok_or_else(|| {
                    CodeGenError::Logic(format!("'{}' indexed but not an array", name))
                })?;
                self.gen_expr(value)?;
                // Elements are stored reversed: a[i] lives at
                // base + (n - 1 - i).
                self.gen_expr(index)?;
                self.emit(Instr::PushInt((n - 1) as i64));
                self.emit(Instr::Sub);
                self.emit(Instr::PushInt(entry.index as i64));
                self.emit(Instr::Add);
                let depth = self.depth(entry.frame);
                self.emit(Instr::PushInt(depth as i64));
                self.emit(Instr::Store);
                Ok(())
            }
        }
    }

    /// Emit a function into its own list. The machine opens the call
    /// frame itself, so parameters are seeded into the symbol table
    /// without an `oframe`; array parameters are normalized into the
    /// standard reversed-with-size layout.
    fn gen_func_decl(&mut self, func: &FuncDecl) -> Result<(), CodeGenError> {
        self.func_lists.push(Vec::new());
        let saved_list = self.current;
        self.current = ListId::Func(self.func_lists.len() - 1);
        let saved_ret = self.ret_size;
        self.ret_size = func.ret.size;

        self.emit(Instr::Label(func.name.clone()));
        self.symtab.push_scope(true);

        let frame = self.symtab.len() - 1;
        let mut index = 0usize;
        for param in &func.params {
            if !self.symtab.insert(
                &param.name,
                VarEntry {
                    index,
                    frame,
                    size: param.ty.size,
                },
            ) {
                return Err(CodeGenError::Logic(format!(
                    "parameter '{}' redeclared during emission",
                    param.name
                )));
            }
            match param.ty.size {
                Some(n) => {
                    let depth = self.depth(frame);
                    self.emit(Instr::PushInt(n as i64));
                    self.emit(Instr::PushArray { index, frame: depth });
                    self.emit(Instr::PushInt(n as i64));
                    self.emit(Instr::PushInt(index as i64));
                    self.emit(Instr::PushInt(depth as i64));
                    self.emit(Instr::StoreArray);
                    // Element slots plus the delivered size word.
                    index += n + 1;
                }
                None => index += 1,
            }
        }

        self.gen_block(&func.body)?;

        self.symtab.pop_scope();
        self.ret_size = saved_ret;
        self.current = saved_list;
        Ok(())
    }

    fn gen_expr(&mut self, expr: &Expr) -> Result<(), CodeGenError> {
        match expr {
            Expr::IntLiteral(value) => {
                self.emit(Instr::PushInt(*value));
            }
            Expr::FloatLiteral(value) => {
                self.emit(Instr::PushFloat(*value));
            }
            Expr::BooleanLiteral(value) => {
                self.emit(Instr::PushInt(*value as i64));
            }
            Expr::ColourLiteral(value) => {
                self.emit(Instr::PushInt(*value as i64));
            }

            Expr::Identifier(name) => {
                let entry = self.lookup(name)?;
                match entry.size {
                    Some(_) => self.gen_array_identifier(entry),
                    None => {
                        let depth = self.depth(entry.frame);
                        self.emit(Instr::PushVar {
                            index: entry.index,
                            frame: depth,
                        });
                    }
                }
            }

            Expr::ArrayLiteral { elements, repeat } => match repeat {
                Some(n) => {
                    self.gen_expr(&elements[0])?;
                    self.emit(Instr::PushInt((*n - 1) as i64));
                    self.emit(Instr::DupArray);
                    self.emit(Instr::PushInt(*n as i64));
                }
                None => {
                    for element in elements.iter().rev() {
                        self.gen_expr(element)?;
                    }
                    self.emit(Instr::PushInt(elements.len() as i64));
                }
            },

            Expr::ArrayIndex { name, index } => {
                let entry = self.lookup(name)?;
                self.gen_expr(index)?;
                let depth = self.depth(entry.frame);
                self.emit(Instr::PushIndexed {
                    index: entry.index,
                    frame: depth,
                });
            }

            Expr::Binary { op, left, right } => {
                // Right first so the left operand ends up on top.
                self.gen_expr(right)?;
                self.gen_expr(left)?;
                self.gen_binary_op(*op);
            }

            Expr::Negate(inner) => {
                self.gen_expr(inner)?;
                self.emit(Instr::PushInt(0));
                self.emit(Instr::Sub);
            }

            Expr::Not(inner) => {
                self.gen_expr(inner)?;
                self.emit(Instr::Not);
            }

            Expr::Cast { target, expr } => self.gen_cast(*target, expr)?,

            Expr::Call { name, args } => self.gen_call(name, args)?,

            Expr::Width => {
                self.emit(Instr::Width);
            }
            Expr::Height => {
                self.emit(Instr::Height);
            }
            Expr::Read { x, y } => {
                self.gen_expr(y)?;
                self.gen_expr(x)?;
                self.emit(Instr::Read);
            }
            Expr::RandomInt { max } => {
                self.gen_expr(max)?;
                self.emit(Instr::RandInt);
            }
        }
        Ok(())
    }

    fn gen_binary_op(&mut self, op: BinOp) {
        if op == BinOp::Ne {
            self.emit(Instr::Eq);
            self.emit(Instr::Not);
            return;
        }
        let instr = BINARY_OP_INSTRUCTIONS
            .iter()
            .find(|(candidate, _)| *candidate == op)
            .map(|(_, instr)| instr.clone())
            .expect("operator missing from instruction table");
        self.emit(instr);
    }

    /// Only the cast to `int` does work: the value is parked in a
    /// synthesized frame slot and truncated as `tmp - (tmp mod 1)`. The
    /// other casts reinterpret the machine word as-is.
    fn gen_cast(&mut self, target: Kind, expr: &Expr) -> Result<(), CodeGenError> {
        match target {
            Kind::Int => {
                let index = self.bump_frame_slots(1);
                let frame = self.symtab.len() - 1;
                self.gen_expr(expr)?;
                let depth = self.depth(frame);
                self.emit(Instr::PushInt(index as i64));
                self.emit(Instr::PushInt(depth as i64));
                self.emit(Instr::Store);

                self.emit(Instr::PushInt(1));
                self.emit(Instr::PushVar { index, frame: depth });
                self.emit(Instr::Mod);
                self.emit(Instr::PushVar { index, frame: depth });
                self.emit(Instr::Sub);
            }
            _ => self.gen_expr(expr)?,
        }
        Ok(())
    }

    /// Arguments go on the stack in reverse source order. A named array
    /// argument arrives in the three-piece form; its trailing size is
    /// dropped before the next argument piles on, and it contributes its
    /// element count plus the size word to the argument word count.
    fn gen_call(&mut self, name: &str, args: &[Expr]) -> Result<(), CodeGenError> {
        let mut words = 0usize;
        for arg in args.iter().rev() {
            self.gen_expr(arg)?;
            let array_size = match arg {
                Expr::Identifier(arg_name) => self.lookup(arg_name)?.size,
                _ => None,
            };
            match array_size {
                Some(n) => {
                    self.emit(Instr::Drop);
                    words += n + 1;
                }
                None => words += 1,
            }
        }
        self.emit(Instr::PushInt(words as i64));
        self.emit(Instr::PushFunc(name.to_string()));
        self.emit(Instr::Call);
        Ok(())
    }

    /// The three-piece on-stack form of a named array: size, elements
    /// reversed, size again.
    fn gen_array_identifier(&mut self, entry: VarEntry) {
        let n = entry.size.expect("scalar entry in array emission") as i64;
        let depth = self.depth(entry.frame);
        self.emit(Instr::PushInt(n));
        self.emit(Instr::PushArray {
            index: entry.index,
            frame: depth,
        });
        self.emit(Instr::PushInt(n));
    }
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot count a declaration claims, resolved from the declared size and
/// the literal initializer.
fn declared_slots(size: DeclSize, init: &Expr) -> Result<Option<usize>, CodeGenError> {
    match size {
        DeclSize::Scalar => Ok(None),
        DeclSize::Inferred | DeclSize::Fixed(_) => match init {
            Expr::ArrayLiteral { elements, repeat } => {
                Ok(Some(repeat.unwrap_or(elements.len())))
            }
            _ => Err(CodeGenError::Logic(
                "array declaration without an array literal initializer".to_string(),
            )),
        },
    }
}

/// The pre-inserted helper that flips an array's in-memory order by
/// taking it by value and returning it. The delivered size sits in slot
/// 0 with the elements above it, so one stub serves every element count.
fn reverse_stub() -> InstrList {
    vec![
        Instr::Label("__Reverse".to_string()),
        Instr::PushVar { index: 0, frame: 0 },
        Instr::PushVar { index: 0, frame: 0 },
        Instr::PushArray { index: 1, frame: 0 },
        Instr::PushVar { index: 0, frame: 0 },
        Instr::Drop,
        Instr::PushInt(1),
        Instr::PushVar { index: 0, frame: 0 },
        Instr::Add,
        Instr::ReturnArray,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::typechecker::TypeChecker;

    fn compile(source: &str) -> String {
        let program = Parser::new(source).parse().unwrap();
        TypeChecker::new().check_program(&program).unwrap();
        let mut codegen = CodeGen::new();
        codegen.gen_program(&program).unwrap();
        codegen.finalize()
    }

    fn main_section(asm: &str) -> Vec<&str> {
        asm.lines()
            .take_while(|line| *line != ".__Reverse")
            .collect()
    }

    #[test]
    fn test_frame_count_is_patched() {
        let asm = compile("let a : int = 1; let b : int = 2;");
        let lines = main_section(&asm);
        assert_eq!(lines[0], ".main");
        assert_eq!(lines[1], "push 2");
        assert_eq!(lines[2], "oframe");
    }

    #[test]
    fn test_scalar_store_addresses() {
        let asm = compile("let a : int = 1; let b : int = 2;");
        let text = main_section(&asm).join("\n");
        // a at [0:0], b at [1:0].
        assert!(text.contains("push 1\npush 0\npush 0\nst"));
        assert!(text.contains("push 2\npush 1\npush 0\nst"));
    }

    #[test]
    fn test_binary_operands_right_then_left() {
        let asm = compile("let a : int = 1 - 2;");
        let text = main_section(&asm).join("\n");
        assert!(text.contains("push 2\npush 1\nsub"));
    }

    #[test]
    fn test_not_equal_has_no_mnemonic() {
        let asm = compile("let a : bool = 1 != 2;");
        let text = main_section(&asm).join("\n");
        assert!(text.contains("eq\nnot"));
    }

    #[test]
    fn test_negate_subtracts_from_zero() {
        let asm = compile("let a : int = -7;");
        let text = main_section(&asm).join("\n");
        assert!(text.contains("push 7\npush 0\nsub"));
    }

    #[test]
    fn test_while_loop_shape() {
        let asm = compile("let n : int = 3; while (n > 0) { n = n - 1; }");
        let lines = main_section(&asm);
        let text = lines.join("\n");
        // Condition reads n at depth 0; gt, not, forward branch.
        assert!(text.contains("push 0\npush [0:0]\ngt\nnot"));
        assert!(text.contains("cjmp"));
        // Backward jump returns to the condition.
        let back = lines
            .iter()
            .position(|l| l.starts_with("push #PC-"))
            .expect("no backward jump");
        assert_eq!(lines[back + 1], "jmp");
        // The body stores n at depth 1, inside the body frame.
        assert!(text.contains("push 0\npush 1\nst"));
    }

    #[test]
    fn test_jump_targets_stay_in_range() {
        let asm = compile(
            "let n : int = 10;\n\
             for (let i : int = 0; i < n; i = i + 1) {\n\
                 if (i % 2 == 0) { __print i; } else { __print -i; }\n\
             }",
        );
        // Group lines into sections; a section's label is its index 0,
        // matching the instruction lists.
        let mut sections: Vec<Vec<&str>> = Vec::new();
        for line in asm.lines() {
            if line.starts_with('.') {
                sections.push(Vec::new());
            }
            sections.last_mut().unwrap().push(line);
        }
        for lines in &sections {
            for (i, line) in lines.iter().enumerate() {
                if let Some(offset) = line.strip_prefix("push #PC") {
                    let offset: i64 = offset.parse().unwrap();
                    let next = lines.get(i + 1).copied().unwrap_or("");
                    if next == "jmp" || next == "cjmp" {
                        let target = i as i64 + offset;
                        assert!(
                            target >= 0 && target <= lines.len() as i64,
                            "target {} out of range in section of {} lines",
                            target,
                            lines.len()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_if_else_lays_out_false_then_true() {
        let asm = compile("let x : int = 1; if (x > 0) { __print 1; } else { __print 2; }");
        let lines = main_section(&asm);
        let print_two = lines
            .iter()
            .position(|l| *l == "push 2")
            .expect("no false branch");
        let print_one = lines
            .iter()
            .rposition(|l| *l == "push 1")
            .expect("no true branch");
        assert!(print_two < print_one, "false branch must come first");
        // One-armed ifs invert the condition; two-armed ones do not.
        assert!(!lines.join("\n").contains("gt\nnot"));
    }

    #[test]
    fn test_frames_balance_on_straight_line_code() {
        let asm = compile("let a : int = 1; if (true) { let b : int = 2; } __print a;");
        let lines = main_section(&asm);
        let opens = lines.iter().filter(|l| **l == "oframe").count();
        let closes = lines.iter().filter(|l| **l == "cframe").count();
        assert_eq!(opens, closes);
    }

    #[test]
    fn test_array_literal_reversed_with_size() {
        let asm = compile("let a : int[] = [10, 20, 30];");
        let text = main_section(&asm).join("\n");
        assert!(text.contains("push 30\npush 20\npush 10\npush 3"));
        assert!(text.contains("push 3\npush 0\npush 0\nsta"));
        // The frame holds three slots.
        assert!(text.starts_with(".main\npush 3\noframe"));
    }

    #[test]
    fn test_array_repeat_uses_dupa() {
        let asm = compile("let a : int[5] = [0];");
        let text = main_section(&asm).join("\n");
        assert!(text.contains("push 0\npush 4\ndupa\npush 5"));
    }

    #[test]
    fn test_array_print_goes_through_reverse() {
        let asm = compile("let a : int[] = [10, 20, 30]; __print a;");
        let text = main_section(&asm).join("\n");
        assert!(text.contains("push 3\npusha [0:0]\npush 3\npush 4\npush .__Reverse\ncall\nprinta"));
        assert!(asm.contains(".__Reverse"));
    }

    #[test]
    fn test_array_index_write_flips_the_offset() {
        let asm = compile("let a : int[] = [1, 2, 3]; a[0] = 9;");
        let text = main_section(&asm).join("\n");
        // i, n-1, sub, base, add, depth, st
        assert!(text.contains("push 9\npush 0\npush 2\nsub\npush 0\nadd\npush 0\nst"));
    }

    #[test]
    fn test_array_index_read() {
        let asm = compile("let a : int[] = [1, 2, 3]; let x : int = a[1];");
        let text = main_section(&asm).join("\n");
        assert!(text.contains("push 1\npush +[0:0]"));
    }

    #[test]
    fn test_cast_to_int_truncates_via_temp_slot() {
        let asm = compile("let a : int = 1.5 as int;");
        let lines = main_section(&asm);
        // The frame carries the declared slot plus the synthesized one,
        // which lands at index 1.
        assert_eq!(lines[1], "push 2");
        let text = lines.join("\n");
        assert!(text.contains("push 1.5\npush 1\npush 0\nst"));
        assert!(text.contains("push 1\npush [1:0]\nmod\npush [1:0]\nsub"));
    }

    #[test]
    fn test_cast_to_float_is_identity() {
        let asm = compile("let a : float = 1 as float;");
        let text = main_section(&asm).join("\n");
        assert!(text.contains("push 1\npush 0\npush 0\nst"));
        assert!(!text.contains("mod"));
    }

    #[test]
    fn test_function_gets_its_own_section() {
        let asm = compile("fun id(x: int) -> int { return x; }");
        assert!(asm.contains("\n.id\n"));
        // Function sections come after main and after the stub.
        let main_pos = asm.find(".main").unwrap();
        let stub_pos = asm.find(".__Reverse").unwrap();
        let id_pos = asm.find(".id").unwrap();
        assert!(main_pos < stub_pos && stub_pos < id_pos);
    }

    #[test]
    fn test_functions_emitted_in_source_order() {
        let asm = compile("fun a() -> int { return b(); } fun b() -> int { return 42; }");
        let a_pos = asm.find("\n.a\n").unwrap();
        let b_pos = asm.find("\n.b\n").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn test_return_closes_live_frames() {
        let asm = compile("fun f(x: int) -> int { if (x > 0) { return 1; } return 0; }");
        let section: Vec<&str> = asm
            .lines()
            .skip_while(|l| *l != ".f")
            .collect();
        let text = section.join("\n");
        // The return inside the if closes two frames, the outer return one.
        assert!(text.contains("push 1\ncframe\ncframe\nret"));
        assert!(text.contains("push 0\ncframe\nret"));
    }

    #[test]
    fn test_call_pushes_args_reversed_with_word_count() {
        let asm = compile(
            "fun add(x: int, y: int) -> int { return x + y; } let r : int = add(10, 20);",
        );
        let text = main_section(&asm).join("\n");
        assert!(text.contains("push 20\npush 10\npush 2\npush .add\ncall"));
    }

    #[test]
    fn test_array_argument_word_count_includes_size() {
        let asm = compile(
            "fun first(xs: int[3]) -> int { return xs[0]; }\n\
             let a : int[3] = [1, 2, 3];\n\
             let f : int = first(a);",
        );
        let text = main_section(&asm).join("\n");
        // Three-piece form, trailing size dropped, 4 argument words.
        assert!(text.contains("push 3\npusha [0:0]\npush 3\ndrop\npush 4\npush .first\ncall"));
    }

    #[test]
    fn test_array_parameter_is_normalized_in_prologue() {
        let asm = compile("fun first(xs: int[3]) -> int { return xs[0]; }");
        let section: Vec<&str> = asm.lines().skip_while(|l| *l != ".first").collect();
        let text = section.join("\n");
        assert!(text.starts_with(
            ".first\npush 3\npusha [0:0]\npush 3\npush 0\npush 0\nsta"
        ));
    }

    #[test]
    fn test_array_return_protocol() {
        let asm = compile("fun copy(xs: int[2]) -> int[2] { return xs; }");
        let section: Vec<&str> = asm.lines().skip_while(|l| *l != ".copy").collect();
        let text = section.join("\n");
        // push K, value, close frames, drop trailing size, push K+1, reta.
        assert!(text.contains("push 2\npush 2\npusha [0:1]\npush 2\ncframe\ndrop\npush 3\nreta"));
    }

    #[test]
    fn test_whole_array_assignment_copies_and_reemits() {
        let asm = compile("let a : int[] = [1, 2]; let b : int[] = [3, 4]; a = b;");
        let text = main_section(&asm).join("\n");
        // b's three-piece form, sta into a's slots, then a re-emitted.
        assert!(text.contains("push 2\npusha [2:0]\npush 2\npush 0\npush 0\nsta\npush 2\npusha [0:0]\npush 2"));
    }

    #[test]
    fn test_builtin_operand_orders() {
        let asm = compile("__write 1, 2, #000000; __write_box 3, 4, 5, 6, #ffffff;");
        let text = main_section(&asm).join("\n");
        assert!(text.contains("push 0\npush 2\npush 1\nwrite"));
        assert!(text.contains("push 16777215\npush 6\npush 5\npush 4\npush 3\nwritebox"));
    }

    #[test]
    fn test_builtin_expression_operand_orders() {
        let asm = compile("let p : int = __read 1, 2; let r : int = __random_int 6; __clear #101010;");
        let text = main_section(&asm).join("\n");
        assert!(text.contains("push 2\npush 1\nread"));
        assert!(text.contains("push 6\nirnd"));
        assert!(text.contains("push 1052688\nclear"));
    }

    #[test]
    fn test_reverse_stub_is_always_present() {
        let asm = compile("__print 1;");
        assert!(asm.contains("\n.__Reverse\n"));
        let stub: Vec<&str> = asm.lines().skip_while(|l| *l != ".__Reverse").collect();
        assert_eq!(stub.last().copied(), Some("reta"));
    }

    #[test]
    fn test_no_trailing_newline() {
        let asm = compile("__print 1;");
        assert!(!asm.ends_with('\n'));
    }
}
