//! Semantic analyzer for PArL
//!
//! A single tree-walking pass. Expression visits push exactly one type
//! tag onto a working stack; every consumer pops what it used, so a
//! well-formed walk leaves the stack empty. Scoping goes through the
//! symbol table: function bodies get an isolated scope so caller locals
//! stay invisible while function entries remain reachable for recursion
//! and mutual calls.
//!
//! Analysis is fatal-on-first-error. Rule failures record the source line
//! of the rule site in this file, which is what the error rendering
//! reports.

use crate::ast::{BinOp, Block, DeclSize, Expr, FuncDecl, Program, Stmt, Target};
use crate::symtab::{NotFound, ScopeEntry, SymbolTable};
use crate::types::{Kind, TypeTag};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SemanticError {
    /// A typing or scoping rule failed; `line` is the rule site.
    Rule { line: u32, message: String },
    /// A name lookup failed.
    NotFound(NotFound),
}

impl SemanticError {
    fn rule(line: u32, message: String) -> Self {
        SemanticError::Rule { line, message }
    }
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticError::Rule { line, message } => {
                write!(f, "Semantic error (line: {}): {}", line, message)
            }
            SemanticError::NotFound(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SemanticError {}

impl From<NotFound> for SemanticError {
    fn from(e: NotFound) -> Self {
        SemanticError::NotFound(e)
    }
}

/// Fail the current rule unless `cond` holds.
macro_rules! check {
    ($cond:expr, $($msg:tt)*) => {
        if !($cond) {
            return Err(SemanticError::rule(line!(), format!($($msg)*)));
        }
    };
}

/// What a name means in the current scope stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Variable(TypeTag),
    Function { ret: TypeTag, params: Vec<(String, TypeTag)> },
}

impl ScopeEntry for Entry {
    fn is_function(&self) -> bool {
        matches!(self, Entry::Function { .. })
    }
}

pub struct TypeChecker {
    symtab: SymbolTable<Entry>,
    /// Bottom-up expression types; each expression visit pushes one tag.
    type_stack: Vec<TypeTag>,
    /// Declared return tag of the function body being visited.
    expected_ret: Option<TypeTag>,
}

impl TypeChecker {
    pub fn new() -> Self {
        TypeChecker {
            symtab: SymbolTable::new(),
            type_stack: Vec::new(),
            expected_ret: None,
        }
    }

    pub fn check_program(&mut self, program: &Program) -> Result<(), SemanticError> {
        self.check_block(&program.block, false)
    }

    /// Visit a block: open a scope, pre-declare the block's function
    /// signatures (so forward and mutual references resolve), then visit
    /// every statement in order.
    fn check_block(&mut self, block: &Block, isolate: bool) -> Result<(), SemanticError> {
        self.symtab.push_scope(isolate);

        for stmt in &block.statements {
            if let Stmt::FuncDecl(func) = stmt {
                let entry = Entry::Function {
                    ret: func.ret,
                    params: func
                        .params
                        .iter()
                        .map(|p| (p.name.clone(), p.ty))
                        .collect(),
                };
                check!(
                    self.symtab.insert(&func.name, entry),
                    "'{}' is already declared in this scope",
                    func.name
                );
            }
        }

        for stmt in &block.statements {
            self.check_stmt(stmt)?;
        }

        self.symtab.pop_scope();
        Ok(())
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<(), SemanticError> {
        match stmt {
            Stmt::VarDecl { name, kind, size, init } => self.check_var_decl(name, *kind, *size, init),

            Stmt::Assign { target, value } => {
                let target_tag = match target {
                    Target::Variable(name) => {
                        let entry = self.symtab.lookup(name)?.clone();
                        match entry {
                            Entry::Variable(tag) => tag,
                            Entry::Function { .. } => {
                                return Err(SemanticError::rule(
                                    line!(),
                                    format!("Cannot assign to function '{}'", name),
                                ));
                            }
                        }
                    }
                    Target::Index { name, index } => {
                        let entry = self.symtab.lookup(name)?.clone();
                        let tag = match entry {
                            Entry::Variable(tag) => tag,
                            Entry::Function { .. } => {
                                return Err(SemanticError::rule(
                                    line!(),
                                    format!("Cannot index function '{}'", name),
                                ));
                            }
                        };
                        check!(tag.is_array(), "'{}' is not an array", name);
                        self.check_expr(index)?;
                        self.pop_type();
                        TypeTag::scalar(tag.kind)
                    }
                };

                self.check_expr(value)?;
                let value_tag = self.pop_type();
                check!(
                    value_tag == target_tag,
                    "Assigned types are different. Use 'as' to cast types"
                );
                Ok(())
            }

            Stmt::If { cond, then_block, else_block } => {
                self.check_expr(cond)?;
                let tag = self.pop_type();
                check!(
                    tag == TypeTag::scalar(Kind::Bool),
                    "If condition must be a bool"
                );
                self.check_block(then_block, false)?;
                if let Some(else_block) = else_block {
                    self.check_block(else_block, false)?;
                }
                Ok(())
            }

            Stmt::While { cond, body } => {
                self.check_expr(cond)?;
                let tag = self.pop_type();
                check!(
                    tag == TypeTag::scalar(Kind::Bool),
                    "While condition must be a bool"
                );
                self.check_block(body, false)
            }

            Stmt::For { init, cond, step, body } => {
                self.symtab.push_scope(false);
                if let Some(init) = init {
                    self.check_stmt(init)?;
                }
                self.check_expr(cond)?;
                let tag = self.pop_type();
                check!(
                    tag == TypeTag::scalar(Kind::Bool),
                    "For condition must be a bool"
                );
                if let Some(step) = step {
                    self.check_stmt(step)?;
                }
                self.check_block(body, false)?;
                self.symtab.pop_scope();
                Ok(())
            }

            Stmt::Return(expr) => {
                let expected = match self.expected_ret {
                    Some(tag) => tag,
                    None => {
                        return Err(SemanticError::rule(
                            line!(),
                            "Return outside of a function".to_string(),
                        ));
                    }
                };
                self.check_expr(expr)?;
                let tag = self.pop_type();
                check!(
                    tag == expected,
                    "Returned type does not match the function's return type"
                );
                Ok(())
            }

            Stmt::FuncDecl(func) => self.check_func_decl(func),

            Stmt::Print(expr) => {
                // Any kind, scalar or array.
                self.check_expr(expr)?;
                self.pop_type();
                Ok(())
            }

            Stmt::Delay(expr) => {
                self.check_expr(expr)?;
                let tag = self.pop_type();
                check!(tag == TypeTag::scalar(Kind::Int), "__delay expects an int");
                Ok(())
            }

            Stmt::Write { x, y, colour } => {
                self.check_expr(x)?;
                let tag = self.pop_type();
                check!(tag == TypeTag::scalar(Kind::Int), "__write expects int coordinates");
                self.check_expr(y)?;
                let tag = self.pop_type();
                check!(tag == TypeTag::scalar(Kind::Int), "__write expects int coordinates");
                self.check_expr(colour)?;
                let tag = self.pop_type();
                check!(tag == TypeTag::scalar(Kind::Colour), "__write expects a colour");
                Ok(())
            }

            Stmt::WriteBox { x, y, w, h, colour } => {
                for expr in [x, y, w, h] {
                    self.check_expr(expr)?;
                    let tag = self.pop_type();
                    check!(
                        tag == TypeTag::scalar(Kind::Int),
                        "__write_box expects int coordinates and extents"
                    );
                }
                self.check_expr(colour)?;
                let tag = self.pop_type();
                check!(
                    tag == TypeTag::scalar(Kind::Colour),
                    "__write_box expects a colour"
                );
                Ok(())
            }

            Stmt::Clear(expr) => {
                self.check_expr(expr)?;
                let tag = self.pop_type();
                check!(tag == TypeTag::scalar(Kind::Colour), "__clear expects a colour");
                Ok(())
            }
        }
    }

    /// Declarations insert the name before the initializer is typed, so
    /// an initializer may refer to an outer binding of the same name only
    /// through its new declared type.
    fn check_var_decl(
        &mut self,
        name: &str,
        kind: Kind,
        declared: DeclSize,
        init: &Expr,
    ) -> Result<(), SemanticError> {
        match init {
            Expr::ArrayLiteral { .. } => {
                self.check_expr(init)?;
                let init_tag = self.pop_type();
                check!(
                    init_tag.kind == kind,
                    "Assigned types are different. Use 'as' to cast types"
                );
                let size = init_tag.size.expect("array literal without a size");
                if let DeclSize::Fixed(declared_size) = declared {
                    check!(
                        size == declared_size,
                        "Array literal size does not match the declared size"
                    );
                }
                check!(size > 0, "Array of size 0 is not allowed");
                check!(
                    self.symtab.insert(name, Entry::Variable(TypeTag::array(kind, size))),
                    "'{}' is already declared in this scope",
                    name
                );
                Ok(())
            }
            _ => {
                let tag = TypeTag::scalar(kind);
                check!(
                    self.symtab.insert(name, Entry::Variable(tag)),
                    "'{}' is already declared in this scope",
                    name
                );
                self.check_expr(init)?;
                let init_tag = self.pop_type();
                check!(
                    init_tag == tag,
                    "Assigned types are different. Use 'as' to cast types"
                );
                Ok(())
            }
        }
    }

    fn check_func_decl(&mut self, func: &FuncDecl) -> Result<(), SemanticError> {
        check!(
            self.symtab.in_root_scope(),
            "Functions can only be declared in the outermost scope"
        );
        check!(func.name != "main", "Cannot call function 'main'");

        // The enclosing block's pre-pass inserted the signature.
        let entry = self.symtab.lookup(&func.name)?;
        debug_assert!(entry.is_function());

        self.symtab.push_scope(true);
        self.expected_ret = Some(func.ret);

        for param in &func.params {
            if let Some(size) = param.ty.size {
                check!(size > 0, "Array of size 0 is not allowed");
            }
            check!(
                self.symtab.insert(&param.name, Entry::Variable(param.ty)),
                "'{}' is already declared in this scope",
                param.name
            );
        }

        self.check_block(&func.body, false)?;

        check!(
            block_definitely_returns(&func.body),
            "Not all code paths of '{}' return a value",
            func.name
        );

        self.expected_ret = None;
        self.symtab.pop_scope();
        Ok(())
    }

    /// Visit an expression; exactly one tag is pushed.
    fn check_expr(&mut self, expr: &Expr) -> Result<(), SemanticError> {
        match expr {
            Expr::IntLiteral(_) => {
                self.push_type(TypeTag::scalar(Kind::Int));
                Ok(())
            }
            Expr::FloatLiteral(_) => {
                self.push_type(TypeTag::scalar(Kind::Float));
                Ok(())
            }
            Expr::BooleanLiteral(_) => {
                self.push_type(TypeTag::scalar(Kind::Bool));
                Ok(())
            }
            Expr::ColourLiteral(_) => {
                self.push_type(TypeTag::scalar(Kind::Colour));
                Ok(())
            }

            Expr::Identifier(name) => {
                let entry = self.symtab.lookup(name)?.clone();
                match entry {
                    Entry::Variable(tag) => {
                        self.push_type(tag);
                        Ok(())
                    }
                    Entry::Function { .. } => Err(SemanticError::rule(
                        line!(),
                        format!("'{}' is not a variable", name),
                    )),
                }
            }

            Expr::ArrayLiteral { elements, repeat } => {
                check!(*repeat != Some(0), "Array of size 0 is not allowed");
                let mut element_kind = None;
                for element in elements {
                    self.check_expr(element)?;
                    let tag = self.pop_type();
                    check!(!tag.is_array(), "Array literal elements must be scalars");
                    match element_kind {
                        None => element_kind = Some(tag.kind),
                        Some(kind) => check!(
                            kind == tag.kind,
                            "Array literal elements must all have the same type"
                        ),
                    }
                }
                let kind = element_kind.expect("empty array literal");
                let size = repeat.unwrap_or(elements.len());
                self.push_type(TypeTag::array(kind, size));
                Ok(())
            }

            Expr::ArrayIndex { name, index } => {
                let entry = self.symtab.lookup(name)?.clone();
                let tag = match entry {
                    Entry::Variable(tag) => tag,
                    Entry::Function { .. } => {
                        return Err(SemanticError::rule(
                            line!(),
                            format!("'{}' is not a variable", name),
                        ));
                    }
                };
                check!(tag.is_array(), "'{}' is not an array", name);
                // The index is typed but its kind is left to runtime
                // arithmetic.
                self.check_expr(index)?;
                self.pop_type();
                self.push_type(TypeTag::scalar(tag.kind));
                Ok(())
            }

            Expr::Binary { op, left, right } => {
                self.check_expr(left)?;
                self.check_expr(right)?;
                let (l, r) = self.pop_types();

                match op {
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Mod => {
                        check!(l == r, "Operands of '{:?}' must have the same type", op);
                        check!(l.kind != Kind::Bool, "Arithmetic on bools is not allowed");
                        check!(!l.is_array(), "Arithmetic on arrays is not allowed");
                        self.push_type(l);
                    }
                    BinOp::Div => {
                        check!(l == r, "Operands of '/' must have the same type");
                        check!(l.kind != Kind::Bool, "Arithmetic on bools is not allowed");
                        check!(!l.is_array(), "Arithmetic on arrays is not allowed");
                        self.push_type(TypeTag::scalar(Kind::Float));
                    }
                    BinOp::And | BinOp::Or => {
                        check!(
                            l == TypeTag::scalar(Kind::Bool) && r == TypeTag::scalar(Kind::Bool),
                            "Operands of a logical operator must be bools"
                        );
                        self.push_type(TypeTag::scalar(Kind::Bool));
                    }
                    BinOp::Eq | BinOp::Ne => {
                        check!(l == r, "Compared types are different. Use 'as' to cast types");
                        check!(!l.is_array(), "Arrays cannot be compared");
                        self.push_type(TypeTag::scalar(Kind::Bool));
                    }
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        check!(l == r, "Compared types are different. Use 'as' to cast types");
                        check!(l.kind != Kind::Bool, "Bools cannot be ordered");
                        check!(!l.is_array(), "Arrays cannot be compared");
                        self.push_type(TypeTag::scalar(Kind::Bool));
                    }
                }
                Ok(())
            }

            Expr::Negate(inner) => {
                self.check_expr(inner)?;
                let tag = self.pop_type();
                check!(
                    tag == TypeTag::scalar(Kind::Int) || tag == TypeTag::scalar(Kind::Float),
                    "Unary '-' expects an int or a float"
                );
                self.push_type(tag);
                Ok(())
            }

            Expr::Not(inner) => {
                self.check_expr(inner)?;
                let tag = self.pop_type();
                check!(tag == TypeTag::scalar(Kind::Bool), "'not' expects a bool");
                self.push_type(tag);
                Ok(())
            }

            Expr::Cast { target, expr } => {
                self.check_expr(expr)?;
                let tag = self.pop_type();
                check!(!tag.is_array(), "Only scalar values can be cast");
                self.push_type(TypeTag::scalar(*target));
                Ok(())
            }

            Expr::Width | Expr::Height => {
                self.push_type(TypeTag::scalar(Kind::Int));
                Ok(())
            }

            Expr::Read { x, y } => {
                self.check_expr(x)?;
                let tag = self.pop_type();
                check!(tag == TypeTag::scalar(Kind::Int), "__read expects int coordinates");
                self.check_expr(y)?;
                let tag = self.pop_type();
                check!(tag == TypeTag::scalar(Kind::Int), "__read expects int coordinates");
                self.push_type(TypeTag::scalar(Kind::Int));
                Ok(())
            }

            Expr::RandomInt { max } => {
                self.check_expr(max)?;
                let tag = self.pop_type();
                check!(tag == TypeTag::scalar(Kind::Int), "__random_int expects an int");
                self.push_type(TypeTag::scalar(Kind::Int));
                Ok(())
            }

            Expr::Call { name, args } => {
                let (ret, params) = match self.symtab.lookup(name)?.clone() {
                    Entry::Function { ret, params } => (ret, params),
                    Entry::Variable(_) => {
                        return Err(SemanticError::rule(
                            line!(),
                            format!("'{}' is not a function", name),
                        ));
                    }
                };
                check!(
                    args.len() == params.len(),
                    "'{}' expects {} arguments but {} were given",
                    name,
                    params.len(),
                    args.len()
                );
                for (arg, (param_name, param_tag)) in args.iter().zip(&params) {
                    self.check_expr(arg)?;
                    let tag = self.pop_type();
                    check!(
                        tag == *param_tag,
                        "Argument '{}' of '{}' expects {}",
                        param_name,
                        name,
                        param_tag
                    );
                }
                self.push_type(ret);
                Ok(())
            }
        }
    }

    fn push_type(&mut self, tag: TypeTag) {
        self.type_stack.push(tag);
    }

    fn pop_type(&mut self) -> TypeTag {
        self.type_stack.pop().expect("expression type stack underflow")
    }

    /// Pop two tags preserving source order: (left, right).
    fn pop_types(&mut self) -> (TypeTag, TypeTag) {
        let right = self.pop_type();
        let left = self.pop_type();
        (left, right)
    }
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// A block definitely returns when a `return` sits at its top level or an
/// if/else has *both* branches definitely returning. Loop bodies never
/// count; they may not execute.
pub fn block_definitely_returns(block: &Block) -> bool {
    block.statements.iter().any(|stmt| match stmt {
        Stmt::Return(_) => true,
        Stmt::If {
            then_block,
            else_block: Some(else_block),
            ..
        } => block_definitely_returns(then_block) && block_definitely_returns(else_block),
        _ => false,
    })
}
