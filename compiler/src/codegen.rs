//! Semantic analyzer and bytecode generator.
//!
//! Walks the syntax tree once, resolving identifiers against the
//! environment tree, checking types, and emitting bytecode directly
//! (there is no separate IR stage). Grounded on `emit_statement`/
//! `emit_expression` and their helpers in the original `semantics.c`.

use std::rc::Rc;

use yala_runtime::{Bytecode, FunctionSignature, Modifier, Opcode, SemanticType, Value, ValueKind, YalaString};

use crate::ast::*;
use crate::environment::{Environments, Perms};
use crate::error::CompileError;
use crate::lexer::Token;

const MAX_CONDITIONAL_ARMS: usize = yala_runtime::bytecode::MAX_CONDITIONAL_LEN;

/// The out/inout writeback and return-convention shape of the function
/// or procedure currently being compiled, so that `exit` (an early
/// return appearing anywhere in the body) emits the same epilogue as
/// the implicit one at the end of the body.
#[derive(Clone)]
struct Epilogue {
    /// Formal slots needing `ARGSTACK_LOAD`, already in the reverse
    /// declaration order the callee must load them in.
    out_slots: Vec<usize>,
    return_is_vector: bool,
    is_procedure: bool,
    arity: u8,
    return_type: SemanticType,
}

pub struct Codegen {
    envs: Environments,
    errors: Vec<CompileError>,
    /// Suppresses cascading errors within one statement; cleared at
    /// each statement boundary so one bad statement doesn't mask the next.
    panic: bool,
    /// Stack of enclosing function/procedure epilogues, innermost last;
    /// empty at the top level (`exit` there is rejected).
    epilogues: Vec<Epilogue>,
}

impl Default for Codegen {
    fn default() -> Self {
        Self::new()
    }
}

impl Codegen {
    pub fn new() -> Self {
        Codegen { envs: Environments::new(), errors: Vec::new(), panic: false, epilogues: Vec::new() }
    }

    pub fn compile(mut self, program: &Program) -> Result<Bytecode, Vec<CompileError>> {
        self.compile_scope(0, &program.declarations, &program.body);
        let line = program.name.line;
        let col = program.name.col;
        self.emit(0, Opcode::Halt, line, col);
        if self.errors.is_empty() {
            Ok(std::mem::take(&mut self.envs.get_mut(0).code))
        } else {
            Err(self.errors)
        }
    }

    fn semantic_error(&mut self, message: impl Into<String>, token: &Token) {
        if !self.panic {
            self.errors.push(CompileError::semantic(message, token.line, token.col));
            self.panic = true;
        }
    }

    // --- low-level emission helpers ---

    fn emit(&mut self, env: usize, op: Opcode, line: u32, col: u32) -> usize {
        self.envs.get_mut(env).code.write_op(op, line, col)
    }

    fn emit_long(&mut self, env: usize, value: u16, line: u32, col: u32) -> usize {
        self.envs.get_mut(env).code.write_long(value, line, col)
    }

    fn emit_byte(&mut self, env: usize, value: u8, line: u32, col: u32) -> usize {
        self.envs.get_mut(env).code.write_byte(value, line, col)
    }

    fn patch_long(&mut self, env: usize, at: usize, value: u16) {
        self.envs.get_mut(env).code.patch_long(at, value);
    }

    fn add_constant(&mut self, env: usize, value: Value) -> u16 {
        self.envs.get_mut(env).code.add_constant(value)
    }

    fn here(&self, env: usize) -> usize {
        self.envs.get(env).code.len()
    }

    /// Encodes `pos` as the lexical hop-offset and slot the VM expects:
    /// 0 hops addresses the current frame directly, otherwise the frame
    /// `hops` enclosing-scope steps up from it. The frame stack indexes
    /// by call depth, not by environment-tree position, so the operand
    /// can never be `pos.env_index` itself (see `locals_base` in `vm.rs`).
    fn emit_op_local_long(&mut self, env: usize, op: Opcode, pos: crate::environment::LocalPosition, line: u32, col: u32) {
        self.emit(env, op, line, col);
        self.emit_long(env, pos.hops as u16, line, col);
        self.emit_long(env, pos.slot as u16, line, col);
    }

    /// Emits an unconditional/conditional forward jump with a
    /// placeholder offset, returning the offset to patch later.
    fn emit_unpatched_skip(&mut self, env: usize, op: Opcode, line: u32, col: u32) -> usize {
        self.emit(env, op, line, col);
        self.emit_long(env, 0, line, col)
    }

    fn patch_skip(&mut self, env: usize, at: usize) {
        let target = self.here(env);
        let offset = (target - (at + 2)) as u16;
        self.patch_long(env, at, offset);
    }

    fn emit_skip_back(&mut self, env: usize, to: usize, line: u32, col: u32) {
        self.emit(env, Opcode::SkipBackLong, line, col);
        let at = self.here(env);
        let offset = (at + 2 - to) as u16;
        self.emit_long(env, offset, line, col);
    }

    // --- types ---

    fn type_node_to_type(&mut self, env: usize, ty: &TypeNode) -> SemanticType {
        match ty {
            TypeNode::Integer => SemanticType::scalar(ValueKind::Integer),
            TypeNode::Boolean => SemanticType::scalar(ValueKind::Boolean),
            TypeNode::String => SemanticType::scalar(ValueKind::String),
            TypeNode::Vector { base, dimensions } => {
                let base_ty = self.type_node_to_type(env, base);
                let mut dims = Vec::with_capacity(dimensions.len());
                for dim_expr in dimensions {
                    let token = dim_expr.token().clone();
                    let (_, value) = self.emit_const_fold_integer(env, dim_expr);
                    match value {
                        Some(v) if v > 0 => dims.push(v),
                        Some(_) => {
                            self.semantic_error("vector dimensions must be positive", &token);
                            dims.push(1);
                        }
                        None => {
                            self.semantic_error("vector dimensions must be constant integers", &token);
                            dims.push(1);
                        }
                    }
                }
                let mut size: i64 = 1;
                for &d in &dims {
                    if yala_runtime::value::is_mult_overflow(size, d) {
                        self.semantic_error("vector size overflows", dimensions[0].token());
                        break;
                    }
                    size *= d;
                }
                SemanticType::vector(base_ty.id, dims)
            }
        }
    }

    /// Folds a constant integer expression at compile time (used only
    /// for vector dimensions, which must be statically known).
    fn emit_const_fold_integer(&mut self, _env: usize, expr: &Expr) -> (SemanticType, Option<i64>) {
        match expr {
            Expr::IntegerConst(tok) => {
                let v: i64 = tok.lexeme.parse().unwrap_or(0);
                (SemanticType::scalar(ValueKind::Integer), Some(v))
            }
            Expr::Unary { op: UnaryOp::Neg, operand, .. } => {
                let (ty, v) = self.emit_const_fold_integer(_env, operand);
                (ty, v.map(|v| -v))
            }
            _ => (SemanticType::scalar(ValueKind::Integer), None),
        }
    }

    // --- scopes ---

    fn compile_scope(&mut self, env: usize, decls: &[Declaration], body: &[Stat]) {
        self.envs.get_mut(env).push_scope();
        let mut modules = Vec::new();
        for decl in decls {
            match decl {
                Declaration::Var(v) => self.emit_var_decl(env, v),
                Declaration::Module(m) => {
                    let forward = self.forward_declare_function(env, m);
                    modules.push((m, forward));
                }
            }
        }
        for (module, forward) in modules {
            self.compile_module(env, module, forward);
        }
        for stat in body {
            self.panic = false;
            self.emit_statement(env, stat);
        }
        let removed = self.envs.get_mut(env).pop_scope();
        let (line, col) = (0, 0);
        for ty in removed {
            self.emit_pop(env, &ty, line, col);
        }
    }

    /// Like `compile_scope`, but for a function/procedure body: a
    /// function with no explicit `exit` on every path returns the value
    /// of its last statement, the way a tail expression does (e.g.
    /// `if n <= 1 then 1 else n * f(n-1) end` as an entire function
    /// body). Returns whether the tail already emitted a guaranteed
    /// `RETURN`, so the caller can skip its own fallback epilogue.
    fn compile_module_body(&mut self, env: usize, decls: &[Declaration], body: &[Stat], epilogue: &Epilogue) -> bool {
        self.envs.get_mut(env).push_scope();
        let mut modules = Vec::new();
        for decl in decls {
            match decl {
                Declaration::Var(v) => self.emit_var_decl(env, v),
                Declaration::Module(m) => {
                    let forward = self.forward_declare_function(env, m);
                    modules.push((m, forward));
                }
            }
        }
        for (module, forward) in modules {
            self.compile_module(env, module, forward);
        }
        let mut returned = false;
        if epilogue.is_procedure {
            for stat in body {
                self.panic = false;
                self.emit_statement(env, stat);
            }
        } else if let Some((last, rest)) = body.split_last() {
            for s in rest {
                self.panic = false;
                self.emit_statement(env, s);
            }
            self.panic = false;
            returned = self.compile_tail_stat(env, last, epilogue);
        }
        let removed = self.envs.get_mut(env).pop_scope();
        let (line, col) = (0, 0);
        for ty in removed {
            self.emit_pop(env, &ty, line, col);
        }
        returned
    }

    /// Compiles `stat` in tail position within a function body: an
    /// expression-statement or an if/elsif/else whose every arm ends in
    /// tail position becomes the implicit return value instead of being
    /// discarded. Anything else falls back to ordinary statement
    /// compilation (no guaranteed return emitted).
    fn compile_tail_stat(&mut self, env: usize, stat: &Stat, epilogue: &Epilogue) -> bool {
        match stat {
            Stat::Expr(e) => {
                let (line, col) = (e.token().line, e.token().col);
                let ty = self.emit_expression(env, e);
                if !ty.structurally_equal(&epilogue.return_type) {
                    self.semantic_error("function body's tail expression does not match the declared return type", e.token());
                }
                self.emit_epilogue_tail(env, line, col, epilogue);
                true
            }
            Stat::If { token, arms, otherwise: Some(otherwise) } => {
                self.compile_tail_if(env, token, arms, otherwise, epilogue)
            }
            _ => {
                self.emit_statement(env, stat);
                false
            }
        }
    }

    fn compile_tail_stat_list(&mut self, env: usize, stat: &Stat, epilogue: &Epilogue) -> bool {
        match stat {
            Stat::StatList(stats) => match stats.split_last() {
                Some((last, rest)) => {
                    for s in rest {
                        self.panic = false;
                        self.emit_statement(env, s);
                    }
                    self.panic = false;
                    self.compile_tail_stat(env, last, epilogue)
                }
                None => false,
            },
            other => self.compile_tail_stat(env, other, epilogue),
        }
    }

    fn compile_tail_if(&mut self, env: usize, token: &Token, arms: &[(Expr, Stat)], otherwise: &Stat, epilogue: &Epilogue) -> bool {
        if arms.len() > MAX_CONDITIONAL_ARMS {
            self.semantic_error("too many elsif arms", token);
        }
        let mut end_patches = Vec::new();
        let mut all_returned = true;
        for (cond, body) in arms {
            let cond_ty = self.emit_expression(env, cond);
            if cond_ty.id != ValueKind::Boolean {
                self.semantic_error("condition must be boolean", cond.token());
            }
            let skip = self.emit_unpatched_skip(env, Opcode::SkipfLong, token.line, token.col);
            self.emit(env, Opcode::Popv, token.line, token.col);
            let arm_returned = self.compile_tail_stat_list(env, body, epilogue);
            all_returned &= arm_returned;
            if !arm_returned {
                let end = self.emit_unpatched_skip(env, Opcode::SkipLong, token.line, token.col);
                end_patches.push(end);
            }
            self.patch_skip(env, skip);
            self.emit(env, Opcode::Popv, token.line, token.col);
        }
        let otherwise_returned = self.compile_tail_stat_list(env, otherwise, epilogue);
        all_returned &= otherwise_returned;
        for patch in end_patches {
            self.patch_skip(env, patch);
        }
        all_returned
    }

    fn emit_pop(&mut self, env: usize, ty: &SemanticType, line: u32, col: u32) {
        if ty.id == ValueKind::Vector {
            self.emit(env, Opcode::Popa, line, col);
        } else {
            self.emit(env, Opcode::Popv, line, col);
        }
    }

    fn emit_var_decl(&mut self, env: usize, decl: &VarDecl) {
        let ty = self.type_node_to_type(env, &decl.ty);
        let line = decl.name.line;
        let col = decl.name.col;
        match &decl.init {
            Some(expr) => {
                let value_ty = self.emit_expression(env, expr);
                if !ty.structurally_equal(&value_ty) {
                    self.semantic_error("type mismatch in initializer", &decl.name);
                }
            }
            None => self.emit_default(env, &ty, line, col),
        }
        match self.envs.get_mut(env).declare_local(decl.name.lexeme.clone(), ty, Perms::RW) {
            Ok(slot) => {
                let pos = crate::environment::LocalPosition { env_index: env, slot, hops: 0 };
                self.emit_op_local_long(env, Opcode::SetLocalLong, pos, line, col);
            }
            Err(msg) => self.semantic_error(msg, &decl.name),
        }
    }

    fn emit_default(&mut self, env: usize, ty: &SemanticType, line: u32, col: u32) {
        match ty.id {
            ValueKind::Integer => {
                self.emit(env, Opcode::Zero, line, col);
            }
            ValueKind::Boolean => {
                self.emit(env, Opcode::False, line, col);
            }
            ValueKind::String => {
                self.emit(env, Opcode::EmptyString, line, col);
            }
            ValueKind::Vector => {
                let base_ty = SemanticType::scalar(ty.base);
                for _ in 0..ty.size {
                    self.emit_default(env, &base_ty, line, col);
                    self.emit(env, Opcode::PopToAstack, line, col);
                }
                let len = ty.size as usize;
                let idx = self.add_constant(env, Value::Vector(yala_runtime::VectorRef { base: 0, len }));
                self.emit(env, Opcode::LocAlinkLong, line, col);
                self.emit_long(env, idx, line, col);
            }
            ValueKind::Function | ValueKind::Void => {}
        }
    }

    // --- function declarations ---

    fn build_signature(&mut self, env: usize, module: &ModuleDecl) -> SemanticType {
        let return_type = match &module.return_type {
            Some(t) => self.type_node_to_type(env, t),
            None => SemanticType::void(),
        };
        let mut params = Vec::with_capacity(module.formals.len());
        for formal in &module.formals {
            let modifier = match formal.mode {
                Mode::In => Modifier::In,
                Mode::Out => Modifier::Out,
                Mode::InOut => Modifier::InOut,
            };
            let ty = self.type_node_to_type(env, &formal.ty).with_modifier(modifier);
            params.push(ty);
        }
        SemanticType::function(return_type, params)
    }

    fn forward_declare_function(&mut self, env: usize, module: &ModuleDecl) -> ForwardDecl {
        let sig = self.build_signature(env, module);
        let line = module.name.line;
        let col = module.name.col;
        let const_idx = self.add_constant(
            env,
            Value::Function(yala_runtime::FunctionValue { code: Rc::new(Bytecode::new()), env_index: 0 }),
        );
        let child = self.envs.create_child(env);
        let slot = match self.envs.get_mut(env).declare_local(module.name.lexeme.clone(), sig, Perms::R) {
            Ok(slot) => slot,
            Err(msg) => {
                self.semantic_error(msg, &module.name);
                0
            }
        };
        let envindex = self.envs.get(env).nest_level + 1;
        self.emit(env, Opcode::LocfLong, line, col);
        self.emit_long(env, const_idx, line, col);
        self.emit_long(env, envindex as u16, line, col);
        let pos = crate::environment::LocalPosition { env_index: env, slot, hops: 0 };
        self.emit_op_local_long(env, Opcode::SetLocalLong, pos, line, col);
        ForwardDecl { const_idx, child_env: child }
    }

    fn compile_module(&mut self, declaring_env: usize, module: &ModuleDecl, forward: ForwardDecl) {
        let child = forward.child_env;
        for formal in &module.formals {
            let modifier = match formal.mode {
                Mode::In => Modifier::In,
                Mode::Out => Modifier::Out,
                Mode::InOut => Modifier::InOut,
            };
            let ty = self.type_node_to_type(child, &formal.ty).with_modifier(modifier);
            let perms = if modifier == Modifier::In { Perms::R } else { Perms::RW };
            if let Err(msg) = self.envs.get_mut(child).declare_local(formal.name.lexeme.clone(), ty, perms) {
                self.semantic_error(msg, &formal.name);
            }
        }
        let out_slots: Vec<usize> = module
            .formals
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, f)| f.mode != Mode::In)
            .map(|(i, _)| i)
            .collect();
        let return_is_vector = module
            .return_type
            .as_ref()
            .map(|t| matches!(t, TypeNode::Vector { .. }))
            .unwrap_or(false);
        let return_type = match &module.return_type {
            Some(t) => self.type_node_to_type(child, t),
            None => SemanticType::void(),
        };
        let epilogue = Epilogue {
            out_slots,
            return_is_vector,
            is_procedure: !module.is_function,
            arity: module.formals.len() as u8,
            return_type,
        };
        self.epilogues.push(epilogue.clone());
        let returned = self.compile_module_body(child, &module.declarations, &module.body, &epilogue);
        self.epilogues.pop();

        let line = module.name.line;
        let col = module.name.col;
        if !returned {
            if epilogue.is_procedure {
                let idx = self.add_constant(child, Value::Void);
                self.emit(child, Opcode::LociLong, line, col);
                self.emit_long(child, idx, line, col);
            }
            self.emit_epilogue_tail(child, line, col, &epilogue);
        }

        let code = std::mem::take(&mut self.envs.get_mut(child).code);
        let env_index = (self.envs.get(declaring_env).nest_level + 1) as usize;
        let const_slot = self.envs.get_mut(declaring_env).code.constants.get_mut(forward.const_idx as usize);
        if let Some(slot) = const_slot {
            *slot = Value::Function(yala_runtime::FunctionValue { code: Rc::new(code), env_index });
        }
    }

    /// Emits the `ARGSTACK_LOAD`/`SHIFT_ASTACKENT_TO_BASE`/`RETURN`
    /// sequence shared by the implicit end-of-body return and every
    /// `exit` statement inside the same function or procedure. The
    /// return value (or `Void`, for a procedure) must already be on
    /// top of the value stack before this runs.
    fn emit_epilogue_tail(&mut self, env: usize, line: u32, col: u32, epilogue: &Epilogue) {
        for &slot in &epilogue.out_slots {
            self.emit(env, Opcode::ArgstackLoad, line, col);
            self.emit_long(env, slot as u16, line, col);
        }
        if epilogue.return_is_vector {
            self.emit(env, Opcode::ShiftAstackentToBase, line, col);
        }
        self.emit(env, Opcode::Return, line, col);
        self.emit_byte(env, epilogue.arity, line, col);
    }

    // --- statements ---

    fn emit_statement(&mut self, env: usize, stat: &Stat) {
        match stat {
            Stat::StatList(stats) => {
                for s in stats {
                    self.panic = false;
                    self.emit_statement(env, s);
                }
            }
            Stat::VarDecl(v) => self.emit_var_decl(env, v),
            Stat::Assign { token, target, value } => self.emit_assign(env, token, target, value),
            Stat::Read { token, target } => self.emit_read(env, token, target),
            Stat::Write { token, args, newline } => self.emit_write(env, token, args, *newline),
            Stat::If { token, arms, otherwise } => self.emit_if(env, token, arms, otherwise.as_deref()),
            Stat::While { token, cond, body } => self.emit_while(env, token, cond, body),
            Stat::Repeat { token, body, cond } => self.emit_repeat(env, token, body, cond),
            Stat::For { token, var, from, to, body } => self.emit_for(env, token, var, from, to, body),
            Stat::Expr(e) => {
                self.emit_expression(env, e);
                self.emit(env, Opcode::Popv, e.token().line, e.token().col);
            }
            Stat::Exit { token, value } => self.emit_exit(env, token, value.as_ref()),
            Stat::Break { token } => self.emit_break(env, token),
        }
    }

    fn emit_assign(&mut self, env: usize, token: &Token, target: &Expr, value: &Expr) {
        self.emit_store(env, token, target, |cg, env| cg.emit_expression(env, value));
    }

    /// Stores into `target`. `SET_INDEX_LOCAL_LONG` expects the value
    /// to store on top of the stack, with the indexing prelude (vector
    /// dimensions, then index expressions) pushed *beneath* it — so
    /// `emit_value` must run last, after any prelude. Plain identifier
    /// targets have no prelude and the ordering is immaterial.
    fn emit_store(&mut self, env: usize, token: &Token, target: &Expr, emit_value: impl FnOnce(&mut Self, usize) -> SemanticType) {
        match target {
            Expr::Id(name) => match self.envs.resolve_checked_write(env, &name.lexeme) {
                Ok(pos) => {
                    let local_ty = self.envs.get(pos.env_index).locals[pos.slot].ty.clone();
                    let value_ty = emit_value(self, env);
                    if !local_ty.structurally_equal(&value_ty) {
                        self.semantic_error("type mismatch in assignment", token);
                    }
                    self.emit_op_local_long(env, Opcode::SetLocalLong, pos, token.line, token.col);
                }
                Err(msg) => {
                    emit_value(self, env);
                    self.semantic_error(msg, &name.clone());
                }
            },
            Expr::Indexing { token: idx_tok, target: inner, indices } => {
                self.emit_indexed_store(env, idx_tok, inner, indices, emit_value);
            }
            _ => {
                emit_value(self, env);
                self.semantic_error("invalid assignment target", token);
            }
        }
    }

    fn emit_indexed_store(
        &mut self,
        env: usize,
        token: &Token,
        target: &Expr,
        indices: &[Expr],
        emit_value: impl FnOnce(&mut Self, usize) -> SemanticType,
    ) {
        let (base, flat_indices) = Self::flatten_indexing(target, indices);
        let id = match base.as_ref_id() {
            Some(id) => id.clone(),
            None => {
                self.semantic_error("only variables can be indexed", token);
                emit_value(self, env);
                return;
            }
        };
        let pos = match self.envs.resolve_checked_write(env, &id.lexeme) {
            Ok(p) => p,
            Err(msg) => {
                self.semantic_error(msg, &id);
                emit_value(self, env);
                return;
            }
        };
        let ty = self.envs.get(pos.env_index).locals[pos.slot].ty.clone();
        if ty.id != ValueKind::Vector {
            self.semantic_error("indexing requires a vector", token);
            emit_value(self, env);
            return;
        }
        if flat_indices.len() > ty.rank {
            self.semantic_error("too many indices for this vector's rank", token);
        }
        self.emit_indexing_prelude(env, token, &ty, &flat_indices);
        let value_ty = emit_value(self, env);
        if flat_indices.len() == ty.rank && !SemanticType::scalar(ty.base).structurally_equal(&value_ty) {
            self.semantic_error("type mismatch in indexed assignment", token);
        }
        self.emit(env, Opcode::SetIndexLocalLong, token.line, token.col);
        self.emit_long(env, pos.hops as u16, token.line, token.col);
        self.emit_long(env, pos.slot as u16, token.line, token.col);
        self.emit_byte(env, ty.rank as u8, token.line, token.col);
        self.emit_byte(env, flat_indices.len() as u8, token.line, token.col);
    }

    /// `v[1][0]` and `v[1, 0]` are equivalent; this collapses
    /// a chain of single-bracket indexing on the same base identifier
    /// into one combined index list so both compile identically.
    fn flatten_indexing(target: &Expr, indices: &[Expr]) -> (Expr, Vec<Expr>) {
        match target {
            Expr::Indexing { target: inner, indices: inner_indices, .. } => {
                let (base, mut acc) = Self::flatten_indexing(inner, inner_indices);
                acc.extend(indices.iter().cloned());
                (base, acc)
            }
            other => (other.clone(), indices.to_vec()),
        }
    }

    /// Emits the indexing prelude: push every static dimension of the
    /// target vector, followed by one pushed value per supplied index
    /// expression. `SET_INDEX_LOCAL_LONG`/`GET_INDEX` pop these back off
    /// in reverse (indices first, then dimensions).
    fn emit_indexing_prelude(&mut self, env: usize, token: &Token, ty: &SemanticType, indices: &[Expr]) {
        for &dim in &ty.dimensions {
            if (0..=u8::MAX as i64).contains(&dim) {
                self.emit(env, Opcode::PushByte, token.line, token.col);
                self.emit_byte(env, dim as u8, token.line, token.col);
            } else {
                let idx = self.add_constant(env, Value::Integer(dim));
                self.emit(env, Opcode::LociLong, token.line, token.col);
                self.emit_long(env, idx, token.line, token.col);
            }
        }
        for idx_expr in indices {
            let idx_ty = self.emit_expression(env, idx_expr);
            if idx_ty.id != ValueKind::Integer {
                self.semantic_error("vector indices must be integers", idx_expr.token());
            }
        }
    }

    fn emit_read(&mut self, env: usize, token: &Token, target: &Expr) {
        let id = match target.as_ref_id() {
            Some(id) => id,
            None => {
                self.semantic_error("read target must be a variable", token);
                return;
            }
        };
        let pos = match self.envs.resolve_checked_write(env, &id.lexeme) {
            Ok(p) => p,
            Err(msg) => {
                self.semantic_error(msg, id);
                return;
            }
        };
        let ty = self.envs.get(pos.env_index).locals[pos.slot].ty.clone();
        let kind_byte = match ty.id {
            ValueKind::Integer => 0,
            ValueKind::Boolean => 1,
            ValueKind::String => 2,
            _ => {
                self.semantic_error("read target must be integer, boolean, or string", id);
                return;
            }
        };
        self.emit(env, Opcode::Read, token.line, token.col);
        self.emit_byte(env, kind_byte, token.line, token.col);
        self.emit_op_local_long(env, Opcode::SetLocalLong, pos, token.line, token.col);
    }

    fn emit_write(&mut self, env: usize, token: &Token, args: &[Expr], newline: bool) {
        for arg in args {
            self.emit_expression(env, arg);
        }
        self.emit(env, Opcode::Write, token.line, token.col);
        self.emit_byte(env, args.len() as u8, token.line, token.col);
        if newline {
            self.emit(env, Opcode::Newline, token.line, token.col);
        }
    }

    fn emit_if(&mut self, env: usize, token: &Token, arms: &[(Expr, Stat)], otherwise: Option<&Stat>) {
        if arms.len() > MAX_CONDITIONAL_ARMS {
            self.semantic_error("too many elsif arms", token);
        }
        let mut end_patches = Vec::new();
        for (cond, body) in arms {
            let cond_ty = self.emit_expression(env, cond);
            if cond_ty.id != ValueKind::Boolean {
                self.semantic_error("condition must be boolean", cond.token());
            }
            let skip = self.emit_unpatched_skip(env, Opcode::SkipfLong, token.line, token.col);
            self.emit(env, Opcode::Popv, token.line, token.col);
            self.emit_statement(env, body);
            let end = self.emit_unpatched_skip(env, Opcode::SkipLong, token.line, token.col);
            end_patches.push(end);
            self.patch_skip(env, skip);
            self.emit(env, Opcode::Popv, token.line, token.col);
        }
        if let Some(body) = otherwise {
            self.emit_statement(env, body);
        }
        for patch in end_patches {
            self.patch_skip(env, patch);
        }
    }

    fn emit_while(&mut self, env: usize, token: &Token, cond: &Expr, body: &Stat) {
        self.envs.get_mut(env).push_loop();
        let start = self.here(env);
        let cond_ty = self.emit_expression(env, cond);
        if cond_ty.id != ValueKind::Boolean {
            self.semantic_error("condition must be boolean", cond.token());
        }
        let exit_patch = self.emit_unpatched_skip(env, Opcode::SkipfLong, token.line, token.col);
        self.emit(env, Opcode::Popv, token.line, token.col);
        self.emit_statement(env, body);
        self.emit_skip_back(env, start, token.line, token.col);
        self.patch_skip(env, exit_patch);
        self.emit(env, Opcode::Popv, token.line, token.col);
        let breaks = self.envs.get_mut(env).pop_loop();
        for b in breaks {
            self.patch_skip(env, b.code_offset);
        }
    }

    /// `repeat body until cond` stops once `cond` is true and otherwise
    /// loops back. `SKIPF_LONG` only jumps on a false top-of-stack, so
    /// the condition is negated first: the jump-forward-to-exit then
    /// fires exactly when the (negated) value is false, i.e. when the
    /// original condition was true.
    fn emit_repeat(&mut self, env: usize, token: &Token, body: &Stat, cond: &Expr) {
        self.envs.get_mut(env).push_loop();
        let start = self.here(env);
        self.emit_statement(env, body);
        let cond_ty = self.emit_expression(env, cond);
        if cond_ty.id != ValueKind::Boolean {
            self.semantic_error("condition must be boolean", cond.token());
        }
        self.emit(env, Opcode::Not, token.line, token.col);
        let exit_patch = self.emit_unpatched_skip(env, Opcode::SkipfLong, token.line, token.col);
        self.emit(env, Opcode::Popv, token.line, token.col);
        self.emit_skip_back(env, start, token.line, token.col);
        self.patch_skip(env, exit_patch);
        self.emit(env, Opcode::Popv, token.line, token.col);
        let breaks = self.envs.get_mut(env).pop_loop();
        for b in breaks {
            self.patch_skip(env, b.code_offset);
        }
    }

    fn emit_for(&mut self, env: usize, token: &Token, var: &Token, from: &Expr, to: &Expr, body: &Stat) {
        self.envs.get_mut(env).push_scope();
        let from_ty = self.emit_expression(env, from);
        if from_ty.id != ValueKind::Integer {
            self.semantic_error("for-loop bound must be an integer", from.token());
        }
        let var_slot = self
            .envs
            .get_mut(env)
            .declare_local(var.lexeme.clone(), SemanticType::scalar(ValueKind::Integer), Perms::RW)
            .unwrap_or(0);
        let var_pos = crate::environment::LocalPosition { env_index: env, slot: var_slot, hops: 0 };
        self.emit_op_local_long(env, Opcode::SetLocalLong, var_pos, token.line, token.col);
        self.envs.get_mut(env).locals[var_slot].perms = Perms::R;

        let bound_ty = self.emit_expression(env, to);
        if bound_ty.id != ValueKind::Integer {
            self.semantic_error("for-loop bound must be an integer", to.token());
        }
        let bound_slot = self
            .envs
            .get_mut(env)
            .declare_local("$forbound".into(), SemanticType::scalar(ValueKind::Integer), Perms::R)
            .unwrap_or(0);
        let bound_pos = crate::environment::LocalPosition { env_index: env, slot: bound_slot, hops: 0 };
        self.emit_op_local_long(env, Opcode::SetLocalLong, bound_pos, token.line, token.col);

        self.envs.get_mut(env).push_loop();
        let start = self.here(env);
        self.emit_op_local_long(env, Opcode::GetLocalLong, var_pos, token.line, token.col);
        self.emit_op_local_long(env, Opcode::GetLocalLong, bound_pos, token.line, token.col);
        self.emit(env, Opcode::Leq, token.line, token.col);
        let exit_patch = self.emit_unpatched_skip(env, Opcode::SkipfLong, token.line, token.col);
        self.emit(env, Opcode::Popv, token.line, token.col);
        self.emit_statement(env, body);

        self.emit_op_local_long(env, Opcode::GetLocalLong, var_pos, token.line, token.col);
        self.emit(env, Opcode::One, token.line, token.col);
        self.emit(env, Opcode::AddI, token.line, token.col);
        self.envs.get_mut(env).locals[var_slot].perms = Perms::RW;
        self.emit_op_local_long(env, Opcode::SetLocalLong, var_pos, token.line, token.col);
        self.envs.get_mut(env).locals[var_slot].perms = Perms::R;

        self.emit_skip_back(env, start, token.line, token.col);
        self.patch_skip(env, exit_patch);
        self.emit(env, Opcode::Popv, token.line, token.col);
        let breaks = self.envs.get_mut(env).pop_loop();
        for b in breaks {
            self.patch_skip(env, b.code_offset);
        }
        let removed = self.envs.get_mut(env).pop_scope();
        for ty in removed {
            self.emit_pop(env, &ty, token.line, token.col);
        }
    }

    fn emit_break(&mut self, env: usize, token: &Token) {
        if self.envs.get(env).loopdepth == 0 {
            self.semantic_error("break outside of a loop", token);
            return;
        }
        let at = self.emit_unpatched_skip(env, Opcode::SkipLong, token.line, token.col);
        self.envs.get_mut(env).record_break(at);
    }

    fn emit_exit(&mut self, env: usize, token: &Token, value: Option<&Expr>) {
        let value_ty = match value {
            Some(expr) => Some(self.emit_expression(env, expr)),
            None => {
                let idx = self.add_constant(env, Value::Void);
                self.emit(env, Opcode::LociLong, token.line, token.col);
                self.emit_long(env, idx, token.line, token.col);
                None
            }
        };
        match self.epilogues.last().cloned() {
            Some(epilogue) => {
                if let Some(ty) = value_ty {
                    if !ty.structurally_equal(&epilogue.return_type) {
                        self.semantic_error("exit value does not match the declared return type", token);
                    }
                }
                self.emit_epilogue_tail(env, token.line, token.col, &epilogue);
            }
            None => self.semantic_error("exit outside of a function or procedure", token),
        }
    }

    // --- expressions ---

    fn emit_expression(&mut self, env: usize, expr: &Expr) -> SemanticType {
        match expr {
            Expr::IntegerConst(tok) => self.emit_integer_const(env, tok),
            Expr::BooleanConst(tok) => {
                let op = if tok.lexeme == "true" { Opcode::True } else { Opcode::False };
                self.emit(env, op, tok.line, tok.col);
                SemanticType::scalar(ValueKind::Boolean)
            }
            Expr::StringConst(tok) => {
                let v = Value::String(YalaString::new(&tok.lexeme));
                let idx = self.add_constant(env, v);
                self.emit(env, Opcode::LocsLong, tok.line, tok.col);
                self.emit_long(env, idx, tok.line, tok.col);
                SemanticType::scalar(ValueKind::String)
            }
            Expr::VectorConst { token, elements } => self.emit_vector_const(env, token, elements),
            Expr::Id(tok) => self.emit_id(env, tok),
            Expr::Indexing { token, target, indices } => self.emit_indexing_expr(env, token, target, indices),
            Expr::Call { token, name, args } => self.emit_call(env, token, name, args),
            Expr::Unary { token, op, operand } => self.emit_unary(env, token, *op, operand),
            Expr::Binary { token, op, left, right } => self.emit_binary(env, token, *op, left, right),
            Expr::Cond { token, cond, then_expr, else_expr } => {
                self.emit_cond_expr(env, token, cond, then_expr, else_expr)
            }
        }
    }

    fn emit_integer_const(&mut self, env: usize, tok: &Token) -> SemanticType {
        match tok.lexeme.parse::<i64>() {
            Ok(v) if (0..=u8::MAX as i64).contains(&v) => {
                self.emit(env, Opcode::PushByte, tok.line, tok.col);
                self.emit_byte(env, v as u8, tok.line, tok.col);
            }
            Ok(v) => {
                let idx = self.add_constant(env, Value::Integer(v));
                self.emit(env, Opcode::LociLong, tok.line, tok.col);
                self.emit_long(env, idx, tok.line, tok.col);
            }
            Err(_) => self.semantic_error("integer literal out of range", tok),
        }
        SemanticType::scalar(ValueKind::Integer)
    }

    fn emit_id(&mut self, env: usize, tok: &Token) -> SemanticType {
        match self.envs.resolve(env, &tok.lexeme) {
            Some(pos) => {
                let ty = self.envs.get(pos.env_index).locals[pos.slot].ty.clone();
                self.emit_op_local_long(env, Opcode::GetLocalLong, pos, tok.line, tok.col);
                ty
            }
            None => {
                self.semantic_error(format!("undeclared identifier '{}'", tok.lexeme), tok);
                SemanticType::scalar(ValueKind::Integer)
            }
        }
    }

    /// A vector literal's elements may themselves be vector literals
    /// (`[[1,2],[3,4]]`), one rank deeper each nesting. A sub-vector
    /// element leaves a descriptor on the value stack whose backing
    /// data is already flattened into the array-data stack in place;
    /// only the descriptor itself needs discarding (`POPV`), not
    /// `POP_TO_ASTACK`, which is for scalar elements.
    fn emit_vector_const(&mut self, env: usize, token: &Token, elements: &[Expr]) -> SemanticType {
        let mut elem_type: Option<SemanticType> = None;
        for el in elements {
            let ty = self.emit_expression(env, el);
            match &elem_type {
                Some(prev) if !prev.structurally_equal(&ty) => {
                    self.semantic_error("vector literal elements must share the same shape", el.token());
                }
                None => elem_type = Some(ty.clone()),
                _ => {}
            }
            if ty.id == ValueKind::Vector {
                self.emit(env, Opcode::Popv, el.token().line, el.token().col);
            } else {
                self.emit(env, Opcode::PopToAstack, el.token().line, el.token().col);
            }
        }
        let len = elements.len();
        let (base, dimensions, flat_len) = match &elem_type {
            Some(t) if t.id == ValueKind::Vector => {
                let mut dims = vec![len as i64];
                dims.extend(t.dimensions.iter().cloned());
                (t.base, dims, len * t.size as usize)
            }
            Some(t) => (t.id, vec![len as i64], len),
            None => (ValueKind::Integer, vec![len as i64], len),
        };
        let idx = self.add_constant(env, Value::Vector(yala_runtime::VectorRef { base: 0, len: flat_len }));
        self.emit(env, Opcode::LocAlinkLong, token.line, token.col);
        self.emit_long(env, idx, token.line, token.col);
        SemanticType::vector(base, dimensions)
    }

    fn emit_indexing_expr(&mut self, env: usize, token: &Token, target: &Expr, indices: &[Expr]) -> SemanticType {
        let (base, flat_indices) = Self::flatten_indexing(target, indices);
        let id = match base.as_ref_id() {
            Some(id) => id,
            None => {
                self.semantic_error("only variables can be indexed", token);
                return SemanticType::scalar(ValueKind::Integer);
            }
        };
        let pos = match self.envs.resolve(env, &id.lexeme) {
            Some(p) => p,
            None => {
                self.semantic_error(format!("undeclared identifier '{}'", id.lexeme), id);
                return SemanticType::scalar(ValueKind::Integer);
            }
        };
        let ty = self.envs.get(pos.env_index).locals[pos.slot].ty.clone();
        if ty.id != ValueKind::Vector {
            self.semantic_error("indexing requires a vector", token);
            return SemanticType::scalar(ValueKind::Integer);
        }
        if flat_indices.len() > ty.rank {
            self.semantic_error("too many indices for this vector's rank", token);
        }
        self.emit_indexing_prelude(env, token, &ty, &flat_indices);
        self.emit(env, Opcode::GetIndex, token.line, token.col);
        self.emit_long(env, pos.hops as u16, token.line, token.col);
        self.emit_long(env, pos.slot as u16, token.line, token.col);
        self.emit_byte(env, ty.rank as u8, token.line, token.col);
        self.emit_byte(env, flat_indices.len() as u8, token.line, token.col);
        if flat_indices.len() == ty.rank {
            SemanticType::scalar(ty.base)
        } else {
            let remaining: Vec<i64> = ty.dimensions[flat_indices.len()..].to_vec();
            SemanticType::vector(ty.base, remaining)
        }
    }

    fn emit_unary(&mut self, env: usize, token: &Token, op: UnaryOp, operand: &Expr) -> SemanticType {
        let ty = self.emit_expression(env, operand);
        match op {
            UnaryOp::Not => {
                if ty.id != ValueKind::Boolean {
                    self.semantic_error("'!' requires a boolean operand", token);
                }
                self.emit(env, Opcode::Not, token.line, token.col);
                SemanticType::scalar(ValueKind::Boolean)
            }
            UnaryOp::Neg => {
                if ty.id != ValueKind::Integer {
                    self.semantic_error("unary '-' requires an integer operand", token);
                }
                self.emit(env, Opcode::Zero, token.line, token.col);
                self.emit(env, Opcode::SubI, token.line, token.col);
                SemanticType::scalar(ValueKind::Integer)
            }
        }
    }

    fn emit_binary(&mut self, env: usize, token: &Token, op: BinaryOp, left: &Expr, right: &Expr) -> SemanticType {
        match op {
            BinaryOp::And => return self.emit_short_circuit(env, token, left, right, true),
            BinaryOp::Or => return self.emit_short_circuit(env, token, left, right, false),
            _ => {}
        }
        let lt = self.emit_expression(env, left);
        let rt = self.emit_expression(env, right);
        match op {
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Times | BinaryOp::Divide => {
                if lt.id != ValueKind::Integer || rt.id != ValueKind::Integer {
                    self.semantic_error("arithmetic requires integer operands", token);
                }
                let opcode = match op {
                    BinaryOp::Plus => Opcode::AddI,
                    BinaryOp::Minus => Opcode::SubI,
                    BinaryOp::Times => Opcode::MulI,
                    BinaryOp::Divide => Opcode::DivI,
                    _ => unreachable!(),
                };
                self.emit(env, opcode, token.line, token.col);
                SemanticType::scalar(ValueKind::Integer)
            }
            BinaryOp::Eq | BinaryOp::Neq => {
                if !lt.structurally_equal(&rt) {
                    self.semantic_error("'==' requires matching operand types", token);
                }
                self.emit(env, Opcode::Equa, token.line, token.col);
                if op == BinaryOp::Neq {
                    self.emit(env, Opcode::Not, token.line, token.col);
                }
                SemanticType::scalar(ValueKind::Boolean)
            }
            BinaryOp::Greater | BinaryOp::GreaterEq | BinaryOp::Less | BinaryOp::LessEq => {
                if !lt.comparable(&rt) {
                    self.semantic_error("comparison requires two integers or two strings", token);
                }
                let opcode = match op {
                    BinaryOp::Greater => Opcode::Grt,
                    BinaryOp::GreaterEq => Opcode::GrtEq,
                    BinaryOp::Less => Opcode::Lt,
                    BinaryOp::LessEq => Opcode::Leq,
                    _ => unreachable!(),
                };
                self.emit(env, opcode, token.line, token.col);
                SemanticType::scalar(ValueKind::Boolean)
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    /// `and`/`or` short-circuit: evaluate the left side, `SKIPF_LONG`
    /// past the right side without popping (so a false `and`/true `or`
    /// leaves its own result on the stack), else pop and evaluate the
    /// right side as the overall result.
    fn emit_short_circuit(&mut self, env: usize, token: &Token, left: &Expr, right: &Expr, is_and: bool) -> SemanticType {
        let lt = self.emit_expression(env, left);
        if lt.id != ValueKind::Boolean {
            self.semantic_error("'and'/'or' require boolean operands", token);
        }
        if is_and {
            let skip = self.emit_unpatched_skip(env, Opcode::SkipfLong, token.line, token.col);
            self.emit(env, Opcode::Popv, token.line, token.col);
            let rt = self.emit_expression(env, right);
            if rt.id != ValueKind::Boolean {
                self.semantic_error("'and' requires boolean operands", token);
            }
            let end = self.emit_unpatched_skip(env, Opcode::SkipLong, token.line, token.col);
            self.patch_skip(env, skip);
            self.patch_skip(env, end);
        } else {
            let short = self.emit_unpatched_skip(env, Opcode::SkipfLong, token.line, token.col);
            let end = self.emit_unpatched_skip(env, Opcode::SkipLong, token.line, token.col);
            self.patch_skip(env, short);
            self.emit(env, Opcode::Popv, token.line, token.col);
            let rt = self.emit_expression(env, right);
            if rt.id != ValueKind::Boolean {
                self.semantic_error("'or' requires boolean operands", token);
            }
            self.patch_skip(env, end);
        }
        SemanticType::scalar(ValueKind::Boolean)
    }

    fn emit_cond_expr(&mut self, env: usize, token: &Token, cond: &Expr, then_expr: &Expr, else_expr: &Expr) -> SemanticType {
        let cond_ty = self.emit_expression(env, cond);
        if cond_ty.id != ValueKind::Boolean {
            self.semantic_error("condition must be boolean", cond.token());
        }
        let skip = self.emit_unpatched_skip(env, Opcode::SkipfLong, token.line, token.col);
        self.emit(env, Opcode::Popv, token.line, token.col);
        let then_ty = self.emit_expression(env, then_expr);
        let end = self.emit_unpatched_skip(env, Opcode::SkipLong, token.line, token.col);
        self.patch_skip(env, skip);
        self.emit(env, Opcode::Popv, token.line, token.col);
        let else_ty = self.emit_expression(env, else_expr);
        self.patch_skip(env, end);
        if !then_ty.structurally_equal(&else_ty) {
            self.semantic_error("conditional expression arms must share the same type", token);
        }
        then_ty
    }

    fn emit_call(&mut self, env: usize, token: &Token, name: &Token, args: &[Expr]) -> SemanticType {
        let pos = match self.envs.resolve(env, &name.lexeme) {
            Some(p) => p,
            None => {
                self.semantic_error(format!("undeclared identifier '{}'", name.lexeme), name);
                return SemanticType::scalar(ValueKind::Integer);
            }
        };
        let fn_ty = self.envs.get(pos.env_index).locals[pos.slot].ty.clone();
        if fn_ty.id != ValueKind::Function {
            self.semantic_error(format!("'{}' is not callable", name.lexeme), name);
            return SemanticType::scalar(ValueKind::Integer);
        }
        let sig: Rc<FunctionSignature> = fn_ty.function_signature.clone().expect("function type carries a signature");
        if sig.params.len() != args.len() {
            self.semantic_error("argument count mismatch", token);
        }
        self.emit_op_local_long(env, Opcode::GetLocalLong, pos, token.line, token.col);

        let mut out_actuals = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let param = sig.params.get(i);
            let modifier = param.map(|p| p.modifier).unwrap_or(Modifier::In);
            match modifier {
                Modifier::In => {
                    let ty = self.emit_expression(env, arg);
                    if let Some(p) = param {
                        if !p.structurally_equal(&ty) {
                            self.semantic_error("argument type mismatch", arg.token());
                        }
                    }
                }
                Modifier::Out => {
                    if let Some(p) = param {
                        self.emit_default(env, &SemanticType { modifier: Modifier::In, ..p.clone() }, arg.token().line, arg.token().col);
                        out_actuals.push((arg, p.clone()));
                    }
                }
                Modifier::InOut => {
                    let ty = self.emit_expression(env, arg);
                    if let Some(p) = param {
                        if !p.structurally_equal(&ty) {
                            self.semantic_error("argument type mismatch", arg.token());
                        }
                        out_actuals.push((arg, p.clone()));
                    }
                }
            }
        }
        self.emit(env, Opcode::Call, token.line, token.col);
        self.emit_byte(env, sig.arity() as u8, token.line, token.col);

        for (actual, param_ty) in out_actuals {
            self.emit_store(env, token, actual, move |cg, env| {
                cg.emit(env, Opcode::ArgstackPeek, token.line, token.col);
                SemanticType { modifier: Modifier::In, ..param_ty }
            });
            self.emit(env, Opcode::ArgstackUnload, token.line, token.col);
        }

        (*sig.return_type).clone()
    }
}

struct ForwardDecl {
    const_idx: u16,
    child_env: usize,
}

trait AsId {
    fn as_ref_id(&self) -> Option<&Token>;
}

impl AsId for Expr {
    fn as_ref_id(&self) -> Option<&Token> {
        match self {
            Expr::Id(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile_ok(src: &str) -> Bytecode {
        let (parser, lex_errors) = Parser::new(src);
        assert!(lex_errors.is_empty(), "{lex_errors:?}");
        let program = parser.parse().expect("parse should succeed");
        Codegen::new().compile(&program).expect("compile should succeed")
    }

    #[test]
    fn compiles_arithmetic_program() {
        let bc = compile_ok("program p; begin write(1 + 2); end.");
        assert!(!bc.is_empty());
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let (parser, _) = Parser::new("program p; begin break; end.");
        let program = parser.parse().unwrap();
        let errors = Codegen::new().compile(&program).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn mismatched_vector_literal_shapes_are_rejected() {
        let (parser, _) = Parser::new("program p; begin write([1, true]); end.");
        let program = parser.parse().unwrap();
        let errors = Codegen::new().compile(&program).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn redeclaration_at_same_depth_is_rejected() {
        let (parser, _) = Parser::new("program p; x: integer; x: boolean; begin end.");
        let program = parser.parse().unwrap();
        let errors = Codegen::new().compile(&program).unwrap_err();
        assert!(!errors.is_empty());
    }
}
