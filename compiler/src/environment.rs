//! Compile-time environment tree.
//!
//! One `Environment` per program scope (the top-level program, and one
//! per procedure/function declaration). `locals` is an ordered `Vec`
//! carrying a block `depth`, not a separate stack per block — matching
//! `environment_local_search_helper` in the original `semantics.c`,
//! which walks this list most-recent-first.

use yala_runtime::SemanticType;

/// Read/write permission bits for a local (loop induction variables are
/// writable only during their own assignment, then demoted to
/// read-only; `out`/`inout` formals are read-write throughout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Perms {
    pub read: bool,
    pub write: bool,
}

impl Perms {
    pub const RW: Perms = Perms { read: true, write: true };
    pub const R: Perms = Perms { read: true, write: false };
}

#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    pub ty: SemanticType,
    pub depth: u32,
    pub perms: Perms,
}

/// Position of a resolved local: which environment it lives in and its
/// slot within that environment's activation frame, plus how many
/// enclosing-scope hops separate the reference from that environment
/// (0 if the local is declared in the referencing environment itself).
/// `env_index` is the compile-time environment-tree position, used to
/// look up the local's type; `hops` is what the emitted instruction
/// operand carries, since the frame stack indexes by call depth, not
/// by environment-tree position.
#[derive(Debug, Clone, Copy)]
pub struct LocalPosition {
    pub env_index: usize,
    pub slot: usize,
    pub hops: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakPatch {
    pub code_offset: usize,
    pub loopdepth: u32,
}

/// One compile-time scope, one per program/procedure/function. `index`
/// is this environment's position in the owning `Environments` tree
/// (used to look up locals); `nest_level` is how many function
/// boundaries separate it from the top-level program (0 at the root,
/// `parent.nest_level + 1` for each nested declaration) — the quantity
/// a function value's `env_index` needs at runtime, per
/// `forward_declare_function` in the original `semantics.c`.
pub struct Environment {
    pub index: usize,
    pub parent: Option<usize>,
    pub nest_level: u32,
    pub locals: Vec<Local>,
    pub depth: u32,
    pub loopdepth: u32,
    pub break_patches: Vec<BreakPatch>,
    pub code: yala_runtime::Bytecode,
}

impl Environment {
    pub fn new(index: usize, parent: Option<usize>, nest_level: u32) -> Self {
        Environment {
            index,
            parent,
            nest_level,
            locals: Vec::new(),
            depth: 0,
            loopdepth: 0,
            break_patches: Vec::new(),
            code: yala_runtime::Bytecode::new(),
        }
    }

    pub fn push_scope(&mut self) {
        self.depth += 1;
    }

    /// Pops the current block, removing any locals declared in it and
    /// returning their types in declaration order, so the caller can
    /// emit the matching POPV/POPA per local.
    pub fn pop_scope(&mut self) -> Vec<SemanticType> {
        let depth = self.depth;
        let mut removed = Vec::new();
        self.locals.retain(|l| {
            if l.depth >= depth {
                removed.push(l.ty.clone());
                false
            } else {
                true
            }
        });
        self.depth -= 1;
        removed
    }

    pub fn push_loop(&mut self) {
        self.loopdepth += 1;
    }

    pub fn pop_loop(&mut self) -> Vec<BreakPatch> {
        let depth = self.loopdepth;
        let (mine, rest): (Vec<_>, Vec<_>) =
            self.break_patches.drain(..).partition(|b| b.loopdepth == depth);
        self.break_patches = rest;
        self.loopdepth -= 1;
        mine
    }

    pub fn record_break(&mut self, code_offset: usize) {
        self.break_patches.push(BreakPatch { code_offset, loopdepth: self.loopdepth });
    }

    /// Declares a new local at the current depth. Returns `Err` if a
    /// local of the same name already exists at this exact depth
    /// (shadowing an outer depth is fine; redeclaring within the same
    /// block is not).
    pub fn declare_local(&mut self, name: String, ty: SemanticType, perms: Perms) -> Result<usize, String> {
        let depth = self.depth;
        if self.locals.iter().any(|l| l.name == name && l.depth == depth) {
            return Err(format!("'{name}' is already declared in this scope"));
        }
        self.locals.push(Local { name, ty, depth, perms });
        Ok(self.locals.len() - 1)
    }

    /// Searches this environment's locals most-recent-first (so inner
    /// shadowing wins), returning the slot index.
    pub fn find_local(&self, name: &str) -> Option<(usize, &Local)> {
        self.locals.iter().enumerate().rev().find(|(_, l)| l.name == name)
    }
}

/// The full tree of environments built up during compilation. Root
/// (the top-level program) is always index 0.
pub struct Environments {
    pub envs: Vec<Environment>,
}

impl Environments {
    pub fn new() -> Self {
        Environments { envs: vec![Environment::new(0, None, 0)] }
    }

    pub fn create_child(&mut self, parent: usize) -> usize {
        let index = self.envs.len();
        let nest_level = self.envs[parent].nest_level + 1;
        self.envs.push(Environment::new(index, Some(parent), nest_level));
        index
    }

    pub fn get(&self, index: usize) -> &Environment {
        &self.envs[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Environment {
        &mut self.envs[index]
    }

    /// Walks outward from `start` looking for `name`, matching
    /// `environment_local_search_helper`: search the current
    /// environment's locals, and if not found, recurse to its parent,
    /// counting the hop. Returns the defining environment's index, the
    /// local's slot, and the hop count (0 if `name` is declared in
    /// `start` itself).
    pub fn resolve(&self, start: usize, name: &str) -> Option<LocalPosition> {
        let mut current = Some(start);
        let mut hops = 0;
        while let Some(idx) = current {
            let env = &self.envs[idx];
            if let Some((slot, _)) = env.find_local(name) {
                return Some(LocalPosition { env_index: idx, slot, hops });
            }
            current = env.parent;
            hops += 1;
        }
        None
    }

    pub fn resolve_checked_write(&self, start: usize, name: &str) -> Result<LocalPosition, String> {
        let mut current = Some(start);
        let mut hops = 0;
        while let Some(idx) = current {
            let env = &self.envs[idx];
            if let Some((slot, local)) = env.find_local(name) {
                if !local.perms.write {
                    return Err(format!("'{name}' is not writable here"));
                }
                return Ok(LocalPosition { env_index: idx, slot, hops });
            }
            current = env.parent;
            hops += 1;
        }
        Err(format!("undeclared identifier '{name}'"))
    }
}

impl Default for Environments {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yala_runtime::ValueKind;

    #[test]
    fn redeclaration_at_same_depth_is_rejected() {
        let mut env = Environment::new(0, None, 0);
        env.declare_local("x".into(), SemanticType::scalar(ValueKind::Integer), Perms::RW).unwrap();
        let err = env
            .declare_local("x".into(), SemanticType::scalar(ValueKind::Integer), Perms::RW)
            .unwrap_err();
        assert!(err.contains('x'));
    }

    #[test]
    fn shadowing_at_deeper_depth_is_allowed() {
        let mut env = Environment::new(0, None, 0);
        env.declare_local("x".into(), SemanticType::scalar(ValueKind::Integer), Perms::RW).unwrap();
        env.push_scope();
        env.declare_local("x".into(), SemanticType::scalar(ValueKind::Boolean), Perms::RW).unwrap();
        let (_, local) = env.find_local("x").unwrap();
        assert_eq!(local.ty.id, ValueKind::Boolean);
    }

    #[test]
    fn resolve_recurses_to_parent_environment() {
        let mut envs = Environments::new();
        envs.get_mut(0)
            .declare_local("outer".into(), SemanticType::scalar(ValueKind::Integer), Perms::RW)
            .unwrap();
        let child = envs.create_child(0);
        let pos = envs.resolve(child, "outer").unwrap();
        assert_eq!(pos.env_index, 0);
        assert_eq!(pos.hops, 1);
    }

    #[test]
    fn resolve_hop_count_grows_with_nesting_depth() {
        let mut envs = Environments::new();
        envs.get_mut(0)
            .declare_local("outer".into(), SemanticType::scalar(ValueKind::Integer), Perms::RW)
            .unwrap();
        let child = envs.create_child(0);
        let grandchild = envs.create_child(child);
        assert_eq!(envs.resolve(child, "outer").unwrap().hops, 1);
        assert_eq!(envs.resolve(grandchild, "outer").unwrap().hops, 2);
        assert_eq!(envs.get(grandchild).nest_level, 2);
    }

    #[test]
    fn write_to_read_only_local_is_rejected() {
        let mut envs = Environments::new();
        envs.get_mut(0)
            .declare_local("x".into(), SemanticType::scalar(ValueKind::Integer), Perms::R)
            .unwrap();
        assert!(envs.resolve_checked_write(0, "x").is_err());
    }
}
