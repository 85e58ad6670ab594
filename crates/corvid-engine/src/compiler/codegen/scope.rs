//! Scope management for local variable resolution during compilation.

use std::rc::Rc;

use thiserror::Error;

/// A local variable in a scope.
#[derive(Debug, Clone)]
pub struct Local {
    /// The variable name
    pub name: Rc<str>,
    /// The scope depth where this was declared
    pub depth: usize,
    /// Whether the variable's initializer has finished
    pub initialized: bool,
}

/// Errors raised while declaring or resolving locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("Already a variable with this name in this scope.")]
    AlreadyDeclared,
    #[error("Too many local variables in function.")]
    TooManyLocals,
    #[error("Can't read local variable in its own initializer.")]
    ReadInInitializer,
}

/// The locals of one function being compiled.
#[derive(Debug, Default)]
pub struct Scope {
    /// Local variables, in stack slot order
    pub locals: Vec<Local>,
    /// Current block depth (0 = module level)
    pub depth: usize,
}

impl Scope {
    /// Creates a new scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new block.
    pub fn begin_scope(&mut self) {
        self.depth += 1;
    }

    /// End the current block and return the number of locals to pop.
    pub fn end_scope(&mut self) -> usize {
        let mut count = 0;
        while self.locals.last().is_some_and(|local| local.depth == self.depth) {
            self.locals.pop();
            count += 1;
        }
        self.depth -= 1;
        count
    }

    /// Declare a local variable, returning its slot.
    pub fn declare(&mut self, name: Rc<str>) -> Result<u8, ScopeError> {
        // Check for duplicate in same scope
        for local in self.locals.iter().rev() {
            if local.depth < self.depth {
                break;
            }
            if local.name == name {
                return Err(ScopeError::AlreadyDeclared);
            }
        }

        let slot = u8::try_from(self.locals.len()).map_err(|_| ScopeError::TooManyLocals)?;
        self.locals.push(Local {
            name,
            depth: self.depth,
            initialized: false,
        });
        Ok(slot)
    }

    /// Claims a slot that scripts cannot name (slot 0 of a plain function).
    pub fn reserve(&mut self, name: &str) {
        self.locals.push(Local {
            name: Rc::from(name),
            depth: self.depth,
            initialized: true,
        });
    }

    /// Mark the most recently declared variable as initialized.
    pub fn mark_initialized(&mut self) {
        if let Some(local) = self.locals.last_mut() {
            local.initialized = true;
        }
    }

    /// Resolve a local variable by name, returning its slot.
    pub fn resolve(&self, name: &str) -> Result<Option<u8>, ScopeError> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if &*local.name == name {
                if !local.initialized {
                    return Err(ScopeError::ReadInInitializer);
                }
                // declare() keeps every slot within u8 range.
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    /// Check if a name is declared at all, initialized or not.
    pub fn contains(&self, name: &str) -> bool {
        self.locals.iter().any(|local| &*local.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_new() {
        let scope = Scope::new();
        assert_eq!(scope.depth, 0);
        assert!(scope.locals.is_empty());
    }

    #[test]
    fn test_scope_begin_end() {
        let mut scope = Scope::new();
        scope.begin_scope();
        scope.declare("a".into()).unwrap();
        scope.declare("b".into()).unwrap();
        assert_eq!(scope.depth, 1);
        assert_eq!(scope.end_scope(), 2);
        assert_eq!(scope.depth, 0);
    }

    #[test]
    fn test_scope_resolve() {
        let mut scope = Scope::new();
        scope.reserve("");
        scope.begin_scope();
        scope.declare("x".into()).unwrap();
        scope.mark_initialized();
        assert_eq!(scope.resolve("x"), Ok(Some(1)));
        assert_eq!(scope.resolve("y"), Ok(None));
        assert_eq!(scope.resolve(""), Ok(Some(0)));
    }

    #[test]
    fn test_shadowing_resolves_innermost() {
        let mut scope = Scope::new();
        scope.begin_scope();
        scope.declare("x".into()).unwrap();
        scope.mark_initialized();
        scope.begin_scope();
        scope.declare("x".into()).unwrap();
        scope.mark_initialized();
        assert_eq!(scope.resolve("x"), Ok(Some(1)));
        scope.end_scope();
        assert_eq!(scope.resolve("x"), Ok(Some(0)));
    }

    #[test]
    fn test_scope_duplicate_error() {
        let mut scope = Scope::new();
        scope.begin_scope();
        scope.declare("x".into()).unwrap();
        assert_eq!(scope.declare("x".into()), Err(ScopeError::AlreadyDeclared));
    }

    #[test]
    fn test_read_in_initializer() {
        let mut scope = Scope::new();
        scope.begin_scope();
        scope.declare("x".into()).unwrap();
        assert_eq!(scope.resolve("x"), Err(ScopeError::ReadInInitializer));
        assert!(scope.contains("x"));
    }

    #[test]
    fn test_local_limit() {
        let mut scope = Scope::new();
        scope.begin_scope();
        for i in 0..256 {
            scope.declare(format!("v{}", i).into()).unwrap();
        }
        assert_eq!(scope.declare("extra".into()), Err(ScopeError::TooManyLocals));
    }
}
