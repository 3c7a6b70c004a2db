//! The scoped symbol table.

use crate::common::{Id, Map};
use crate::front::ast::{DeclRef, FuncId};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Symbol {
    Var(DeclRef),
    Func(FuncId),
}

/// Name resolution with shadowing: a stack of scopes, innermost last.
#[derive(Default)]
pub struct SymbolTable {
    scopes: Vec<Map<Id, Symbol>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Map::new()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(Map::new());
    }

    pub fn pop(&mut self) {
        self.scopes.pop().expect("scope stack underflow");
    }

    /// Insert into the innermost scope. Returns false on redefinition
    /// within that scope.
    pub fn insert(&mut self, name: Id, sym: Symbol) -> bool {
        let scope = self.scopes.last_mut().unwrap();
        if scope.contains_key(&name) {
            return false;
        }
        scope.insert(name, sym);
        true
    }

    pub fn find(&self, name: Id) -> Option<Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;

    #[test]
    fn shadowing() {
        let mut t = SymbolTable::new();
        assert!(t.insert(id("x"), Symbol::Var(DeclRef(0))));
        assert!(!t.insert(id("x"), Symbol::Var(DeclRef(1))));
        t.push();
        assert!(t.insert(id("x"), Symbol::Var(DeclRef(2))));
        assert_eq!(t.find(id("x")), Some(Symbol::Var(DeclRef(2))));
        t.pop();
        assert_eq!(t.find(id("x")), Some(Symbol::Var(DeclRef(0))));
    }
}
