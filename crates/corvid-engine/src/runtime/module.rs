//! Modules: named tables of indexed variables.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::value::Value;

/// Index of a module in the VM's module arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub(crate) usize);

impl ModuleId {
    /// The builtin (empty-named) module every other module is seeded from.
    pub const BUILTIN: ModuleId = ModuleId(0);
}

/// A module as a script value.
#[derive(Debug, Clone)]
pub struct ModuleHandle {
    /// Arena index
    pub id: ModuleId,
    /// Module name
    pub name: Rc<str>,
}

/// A module's variable table.
///
/// Variable indices are assigned when a name is first declared and never
/// change afterwards, so compiled code can address slots directly.
#[derive(Debug, Clone)]
pub struct Module {
    name: Rc<str>,
    values: Vec<Value>,
    names: Vec<Rc<str>>,
    index: FxHashMap<Rc<str>, u16>,
    loaded: bool,
}

impl Module {
    /// Creates an empty module.
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            names: Vec::new(),
            index: FxHashMap::default(),
            loaded: false,
        }
    }

    /// Creates a module whose first variables copy `seed`'s, in order.
    pub fn seeded(name: impl Into<Rc<str>>, seed: &Module) -> Self {
        Self {
            name: name.into(),
            values: seed.values.clone(),
            names: seed.names.clone(),
            index: seed.index.clone(),
            loaded: false,
        }
    }

    /// The module's name.
    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    /// Returns the slot for `name`, declaring it as undefined if it is new.
    ///
    /// Returns `None` once all 65 536 slots are taken.
    pub fn declare(&mut self, name: &str) -> Option<u16> {
        if let Some(&slot) = self.index.get(name) {
            return Some(slot);
        }
        let slot = u16::try_from(self.values.len()).ok()?;
        let name: Rc<str> = Rc::from(name);
        self.values.push(Value::Undefined);
        self.names.push(Rc::clone(&name));
        self.index.insert(name, slot);
        Some(slot)
    }

    /// Looks up the slot for `name`.
    pub fn find(&self, name: &str) -> Option<u16> {
        self.index.get(name).copied()
    }

    /// Reads a slot.
    pub fn get(&self, slot: u16) -> Option<&Value> {
        self.values.get(slot as usize)
    }

    /// Writes a slot that has already been declared.
    pub fn set(&mut self, slot: u16, value: Value) -> bool {
        match self.values.get_mut(slot as usize) {
            Some(existing) => {
                *existing = value;
                true
            }
            None => false,
        }
    }

    /// Reads a variable by name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.find(name).and_then(|slot| self.get(slot))
    }

    /// The name of a slot, for diagnostics.
    pub fn variable_name(&self, slot: u16) -> Option<&str> {
        self.names.get(slot as usize).map(|n| &**n)
    }

    /// Names of every slot in index order.
    pub fn variable_names(&self) -> &[Rc<str>] {
        &self.names
    }

    /// Number of declared slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no slot is declared.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the module's body has been loaded (or the host provided it).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn mark_loaded(&mut self) {
        self.loaded = true;
    }
}
