//! Built-in classes installed into the builtin module.
//!
//! Every module is seeded with the builtin module's variables in order, so
//! `Array` is always module slot 0 and `Map` slot 1.

pub mod array;
pub mod map;

use crate::runtime::Value;
use crate::vm::VM;

pub use array::ArrayData;
pub use map::MapData;

/// Registers `Array` and `Map` in the builtin module, in slot order.
pub fn install(vm: &mut VM) {
    vm.define_builtin("Array", Value::Class(array::class().build()));
    vm.define_builtin("Map", Value::Class(map::class().build()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ModuleId;

    #[test]
    fn test_builtin_slots() {
        let mut vm = VM::default();
        install(&mut vm);
        let builtin = vm.module(ModuleId::BUILTIN).unwrap();
        assert_eq!(builtin.find("Array"), Some(0));
        assert_eq!(builtin.find("Map"), Some(1));

        let main = vm.ensure_module("main");
        let main = vm.module(main).unwrap();
        assert_eq!(main.find("Array"), Some(0));
        assert!(matches!(main.get(1), Some(Value::Class(class)) if &*class.name == "Map"));
    }
}
