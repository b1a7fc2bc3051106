//! Memoized helper-function synthesis.
//!
//! Several passes replace an instruction with a call to a synthesized
//! helper function, and must emit at most one helper per distinct key
//! (operation + operand type, or external-texture builtin) no matter
//! how many call sites exist. The cache carries that memo across the
//! rewrite phase of a single pass run.

use crate::ir::function::FuncId;
use crate::ir::module::Module;
use rustc_hash::FxHashMap;
use std::hash::Hash;

pub(crate) struct HelperCache<K> {
    built: FxHashMap<K, FuncId>,
}

impl<K: Eq + Hash + Clone> HelperCache<K> {
    pub(crate) fn new() -> HelperCache<K> {
        HelperCache {
            built: FxHashMap::default(),
        }
    }

    /// The helper for `key`, synthesizing it with `build` on first use.
    pub(crate) fn get_or_build(
        &mut self,
        key: K,
        module: &mut Module,
        build: impl FnOnce(&mut Module) -> FuncId,
    ) -> FuncId {
        if let Some(&existing) = self.built.get(&key) {
            return existing;
        }

        let function = build(module);
        self.built.insert(key, function);
        function
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_is_built_once_per_key() {
        let mut module = Module::new();
        let mut cache: HelperCache<&'static str> = HelperCache::new();
        let mut builds = 0;

        let void = module.types.void();
        let first = cache.get_or_build("div_i32", &mut module, |module| {
            builds += 1;
            let name = module.symbols.intern("helper");
            module.new_function(name, void, None)
        });
        let second = cache.get_or_build("div_i32", &mut module, |module| {
            builds += 1;
            let name = module.symbols.intern("helper2");
            module.new_function(name, void, None)
        });

        assert_eq!(first, second);
        assert_eq!(builds, 1);
    }
}
