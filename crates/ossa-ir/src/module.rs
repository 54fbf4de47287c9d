//! IR Module
//!
//! Top-level container for a compilation unit. Functions are stored in
//! module order and addressed by `FunctionId`; erased functions leave a
//! tombstone so ids stay stable.

use super::error::{IrError, IrResult};
use super::function::{FunctionBody, IrFunction};
use super::instr::{FunctionId, IrInstr};
use rustc_hash::FxHashMap;

/// Source of function bodies that are not materialized yet
pub trait FunctionLoader {
    /// Produce the body of `name`, or `None` if it is unavailable
    fn load_body(&mut self, name: &str) -> Option<FunctionBody>;
}

/// Loader backed by a map of ready-made bodies
#[derive(Debug, Default)]
pub struct MapLoader {
    bodies: FxHashMap<String, FunctionBody>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, body: FunctionBody) {
        self.bodies.insert(name.into(), body);
    }
}

impl FunctionLoader for MapLoader {
    fn load_body(&mut self, name: &str) -> Option<FunctionBody> {
        self.bodies.remove(name)
    }
}

/// An IR module (compilation unit)
pub struct IrModule {
    /// Module name
    pub name: String,
    functions: Vec<Option<IrFunction>>,
    /// Function lookup by name
    function_map: FxHashMap<String, FunctionId>,
    /// Class method implementations: (class, method) -> function
    vtables: FxHashMap<(String, String), FunctionId>,
    loader: Option<Box<dyn FunctionLoader>>,
}

impl IrModule {
    /// Create a new empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            function_map: FxHashMap::default(),
            vtables: FxHashMap::default(),
            loader: None,
        }
    }

    /// Add a function to the module
    pub fn add_function(&mut self, func: IrFunction) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.function_map.insert(func.name.clone(), id);
        self.functions.push(Some(func));
        id
    }

    /// Get a function by ID
    pub fn function(&self, id: FunctionId) -> Option<&IrFunction> {
        self.functions.get(id.0 as usize).and_then(|f| f.as_ref())
    }

    /// Get a function by ID mutably
    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut IrFunction> {
        self.functions.get_mut(id.0 as usize).and_then(|f| f.as_mut())
    }

    /// Get a function ID by name
    pub fn function_id(&self, name: &str) -> Option<FunctionId> {
        self.function_map.get(name).copied()
    }

    /// Get a function by name
    pub fn function_by_name(&self, name: &str) -> Option<&IrFunction> {
        self.function_id(name).and_then(|id| self.function(id))
    }

    /// Live function IDs in module order
    pub fn function_ids(&self) -> Vec<FunctionId> {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_some())
            .map(|(i, _)| FunctionId(i as u32))
            .collect()
    }

    /// Iterate over live functions in module order
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &IrFunction)> {
        self.functions
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (FunctionId(i as u32), f)))
    }

    /// Get the number of live functions
    pub fn function_count(&self) -> usize {
        self.functions.iter().filter(|f| f.is_some()).count()
    }

    /// Remove a function from the module
    pub fn erase_function(&mut self, id: FunctionId) -> IrResult<IrFunction> {
        let func = self
            .functions
            .get_mut(id.0 as usize)
            .and_then(|f| f.take())
            .ok_or(IrError::UnknownFunction(id))?;
        self.function_map.remove(&func.name);
        self.vtables.retain(|_, f| *f != id);
        Ok(func)
    }

    /// Install the source of lazily materialized bodies
    pub fn set_loader(&mut self, loader: Box<dyn FunctionLoader>) {
        self.loader = Some(loader);
    }

    /// Materialize a declaration's body if a loader can provide it.
    /// Returns whether the function is a definition afterwards.
    pub fn load_function(&mut self, id: FunctionId) -> bool {
        let Some(func) = self.functions.get_mut(id.0 as usize).and_then(|f| f.as_mut()) else {
            return false;
        };
        if func.is_definition() {
            return true;
        }
        if let Some(loader) = self.loader.as_mut() {
            if let Some(body) = loader.load_body(&func.name) {
                func.set_body(body);
            }
        }
        func.is_definition()
    }

    /// Move a function's body out of the module for mutation.
    ///
    /// The function keeps reporting itself as a definition until the body is
    /// checked back in.
    pub fn check_out_body(&mut self, id: FunctionId) -> IrResult<Option<FunctionBody>> {
        self.function_mut(id)
            .ok_or(IrError::UnknownFunction(id))?
            .take_body()
    }

    /// Return a body obtained from `check_out_body`
    pub fn check_in_body(&mut self, id: FunctionId, body: FunctionBody) -> IrResult<()> {
        self.function_mut(id)
            .ok_or(IrError::UnknownFunction(id))?
            .restore_body(body);
        Ok(())
    }

    /// Register the implementation of `method` for `class`
    pub fn add_vtable_entry(
        &mut self,
        class: impl Into<String>,
        method: impl Into<String>,
        func: FunctionId,
    ) {
        self.vtables.insert((class.into(), method.into()), func);
    }

    /// Look up the implementation of `method` for `class`
    pub fn vtable_lookup(&self, class: &str, method: &str) -> Option<FunctionId> {
        self.vtables
            .get(&(class.to_string(), method.to_string()))
            .copied()
    }

    /// Count `function_ref` instructions per referenced function
    pub fn reference_counts(&self) -> FxHashMap<FunctionId, usize> {
        let mut counts = FxHashMap::default();
        for (_, func) in self.functions() {
            let Some(body) = func.body() else { continue };
            for (_, node) in body.instructions() {
                if let IrInstr::FunctionRef { func } = node.op {
                    *counts.entry(func).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Validate every function body
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .functions()
            .filter_map(|(id, func)| {
                let body = func.body()?;
                body.verify()
                    .err()
                    .map(|e| format!("Function '{}' ({}): {}", func.name, id, e))
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get total instruction count across all functions
    pub fn total_instruction_count(&self) -> usize {
        self.functions()
            .filter_map(|(_, f)| f.body())
            .map(|b| b.instruction_count())
            .sum()
    }
}

impl std::fmt::Debug for IrModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrModule")
            .field("name", &self.name)
            .field("functions", &self.functions)
            .field("vtables", &self.vtables)
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Terminator;
    use crate::types::{FunctionType, IrType};

    fn returning_body() -> FunctionBody {
        let mut body = FunctionBody::new();
        let bb0 = body.create_block();
        body.set_terminator(bb0, Terminator::Return(None)).unwrap();
        body
    }

    fn thin() -> FunctionType {
        FunctionType::thin(vec![], None)
    }

    #[test]
    fn test_module_add_and_erase_function() {
        let mut module = IrModule::new("test");
        let foo = module.add_function(IrFunction::with_body("foo", thin(), returning_body()));
        let bar = module.add_function(IrFunction::new("bar", thin()));

        assert_eq!(foo, FunctionId(0));
        assert_eq!(module.function_count(), 2);
        assert_eq!(module.function_id("bar"), Some(bar));

        module.erase_function(foo).unwrap();
        assert!(module.function(foo).is_none());
        assert!(module.function_by_name("foo").is_none());
        assert_eq!(module.function_ids(), vec![bar]);
        assert!(module.erase_function(foo).is_err());
    }

    #[test]
    fn test_load_function_from_loader() {
        let mut module = IrModule::new("test");
        let lazy = module.add_function(IrFunction::new("lazy", thin()));
        let missing = module.add_function(IrFunction::new("missing", thin()));

        let mut loader = MapLoader::new();
        loader.insert("lazy", returning_body());
        module.set_loader(Box::new(loader));

        assert!(module.load_function(lazy));
        assert!(module.function(lazy).unwrap().body().is_some());
        assert!(!module.load_function(missing));
        assert!(!module.function(missing).unwrap().is_definition());
    }

    #[test]
    fn test_reference_counts() {
        let mut module = IrModule::new("test");
        let callee = module.add_function(IrFunction::with_body("callee", thin(), returning_body()));

        let mut body = FunctionBody::new();
        let bb0 = body.create_block();
        for _ in 0..2 {
            body.append_instr(
                bb0,
                IrInstr::FunctionRef { func: callee },
                Some(IrType::function(thin())),
                None,
            )
            .unwrap();
        }
        body.set_terminator(bb0, Terminator::Return(None)).unwrap();
        module.add_function(IrFunction::with_body("caller", thin(), body));

        assert_eq!(module.reference_counts().get(&callee), Some(&2));
        assert!(module.validate().is_ok());
    }

    #[test]
    fn test_check_out_and_in() {
        let mut module = IrModule::new("test");
        let id = module.add_function(IrFunction::with_body("f", thin(), returning_body()));

        let body = module.check_out_body(id).unwrap().unwrap();
        assert!(module.function(id).unwrap().is_definition());
        assert!(module.function(id).unwrap().body().is_none());
        module.check_in_body(id, body).unwrap();
        assert!(module.function(id).unwrap().body().is_some());
    }

    #[test]
    fn test_vtable_lookup() {
        let mut module = IrModule::new("test");
        let imp = module.add_function(IrFunction::with_body("Dog.speak", thin(), returning_body()));
        module.add_vtable_entry("Dog", "speak", imp);
        assert_eq!(module.vtable_lookup("Dog", "speak"), Some(imp));
        assert_eq!(module.vtable_lookup("Cat", "speak"), None);
    }
}
