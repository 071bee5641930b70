//! Embedding interface
//!
//! Generated code never touches scopes or the object heap directly; the
//! fallback stubs go through a [`Host`]. `GlobalHost` is a small host with a
//! single global scope and a flat object table, enough to run scripts
//! standalone.

use basalt_bytecode::{Atom, AtomLookup, AtomTable, Value};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::VmError;
use crate::script::Script;

/// Native function body: `(this, args) -> result`
pub type NativeFn = fn(Value, &[Value]) -> Result<Value, VmError>;

/// Outcome of a host call
#[derive(Debug, Clone)]
pub enum CallResult {
    /// The host produced the result itself
    Return(Value),
    /// The machine should run this script with the same arguments
    Invoke(Arc<Script>),
}

/// Runtime services for generated code
pub trait Host: Send {
    fn get_name(&mut self, name: Atom) -> Result<Value, VmError>;

    fn set_name(&mut self, name: Atom, value: Value) -> Result<(), VmError>;

    fn get_global(&mut self, name: Atom) -> Result<Value, VmError>;

    fn set_global(&mut self, name: Atom, value: Value) -> Result<(), VmError>;

    fn get_property(&mut self, obj: Value, key: Value) -> Result<Value, VmError>;

    fn set_property(&mut self, obj: Value, key: Value, value: Value) -> Result<(), VmError>;

    fn call(&mut self, callee: Value, this: Value, args: &[Value]) -> Result<CallResult, VmError>;
}

/// Object stored in a `GlobalHost`
pub enum HostObject {
    Plain(FxHashMap<Value, Value>),
    Native(NativeFn),
    Script(Arc<Script>),
}

/// Host with one global scope; scope names resolve to globals
pub struct GlobalHost {
    atoms: Arc<AtomTable>,
    globals: FxHashMap<Atom, Value>,
    objects: Vec<HostObject>,
}

impl GlobalHost {
    pub fn new(atoms: Arc<AtomTable>) -> Self {
        Self {
            atoms,
            globals: FxHashMap::default(),
            objects: Vec::new(),
        }
    }

    /// Bind a global by name
    pub fn define_global(&mut self, name: &str, value: Value) {
        let atom = self.atoms.intern(name);
        self.globals.insert(atom, value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        let atom = self.atoms.lookup(name)?;
        self.globals.get(&atom).copied()
    }

    fn add(&mut self, object: HostObject) -> Value {
        let handle = self.objects.len() as u32;
        self.objects.push(object);
        Value::object(handle)
    }

    /// Allocate an empty plain object
    pub fn alloc_object(&mut self) -> Value {
        self.add(HostObject::Plain(FxHashMap::default()))
    }

    pub fn define_native(&mut self, f: NativeFn) -> Value {
        self.add(HostObject::Native(f))
    }

    /// Make `script` callable from generated code
    pub fn define_script(&mut self, script: Arc<Script>) -> Value {
        self.add(HostObject::Script(script))
    }

    pub fn object(&self, value: Value) -> Option<&HostObject> {
        self.objects.get(value.as_object()? as usize)
    }

    fn name_text(&self, name: Atom) -> String {
        self.atoms
            .text(name)
            .map_or_else(|| name.to_string(), |text| text.to_string())
    }

    fn lookup(&self, name: Atom) -> Result<Value, VmError> {
        self.globals
            .get(&name)
            .copied()
            .ok_or_else(|| VmError::ReferenceError(self.name_text(name)))
    }
}

/// Integral doubles and int32s name the same property
fn canonical_key(key: Value) -> Value {
    key.as_double().map_or(key, Value::number)
}

impl Host for GlobalHost {
    fn get_name(&mut self, name: Atom) -> Result<Value, VmError> {
        self.lookup(name)
    }

    fn set_name(&mut self, name: Atom, value: Value) -> Result<(), VmError> {
        self.globals.insert(name, value);
        Ok(())
    }

    fn get_global(&mut self, name: Atom) -> Result<Value, VmError> {
        self.lookup(name)
    }

    fn set_global(&mut self, name: Atom, value: Value) -> Result<(), VmError> {
        self.globals.insert(name, value);
        Ok(())
    }

    fn get_property(&mut self, obj: Value, key: Value) -> Result<Value, VmError> {
        if obj.is_nullish() {
            return Err(VmError::TypeError(format!("cannot read property of {obj}")));
        }
        match self.object(obj) {
            Some(HostObject::Plain(props)) => Ok(props
                .get(&canonical_key(key))
                .copied()
                .unwrap_or_default()),
            _ => Ok(Value::undefined()),
        }
    }

    fn set_property(&mut self, obj: Value, key: Value, value: Value) -> Result<(), VmError> {
        if obj.is_nullish() {
            return Err(VmError::TypeError(format!("cannot set property of {obj}")));
        }
        let Some(handle) = obj.as_object() else {
            // Primitives silently drop property writes
            return Ok(());
        };
        match self.objects.get_mut(handle as usize) {
            Some(HostObject::Plain(props)) => {
                props.insert(canonical_key(key), value);
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(VmError::Host(format!("dangling object handle {handle}"))),
        }
    }

    fn call(&mut self, callee: Value, this: Value, args: &[Value]) -> Result<CallResult, VmError> {
        match self.object(callee) {
            Some(HostObject::Native(f)) => f(this, args).map(CallResult::Return),
            Some(HostObject::Script(script)) => Ok(CallResult::Invoke(Arc::clone(script))),
            _ => Err(VmError::NotCallable),
        }
    }
}
