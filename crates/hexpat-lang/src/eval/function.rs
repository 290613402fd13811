// Native functions callable from pattern code

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::parser::ast::Endianness;

use super::console::Console;
use super::provider::ByteProvider;
use super::value::Value;

/// What a native function can see of the running evaluation
pub struct FunctionContext<'a> {
    pub provider: &'a dyn ByteProvider,
    pub console: &'a mut Console,
    /// Current cursor (logical address)
    pub offset: u64,
    pub base_address: u64,
    pub default_endian: Endianness,
}

impl FunctionContext<'_> {
    /// Read `buf.len()` bytes at a logical address
    pub fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), String> {
        let physical = address
            .checked_sub(self.base_address)
            .ok_or_else(|| format!("address 0x{:X} is below the base address", address))?;
        self.provider.read(physical, buf)
    }

    /// One past the last logical address
    pub fn end_address(&self) -> u64 {
        self.base_address.saturating_add(self.provider.size())
    }
}

/// Native function body. `Ok(None)` means the function returns nothing.
pub type BuiltinFn =
    Arc<dyn Fn(&mut FunctionContext<'_>, &[Value]) -> Result<Option<Value>, String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterCount {
    Exactly(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl ParameterCount {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            ParameterCount::Exactly(c) => n == c,
            ParameterCount::AtLeast(c) => n >= c,
            ParameterCount::Between(lo, hi) => n >= lo && n <= hi,
        }
    }
}

impl fmt::Display for ParameterCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterCount::Exactly(c) => write!(f, "exactly {}", c),
            ParameterCount::AtLeast(c) => write!(f, "at least {}", c),
            ParameterCount::Between(lo, hi) => write!(f, "between {} and {}", lo, hi),
        }
    }
}

#[derive(Clone)]
pub struct Function {
    pub params: ParameterCount,
    pub body: BuiltinFn,
}

/// Native functions keyed by their qualified name (`std::mem::size`)
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, Function>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `std` builtins
    pub fn with_std() -> Self {
        let mut registry = Self::new();
        crate::stdlib::register_all(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        params: ParameterCount,
        body: impl Fn(&mut FunctionContext<'_>, &[Value]) -> Result<Option<Value>, String>
            + Send
            + Sync
            + 'static,
    ) {
        self.functions.insert(
            name.into(),
            Function {
                params,
                body: Arc::new(body),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Copy every function of `other` into this registry, replacing duplicates
    pub fn extend(&mut self, other: &FunctionRegistry) {
        for (name, f) in &other.functions {
            self.functions.insert(name.clone(), f.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::provider::SliceProvider;

    #[test]
    fn test_parameter_count() {
        assert!(ParameterCount::Exactly(2).accepts(2));
        assert!(!ParameterCount::Exactly(2).accepts(1));
        assert!(ParameterCount::AtLeast(1).accepts(5));
        assert!(ParameterCount::Between(1, 2).accepts(2));
        assert!(!ParameterCount::Between(1, 2).accepts(3));
        assert_eq!(ParameterCount::AtLeast(1).to_string(), "at least 1");
    }

    #[test]
    fn test_register_and_call() {
        let mut registry = FunctionRegistry::new();
        registry.register("host::answer", ParameterCount::Exactly(0), |_, _| {
            Ok(Some(Value::Unsigned(42)))
        });
        let data = [0u8; 4];
        let provider = SliceProvider::new(&data);
        let mut console = Console::new();
        let mut ctx = FunctionContext {
            provider: &provider,
            console: &mut console,
            offset: 0,
            base_address: 0,
            default_endian: Endianness::Little,
        };
        let f = registry.get("host::answer").unwrap();
        assert_eq!((f.body)(&mut ctx, &[]).unwrap(), Some(Value::Unsigned(42)));
        assert!(!registry.contains("host::other"));
    }

    #[test]
    fn test_context_read_subtracts_base() {
        let data = [1u8, 2, 3];
        let provider = SliceProvider::new(&data);
        let mut console = Console::new();
        let ctx = FunctionContext {
            provider: &provider,
            console: &mut console,
            offset: 0x100,
            base_address: 0x100,
            default_endian: Endianness::Little,
        };
        let mut buf = [0u8; 1];
        ctx.read(0x102, &mut buf).unwrap();
        assert_eq!(buf, [3]);
        assert!(ctx.read(0x10, &mut buf).is_err());
        assert_eq!(ctx.end_address(), 0x103);
    }
}
