// Standard library for the pattern language

pub mod core;
pub mod io;
pub mod math;
pub mod mem;
pub mod string;

use crate::eval::function::FunctionRegistry;

/// Register all standard library functions into a registry
pub fn register_all(registry: &mut FunctionRegistry) {
    core::register(registry);
    io::register(registry);
    mem::register(registry);
    math::register(registry);
    string::register(registry);
}

/// Unsigned argument that must fit in 64 bits
pub(crate) fn u64_arg(args: &[crate::eval::value::Value], index: usize, what: &str) -> Result<u64, String> {
    let value = args
        .get(index)
        .ok_or_else(|| format!("missing {} argument", what))?
        .to_unsigned()
        .map_err(|e| e.message)?;
    u64::try_from(value).map_err(|_| format!("{} 0x{:X} is out of range", what, value))
}
