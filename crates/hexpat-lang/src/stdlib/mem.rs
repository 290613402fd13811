// std::mem - direct access to the data being analysed

use memchr::memmem;

use crate::eval::function::{FunctionContext, FunctionRegistry, ParameterCount};
use crate::eval::value::Value;
use crate::parser::ast::Endianness;

use super::u64_arg;

/// Optional endianness argument: 0 = native, 1 = big, 2 = little
fn endian_arg(ctx: &FunctionContext<'_>, args: &[Value], index: usize) -> Result<Endianness, String> {
    match args.get(index) {
        None => Ok(ctx.default_endian),
        Some(v) => match v.to_unsigned().map_err(|e| e.message)? {
            0 => Ok(Endianness::native()),
            1 => Ok(Endianness::Big),
            2 => Ok(Endianness::Little),
            other => Err(format!("invalid endianness {}", other)),
        },
    }
}

/// Read `size` bytes at a logical address as an unsigned integer
fn read_raw(ctx: &FunctionContext<'_>, args: &[Value]) -> Result<(u128, u64), String> {
    let address = u64_arg(args, 0, "address")?;
    let size = u64_arg(args, 1, "size")?;
    if !(1..=16).contains(&size) {
        return Err(format!("read size must be between 1 and 16 bytes, got {}", size));
    }
    let endian = endian_arg(ctx, args, 2)?;
    let mut buf = [0u8; 16];
    let bytes = &mut buf[..size as usize];
    ctx.read(address, bytes)?;
    let value = match endian {
        Endianness::Little => bytes.iter().rev().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)),
        Endianness::Big => bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)),
    };
    Ok((value, size))
}

/// Bytes read per step while searching
const SEARCH_CHUNK: usize = 0x10000;

fn find_sequence(ctx: &FunctionContext<'_>, from: u64, needle: &[u8]) -> Result<Option<u64>, String> {
    find_in_chunks(ctx, from, needle, SEARCH_CHUNK)
}

/// Windows start `chunk` bytes apart and overlap by `needle.len() - 1`,
/// so a match across a window edge is still found
fn find_in_chunks(
    ctx: &FunctionContext<'_>,
    from: u64,
    needle: &[u8],
    chunk: usize,
) -> Result<Option<u64>, String> {
    let end = ctx.end_address();
    if needle.is_empty() {
        return Ok(None);
    }
    let finder = memmem::Finder::new(needle);
    let mut buf = vec![0u8; chunk + needle.len() - 1];
    let mut start = from;
    while start < end {
        let window = (end - start).min(buf.len() as u64) as usize;
        if window < needle.len() {
            break;
        }
        let bytes = &mut buf[..window];
        ctx.read(start, bytes)?;
        if let Some(i) = finder.find(bytes) {
            return Ok(Some(start + i as u64));
        }
        start += chunk as u64;
    }
    Ok(None)
}

/// Check that `len` bytes at `address` lie inside the data
fn check_range(ctx: &FunctionContext<'_>, address: u64, len: u64) -> Result<usize, String> {
    let in_range = address >= ctx.base_address
        && address.checked_add(len).is_some_and(|end| end <= ctx.end_address());
    if !in_range {
        return Err(format!(
            "reading 0x{:X} bytes at 0x{:X} is outside the data (0x{:X}..0x{:X})",
            len,
            address,
            ctx.base_address,
            ctx.end_address()
        ));
    }
    usize::try_from(len).map_err(|_| "string length is too large".to_string())
}

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("std::mem::size", ParameterCount::Exactly(0), |ctx, _| {
        Ok(Some(Value::Unsigned(u128::from(ctx.provider.size()))))
    });

    registry.register("std::mem::base_address", ParameterCount::Exactly(0), |ctx, _| {
        Ok(Some(Value::Unsigned(u128::from(ctx.base_address))))
    });

    // std::mem::eof() - cursor reached the end of the data
    registry.register("std::mem::eof", ParameterCount::Exactly(0), |ctx, _| {
        Ok(Some(Value::Bool(ctx.offset >= ctx.end_address())))
    });

    // std::mem::read_unsigned(address, size[, endian])
    registry.register("std::mem::read_unsigned", ParameterCount::Between(2, 3), |ctx, args| {
        let (value, _) = read_raw(ctx, args)?;
        Ok(Some(Value::Unsigned(value)))
    });

    registry.register("std::mem::read_signed", ParameterCount::Between(2, 3), |ctx, args| {
        let (value, size) = read_raw(ctx, args)?;
        let shift = 128 - size * 8;
        Ok(Some(Value::Signed(((value << shift) as i128) >> shift)))
    });

    // std::mem::read_float(address[, size[, endian]]), size 4 or 8
    registry.register("std::mem::read_float", ParameterCount::Between(1, 3), |ctx, args| {
        let address = u64_arg(args, 0, "address")?;
        let size = if args.len() > 1 { u64_arg(args, 1, "size")? } else { 4 };
        let raw_args = [
            Value::Unsigned(u128::from(address)),
            Value::Unsigned(u128::from(size)),
            args.get(2).cloned().unwrap_or(Value::Unsigned(match ctx.default_endian {
                Endianness::Big => 1,
                Endianness::Little => 2,
            })),
        ];
        let value = match size {
            4 => f64::from(f32::from_bits(read_raw(ctx, &raw_args)?.0 as u32)),
            8 => f64::from_bits(read_raw(ctx, &raw_args)?.0 as u64),
            other => return Err(format!("float size must be 4 or 8 bytes, got {}", other)),
        };
        Ok(Some(Value::Float(value)))
    });

    // std::mem::read_string(address, length)
    registry.register("std::mem::read_string", ParameterCount::Exactly(2), |ctx, args| {
        let address = u64_arg(args, 0, "address")?;
        let len = u64_arg(args, 1, "length")?;
        let len = check_range(ctx, address, len)?;
        let mut buf = vec![0u8; len];
        ctx.read(address, &mut buf)?;
        Ok(Some(Value::String(buf.iter().map(|b| *b as char).collect())))
    });

    // std::mem::find_sequence(from, bytes...) - address of the first match, or -1
    registry.register("std::mem::find_sequence", ParameterCount::AtLeast(2), |ctx, args| {
        let from = u64_arg(args, 0, "start address")?;
        let needle = args[1..]
            .iter()
            .map(|v| {
                let b = v.to_unsigned().map_err(|e| e.message)?;
                u8::try_from(b).map_err(|_| format!("0x{:X} is not a byte", b))
            })
            .collect::<Result<Vec<u8>, String>>()?;
        Ok(Some(match find_sequence(ctx, from, &needle)? {
            Some(address) => Value::Unsigned(u128::from(address)),
            None => Value::Signed(-1),
        }))
    });
}
