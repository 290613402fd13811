// ByteProvider trait: read-only abstraction over the bytes a pattern describes

/// Read-only access to the bytes a pattern is evaluated against.
///
/// Offsets passed to [`ByteProvider::read`] are physical (0-based). The
/// evaluator works with logical addresses and subtracts
/// [`ByteProvider::base_address`] before every read.
pub trait ByteProvider {
    /// Fill `buf` with the bytes starting at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), String>;

    /// Total addressable length in bytes
    fn size(&self) -> u64;

    /// Logical origin of the data (default 0)
    fn base_address(&self) -> u64 {
        0
    }
}

fn read_from(data: &[u8], offset: u64, buf: &mut [u8]) -> Result<(), String> {
    let start = usize::try_from(offset).map_err(|_| format!("offset 0x{:X} is out of range", offset))?;
    let end = start.checked_add(buf.len()).filter(|end| *end <= data.len());
    match end {
        Some(end) => {
            buf.copy_from_slice(&data[start..end]);
            Ok(())
        }
        None => Err(format!(
            "read of {} bytes at 0x{:X} is out of bounds (data size 0x{:X})",
            buf.len(),
            offset,
            data.len()
        )),
    }
}

/// ByteProvider backed by a borrowed byte slice
#[derive(Debug, Clone, Copy)]
pub struct SliceProvider<'a> {
    data: &'a [u8],
    base_address: u64,
}

impl<'a> SliceProvider<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, base_address: 0 }
    }

    pub fn with_base_address(mut self, base_address: u64) -> Self {
        self.base_address = base_address;
        self
    }
}

impl ByteProvider for SliceProvider<'_> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), String> {
        read_from(self.data, offset, buf)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn base_address(&self) -> u64 {
        self.base_address
    }
}

/// ByteProvider that owns its bytes
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    data: Vec<u8>,
    base_address: u64,
}

impl MemoryProvider {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, base_address: 0 }
    }

    pub fn with_base_address(mut self, base_address: u64) -> Self {
        self.base_address = base_address;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl ByteProvider for MemoryProvider {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), String> {
        read_from(&self.data, offset, buf)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn base_address(&self) -> u64 {
        self.base_address
    }
}

/// View of another provider with its base address replaced.
///
/// Used when a `#pragma base_address` overrides the provider's own origin.
/// Hosts that format a run's patterns afterwards should wrap their provider
/// the same way, using `RunResult::base_address`.
pub struct RebasedProvider<'a> {
    inner: &'a dyn ByteProvider,
    base_address: u64,
}

impl<'a> RebasedProvider<'a> {
    pub fn new(inner: &'a dyn ByteProvider, base_address: u64) -> Self {
        Self { inner, base_address }
    }
}

impl ByteProvider for RebasedProvider<'_> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), String> {
        self.inner.read(offset, buf)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn base_address(&self) -> u64 {
        self.base_address
    }
}
