// ABOUTME: Typed variable table access with transparent non-volatile load/store
// ABOUTME: Variable cells are a tagged union (VarValue), not a raw-pointer + datatype-tag pair

use crate::config::{Config, NvCellWidth};
use crate::slave::error::SlaveError;
use tracing::warn;

/// Storage class of a variable table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Volatile,
    Persistent,
}

/// Declared data type of a variable table entry, with its wire byte width
/// (`{1,1,2,2,4,4,4}` in declaration order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl DataType {
    pub fn byte_width(self) -> u8 {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
        }
    }
}

/// A tagged-union scalar cell, standing in for a `void *` + datatype tag
/// pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
}

impl VarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            VarValue::U8(_) => DataType::U8,
            VarValue::I8(_) => DataType::I8,
            VarValue::U16(_) => DataType::U16,
            VarValue::I16(_) => DataType::I16,
            VarValue::U32(_) => DataType::U32,
            VarValue::I32(_) => DataType::I32,
            VarValue::F32(_) => DataType::F32,
        }
    }

    /// Hex mode (default): the raw bit pattern of the typed field, widened
    /// into the low bits of a 32-bit word with upper bits zero.
    pub fn to_wire_hex(self) -> u32 {
        match self {
            VarValue::U8(v) => v as u32,
            VarValue::I8(v) => v as u8 as u32,
            VarValue::U16(v) => v as u32,
            VarValue::I16(v) => v as u16 as u32,
            VarValue::U32(v) => v,
            VarValue::I32(v) => v as u32,
            VarValue::F32(v) => v.to_bits(),
        }
    }

    /// Hex mode: reinterprets `raw`'s low bits as `dtype`'s bit pattern.
    pub fn from_wire_hex(dtype: DataType, raw: u32) -> VarValue {
        match dtype {
            DataType::U8 => VarValue::U8(raw as u8),
            DataType::I8 => VarValue::I8(raw as u8 as i8),
            DataType::U16 => VarValue::U16(raw as u16),
            DataType::I16 => VarValue::I16(raw as u16 as i16),
            DataType::U32 => VarValue::U32(raw),
            DataType::I32 => VarValue::I32(raw as i32),
            DataType::F32 => VarValue::F32(f32::from_bits(raw)),
        }
    }

    /// Float mode (deprecated, reserved): integer types are converted via
    /// floating point, with precision loss beyond 24 bits.
    pub fn to_wire_float_mode(self) -> u32 {
        let f = match self {
            VarValue::U8(v) => v as f32,
            VarValue::I8(v) => v as f32,
            VarValue::U16(v) => v as f32,
            VarValue::I16(v) => v as f32,
            VarValue::U32(v) => v as f32,
            VarValue::I32(v) => v as f32,
            VarValue::F32(v) => v,
        };
        f.to_bits()
    }

    pub fn from_wire_float_mode(dtype: DataType, raw: u32) -> VarValue {
        let f = f32::from_bits(raw);
        match dtype {
            DataType::U8 => VarValue::U8(f as u8),
            DataType::I8 => VarValue::I8(f as i8),
            DataType::U16 => VarValue::U16(f as u16),
            DataType::I16 => VarValue::I16(f as i16),
            DataType::U32 => VarValue::U32(f as u32),
            DataType::I32 => VarValue::I32(f as i32),
            DataType::F32 => VarValue::F32(f),
        }
    }
}

/// Optional action run after a successful set-var.
pub type PostWriteAction = Box<dyn FnMut() + Send>;

/// A single variable table entry.
pub struct VarEntry {
    pub value: VarValue,
    pub storage: StorageClass,
    pub action: Option<PostWriteAction>,
}

impl VarEntry {
    pub fn volatile(value: VarValue) -> Self {
        Self {
            value,
            storage: StorageClass::Volatile,
            action: None,
        }
    }

    pub fn persistent(value: VarValue) -> Self {
        Self {
            value,
            storage: StorageClass::Persistent,
            action: None,
        }
    }

    pub fn with_action(mut self, action: PostWriteAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// User-supplied variable table, addressed 1-origin on the wire but 0-origin
/// through this trait.
pub trait VarTable {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn entry(&self, index: usize) -> Option<&VarEntry>;
    fn entry_mut(&mut self, index: usize) -> Option<&mut VarEntry>;
}

/// NV (non-volatile) storage callback surface. Implementations are assumed
/// synchronous and idempotent per address.
pub trait NvStore {
    /// Reads the cell at `address`; returns `None` on failure.
    fn nv_read(&mut self, address: u16) -> Option<u32>;
    /// Writes the low cell-width bits of `value` at `address`; returns
    /// `false` on failure.
    fn nv_write(&mut self, address: u16, value: u32) -> bool;
}

/// Maps a persistent variable's table index to its NV base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub var_index: usize,
    pub base_address: u16,
}

/// Auto-built mapping from persistent variable indices to NV base
/// addresses, built by a single linear scan over the variable table.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// Builds the partition table. Two calls over the same table and config
    /// produce identical assignments, since the scan is a pure function of
    /// `table`'s entries in order.
    pub fn build(table: &dyn VarTable, cfg: &Config) -> Result<Self, SlaveError> {
        let mut entries = Vec::new();
        let mut next_address = cfg.nv_base_address;
        let cell_bytes = cfg.nv_cell_width.bytes();

        for i in 0..table.len() {
            let entry = table.entry(i).expect("index < len");
            if entry.storage != StorageClass::Persistent {
                continue;
            }
            if entries.len() == cfg.max_nv_vars {
                return Err(SlaveError::NvPartitionTableExhausted);
            }
            entries.push(PartitionEntry {
                var_index: i,
                base_address: next_address,
            });

            let width = entry.value.data_type().byte_width();
            let stride = cells_for_width(width, cell_bytes);
            next_address += stride as u16;
        }

        Ok(Self { entries })
    }

    pub fn address_of(&self, var_index: usize) -> Option<u16> {
        self.entries
            .iter()
            .find(|e| e.var_index == var_index)
            .map(|e| e.base_address)
    }

    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }
}

fn cells_for_width(width_bytes: u8, cell_bytes: u32) -> u32 {
    (width_bytes as u32).div_ceil(cell_bytes).max(1)
}

/// Reads a typed field wider than the NV cell by decomposing it into
/// `ceil(width/cell)` little-endian cells and OR-combining them.
pub fn nv_read_multi_cell(
    nv: &mut dyn NvStore,
    base_address: u16,
    width_bytes: u8,
    cell_width: NvCellWidth,
) -> Result<u32, SlaveError> {
    let cell_bytes = cell_width.bytes();
    let cell_bits = cell_bytes * 8;
    let n_cells = cells_for_width(width_bytes, cell_bytes);
    let mut acc: u32 = 0;
    for i in 0..n_cells {
        let addr = base_address + i as u16;
        let cell = nv
            .nv_read(addr)
            .ok_or(SlaveError::NvReadFailed(addr))?;
        acc |= cell << (i * cell_bits);
    }
    Ok(acc)
}

/// Writes a typed field as `ceil(width/cell)` little-endian cells, masking
/// each to the cell width.
pub fn nv_write_multi_cell(
    nv: &mut dyn NvStore,
    base_address: u16,
    width_bytes: u8,
    cell_width: NvCellWidth,
    value: u32,
) -> Result<(), SlaveError> {
    let cell_bytes = cell_width.bytes();
    let cell_bits = cell_bytes * 8;
    let mask: u32 = if cell_bits >= 32 {
        u32::MAX
    } else {
        (1u32 << cell_bits) - 1
    };
    let n_cells = cells_for_width(width_bytes, cell_bytes);
    for i in 0..n_cells {
        let addr = base_address + i as u16;
        let cell = (value >> (i * cell_bits)) & mask;
        if !nv.nv_write(addr, cell) {
            return Err(SlaveError::NvWriteFailed(addr));
        }
    }
    Ok(())
}

/// Variable access layer: owns the table handle, the NV callback object, and
/// the partition table built at init.
pub struct VarAccess<'a> {
    table: &'a mut dyn VarTable,
    nv: Option<&'a mut dyn NvStore>,
    partitions: PartitionTable,
    cfg: Config,
}

impl<'a> VarAccess<'a> {
    /// Builds the persistent partition table and warm-starts persistent
    /// entries from NV. NV read failures at init are non-fatal and retain
    /// the in-memory default.
    pub fn init(
        table: &'a mut dyn VarTable,
        nv: Option<&'a mut dyn NvStore>,
        cfg: Config,
    ) -> Result<Self, SlaveError> {
        let partitions = PartitionTable::build(table, &cfg)?;
        let mut access = Self {
            table,
            nv,
            partitions,
            cfg,
        };
        access.warm_start();
        Ok(access)
    }

    fn warm_start(&mut self) {
        let entries: Vec<PartitionEntry> = self.partitions.entries().to_vec();
        for pe in entries {
            if let Err(e) = self.refresh_from_nv(pe.var_index) {
                warn!(error = %e, index = pe.var_index, "NV warm-start read failed, keeping default");
            }
        }
    }

    fn index_for(&self, num: i16) -> Result<usize, SlaveError> {
        if num <= 0 || num as usize > self.table.len() {
            return Err(SlaveError::VarNumberInvalid(num));
        }
        Ok(num as usize - 1)
    }

    fn refresh_from_nv(&mut self, index: usize) -> Result<(), SlaveError> {
        let base = self
            .partitions
            .address_of(index)
            .ok_or(SlaveError::NvAddressUnknown(index))?;
        let dtype = self
            .table
            .entry(index)
            .ok_or(SlaveError::VarNumberInvalid(index as i16 + 1))?
            .value
            .data_type();
        let nv = self.nv.as_deref_mut().ok_or(SlaveError::NvReadFailed(base))?;
        let raw = nv_read_multi_cell(nv, base, dtype.byte_width(), self.cfg.nv_cell_width)?;
        let entry = self.table.entry_mut(index).expect("index validated above");
        entry.value = VarValue::from_wire_hex(dtype, raw);
        Ok(())
    }

    fn sync_to_nv(&mut self, index: usize) -> Result<(), SlaveError> {
        let base = self
            .partitions
            .address_of(index)
            .ok_or(SlaveError::NvAddressUnknown(index))?;
        let entry = self.table.entry(index).expect("index validated by caller");
        let dtype = entry.value.data_type();
        let raw = entry.value.to_wire_hex();
        let nv = self.nv.as_deref_mut().ok_or(SlaveError::NvWriteFailed(base))?;
        nv_write_multi_cell(nv, base, dtype.byte_width(), self.cfg.nv_cell_width, raw)
    }

    pub fn entry(&self, num: i16) -> Result<&VarEntry, SlaveError> {
        let idx = self.index_for(num)?;
        Ok(self.table.entry(idx).expect("index validated"))
    }

    /// Get-var: opportunistically refreshes persistent entries from NV, then
    /// returns the current 32-bit wire value. A failed refresh is non-fatal;
    /// the last known in-memory value is returned, same as the warm-start
    /// behavior at init.
    pub fn read_wire(&mut self, num: i16) -> Result<u32, SlaveError> {
        let idx = self.index_for(num)?;
        if self.table.entry(idx).expect("validated").storage == StorageClass::Persistent {
            if let Err(e) = self.refresh_from_nv(idx) {
                warn!(error = %e, index = idx, "NV refresh on get-var failed, returning last known value");
            }
        }
        Ok(self.table.entry(idx).expect("validated").value.to_wire_hex())
    }

    /// Set-var sequence: read old, write new, NV-sync on persistent entries
    /// (restoring the old value on NV failure), then run the post-write
    /// action.
    pub fn write_wire(&mut self, num: i16, raw: u32) -> Result<u32, SlaveError> {
        let idx = self.index_for(num)?;
        let dtype = self.table.entry(idx).expect("validated").value.data_type();
        let old_value = self.table.entry(idx).expect("validated").value;
        let new_value = VarValue::from_wire_hex(dtype, raw);

        self.table.entry_mut(idx).expect("validated").value = new_value;

        let persistent = self.table.entry(idx).expect("validated").storage == StorageClass::Persistent;
        if persistent {
            if let Err(e) = self.sync_to_nv(idx) {
                self.table.entry_mut(idx).expect("validated").value = old_value;
                return Err(e);
            }
        }

        if let Some(action) = self.table.entry_mut(idx).expect("validated").action.as_mut() {
            action();
        }

        Ok(self.table.entry(idx).expect("validated").value.to_wire_hex())
    }

    pub fn partitions(&self) -> &PartitionTable {
        &self.partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeNv {
        cells: std::collections::HashMap<u16, u32>,
        fail_write_at: Option<u16>,
    }

    impl FakeNv {
        fn new() -> Self {
            Self {
                cells: Default::default(),
                fail_write_at: None,
            }
        }
    }

    impl NvStore for FakeNv {
        fn nv_read(&mut self, address: u16) -> Option<u32> {
            self.cells.get(&address).copied()
        }
        fn nv_write(&mut self, address: u16, value: u32) -> bool {
            if self.fail_write_at == Some(address) {
                return false;
            }
            self.cells.insert(address, value);
            true
        }
    }

    struct VecTable(Vec<VarEntry>);
    impl VarTable for VecTable {
        fn len(&self) -> usize {
            self.0.len()
        }
        fn entry(&self, index: usize) -> Option<&VarEntry> {
            self.0.get(index)
        }
        fn entry_mut(&mut self, index: usize) -> Option<&mut VarEntry> {
            self.0.get_mut(index)
        }
    }

    fn sample_table() -> VecTable {
        VecTable(vec![
            VarEntry::volatile(VarValue::F32(2.356)),     // #1
            VarEntry::volatile(VarValue::U8(0)),          // #2
            VarEntry::persistent(VarValue::U8(0xF5)),     // #3
            VarEntry::persistent(VarValue::U16(0x86E6)),  // #4
            VarEntry::volatile(VarValue::I32(-87344381)), // #5
        ])
    }

    #[test]
    fn partition_stability_same_table_twice() {
        let table = sample_table();
        let cfg = Config::default();
        let p1 = PartitionTable::build(&table, &cfg).unwrap();
        let p2 = PartitionTable::build(&table, &cfg).unwrap();
        assert_eq!(p1.entries(), p2.entries());
    }

    #[test]
    fn partition_exhaustion_is_fatal() {
        let table = sample_table();
        let mut cfg = Config::default();
        cfg.max_nv_vars = 1;
        assert_eq!(
            PartitionTable::build(&table, &cfg).unwrap_err(),
            SlaveError::NvPartitionTableExhausted
        );
    }

    #[test]
    fn get_u8_var_returns_wire_hex() {
        let mut table = sample_table();
        let mut nv = FakeNv::new();
        let mut access = VarAccess::init(&mut table, Some(&mut nv), Config::default()).unwrap();
        assert_eq!(access.read_wire(3).unwrap(), 0xF5);
    }

    #[test]
    fn get_i32_var_returns_twos_complement_bits() {
        let mut table = sample_table();
        let mut access = VarAccess::init(&mut table, None, Config::default()).unwrap();
        assert_eq!(access.read_wire(5).unwrap(), 0xFACB3B03);
    }

    #[test]
    fn get_f32_var_returns_ieee_bits() {
        let mut table = sample_table();
        let mut access = VarAccess::init(&mut table, None, Config::default()).unwrap();
        assert_eq!(access.read_wire(1).unwrap(), 0x4016C8B4);
    }

    #[test]
    fn set_then_get_persistent_var_round_trips_through_nv() {
        let mut table = sample_table();
        let mut nv = FakeNv::new();
        let mut access = VarAccess::init(&mut table, Some(&mut nv), Config::default()).unwrap();
        access.write_wire(3, 0x42).unwrap();
        assert_eq!(access.read_wire(3).unwrap(), 0x42);
    }

    #[test]
    fn nv_write_failure_restores_old_value() {
        let mut table = sample_table();
        let mut nv = FakeNv::new();
        let addr = {
            let access = VarAccess::init(&mut table, None, Config::default()).unwrap();
            access.partitions().address_of(2).unwrap()
        };
        nv.fail_write_at = Some(addr);
        let mut access = VarAccess::init(&mut table, Some(&mut nv), Config::default()).unwrap();
        let before = access.entry(3).unwrap().value;
        assert!(access.write_wire(3, 0x99).is_err());
        assert_eq!(access.entry(3).unwrap().value, before);
    }

    #[test]
    fn var_number_out_of_range_is_invalid() {
        let mut table = sample_table();
        let mut access = VarAccess::init(&mut table, None, Config::default()).unwrap();
        assert_eq!(
            access.read_wire(0).unwrap_err(),
            SlaveError::VarNumberInvalid(0)
        );
        assert_eq!(
            access.read_wire(99).unwrap_err(),
            SlaveError::VarNumberInvalid(99)
        );
    }
}
