// ABOUTME: Runtime configuration knobs for packet geometry, NV partitioning, and wire error offsets
// ABOUTME: A Default-able struct in place of compile-time constants

/// NV cell addressability, in bytes per addressable cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvCellWidth {
    Byte = 1,
    Word = 2,
    Dword = 4,
}

impl NvCellWidth {
    pub fn bytes(self) -> u32 {
        self as u32
    }
}

/// Configuration knobs for a [`crate::slave::Slave`] or [`crate::master::Master`].
///
/// Defaults: 128-byte packet buffers, up to 10 persistent variables,
/// word-addressable NV, and an error offset of `0x100`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Receive packet buffer capacity in bytes.
    pub rx_packet_len: usize,
    /// Transmit packet buffer capacity in bytes.
    pub tx_packet_len: usize,
    /// Upper bound on the number of persistent (NV-backed) variables.
    pub max_nv_vars: usize,
    /// NV addressability.
    pub nv_cell_width: NvCellWidth,
    /// First NV address used by the partition table.
    pub nv_base_address: u16,
    /// Cap on the number of values parsed out of a single request.
    pub max_request_values: usize,
    /// Added to a protocol error's discriminant to form the wire error code.
    pub sci_error_offset: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rx_packet_len: 128,
            tx_packet_len: 128,
            max_nv_vars: 10,
            nv_cell_width: NvCellWidth::Word,
            nv_base_address: 0,
            max_request_values: 10,
            sci_error_offset: 0x100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.rx_packet_len, 128);
        assert_eq!(cfg.tx_packet_len, 128);
        assert_eq!(cfg.max_nv_vars, 10);
        assert_eq!(cfg.nv_cell_width, NvCellWidth::Word);
        assert_eq!(cfg.nv_base_address, 0);
        assert_eq!(cfg.max_request_values, 10);
        assert_eq!(cfg.sci_error_offset, 0x100);
    }
}
