// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bit/register memory helpers backing [`MemoryDevice`], a ready-made
//! in-process [`Device`](crate::server::Device) for tests and small
//! servers that don't need a custom backing store.
//!
//! Registers are stored one `u16` per word. Coils and discrete inputs
//! are stored packed, one bit per entry, little-endian starting at bit
//! 0 of byte 0 - the same convention [`crate::codec`] uses for the
//! wire coil arrays, generalized here to an arbitrary bit offset into
//! the backing store instead of always starting at the front of the
//! buffer.

use tokio::sync::Mutex;

use crate::frame::{Address, Coil, Exception, Quantity, Word};
use crate::server::device::Device;

fn bit_len_to_bytes(bit_len: usize) -> usize {
    (bit_len + 7) / 8
}

fn get_bit(storage: &[u8], idx: usize) -> bool {
    (storage[idx / 8] >> (idx % 8)) & 1 != 0
}

fn set_bit(storage: &mut [u8], idx: usize, value: bool) {
    let mask = 1u8 << (idx % 8);
    if value {
        storage[idx / 8] |= mask;
    } else {
        storage[idx / 8] &= !mask;
    }
}

/// Reads `count` consecutive bits starting at bit `offset`, or `None`
/// if the range runs past `bit_len`. Unaligned offsets are handled bit
/// by bit rather than assuming byte alignment.
#[must_use]
pub(crate) fn read_mem_bits(
    storage: &[u8],
    offset: usize,
    count: usize,
    bit_len: usize,
) -> Option<Vec<Coil>> {
    let end = offset.checked_add(count)?;
    if end > bit_len {
        return None;
    }
    Some((offset..end).map(|idx| get_bit(storage, idx)).collect())
}

/// Overwrites `data.len()` consecutive bits starting at bit `offset`,
/// preserving every bit outside that range via a read-modify-write per
/// touched byte. Returns `false` if the range runs past `bit_len`.
#[must_use]
pub(crate) fn write_mem_bits(
    storage: &mut [u8],
    offset: usize,
    data: &[Coil],
    bit_len: usize,
) -> bool {
    let Some(end) = offset.checked_add(data.len()) else {
        return false;
    };
    if end > bit_len {
        return false;
    }
    for (idx, &value) in (offset..end).zip(data) {
        set_bit(storage, idx, value);
    }
    true
}

/// Reads `count` consecutive registers starting at `addr`, or `None` if
/// the range runs past the end of `regs`.
#[must_use]
pub(crate) fn read_regs(regs: &[Word], addr: usize, count: usize) -> Option<&[Word]> {
    regs.get(addr..addr.checked_add(count)?)
}

/// Overwrites `count` consecutive registers starting at `addr` with
/// `data`, or returns `false` if the range runs past the end of `regs`.
#[must_use]
pub(crate) fn write_regs(regs: &mut [Word], addr: usize, data: &[Word]) -> bool {
    let Some(end) = addr.checked_add(data.len()) else {
        return false;
    };
    let Some(slice) = regs.get_mut(addr..end) else {
        return false;
    };
    slice.copy_from_slice(data);
    true
}

/// Applies a Modbus `MaskWriteRegister` update in place: `(reg & and_mask) | (or_mask & !and_mask)`.
#[must_use]
pub(crate) fn mask_write_reg(current: Word, and_mask: Word, or_mask: Word) -> Word {
    (current & and_mask) | (or_mask & !and_mask)
}

/// A ready-made in-process [`Device`] backed by flat register/coil
/// storage, sized once at construction. Addresses outside the
/// configured range fail with `IllegalDataAddress`, the same as real
/// Modbus hardware with nothing wired up behind that address.
pub struct MemoryDevice {
    coils: Mutex<Vec<u8>>,
    num_coils: usize,
    discrete_inputs: Mutex<Vec<u8>>,
    num_discrete_inputs: usize,
    input_registers: Mutex<Vec<Word>>,
    holding_registers: Mutex<Vec<Word>>,
}

impl MemoryDevice {
    /// Allocates a device with the given number of coils, discrete
    /// inputs, input registers and holding registers, all initialized
    /// to zero/false.
    #[must_use]
    pub fn new(
        num_coils: usize,
        num_discrete_inputs: usize,
        num_input_registers: usize,
        num_holding_registers: usize,
    ) -> Self {
        Self {
            coils: Mutex::new(vec![0; bit_len_to_bytes(num_coils)]),
            num_coils,
            discrete_inputs: Mutex::new(vec![0; bit_len_to_bytes(num_discrete_inputs)]),
            num_discrete_inputs,
            input_registers: Mutex::new(vec![0; num_input_registers]),
            holding_registers: Mutex::new(vec![0; num_holding_registers]),
        }
    }

    /// Seeds the holding registers, e.g. from test fixtures. Panics if
    /// `values` runs past the configured register count.
    pub async fn seed_holding_registers(&self, addr: Address, values: &[Word]) {
        let mut regs = self.holding_registers.lock().await;
        assert!(write_regs(&mut regs, addr.into(), values));
    }

    /// Seeds the input registers, e.g. from test fixtures. Panics if
    /// `values` runs past the configured register count.
    pub async fn seed_input_registers(&self, addr: Address, values: &[Word]) {
        let mut regs = self.input_registers.lock().await;
        assert!(write_regs(&mut regs, addr.into(), values));
    }
}

#[async_trait::async_trait]
impl Device for MemoryDevice {
    async fn read_coils(&self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>, Exception> {
        let coils = self.coils.lock().await;
        read_mem_bits(&coils, addr.into(), cnt.into(), self.num_coils)
            .ok_or(Exception::IllegalDataAddress)
    }

    async fn read_discrete_inputs(
        &self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Coil>, Exception> {
        let inputs = self.discrete_inputs.lock().await;
        read_mem_bits(&inputs, addr.into(), cnt.into(), self.num_discrete_inputs)
            .ok_or(Exception::IllegalDataAddress)
    }

    async fn write_single_coil(&self, addr: Address, coil: Coil) -> Result<(), Exception> {
        let mut coils = self.coils.lock().await;
        if write_mem_bits(&mut coils, addr.into(), &[coil], self.num_coils) {
            Ok(())
        } else {
            Err(Exception::IllegalDataAddress)
        }
    }

    async fn write_multiple_coils(&self, addr: Address, coils: &[Coil]) -> Result<(), Exception> {
        let mut storage = self.coils.lock().await;
        if write_mem_bits(&mut storage, addr.into(), coils, self.num_coils) {
            Ok(())
        } else {
            Err(Exception::IllegalDataAddress)
        }
    }

    async fn read_input_registers(
        &self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Exception> {
        let regs = self.input_registers.lock().await;
        read_regs(&regs, addr.into(), cnt.into())
            .map(<[Word]>::to_vec)
            .ok_or(Exception::IllegalDataAddress)
    }

    async fn read_holding_registers(
        &self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>, Exception> {
        let regs = self.holding_registers.lock().await;
        read_regs(&regs, addr.into(), cnt.into())
            .map(<[Word]>::to_vec)
            .ok_or(Exception::IllegalDataAddress)
    }

    async fn write_single_register(&self, addr: Address, data: Word) -> Result<(), Exception> {
        let mut regs = self.holding_registers.lock().await;
        if write_regs(&mut regs, addr.into(), &[data]) {
            Ok(())
        } else {
            Err(Exception::IllegalDataAddress)
        }
    }

    async fn write_multiple_registers(
        &self,
        addr: Address,
        data: &[Word],
    ) -> Result<(), Exception> {
        let mut regs = self.holding_registers.lock().await;
        if write_regs(&mut regs, addr.into(), data) {
            Ok(())
        } else {
            Err(Exception::IllegalDataAddress)
        }
    }

    async fn read_write_multiple_registers(
        &self,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>, Exception> {
        let mut regs = self.holding_registers.lock().await;
        if !write_regs(&mut regs, write_addr.into(), write_data) {
            return Err(Exception::IllegalDataAddress);
        }
        read_regs(&regs, read_addr.into(), read_cnt.into())
            .map(<[Word]>::to_vec)
            .ok_or(Exception::IllegalDataAddress)
    }

    async fn mask_write_register(
        &self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<(), Exception> {
        let mut regs = self.holding_registers.lock().await;
        let Some(slice) = regs.get_mut(usize::from(addr)..=usize::from(addr)) else {
            return Err(Exception::IllegalDataAddress);
        };
        slice[0] = mask_write_reg(slice[0], and_mask, or_mask);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_regs_in_bounds() {
        let mut regs = vec![0u16; 4];
        assert!(write_regs(&mut regs, 1, &[10, 20]));
        assert_eq!(read_regs(&regs, 0, 4), Some([0, 10, 20, 0].as_slice()));
    }

    #[test]
    fn read_write_regs_out_of_bounds() {
        let mut regs = vec![0u16; 2];
        assert!(!write_regs(&mut regs, 1, &[10, 20]));
        assert_eq!(read_regs(&regs, 1, 5), None);
    }

    #[test]
    fn bits_roundtrip_aligned() {
        let mut storage = vec![0u8; 1];
        assert!(write_mem_bits(&mut storage, 2, &[true, true, false], 8));
        assert_eq!(
            read_mem_bits(&storage, 0, 8, 8),
            Some(vec![false, false, true, true, false, false, false, false])
        );
    }

    #[test]
    fn bits_roundtrip_crosses_byte_boundary() {
        // 12 bits of storage, write 5 bits starting at bit 6 so the
        // range straddles byte 0 and byte 1.
        let mut storage = vec![0u8; 2];
        let written = [true, false, true, true, true];
        assert!(write_mem_bits(&mut storage, 6, &written, 12));
        assert_eq!(read_mem_bits(&storage, 6, 5, 12), Some(written.to_vec()));
        // Bits outside [6, 11) stay untouched.
        assert_eq!(read_mem_bits(&storage, 0, 6, 12), Some(vec![false; 6]));
    }

    #[test]
    fn bits_out_of_bounds() {
        let storage = vec![0u8; 1];
        assert_eq!(read_mem_bits(&storage, 4, 8, 8), None);
    }

    #[test]
    fn mask_write_applies_and_then_or() {
        // 0x12 & 0xF2 | 0x25 & !0xF2 = 0x12 | 0x05 = 0x17, the worked
        // example from the Modbus application protocol specification.
        assert_eq!(mask_write_reg(0x0012, 0x00F2, 0x0025), 0x0017);
    }

    #[tokio::test]
    async fn memory_device_round_trips_coils_and_registers() {
        let device = MemoryDevice::new(16, 0, 0, 8);
        device
            .write_multiple_coils(2, &[true, true, false])
            .await
            .unwrap();
        assert_eq!(
            device.read_coils(0, 8).await.unwrap(),
            vec![false, false, true, true, false, false, false, false]
        );

        device.seed_holding_registers(0, &[1, 2, 3]).await;
        assert_eq!(device.read_holding_registers(0, 3).await.unwrap(), vec![1, 2, 3]);

        let err = device.read_holding_registers(6, 4).await.unwrap_err();
        assert_eq!(err, Exception::IllegalDataAddress);
    }
}
