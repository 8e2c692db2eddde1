//! # Flash backend
//!
//! The raw hardware primitives this crate assumes of the flash controller:
//! read a word, program one aligned double-word, erase one page. Retry
//! policy, interrupt masking and the lock/unlock dance around a *run* of
//! operations live one layer up, in [`crate::service::FlashService`]. This
//! module only has to get one page erased or one double-word programmed,
//! faithfully, or report that it didn't.

use core::fmt;

/// Flash operation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// The controller reported a busy condition that never cleared.
    Busy,
    /// Could not unlock the controller for erase/program.
    UnlockFailed,
    /// The controller reported an error after an erase attempt.
    EraseFailed,
    /// The controller reported an error after a program attempt.
    WriteFailed,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FlashError::Busy => "flash controller busy",
            FlashError::UnlockFailed => "flash unlock sequence failed",
            FlashError::EraseFailed => "page erase failed",
            FlashError::WriteFailed => "double-word program failed",
        };
        f.write_str(msg)
    }
}

/// The hardware flash primitives this crate relies on.
///
/// Implementors are responsible for the register-level sequencing of a
/// single erase or program operation; they are not responsible for retrying,
/// for masking interrupts, or for the overall unlock/lock bracketing of a
/// multi-operation run — see [`crate::service::FlashService`] for that.
pub trait FlashBackend {
    /// Size of one erase-granularity page, in bytes.
    fn page_size(&self) -> u32;

    /// Direct memory-mapped read of a 32-bit word.
    fn read_u32(&self, addr: u32) -> u32;

    /// Direct memory-mapped read of a 64-bit double-word.
    fn read_u64(&self, addr: u32) -> u64 {
        let low = self.read_u32(addr) as u64;
        let high = self.read_u32(addr + 4) as u64;
        (high << 32) | low
    }

    /// Unlock the controller's control register for erase/program.
    fn unlock(&mut self) -> Result<(), FlashError>;

    /// Re-lock the controller's control register.
    fn lock(&mut self);

    /// Erase the single page starting at `addr`. `addr` must be page
    /// aligned; the caller is responsible for that.
    fn erase_page(&mut self, addr: u32) -> Result<(), FlashError>;

    /// Program one aligned 8-byte double-word at `addr`.
    fn program_dword(&mut self, addr: u32, value: u64) -> Result<(), FlashError>;
}

#[cfg(feature = "hardware")]
pub use mcu::Mcu;

#[cfg(feature = "hardware")]
mod mcu {
    use super::{FlashBackend, FlashError};
    use cortex_m::asm;
    use stm32l4::stm32l4x2::FLASH;

    const FLASH_KEYR_KEY_1: u32 = 0x4567_0123;
    const FLASH_KEYR_KEY_2: u32 = 0xCDEF_89AB;

    /// Real flash backend driving the STM32L4's `FLASH` peripheral
    /// registers directly, in the same register-sequencing style as the
    /// reference HAL's page erase/program routines.
    pub struct Mcu {
        flash: FLASH,
    }

    impl Mcu {
        /// Take ownership of the `FLASH` peripheral.
        pub fn new(flash: FLASH) -> Self {
            Mcu { flash }
        }

        fn wait_not_busy(&self) {
            while self.flash.sr.read().bsy().bit_is_set() {
                asm::nop();
            }
        }
    }

    impl FlashBackend for Mcu {
        fn page_size(&self) -> u32 {
            crate::memmap::PAGE_SIZE
        }

        fn read_u32(&self, addr: u32) -> u32 {
            unsafe { core::ptr::read_volatile(addr as *const u32) }
        }

        fn unlock(&mut self) -> Result<(), FlashError> {
            if self.flash.cr.read().lock().bit_is_clear() {
                return Ok(());
            }
            self.flash.keyr.write(|w| unsafe { w.bits(FLASH_KEYR_KEY_1) });
            self.flash.keyr.write(|w| unsafe { w.bits(FLASH_KEYR_KEY_2) });
            if self.flash.cr.read().lock().bit_is_set() {
                #[cfg(feature = "defmt")]
                defmt::error!("flash unlock sequence rejected by controller");
                return Err(FlashError::UnlockFailed);
            }
            Ok(())
        }

        fn lock(&mut self) {
            self.flash.cr.modify(|_, w| w.lock().set_bit());
        }

        fn erase_page(&mut self, addr: u32) -> Result<(), FlashError> {
            if self.flash.sr.read().bsy().bit_is_set() {
                return Err(FlashError::Busy);
            }

            let page = (addr - crate::memmap::FLASH_START_ADDRESS) / crate::memmap::PAGE_SIZE;
            self.flash.cr.modify(|_, w| unsafe {
                w.per().set_bit().pnb().bits(page as u8)
            });
            self.flash.cr.modify(|_, w| w.strt().set_bit());
            self.wait_not_busy();

            let sr = self.flash.sr.read();
            self.flash.cr.modify(|_, w| w.per().clear_bit());
            if sr.eop().bit_is_set() {
                self.flash.sr.modify(|_, w| w.eop().clear_bit());
                Ok(())
            } else {
                #[cfg(feature = "defmt")]
                defmt::warn!("page erase at {=u32:#x} did not complete", addr);
                Err(FlashError::EraseFailed)
            }
        }

        fn program_dword(&mut self, addr: u32, value: u64) -> Result<(), FlashError> {
            if self.flash.sr.read().bsy().bit_is_set() {
                return Err(FlashError::Busy);
            }

            self.flash.cr.modify(|_, w| w.pg().set_bit());
            unsafe {
                core::ptr::write_volatile(addr as *mut u32, value as u32);
                core::ptr::write_volatile((addr + 4) as *mut u32, (value >> 32) as u32);
            }
            self.wait_not_busy();

            let sr = self.flash.sr.read();
            self.flash.cr.modify(|_, w| w.pg().clear_bit());
            if sr.eop().bit_is_set() {
                self.flash.sr.modify(|_, w| w.eop().clear_bit());
                Ok(())
            } else {
                #[cfg(feature = "defmt")]
                defmt::warn!("double-word program at {=u32:#x} did not complete", addr);
                Err(FlashError::WriteFailed)
            }
        }
    }
}

/// In-memory flash backend used by host-side tests and by anything else
/// that wants to exercise the protocol engine without real hardware.
#[cfg(test)]
pub mod fake {
    use super::{FlashBackend, FlashError};
    use std::vec::Vec;

    /// A flat byte array standing in for the whole flash address space,
    /// plus knobs for injecting the transient failures the retry logic in
    /// [`crate::service::FlashService`] needs to be exercised against.
    pub struct FakeFlash {
        base: u32,
        mem: Vec<u8>,
        locked: bool,
        /// Number of times `erase_page` should fail before succeeding.
        pub fail_erases: u32,
        /// Number of times `program_dword` should fail before succeeding.
        pub fail_programs: u32,
        /// Observed `unlock`/`lock` call counts, for testing that every
        /// code path re-locks on exit.
        pub unlock_calls: u32,
        pub lock_calls: u32,
    }

    impl FakeFlash {
        /// Create a fake covering `[base, base + size)`, erased (all `0xFF`).
        pub fn new(base: u32, size: usize) -> Self {
            FakeFlash {
                base,
                mem: std::vec![0xFFu8; size],
                locked: true,
                fail_erases: 0,
                fail_programs: 0,
                unlock_calls: 0,
                lock_calls: 0,
            }
        }

        fn idx(&self, addr: u32) -> usize {
            (addr - self.base) as usize
        }

        /// Whether the last operation left the controller locked.
        pub fn is_locked(&self) -> bool {
            self.locked
        }
    }

    impl FlashBackend for FakeFlash {
        fn page_size(&self) -> u32 {
            crate::memmap::PAGE_SIZE
        }

        fn read_u32(&self, addr: u32) -> u32 {
            let i = self.idx(addr);
            u32::from_le_bytes([self.mem[i], self.mem[i + 1], self.mem[i + 2], self.mem[i + 3]])
        }

        fn unlock(&mut self) -> Result<(), FlashError> {
            self.unlock_calls += 1;
            self.locked = false;
            Ok(())
        }

        fn lock(&mut self) {
            self.lock_calls += 1;
            self.locked = true;
        }

        fn erase_page(&mut self, addr: u32) -> Result<(), FlashError> {
            if self.fail_erases > 0 {
                self.fail_erases -= 1;
                return Err(FlashError::EraseFailed);
            }
            let size = self.page_size() as usize;
            let i = self.idx(addr);
            for b in &mut self.mem[i..i + size] {
                *b = 0xFF;
            }
            Ok(())
        }

        fn program_dword(&mut self, addr: u32, value: u64) -> Result<(), FlashError> {
            if self.fail_programs > 0 {
                self.fail_programs -= 1;
                return Err(FlashError::WriteFailed);
            }
            let i = self.idx(addr);
            self.mem[i..i + 8].copy_from_slice(&value.to_le_bytes());
            Ok(())
        }
    }
}
