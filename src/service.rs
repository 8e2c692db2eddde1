//! # Flash Service
//!
//! Thin semantic layer over [`FlashBackend`]: retries transient failures up
//! to a small bound, brackets every operation with unlock/lock, and runs the
//! whole thing with interrupts disabled. The backend only has to get one
//! page erased or one double-word programmed; this layer is what makes that
//! safe to call from the Protocol Engine.

use crate::flash::{FlashBackend, FlashError};

/// Retry bound for both erase and program operations (§4.1).
const MAX_ATTEMPTS: u8 = 10;

cfg_if::cfg_if! {
    if #[cfg(feature = "hardware")] {
        fn critical_section<R>(f: impl FnOnce() -> R) -> R {
            cortex_m::interrupt::free(|_| f())
        }
    } else {
        fn critical_section<R>(f: impl FnOnce() -> R) -> R {
            f()
        }
    }
}

/// Wraps a [`FlashBackend`] with the retry/lock/interrupt discipline
/// required by spec §4.1 and §5.
pub struct FlashService<B> {
    backend: B,
}

impl<B: FlashBackend> FlashService<B> {
    pub fn new(backend: B) -> Self {
        FlashService { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Erase `nb_pages` pages starting at `start_addr`. Retries each page
    /// up to [`MAX_ATTEMPTS`] times; interrupts are disabled and the flash
    /// unlocked for the whole run, both unconditionally restored on every
    /// exit path.
    pub fn erase_pages(&mut self, start_addr: u32, nb_pages: u32) -> Result<(), FlashError> {
        let page_size = self.backend.page_size();
        critical_section(|| {
            let result = (|| {
                self.backend.unlock()?;
                for page in 0..nb_pages {
                    let addr = start_addr + page * page_size;
                    self.erase_one_page_with_retry(addr)?;
                }
                Ok(())
            })();
            self.backend.lock();
            result
        })
    }

    /// Erase exactly one page, with retry. Used both by `erase_pages` and
    /// directly by the Protocol Engine's CRC_FAILED handler, which only
    /// ever needs to re-erase the single page currently being written.
    pub fn erase_single_page(&mut self, addr: u32) -> Result<(), FlashError> {
        critical_section(|| {
            let result = (|| {
                self.backend.unlock()?;
                self.erase_one_page_with_retry(addr)
            })();
            self.backend.lock();
            result
        })
    }

    fn erase_one_page_with_retry(&mut self, addr: u32) -> Result<(), FlashError> {
        let mut last = Err(FlashError::EraseFailed);
        for _ in 0..MAX_ATTEMPTS {
            last = self.backend.erase_page(addr);
            if last.is_ok() {
                return Ok(());
            }
        }
        #[cfg(feature = "defmt")]
        defmt::error!("erase at {=u32:#x} exhausted retries", addr);
        last
    }

    /// Program one aligned double-word, retrying up to [`MAX_ATTEMPTS`]
    /// times. Interrupts disabled and flash unlocked for the duration,
    /// unconditionally restored on exit.
    pub fn program_dword(&mut self, addr: u32, value: u64) -> Result<(), FlashError> {
        critical_section(|| {
            let result = (|| {
                self.backend.unlock()?;
                let mut last = Err(FlashError::WriteFailed);
                for _ in 0..MAX_ATTEMPTS {
                    last = self.backend.program_dword(addr, value);
                    if last.is_ok() {
                        return Ok(());
                    }
                }
                last
            })();
            self.backend.lock();
            if result.is_err() {
                #[cfg(feature = "defmt")]
                defmt::error!("program at {=u32:#x} exhausted retries", addr);
            }
            result
        })
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        self.backend.read_u32(addr)
    }

    pub fn read_u64(&self, addr: u32) -> u64 {
        self.backend.read_u64(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::FlashService;
    use crate::flash::fake::FakeFlash;

    #[test]
    fn erase_pages_unlocks_and_relocks_even_on_failure() {
        let fake = FakeFlash::new(0x0800_8000, 0x4000);
        let mut svc = FlashService::new(fake);
        svc.erase_pages(0x0800_8000, 2).unwrap();
        assert!(svc.backend().is_locked());
        assert_eq!(svc.backend().lock_calls, 1);
    }

    #[test]
    fn program_dword_retries_within_bound_then_succeeds() {
        let mut fake = FakeFlash::new(0x0800_8000, 0x1000);
        fake.fail_programs = 9;
        let mut svc = FlashService::new(fake);
        assert!(svc.program_dword(0x0800_8000, 0xDEAD_BEEF_0000_0001).is_ok());
        assert_eq!(svc.read_u64(0x0800_8000), 0xDEAD_BEEF_0000_0001);
    }

    #[test]
    fn program_dword_past_retry_bound_fails() {
        let mut fake = FakeFlash::new(0x0800_8000, 0x1000);
        fake.fail_programs = 10;
        let mut svc = FlashService::new(fake);
        assert!(svc.program_dword(0x0800_8000, 1).is_err());
        assert!(svc.backend().is_locked());
    }
}
