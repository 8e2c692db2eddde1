//! # Jumper
//!
//! The two places this crate hands execution to code it doesn't own: the
//! newly installed application image, and the vendor factory ROM
//! bootloader. Both rebase the stack pointer and branch; neither returns.
//! Modeled as traits (the Design Notes' "sentinel operation the test
//! harness stubs out") so [`crate::boot::BootDecider`] and the
//! `PROGRAM_START` handler stay unit-testable without executing `!`-typed
//! assembly.

/// Jump to the installed application image.
pub trait ImageJumper {
    /// Rebase MSP to `initial_sp` and branch to `reset_vector`. Never
    /// returns; a return is fatal.
    fn jump(&mut self, initial_sp: u32, reset_vector: u32) -> !;
}

/// Jump to the vendor factory ROM bootloader.
pub trait FactoryRomJumper {
    /// Quiesce the machine (SysTick, clocks, NVIC) and branch into the
    /// factory ROM at `base`. Never returns; a return is fatal.
    fn jump(&mut self, base: u32) -> !;
}

#[cfg(feature = "hardware")]
pub use real::{RealImageJumper, RealFactoryRomJumper};

#[cfg(feature = "hardware")]
mod real {
    use super::{FactoryRomJumper, ImageJumper};

    /// Jumps to the newly installed application image.
    pub struct RealImageJumper;

    impl ImageJumper for RealImageJumper {
        fn jump(&mut self, initial_sp: u32, reset_vector: u32) -> ! {
            unsafe {
                cortex_m::register::msp::write(initial_sp);
                let entry: extern "C" fn() -> ! = core::mem::transmute(reset_vector as usize);
                entry()
            }
        }
    }

    const RCC_BASE: u32 = 0x4002_1000;
    const RCC_CR: *mut u32 = RCC_BASE as *mut u32;
    const RCC_CFGR: *mut u32 = (RCC_BASE + 0x08) as *mut u32;
    const RCC_PLLCFGR: *mut u32 = (RCC_BASE + 0x0C) as *mut u32;

    const RCC_CR_MSION: u32 = 1 << 0;
    const RCC_CR_MSIRDY: u32 = 1 << 1;
    const RCC_CR_HSEON: u32 = 1 << 16;
    const RCC_CR_HSEBYP: u32 = 1 << 18;
    const RCC_CR_CSSON: u32 = 1 << 19;
    const RCC_CR_PLLON: u32 = 1 << 24;

    /// Falls back to the MSI clock and tears down HSE/PLL/CSS, the same
    /// reset-default clock tree `HAL_RCC_DeInit` restores
    /// (`examples/original_source/Src/IAP.c:85`). Direct register writes,
    /// not the `stm32l4` PAC, matching the raw-address style already used
    /// for the NVIC banks below — this runs once, on a path that never
    /// returns, so there's no backend to abstract behind a trait.
    unsafe fn reset_clocks_to_msi() {
        RCC_CR.write_volatile(RCC_CR.read_volatile() | RCC_CR_MSION);
        while RCC_CR.read_volatile() & RCC_CR_MSIRDY == 0 {}

        // CFGR reset value selects MSI as SYSCLK and resets every prescaler.
        RCC_CFGR.write_volatile(0x0000_0000);

        RCC_CR.write_volatile(
            RCC_CR.read_volatile() & !(RCC_CR_HSEON | RCC_CR_HSEBYP | RCC_CR_CSSON | RCC_CR_PLLON),
        );
        // PLLCFGR reset value (RM0394): PLLN defaults to 16, PLL source none.
        RCC_PLLCFGR.write_volatile(0x0000_1000);
    }

    /// Jumps to the vendor factory ROM bootloader at [`crate::memmap::FACTORY_ROM_BASE`].
    pub struct RealFactoryRomJumper;

    impl FactoryRomJumper for RealFactoryRomJumper {
        fn jump(&mut self, base: u32) -> ! {
            unsafe {
                // Stop SysTick.
                let syst = &*cortex_m::peripheral::SYST::PTR;
                syst.csr.write(0);
                syst.rvr.write(0);
                syst.cvr.write(0);

                // Deinitialize clocks before touching interrupts (spec
                // §4.5's sequence), equivalent to the original's
                // HAL_RCC_DeInit(): fall back to the power-on MSI clock and
                // tear down HSE/PLL/CSS so the factory ROM starts from the
                // same reset-default clock tree a cold boot would see.
                reset_clocks_to_msi();

                cortex_m::interrupt::disable();
                // Clear and unpend all five NVIC banks (spec §4.5, scenario
                // S1) so nothing the resident image armed fires once
                // interrupts come back.
                const ICER0: *mut u32 = 0xE000_E180 as *mut u32;
                const ICPR0: *mut u32 = 0xE000_E280 as *mut u32;
                for bank in 0..5u32 {
                    ICER0.add(bank as usize).write_volatile(0xFFFF_FFFF);
                    ICPR0.add(bank as usize).write_volatile(0xFFFF_FFFF);
                }
                cortex_m::interrupt::enable();

                let stack_top = core::ptr::read_volatile(base as *const u32);
                let reset_vector = core::ptr::read_volatile((base + 4) as *const u32);
                cortex_m::register::msp::write(stack_top);
                let entry: extern "C" fn() -> ! = core::mem::transmute(reset_vector as usize);
                entry()
            }
        }
    }
}

/// Fake jumpers for host-side tests. [`crate::boot::BootDecider::decide`]
/// and the `PROGRAM_START` handler never call these in tests — they only
/// assert on the pure decision the engine/decider returns — so these exist
/// purely to satisfy the trait bound and panic if a test regresses into
/// actually invoking a jump.
#[cfg(test)]
pub mod fake {
    use super::{FactoryRomJumper, ImageJumper};

    #[derive(Default)]
    pub struct UnreachableImageJumper;

    impl ImageJumper for UnreachableImageJumper {
        fn jump(&mut self, initial_sp: u32, reset_vector: u32) -> ! {
            panic!(
                "test jumper invoked with sp={:#x} reset_vector={:#x}",
                initial_sp, reset_vector
            );
        }
    }

    #[derive(Default)]
    pub struct UnreachableFactoryRomJumper;

    impl FactoryRomJumper for UnreachableFactoryRomJumper {
        fn jump(&mut self, _base: u32) -> ! {
            panic!("test factory ROM jumper invoked");
        }
    }
}
