//! On-target smoke test for the real flash backend: erase the last page of
//! the application region and program one double-word into it. Destructive
//! to whatever image is currently installed there, so this only runs against
//! hardware that's expendable.

#![no_std]
#![no_main]

use defmt_rtt as _;
use panic_probe as _;

use stm32_iap_core::flash::{FlashBackend, Mcu};
use stm32_iap_core::memmap::{APPLICATION_ADDRESS, PAGE_SIZE};

#[defmt_test::tests]
mod tests {
    use super::*;

    struct State {
        flash: Mcu,
    }

    #[init]
    fn init() -> State {
        let dp = stm32l4::stm32l4x2::Peripherals::take().unwrap();
        State {
            flash: Mcu::new(dp.FLASH),
        }
    }

    #[test]
    fn erase_leaves_page_all_ones(state: &mut State) {
        let addr = APPLICATION_ADDRESS + PAGE_SIZE * 3;
        state.flash.unlock().unwrap();
        state.flash.erase_page(addr).unwrap();
        state.flash.lock();
        defmt::assert_eq!(state.flash.read_u64(addr), u64::MAX);
    }

    #[test]
    fn program_then_read_back_round_trips(state: &mut State) {
        let addr = APPLICATION_ADDRESS + PAGE_SIZE * 3;
        state.flash.unlock().unwrap();
        state.flash.erase_page(addr).unwrap();
        state.flash.program_dword(addr, 0x1122_3344_5566_7788).unwrap();
        state.flash.lock();
        defmt::assert_eq!(state.flash.read_u64(addr), 0x1122_3344_5566_7788);
    }
}
