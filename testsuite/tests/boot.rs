//! On-target smoke test for the Boot Decider against the real flash
//! backend. Only exercises the read side: it never calls
//! [`stm32_iap_core::boot::BootDecider::execute`], since that jump would
//! tear down the test harness itself.

#![no_std]
#![no_main]

use defmt_rtt as _;
use panic_probe as _;

use stm32_iap_core::boot::{BootDecider, BootDecision};
use stm32_iap_core::flash::Mcu;
use stm32_iap_core::service::FlashService;

#[defmt_test::tests]
mod tests {
    use super::*;

    struct State {
        service: FlashService<Mcu>,
    }

    #[init]
    fn init() -> State {
        let dp = stm32l4::stm32l4x2::Peripherals::take().unwrap();
        State {
            service: FlashService::new(Mcu::new(dp.FLASH)),
        }
    }

    #[test]
    fn decide_returns_without_touching_the_jumper(state: &mut State) {
        // Whatever marker state is currently on the board, deciding must
        // not panic or hang; only `execute` may diverge.
        let decision = BootDecider::decide(&mut state.service);
        match decision {
            BootDecision::Stay => defmt::info!("boot decider: stay resident"),
            BootDecision::Jump { initial_sp, reset_vector } => {
                defmt::info!(
                    "boot decider: would jump to sp={=u32:#x} pc={=u32:#x}",
                    initial_sp,
                    reset_vector
                );
            }
        }
    }
}
