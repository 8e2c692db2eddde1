//! # Boot Decider & Jumper
//!
//! Runs at reset, before the Protocol Engine is wired up: inspects the
//! Marker Store and either stays in this resident image or jumps to the
//! installed image.

use crate::flash::FlashBackend;
use crate::handoff::ImageJumper;
use crate::markers::MarkerStore;
use crate::memmap::{APPLICATION_ADDRESS, IAP_MAGIC, SRAM_SP_MASK, SRAM_SP_PATTERN};
use crate::service::FlashService;

/// The pure outcome of inspecting the Marker Store, decoupled from the
/// actual (never-returning) jump so it can be unit-tested directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootDecision {
    /// No valid marker, or the candidate image failed the sanity check:
    /// stay resident.
    Stay,
    /// Jump to the installed image with this initial stack pointer and
    /// reset vector.
    Jump { initial_sp: u32, reset_vector: u32 },
}

pub struct BootDecider;

impl BootDecider {
    /// Inspect the Marker Store and decide whether to stay resident or jump
    /// to the installed image (spec §4.6, testable property 6).
    pub fn decide<B: FlashBackend>(service: &mut FlashService<B>) -> BootDecision {
        let (request_flag, entry_address) = {
            let markers = MarkerStore::new(service);
            (markers.request_flag(), markers.entry_address())
        };
        if request_flag != IAP_MAGIC {
            #[cfg(feature = "defmt")]
            defmt::info!("boot decision: no installed image marker, staying resident");
            return BootDecision::Stay;
        }

        let candidate_sp = service.read_u32(APPLICATION_ADDRESS);
        if candidate_sp & SRAM_SP_MASK != SRAM_SP_PATTERN {
            #[cfg(feature = "defmt")]
            defmt::warn!("boot decision: implausible stack pointer {=u32:#x}, staying resident", candidate_sp);
            return BootDecision::Stay;
        }

        let initial_sp = service.read_u32(entry_address);
        let reset_vector = service.read_u32(entry_address + 4);
        #[cfg(feature = "defmt")]
        defmt::info!("boot decision: jumping to {=u32:#x} (sp={=u32:#x})", reset_vector, initial_sp);
        BootDecision::Jump {
            initial_sp,
            reset_vector,
        }
    }

    /// Execute a [`BootDecision::Jump`]. Never returns.
    pub fn execute(decision: BootDecision, jumper: &mut impl ImageJumper) -> ! {
        match decision {
            BootDecision::Jump {
                initial_sp,
                reset_vector,
            } => jumper.jump(initial_sp, reset_vector),
            BootDecision::Stay => {
                unreachable!("execute() must only be called with BootDecision::Jump")
            }
        }
    }
}
