//! Fixed flash memory map and protocol magic values.
//!
//! These addresses are a property of the linker script and the silicon's
//! factory bootloader location, not something this crate can discover at
//! runtime — they are named constants per spec, not configuration.

/// Start of the on-chip flash bank.
pub const FLASH_START_ADDRESS: u32 = 0x0800_0000;

/// Start of the reserved application (installed image) region.
pub const APPLICATION_ADDRESS: u32 = 0x0800_8000;

/// Start of the dedicated marker page. Holds three 32-bit slots.
pub const MARKER_PAGE_ADDRESS: u32 = 0x0803_E000;

/// Offset of the `REQUEST_FLAG` slot within the marker page.
pub const REQUEST_FLAG_OFFSET: u32 = 0x00;
/// Offset of the `PROGRAMMED_FLAG` slot within the marker page.
pub const PROGRAMMED_FLAG_OFFSET: u32 = 0x04;
/// Offset of the `ENTRY_ADDRESS` slot within the marker page.
pub const ENTRY_ADDRESS_OFFSET: u32 = 0x08;

/// Entry point of the vendor factory ROM bootloader.
pub const FACTORY_ROM_BASE: u32 = 0x1FFF_0000;

/// Hardware flash page size in bytes (2 KiB on the STM32L432KC).
pub const PAGE_SIZE: u32 = 0x800;

/// Number of CAN `WRITE_TO_FLASH` frames (8 bytes each) per flash page.
/// `2000 / 8`; the protocol's page size (2000 bytes) is derived from the
/// hardware page size but is not identical to it (`PAGE_SIZE` is `0x800` =
/// 2048 bytes), so this must be kept in sync by hand, not computed from it.
pub const FRAMES_PER_PAGE: u32 = 250;

/// Marks `REQUEST_FLAG` as "a valid installed image exists".
pub const IAP_MAGIC: u32 = 0x1234_5678;

/// `PROGRAM_START` payload byte requesting a jump to the factory ROM
/// bootloader instead of a programming session.
pub const STM_BOOTLOADER: u8 = 0xAB;
/// `LOAD_NEW_PROGRAM` payload byte requesting the marker page be erased.
pub const RESET_MARKERS: u8 = 0xBB;
/// `LOAD_NEW_PROGRAM` payload byte requesting finalize.
pub const PROGRAMM_END: u8 = 0xCC;

/// Control channel: device <-> host.
pub const CAN_IAP_UPDATE_FIRMWARE: u16 = 0x600;
/// Per-page CRC reply: device -> host.
pub const CAN_IAP_CRC: u16 = 0x601;

/// Mask applied to the candidate image's first word when sanity-checking it
/// as a plausible initial stack pointer.
pub const SRAM_SP_MASK: u32 = 0x2FFE_0000;
/// Expected masked value for a plausible SRAM stack pointer.
pub const SRAM_SP_PATTERN: u32 = 0x2000_0000;
