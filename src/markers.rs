//! # Marker Store
//!
//! Three 32-bit slots in a dedicated flash page that survive reset and tell
//! the Boot Decider which image to run: `REQUEST_FLAG`, `PROGRAMMED_FLAG`,
//! `ENTRY_ADDRESS`.

use crate::flash::{FlashBackend, FlashError};
use crate::memmap::{
    ENTRY_ADDRESS_OFFSET, IAP_MAGIC, MARKER_PAGE_ADDRESS, PROGRAMMED_FLAG_OFFSET,
    REQUEST_FLAG_OFFSET,
};
use crate::service::FlashService;

/// Reads and writes the three marker slots.
///
/// The hardware program primitive is double-word (8-byte) granularity, so
/// `REQUEST_FLAG` (+0x00) and `PROGRAMMED_FLAG` (+0x04) necessarily commit
/// as one write (they're the low/high word of the same aligned dword);
/// `ENTRY_ADDRESS` (+0x08) is its own dword. [`MarkerStore::commit`] uses
/// that to implement the crash-safety fix recommended in spec §9 open
/// question 4: `ENTRY_ADDRESS` is written first, `REQUEST_FLAG` (with
/// `PROGRAMMED_FLAG`) last, so a reset between the two writes leaves
/// `REQUEST_FLAG != IAP_MAGIC` and the Boot Decider correctly stays
/// resident rather than jumping on a half-committed marker.
pub struct MarkerStore<'a, B> {
    service: &'a mut FlashService<B>,
}

impl<'a, B: FlashBackend> MarkerStore<'a, B> {
    pub fn new(service: &'a mut FlashService<B>) -> Self {
        MarkerStore { service }
    }

    pub fn request_flag(&self) -> u32 {
        self.service.read_u32(MARKER_PAGE_ADDRESS + REQUEST_FLAG_OFFSET)
    }

    pub fn programmed_flag(&self) -> u32 {
        self.service.read_u32(MARKER_PAGE_ADDRESS + PROGRAMMED_FLAG_OFFSET)
    }

    pub fn entry_address(&self) -> u32 {
        self.service.read_u32(MARKER_PAGE_ADDRESS + ENTRY_ADDRESS_OFFSET)
    }

    /// Erase the whole marker page, leaving all three slots at `0xFFFF_FFFF`.
    pub fn erase(&mut self) -> Result<(), FlashError> {
        self.service.erase_single_page(MARKER_PAGE_ADDRESS)
    }

    /// Write just the `ENTRY_ADDRESS` dword, leaving `REQUEST_FLAG`/
    /// `PROGRAMMED_FLAG` untouched (erased). Exposed so the crash-unsafe
    /// intermediate state is directly testable.
    pub fn write_entry_address(&mut self, entry_address: u32) -> Result<(), FlashError> {
        self.service
            .program_dword(MARKER_PAGE_ADDRESS + ENTRY_ADDRESS_OFFSET, entry_address as u64)
    }

    /// Erase the marker page, then commit a freshly installed image:
    /// `ENTRY_ADDRESS` first, then `REQUEST_FLAG`/`PROGRAMMED_FLAG` together
    /// as the final, atomic commit.
    pub fn commit(&mut self, entry_address: u32, programmed_bytes: u32) -> Result<(), FlashError> {
        self.erase()?;
        self.write_entry_address(entry_address)?;
        let combined = ((programmed_bytes as u64) << 32) | IAP_MAGIC as u64;
        self.service
            .program_dword(MARKER_PAGE_ADDRESS + REQUEST_FLAG_OFFSET, combined)?;
        #[cfg(feature = "defmt")]
        defmt::info!(
            "marker store committed: entry={=u32:#x}, programmed={=u32} bytes",
            entry_address,
            programmed_bytes
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::fake::FakeFlash;

    fn store() -> FlashService<FakeFlash> {
        FlashService::new(FakeFlash::new(MARKER_PAGE_ADDRESS, 0x1000))
    }

    #[test]
    fn commit_then_read_reflects_installed_image() {
        let mut svc = store();
        let mut markers = MarkerStore::new(&mut svc);
        markers.commit(0x0800_8000, 2000).unwrap();
        assert_eq!(markers.request_flag(), IAP_MAGIC);
        assert_eq!(markers.entry_address(), 0x0800_8000);
        assert_eq!(markers.programmed_flag(), 2000);
    }

    #[test]
    fn reset_markers_is_idempotent() {
        let mut svc = store();
        let mut markers = MarkerStore::new(&mut svc);
        markers.commit(0x0800_8000, 2000).unwrap();
        markers.erase().unwrap();
        assert_eq!(markers.request_flag(), 0xFFFF_FFFF);
        markers.erase().unwrap();
        assert_eq!(markers.request_flag(), 0xFFFF_FFFF);
        assert_eq!(markers.entry_address(), 0xFFFF_FFFF);
        assert_eq!(markers.programmed_flag(), 0xFFFF_FFFF);
    }

    #[test]
    fn entry_address_survives_a_reset_between_the_two_writes() {
        // Simulates the crash-unsafe window: ENTRY_ADDRESS committed,
        // REQUEST_FLAG not yet written. The Boot Decider must stay resident.
        let mut svc = store();
        let mut markers = MarkerStore::new(&mut svc);
        markers.erase().unwrap();
        markers.write_entry_address(0x0800_8000).unwrap();
        assert_eq!(markers.request_flag(), 0xFFFF_FFFF);
        assert_eq!(markers.entry_address(), 0x0800_8000);
    }
}
