//! Header page of the extendible hash table.
//!
//! Memory layout:
//! - Bytes 0-3: max_depth (u32, little-endian), immutable after init
//! - Bytes 4+: directory_page_ids, one `PageId` per slot, `2^max_depth` slots
//!
//! The header routes a hash to a directory by its *high* `max_depth` bits.

use buffer_pool_manager::api::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

const MAX_DEPTH_OFFSET: usize = 0;
const DIRECTORY_PAGE_IDS_OFFSET: usize = 4;

/// Largest `max_depth` whose id array still fits in one page.
pub const HEADER_PAGE_MAX_DEPTH: u32 = 9;

/// A typed view over a header page's bytes. `B` is any borrow of the page
/// buffer, so the same type serves read and write guards.
pub struct HeaderPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HeaderPage<B> {
    pub fn new(data: B) -> Self {
        assert!(data.as_ref().len() >= PAGE_SIZE, "buffer too small for a header page");
        Self { data }
    }

    pub fn max_depth(&self) -> u32 {
        u32::from_le_bytes(
            self.data.as_ref()[MAX_DEPTH_OFFSET..MAX_DEPTH_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// Number of directory slots.
    pub fn max_size(&self) -> u32 {
        1 << self.max_depth()
    }

    /// Routes a hash to a directory slot using its high `max_depth` bits.
    pub fn hash_to_directory_index(&self, hash: u32) -> u32 {
        let max_depth = self.max_depth();
        if max_depth == 0 {
            0
        } else {
            hash >> (32 - max_depth)
        }
    }

    pub fn directory_page_id(&self, directory_idx: u32) -> PageId {
        assert!(directory_idx < self.max_size(), "directory index out of range");
        let offset = DIRECTORY_PAGE_IDS_OFFSET + directory_idx as usize * 4;
        PageId::from_le_bytes(self.data.as_ref()[offset..offset + 4].try_into().unwrap())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderPage<B> {
    /// Initializes the header with every directory slot invalid.
    pub fn init(&mut self, max_depth: u32) {
        assert!(
            max_depth <= HEADER_PAGE_MAX_DEPTH,
            "header max_depth {max_depth} exceeds page capacity"
        );
        self.data.as_mut()[MAX_DEPTH_OFFSET..MAX_DEPTH_OFFSET + 4]
            .copy_from_slice(&max_depth.to_le_bytes());
        for directory_idx in 0..self.max_size() {
            self.set_directory_page_id(directory_idx, INVALID_PAGE_ID);
        }
    }

    pub fn set_directory_page_id(&mut self, directory_idx: u32, page_id: PageId) {
        assert!(directory_idx < self.max_size(), "directory index out of range");
        let offset = DIRECTORY_PAGE_IDS_OFFSET + directory_idx as usize * 4;
        self.data.as_mut()[offset..offset + 4].copy_from_slice(&page_id.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn test_init_marks_all_slots_invalid() {
        let mut buf = blank_page();
        let mut header = HeaderPage::new(buf.as_mut_slice());
        header.init(2);
        assert_eq!(header.max_depth(), 2);
        assert_eq!(header.max_size(), 4);
        for idx in 0..4 {
            assert_eq!(header.directory_page_id(idx), INVALID_PAGE_ID);
        }
    }

    #[test]
    fn test_routing_uses_high_bits() {
        let mut buf = blank_page();
        let mut header = HeaderPage::new(buf.as_mut_slice());
        header.init(2);
        assert_eq!(header.hash_to_directory_index(0x0000_0000), 0);
        assert_eq!(header.hash_to_directory_index(0x4000_0000), 1);
        assert_eq!(header.hash_to_directory_index(0x8000_0000), 2);
        assert_eq!(header.hash_to_directory_index(0xc000_0000), 3);
        // Low bits are ignored.
        assert_eq!(header.hash_to_directory_index(0x4fff_ffff), 1);
    }

    #[test]
    fn test_zero_depth_routes_everything_to_slot_zero() {
        let mut buf = blank_page();
        let mut header = HeaderPage::new(buf.as_mut_slice());
        header.init(0);
        assert_eq!(header.max_size(), 1);
        assert_eq!(header.hash_to_directory_index(u32::MAX), 0);
    }

    #[test]
    fn test_set_and_get_directory_page_id() {
        let mut buf = blank_page();
        let mut header = HeaderPage::new(buf.as_mut_slice());
        header.init(3);
        header.set_directory_page_id(5, 1234);
        assert_eq!(header.directory_page_id(5), 1234);
        assert_eq!(header.directory_page_id(4), INVALID_PAGE_ID);
    }
}
