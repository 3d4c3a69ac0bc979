//! Root pointer and header pages.

use arbor_common::{ArborError, PageCategory, PageIdentity, Result, ROOT_PTR_PAGE_SIZE};
use bytes::{Buf, BufMut};

use super::types::header_capacity;

/// The 9-byte page at file offset zero naming the tree root and the first
/// header page.
///
/// Page number zero is reserved for this page, so a zero pointer always
/// means "none".
#[derive(Debug, Clone)]
pub struct RootPointerPage {
    pid: PageIdentity,
    root_no: u32,
    root_category: PageCategory,
    first_header_no: u32,
}

impl RootPointerPage {
    /// Decodes the root pointer page from its on-disk bytes.
    pub fn decode<B: Buf>(pid: PageIdentity, buf: &mut B) -> Result<Self> {
        if buf.remaining() < ROOT_PTR_PAGE_SIZE {
            return Err(ArborError::PageDecode {
                page_no: pid.page_no,
                reason: format!("root pointer page shorter than {} bytes", ROOT_PTR_PAGE_SIZE),
            });
        }
        let root_no = buf.get_u32_le();
        let root_category = PageCategory::from_u8(buf.get_u8())?;
        let first_header_no = buf.get_u32_le();
        Ok(Self {
            pid,
            root_no,
            root_category,
            first_header_no,
        })
    }

    /// Encodes this page into `buf`.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.root_no);
        buf.put_u8(self.root_category.as_u8());
        buf.put_u32_le(self.first_header_no);
    }

    /// Returns this page's identity.
    pub fn pid(&self) -> PageIdentity {
        self.pid
    }

    /// Returns the root page, or `None` when the tree is still empty.
    pub fn root_identity(&self) -> Option<PageIdentity> {
        (self.root_no != 0).then(|| {
            PageIdentity::new(self.pid.table_id, self.root_no, self.root_category)
        })
    }

    /// Points the tree at a new root. Only leaf and internal pages can be
    /// roots.
    pub fn set_root(&mut self, root: PageIdentity) -> Result<()> {
        match root.category {
            PageCategory::Leaf | PageCategory::Internal => {
                self.root_no = root.page_no;
                self.root_category = root.category;
                Ok(())
            }
            other => Err(ArborError::TreeCorrupted(format!(
                "root pointer cannot target a {} page",
                other
            ))),
        }
    }

    /// Returns the first header page, or `None` when no page was ever freed.
    pub fn first_header_identity(&self) -> Option<PageIdentity> {
        (self.first_header_no != 0).then(|| {
            PageIdentity::new(self.pid.table_id, self.first_header_no, PageCategory::Header)
        })
    }

    /// Records the first header page of the free list.
    pub fn set_first_header(&mut self, header: PageIdentity) -> Result<()> {
        if header.category != PageCategory::Header {
            return Err(ArborError::TreeCorrupted(format!(
                "free list must start at a header page, got {}",
                header.category
            )));
        }
        self.first_header_no = header.page_no;
        Ok(())
    }
}

/// A free-list bitmap page.
///
/// Headers form a doubly linked chain; header `k` tracks the state of pages
/// `k * capacity .. (k + 1) * capacity`, one byte per page, set when the
/// page is in use. A freshly created header is initialized fully used so
/// that pages it does not really track are never handed out.
#[derive(Debug, Clone)]
pub struct HeaderPage {
    pid: PageIdentity,
    next_no: u32,
    prev_no: u32,
    used: Vec<bool>,
}

impl HeaderPage {
    /// Decodes a header page from its on-disk bytes.
    pub fn decode<B: Buf>(pid: PageIdentity, page_size: usize, buf: &mut B) -> Result<Self> {
        if buf.remaining() < page_size {
            return Err(ArborError::PageDecode {
                page_no: pid.page_no,
                reason: format!("header page shorter than {} bytes", page_size),
            });
        }
        let next_no = buf.get_u32_le();
        let prev_no = buf.get_u32_le();
        let used = (0..header_capacity(page_size))
            .map(|_| buf.get_u8() != 0)
            .collect();
        Ok(Self {
            pid,
            next_no,
            prev_no,
            used,
        })
    }

    /// Encodes this page into `buf`. The links and bitmap fill the page
    /// exactly.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.next_no);
        buf.put_u32_le(self.prev_no);
        for used in &self.used {
            buf.put_u8(u8::from(*used));
        }
    }

    /// Returns this page's identity.
    pub fn pid(&self) -> PageIdentity {
        self.pid
    }

    /// Number of pages this header tracks.
    pub fn capacity(&self) -> usize {
        self.used.len()
    }

    /// Returns the next header in the chain, if any.
    pub fn next_identity(&self) -> Option<PageIdentity> {
        (self.next_no != 0)
            .then(|| PageIdentity::new(self.pid.table_id, self.next_no, PageCategory::Header))
    }

    /// Returns the previous header in the chain, if any.
    pub fn prev_identity(&self) -> Option<PageIdentity> {
        (self.prev_no != 0)
            .then(|| PageIdentity::new(self.pid.table_id, self.prev_no, PageCategory::Header))
    }

    /// Links this header to the next one in the chain.
    pub fn set_next(&mut self, page_no: u32) {
        self.next_no = page_no;
    }

    /// Links this header to the previous one in the chain.
    pub fn set_prev(&mut self, page_no: u32) {
        self.prev_no = page_no;
    }

    /// Marks every tracked page as used.
    pub fn init_all_used(&mut self) {
        for used in &mut self.used {
            *used = true;
        }
    }

    /// Returns the first free slot, if any.
    pub fn first_free_slot(&self) -> Option<usize> {
        self.used.iter().position(|used| !used)
    }

    /// Marks slot `slot` as used. The slot must be below [`capacity`].
    ///
    /// [`capacity`]: HeaderPage::capacity
    pub fn mark_used(&mut self, slot: usize) {
        self.used[slot] = true;
    }

    /// Marks slot `slot` as free. The slot must be below [`capacity`].
    ///
    /// [`capacity`]: HeaderPage::capacity
    pub fn mark_free(&mut self, slot: usize) {
        self.used[slot] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_ptr_pid() -> PageIdentity {
        PageIdentity::root_pointer(1)
    }

    fn decode_zeroed_root_ptr() -> RootPointerPage {
        let zeroed = [0u8; ROOT_PTR_PAGE_SIZE];
        RootPointerPage::decode(root_ptr_pid(), &mut zeroed.as_slice()).unwrap()
    }

    fn decode_zeroed_header(page_size: usize) -> HeaderPage {
        let zeroed = vec![0u8; page_size];
        let pid = PageIdentity::new(1, 5, PageCategory::Header);
        HeaderPage::decode(pid, page_size, &mut zeroed.as_slice()).unwrap()
    }

    #[test]
    fn test_zeroed_root_pointer_is_empty() {
        let page = decode_zeroed_root_ptr();
        assert!(page.root_identity().is_none());
        assert!(page.first_header_identity().is_none());
    }

    #[test]
    fn test_root_pointer_roundtrip() {
        let mut page = decode_zeroed_root_ptr();
        page.set_root(PageIdentity::new(1, 7, PageCategory::Internal))
            .unwrap();
        page.set_first_header(PageIdentity::new(1, 9, PageCategory::Header))
            .unwrap();

        let mut buf = Vec::new();
        page.encode(&mut buf);
        assert_eq!(buf.len(), ROOT_PTR_PAGE_SIZE);

        let decoded = RootPointerPage::decode(root_ptr_pid(), &mut buf.as_slice()).unwrap();
        assert_eq!(
            decoded.root_identity(),
            Some(PageIdentity::new(1, 7, PageCategory::Internal))
        );
        assert_eq!(
            decoded.first_header_identity(),
            Some(PageIdentity::new(1, 9, PageCategory::Header))
        );
    }

    #[test]
    fn test_set_root_rejects_wrong_category() {
        let mut page = decode_zeroed_root_ptr();
        let err = page
            .set_root(PageIdentity::new(1, 7, PageCategory::Header))
            .unwrap_err();
        assert!(matches!(err, ArborError::TreeCorrupted(_)));

        let err = page.set_root(root_ptr_pid()).unwrap_err();
        assert!(matches!(err, ArborError::TreeCorrupted(_)));
    }

    #[test]
    fn test_set_first_header_rejects_wrong_category() {
        let mut page = decode_zeroed_root_ptr();
        let err = page
            .set_first_header(PageIdentity::new(1, 9, PageCategory::Leaf))
            .unwrap_err();
        assert!(matches!(err, ArborError::TreeCorrupted(_)));
    }

    #[test]
    fn test_truncated_root_pointer_rejected() {
        let short = [0u8; 4];
        let err = RootPointerPage::decode(root_ptr_pid(), &mut short.as_slice()).unwrap_err();
        assert!(matches!(err, ArborError::PageDecode { .. }));
    }

    #[test]
    fn test_zeroed_header_reads_all_free() {
        let page = decode_zeroed_header(512);
        assert_eq!(page.capacity(), 504);
        assert_eq!(page.first_free_slot(), Some(0));
        assert!(page.next_identity().is_none());
        assert!(page.prev_identity().is_none());
    }

    #[test]
    fn test_init_all_used() {
        let mut page = decode_zeroed_header(512);
        page.init_all_used();
        assert_eq!(page.first_free_slot(), None);
    }

    #[test]
    fn test_mark_free_then_reuse() {
        let mut page = decode_zeroed_header(512);
        page.init_all_used();

        page.mark_free(37);
        assert_eq!(page.first_free_slot(), Some(37));

        page.mark_used(37);
        assert_eq!(page.first_free_slot(), None);
    }

    #[test]
    fn test_header_roundtrip() {
        let mut page = decode_zeroed_header(512);
        page.init_all_used();
        page.mark_free(3);
        page.mark_free(100);
        page.set_next(6);
        page.set_prev(4);

        let mut buf = Vec::new();
        page.encode(&mut buf);
        assert_eq!(buf.len(), 512);

        let pid = PageIdentity::new(1, 5, PageCategory::Header);
        let decoded = HeaderPage::decode(pid, 512, &mut buf.as_slice()).unwrap();
        assert_eq!(decoded.first_free_slot(), Some(3));
        assert_eq!(
            decoded.next_identity(),
            Some(PageIdentity::new(1, 6, PageCategory::Header))
        );
        assert_eq!(
            decoded.prev_identity(),
            Some(PageIdentity::new(1, 4, PageCategory::Header))
        );
    }
}
