//! The on-disk tree file for one table.
//!
//! A file starts with the 9 byte root pointer, followed by fixed-size data
//! pages numbered from 1. Page reads go through the shared cache; every
//! page an operation touches is also tracked in a [`WorkingSet`] so the
//! caller can flush exactly those pages once the operation succeeds.
//! Mutating operations on one table must be serialized by the caller.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use arbor_buffer::SharedPage;
use arbor_common::{
    ArborError, ColumnType, Field, PageCategory, PageIdentity, Result, Schema, StorageConfig,
    ROOT_PTR_PAGE_SIZE,
};
use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use super::meta::{HeaderPage, RootPointerPage};
use super::page::{InternalPage, LeafPage, TreePage};
use super::types::{header_capacity, internal_max_slots, leaf_max_slots, low_threshold, Entry};
use crate::context::StorageContext;
use crate::record::{Record, RecordId};

/// Pages touched by one tree operation, keyed by identity.
#[derive(Debug, Default)]
pub struct WorkingSet {
    pages: HashMap<PageIdentity, SharedPage<TreePage>>,
}

impl WorkingSet {
    /// Creates an empty working set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tracked page for `pid`, if the operation touched it.
    pub fn get(&self, pid: PageIdentity) -> Option<SharedPage<TreePage>> {
        self.pages.get(&pid).cloned()
    }

    /// Tracks `page` under `pid`.
    pub fn insert(&mut self, pid: PageIdentity, page: SharedPage<TreePage>) {
        self.pages.insert(pid, page);
    }

    /// Stops tracking `pid`.
    pub fn remove(&mut self, pid: PageIdentity) {
        self.pages.remove(&pid);
    }

    /// Number of tracked pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true when no page is tracked.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Iterates over the tracked pages.
    pub fn iter(&self) -> impl Iterator<Item = (&PageIdentity, &SharedPage<TreePage>)> {
        self.pages.iter()
    }
}

/// A single table's tree index over one file.
#[derive(Debug)]
pub struct BTreeFile {
    table_id: u32,
    path: PathBuf,
    file: Mutex<File>,
    schema: Schema,
    key_field: usize,
    key_type: ColumnType,
    page_size: usize,
    sync_writes: bool,
    leaf_slots: usize,
    internal_slots: usize,
    header_slots: usize,
    alloc_lock: Mutex<()>,
}

impl BTreeFile {
    /// Opens (creating if needed) the tree file at `path` for `table_id`.
    ///
    /// `key_field` names the schema column the tree is sorted on.
    pub fn open(
        path: impl AsRef<Path>,
        table_id: u32,
        schema: Schema,
        key_field: usize,
        config: &StorageConfig,
    ) -> Result<Self> {
        let Some(key_type) = schema.column(key_field) else {
            return Err(ArborError::KeyFieldOutOfRange {
                index: key_field,
                columns: schema.len(),
            });
        };
        let page_size = config.page_size;
        let leaf_slots = leaf_max_slots(page_size, schema.record_width());
        if leaf_slots == 0 {
            return Err(ArborError::TreeCorrupted(format!(
                "page size {} cannot hold a {} byte record",
                page_size,
                schema.record_width()
            )));
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        Ok(Self {
            table_id,
            path,
            file: Mutex::new(file),
            schema,
            key_field,
            key_type,
            page_size,
            sync_writes: config.sync_writes,
            leaf_slots,
            internal_slots: internal_max_slots(page_size, key_type.width()),
            header_slots: header_capacity(page_size),
            alloc_lock: Mutex::new(()),
        })
    }

    /// The table this file indexes.
    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema of the stored records.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Index of the key column.
    pub fn key_field(&self) -> usize {
        self.key_field
    }

    /// Page size the file was opened with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of data pages currently in the file.
    pub fn num_pages(&self) -> Result<u64> {
        let len = self.file.lock().metadata()?.len();
        Ok(len.saturating_sub(ROOT_PTR_PAGE_SIZE as u64) / self.page_size as u64)
    }

    fn page_offset(&self, page_no: u32) -> u64 {
        ROOT_PTR_PAGE_SIZE as u64 + (page_no as u64 - 1) * self.page_size as u64
    }

    /// Reads and decodes the page `pid` straight from disk.
    pub fn read_page(&self, pid: PageIdentity) -> Result<TreePage> {
        if pid.table_id != self.table_id {
            return Err(ArborError::WrongPage {
                what: "page",
                expected_table: self.table_id,
                expected_page: pid.page_no,
                actual_table: pid.table_id,
                actual_page: pid.page_no,
            });
        }

        if pid.category == PageCategory::RootPointer {
            if pid.page_no != 0 {
                return Err(ArborError::TreeCorrupted(format!(
                    "root pointer must be page 0, got {}",
                    pid.page_no
                )));
            }
            let mut buf = vec![0u8; ROOT_PTR_PAGE_SIZE];
            {
                let mut file = self.file.lock();
                file.seek(SeekFrom::Start(0))?;
                file.read_exact(&mut buf)?;
            }
            return Ok(TreePage::RootPointer(RootPointerPage::decode(
                pid,
                &mut buf.as_slice(),
            )?));
        }

        if pid.page_no == 0 {
            return Err(ArborError::TreeCorrupted(
                "page 0 is reserved for the root pointer".to_string(),
            ));
        }

        let offset = self.page_offset(pid.page_no);
        let mut buf = vec![0u8; self.page_size];
        {
            let mut file = self.file.lock();
            let len = file.metadata()?.len();
            if offset >= len {
                return Err(ArborError::ReadPastEnd {
                    page_no: pid.page_no,
                });
            }
            let available = len - offset;
            if available < self.page_size as u64 {
                return Err(ArborError::ShortPageTransfer {
                    page_no: pid.page_no,
                    expected: self.page_size,
                    actual: available as usize,
                });
            }
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        self.decode_page(pid, &mut buf.as_slice())
    }

    fn decode_page<B: Buf>(&self, pid: PageIdentity, buf: &mut B) -> Result<TreePage> {
        match pid.category {
            PageCategory::RootPointer => {
                Ok(TreePage::RootPointer(RootPointerPage::decode(pid, buf)?))
            }
            PageCategory::Leaf => Ok(TreePage::Leaf(LeafPage::decode(
                pid,
                &self.schema,
                self.key_field,
                self.page_size,
                buf,
            )?)),
            PageCategory::Internal => Ok(TreePage::Internal(InternalPage::decode(
                pid,
                self.key_type,
                self.page_size,
                buf,
            )?)),
            PageCategory::Header => Ok(TreePage::Header(HeaderPage::decode(
                pid,
                self.page_size,
                buf,
            )?)),
        }
    }

    /// Encodes and writes `page` back to its slot in the file.
    pub fn write_page(&self, page: &TreePage) -> Result<()> {
        let pid = page.pid();
        let (offset, len) = if pid.category == PageCategory::RootPointer {
            (0, ROOT_PTR_PAGE_SIZE)
        } else {
            (self.page_offset(pid.page_no), self.page_size)
        };
        let mut buf = BytesMut::with_capacity(len);
        page.encode(&mut buf);
        debug_assert_eq!(buf.len(), len);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&buf)?;
        if self.sync_writes {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Writes every page in `working_set` back to the file.
    pub fn write_working_set(&self, working_set: &WorkingSet) -> Result<()> {
        for (_, page) in working_set.iter() {
            self.write_page(&page.read())?;
        }
        Ok(())
    }

    fn fetch_page(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
    ) -> Result<SharedPage<TreePage>> {
        if let Some(page) = working_set.get(pid) {
            return Ok(page);
        }
        let page = ctx.cache().get_or_load(pid, || self.read_page(pid))?;
        working_set.insert(pid, page.clone());
        Ok(page)
    }

    fn fetch_root_pointer(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
    ) -> Result<SharedPage<TreePage>> {
        let pid = PageIdentity::root_pointer(self.table_id);
        if working_set.get(pid).is_none() && !ctx.cache().contains(pid) {
            let _guard = self.alloc_lock.lock();
            let mut file = self.file.lock();
            if file.metadata()?.len() == 0 {
                // fresh file: zeroed root pointer plus one empty page, so
                // the first root lands on page 1
                let zeros = vec![0u8; ROOT_PTR_PAGE_SIZE + self.page_size];
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&zeros)?;
                if self.sync_writes {
                    file.sync_all()?;
                }
            }
        }
        self.fetch_page(ctx, working_set, pid)
    }

    fn allocate_page_no(&self, ctx: &StorageContext, working_set: &mut WorkingSet) -> Result<u32> {
        let root_ptr = self.fetch_root_pointer(ctx, working_set)?;
        let mut header_identity = root_ptr.read().as_root_pointer()?.first_header_identity();
        let mut header_index = 0usize;

        while let Some(identity) = header_identity {
            let header = self.fetch_page(ctx, working_set, identity)?;
            let claimed = {
                let mut guard = header.write();
                let header_page = guard.as_header_mut()?;
                let slot = header_page.first_free_slot();
                if let Some(slot) = slot {
                    header_page.mark_used(slot);
                }
                slot
            };
            if let Some(slot) = claimed {
                return Ok((header_index * self.header_slots + slot) as u32);
            }
            header_identity = header.read().as_header()?.next_identity();
            header_index += 1;
        }

        // no freed page on record: grow the file by one zeroed page
        let _guard = self.alloc_lock.lock();
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        let page_no =
            (len.saturating_sub(ROOT_PTR_PAGE_SIZE as u64) / self.page_size as u64 + 1) as u32;
        let zeros = vec![0u8; self.page_size];
        file.seek(SeekFrom::Start(len))?;
        file.write_all(&zeros)?;
        if self.sync_writes {
            file.sync_all()?;
        }
        Ok(page_no)
    }

    fn allocate_page(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        category: PageCategory,
    ) -> Result<PageIdentity> {
        let page_no = self.allocate_page_no(ctx, working_set)?;
        let pid = PageIdentity::new(self.table_id, page_no, category);

        // a reused page still holds its old bytes on disk
        let zeros = vec![0u8; self.page_size];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.page_offset(page_no)))?;
            file.write_all(&zeros)?;
            if self.sync_writes {
                file.sync_all()?;
            }
        }
        self.fetch_page(ctx, working_set, pid)?;
        Ok(pid)
    }

    fn create_header_page(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
    ) -> Result<PageIdentity> {
        let identity = self.allocate_page(ctx, working_set, PageCategory::Header)?;
        let header = self.fetch_page(ctx, working_set, identity)?;
        header.write().as_header_mut()?.init_all_used();
        Ok(identity)
    }

    /// Returns `pid` to the free list so a later allocation can reuse it.
    fn release_page(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
    ) -> Result<()> {
        // drop the page from both caches so a reallocation under a new
        // category rereads it from disk
        working_set.remove(pid);
        ctx.cache().discard(pid);

        let root_ptr = self.fetch_root_pointer(ctx, working_set)?;
        let first_header = root_ptr.read().as_root_pointer()?.first_header_identity();
        let first_header = match first_header {
            Some(identity) => identity,
            None => {
                let created = self.create_header_page(ctx, working_set)?;
                root_ptr
                    .write()
                    .as_root_pointer_mut()?
                    .set_first_header(created)?;
                created
            }
        };

        let target_index = pid.page_no as usize / self.header_slots;
        let mut header_identity = first_header;
        let mut header_index = 0usize;
        loop {
            let header = self.fetch_page(ctx, working_set, header_identity)?;
            if header_index == target_index {
                header
                    .write()
                    .as_header_mut()?
                    .mark_free(pid.page_no as usize % self.header_slots);
                return Ok(());
            }
            let next = header.read().as_header()?.next_identity();
            match next {
                Some(identity) => {
                    header_identity = identity;
                }
                None => {
                    let created = self.create_header_page(ctx, working_set)?;
                    let new_header = self.fetch_page(ctx, working_set, created)?;
                    new_header
                        .write()
                        .as_header_mut()?
                        .set_prev(header_identity.page_no);
                    header
                        .write()
                        .as_header_mut()?
                        .set_next(created.page_no);
                    header_identity = created;
                }
            }
            header_index += 1;
        }
    }

    fn update_parent_pointer(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        child: PageIdentity,
        parent: PageIdentity,
    ) -> Result<()> {
        let page = self.fetch_page(ctx, working_set, child)?;
        let current = page.read().parent_identity()?;
        if current != parent {
            page.write().set_parent(parent)?;
        }
        Ok(())
    }

    /// Descends from `pid` to the leaf that owns `key`, or to the leftmost
    /// leaf when no key is given.
    fn find_leaf_page(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
        key: Option<&Field>,
    ) -> Result<PageIdentity> {
        match pid.category {
            PageCategory::Leaf => Ok(pid),
            PageCategory::Internal => {
                let page = self.fetch_page(ctx, working_set, pid)?;
                let next = {
                    let guard = page.read();
                    let entries = guard.as_internal()?.entries();
                    let Some(first) = entries.first() else {
                        return Err(ArborError::TreeCorrupted(format!(
                            "internal page {} has no entries",
                            pid
                        )));
                    };
                    match key {
                        None => first.left_child,
                        Some(key) => {
                            let mut next = entries[entries.len() - 1].right_child;
                            for entry in &entries {
                                if entry.key.compare(key)? != Ordering::Less {
                                    next = entry.left_child;
                                    break;
                                }
                            }
                            next
                        }
                    }
                };
                self.find_leaf_page(ctx, working_set, next, key)
            }
            other => Err(ArborError::TreeCorrupted(format!(
                "expected a leaf or internal page, found {} page {}",
                other, pid.page_no
            ))),
        }
    }

    /// Descends to the leaf page that owns `key`, or to the leftmost leaf
    /// when no key is given. Returns `None` on an empty tree.
    pub fn search(
        &self,
        ctx: &StorageContext,
        key: Option<&Field>,
    ) -> Result<Option<SharedPage<TreePage>>> {
        let mut working_set = WorkingSet::new();
        let root_ptr = self.fetch_root_pointer(ctx, &mut working_set)?;
        let root_identity = root_ptr.read().as_root_pointer()?.root_identity();
        match root_identity {
            Some(root) => {
                let leaf = self.find_leaf_page(ctx, &mut working_set, root, key)?;
                Ok(Some(self.fetch_page(ctx, &mut working_set, leaf)?))
            }
            None => Ok(None),
        }
    }

    /// Inserts `record` into key position, splitting pages as needed.
    ///
    /// On success the record carries its assigned slot and the returned
    /// working set holds every page the insert touched.
    pub fn insert(&self, ctx: &StorageContext, record: &mut Record) -> Result<WorkingSet> {
        record.check_schema(&self.schema)?;
        let mut working_set = WorkingSet::new();

        let root_ptr = self.fetch_root_pointer(ctx, &mut working_set)?;
        let root_identity = root_ptr.read().as_root_pointer()?.root_identity();
        let root_identity = match root_identity {
            Some(identity) => identity,
            None => {
                // empty tree: the pre-zeroed first page becomes the root leaf
                let page_no = self.num_pages()? as u32;
                let root = PageIdentity::new(self.table_id, page_no, PageCategory::Leaf);
                root_ptr.write().as_root_pointer_mut()?.set_root(root)?;
                root
            }
        };

        let key = record.fields()[self.key_field].clone();
        let leaf_identity = self.find_leaf_page(ctx, &mut working_set, root_identity, Some(&key))?;
        let leaf_page = self.fetch_page(ctx, &mut working_set, leaf_identity)?;

        let is_full = leaf_page.read().as_leaf()?.is_full();
        let target = if is_full {
            self.split_leaf_page(ctx, &mut working_set, leaf_identity, &key)?
        } else {
            leaf_identity
        };

        let target_page = self.fetch_page(ctx, &mut working_set, target)?;
        let slot = target_page
            .write()
            .as_leaf_mut()?
            .insert_record(record.clone())?;
        record.set_rid(RecordId::new(target, slot));
        Ok(working_set)
    }

    /// Splits the full leaf `pid` and returns the side that owns `key`.
    fn split_leaf_page(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
        key: &Field,
    ) -> Result<PageIdentity> {
        let sibling_identity = self.allocate_page(ctx, working_set, PageCategory::Leaf)?;
        let page = self.fetch_page(ctx, working_set, pid)?;
        let sibling = self.fetch_page(ctx, working_set, sibling_identity)?;

        // move the upper half of the records into the new sibling
        let moved: Vec<Record> = {
            let guard = page.read();
            let leaf = guard.as_leaf()?;
            let count = (leaf.occupancy() + 1) / 2;
            let mut moved: Vec<Record> = leaf.records_rev().take(count).cloned().collect();
            moved.reverse();
            moved
        };
        let separator = match moved.first() {
            Some(record) => record.fields()[self.key_field].clone(),
            None => {
                return Err(ArborError::TreeCorrupted(format!(
                    "cannot split empty leaf page {}",
                    pid
                )))
            }
        };
        {
            let mut guard = page.write();
            let leaf = guard.as_leaf_mut()?;
            for record in &moved {
                leaf.delete_record(record)?;
            }
        }
        {
            let mut guard = sibling.write();
            let leaf = guard.as_leaf_mut()?;
            for record in &moved {
                leaf.insert_record(record.clone())?;
            }
        }

        // splice the sibling into the leaf chain after this page
        let old_right = page.read().as_leaf()?.right_sibling_identity();
        if let Some(far_identity) = old_right {
            let far = self.fetch_page(ctx, working_set, far_identity)?;
            far.write()
                .as_leaf_mut()?
                .set_left_sibling(Some(sibling_identity))?;
        }
        {
            let mut guard = sibling.write();
            let leaf = guard.as_leaf_mut()?;
            leaf.set_left_sibling(Some(pid))?;
            leaf.set_right_sibling(old_right)?;
        }
        page.write()
            .as_leaf_mut()?
            .set_right_sibling(Some(sibling_identity))?;

        let parent_identity = page.read().as_leaf()?.parent_identity();
        let parent_identity =
            self.get_parent_with_empty_slots(ctx, working_set, parent_identity, &separator)?;
        let parent = self.fetch_page(ctx, working_set, parent_identity)?;
        {
            let mut entry = Entry::new(separator.clone(), pid, sibling_identity);
            parent.write().as_internal_mut()?.insert_entry(&mut entry)?;
        }
        page.write().set_parent(parent_identity)?;
        sibling.write().set_parent(parent_identity)?;

        if key.compare(&separator)? == Ordering::Greater {
            Ok(sibling_identity)
        } else {
            Ok(pid)
        }
    }

    /// Resolves the internal page a new separator should go into, growing
    /// the tree or splitting a full parent on the way.
    fn get_parent_with_empty_slots(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        parent_identity: PageIdentity,
        key: &Field,
    ) -> Result<PageIdentity> {
        if parent_identity.category == PageCategory::RootPointer {
            // the tree grows a level: a fresh internal page becomes the root
            let new_root = self.allocate_page(ctx, working_set, PageCategory::Internal)?;
            let root_ptr = self.fetch_root_pointer(ctx, working_set)?;
            root_ptr.write().as_root_pointer_mut()?.set_root(new_root)?;
            return Ok(new_root);
        }

        let parent = self.fetch_page(ctx, working_set, parent_identity)?;
        let is_full = parent.read().as_internal()?.is_full();
        if is_full {
            self.split_internal_page(ctx, working_set, parent_identity, key)
        } else {
            Ok(parent_identity)
        }
    }

    /// Splits the full internal page `pid` and returns the side that owns
    /// `key`. The middle entry moves up into the parent.
    fn split_internal_page(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
        key: &Field,
    ) -> Result<PageIdentity> {
        let sibling_identity = self.allocate_page(ctx, working_set, PageCategory::Internal)?;
        let page = self.fetch_page(ctx, working_set, pid)?;
        let sibling = self.fetch_page(ctx, working_set, sibling_identity)?;

        let moved: Vec<Entry> = {
            let guard = page.read();
            let mut entries = guard.as_internal()?.entries();
            let count = (entries.len() + 1) / 2;
            entries.split_off(entries.len() - count)
        };
        {
            let mut guard = page.write();
            let internal = guard.as_internal_mut()?;
            for entry in &moved {
                internal.delete_key_and_right_child(entry)?;
            }
        }

        // the lowest moved entry is promoted, the rest seed the sibling
        let (promoted, rest) = match moved.split_first() {
            Some(split) => split,
            None => {
                return Err(ArborError::TreeCorrupted(format!(
                    "cannot split empty internal page {}",
                    pid
                )))
            }
        };
        {
            let mut guard = sibling.write();
            let internal = guard.as_internal_mut()?;
            for entry in rest {
                let mut fresh = entry.clone();
                fresh.rid = None;
                internal.insert_entry(&mut fresh)?;
            }
        }
        for entry in &moved {
            self.update_parent_pointer(ctx, working_set, entry.right_child, sibling_identity)?;
        }

        let parent_identity = page.read().as_internal()?.parent_identity();
        let parent_identity =
            self.get_parent_with_empty_slots(ctx, working_set, parent_identity, &promoted.key)?;
        let parent = self.fetch_page(ctx, working_set, parent_identity)?;
        {
            let mut up = Entry::new(promoted.key.clone(), pid, sibling_identity);
            parent.write().as_internal_mut()?.insert_entry(&mut up)?;
        }
        page.write().set_parent(parent_identity)?;
        sibling.write().set_parent(parent_identity)?;

        if key.compare(&promoted.key)? == Ordering::Greater {
            Ok(sibling_identity)
        } else {
            Ok(pid)
        }
    }

    /// Deletes the record at its assigned slot, rebalancing pages that
    /// fall below minimum occupancy.
    pub fn delete(&self, ctx: &StorageContext, record: &Record) -> Result<WorkingSet> {
        let rid = record.rid().ok_or(ArborError::NoSlotAssigned("record"))?;
        let mut working_set = WorkingSet::new();

        let pid = PageIdentity::new(self.table_id, rid.page.page_no, PageCategory::Leaf);
        let page = self.fetch_page(ctx, &mut working_set, pid)?;
        page.write().as_leaf_mut()?.delete_record(record)?;

        let occupancy = page.read().as_leaf()?.occupancy();
        if occupancy < low_threshold(self.leaf_slots) {
            self.handle_min_occupancy(ctx, &mut working_set, pid)?;
        }
        Ok(working_set)
    }

    /// Refills or merges a page that dropped below minimum occupancy.
    /// The root is exempt.
    fn handle_min_occupancy(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
    ) -> Result<()> {
        let page = self.fetch_page(ctx, working_set, pid)?;
        let parent_identity = page.read().parent_identity()?;
        if parent_identity.category == PageCategory::RootPointer {
            return Ok(());
        }
        let parent = self.fetch_page(ctx, working_set, parent_identity)?;

        // the separators on either side of this page
        let (left_entry, right_entry) = {
            let guard = parent.read();
            let mut left = None;
            let mut right = None;
            for entry in guard.as_internal()?.entries() {
                if entry.right_child == pid {
                    left = Some(entry);
                } else if entry.left_child == pid {
                    right = Some(entry);
                }
            }
            (left, right)
        };

        match pid.category {
            PageCategory::Leaf => self.handle_min_occupancy_leaf(
                ctx,
                working_set,
                pid,
                parent_identity,
                left_entry,
                right_entry,
            ),
            PageCategory::Internal => self.handle_min_occupancy_internal(
                ctx,
                working_set,
                pid,
                parent_identity,
                left_entry,
                right_entry,
            ),
            other => Err(ArborError::TreeCorrupted(format!(
                "cannot rebalance a {} page",
                other
            ))),
        }
    }

    fn handle_min_occupancy_leaf(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
        parent_identity: PageIdentity,
        left_entry: Option<Entry>,
        right_entry: Option<Entry>,
    ) -> Result<()> {
        if let Some(entry) = left_entry {
            let sibling_identity = entry.left_child;
            let sibling = self.fetch_page(ctx, working_set, sibling_identity)?;
            let sibling_occupancy = sibling.read().as_leaf()?.occupancy();
            if sibling_occupancy <= low_threshold(self.leaf_slots) {
                self.merge_leaf_pages(ctx, working_set, sibling_identity, pid, &entry)?;
            } else {
                self.steal_from_leaf_page(
                    ctx,
                    working_set,
                    pid,
                    sibling_identity,
                    parent_identity,
                    &entry,
                    false,
                )?;
            }
            return Ok(());
        }
        if let Some(entry) = right_entry {
            let sibling_identity = entry.right_child;
            let sibling = self.fetch_page(ctx, working_set, sibling_identity)?;
            let sibling_occupancy = sibling.read().as_leaf()?.occupancy();
            if sibling_occupancy <= low_threshold(self.leaf_slots) {
                self.merge_leaf_pages(ctx, working_set, pid, sibling_identity, &entry)?;
            } else {
                self.steal_from_leaf_page(
                    ctx,
                    working_set,
                    pid,
                    sibling_identity,
                    parent_identity,
                    &entry,
                    true,
                )?;
            }
            return Ok(());
        }
        Err(ArborError::TreeCorrupted(format!(
            "page {} has no siblings under its parent",
            pid
        )))
    }

    /// Moves records from a richer sibling until the two leaves are about
    /// even, then refreshes the separator between them.
    fn steal_from_leaf_page(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
        sibling_identity: PageIdentity,
        parent_identity: PageIdentity,
        entry: &Entry,
        sibling_is_right: bool,
    ) -> Result<()> {
        let page = self.fetch_page(ctx, working_set, pid)?;
        let sibling = self.fetch_page(ctx, working_set, sibling_identity)?;

        let page_occupancy = page.read().as_leaf()?.occupancy();
        let moved: Vec<Record> = {
            let guard = sibling.read();
            let leaf = guard.as_leaf()?;
            let count = leaf.occupancy().saturating_sub(page_occupancy) / 2;
            if sibling_is_right {
                leaf.records().take(count).cloned().collect()
            } else {
                let mut moved: Vec<Record> = leaf.records_rev().take(count).cloned().collect();
                moved.reverse();
                moved
            }
        };
        {
            let mut guard = sibling.write();
            let leaf = guard.as_leaf_mut()?;
            for record in &moved {
                leaf.delete_record(record)?;
            }
        }
        {
            let mut guard = page.write();
            let leaf = guard.as_leaf_mut()?;
            for record in &moved {
                leaf.insert_record(record.clone())?;
            }
        }

        // the separator becomes the smallest key on the right side
        let right_side = if sibling_is_right { &sibling } else { &page };
        let boundary = {
            let guard = right_side.read();
            let first = guard.as_leaf()?.records().next();
            match first {
                Some(record) => record.fields()[self.key_field].clone(),
                None => {
                    return Err(ArborError::TreeCorrupted(format!(
                        "leaf page {} emptied while rebalancing",
                        pid
                    )))
                }
            }
        };
        let mut updated = entry.clone();
        updated.key = boundary;
        let parent = self.fetch_page(ctx, working_set, parent_identity)?;
        parent.write().as_internal_mut()?.update_entry(&updated)?;
        Ok(())
    }

    /// Folds the right leaf into the left one, splices the sibling chain,
    /// removes the separator and frees the right page.
    fn merge_leaf_pages(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        left_identity: PageIdentity,
        right_identity: PageIdentity,
        entry: &Entry,
    ) -> Result<()> {
        let left = self.fetch_page(ctx, working_set, left_identity)?;
        let right = self.fetch_page(ctx, working_set, right_identity)?;

        let moved: Vec<Record> = right.read().as_leaf()?.records().cloned().collect();
        {
            let mut guard = right.write();
            let leaf = guard.as_leaf_mut()?;
            for record in &moved {
                leaf.delete_record(record)?;
            }
        }
        {
            let mut guard = left.write();
            let leaf = guard.as_leaf_mut()?;
            for record in &moved {
                leaf.insert_record(record.clone())?;
            }
        }

        let far_right = right.read().as_leaf()?.right_sibling_identity();
        if let Some(far_identity) = far_right {
            let far = self.fetch_page(ctx, working_set, far_identity)?;
            far.write()
                .as_leaf_mut()?
                .set_left_sibling(Some(left_identity))?;
        }
        left.write().as_leaf_mut()?.set_right_sibling(far_right)?;

        self.delete_parent_entry(ctx, working_set, left_identity, entry)?;
        self.release_page(ctx, working_set, right_identity)
    }

    /// Removes a separator after a merge. An emptied root level collapses
    /// onto `left_identity`; a parent below minimum rebalances in turn.
    fn delete_parent_entry(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        left_identity: PageIdentity,
        entry: &Entry,
    ) -> Result<()> {
        let rid = entry.rid.ok_or(ArborError::NoSlotAssigned("entry"))?;
        let parent_identity =
            PageIdentity::new(self.table_id, rid.page.page_no, PageCategory::Internal);
        let parent = self.fetch_page(ctx, working_set, parent_identity)?;

        let entry_count = {
            let mut guard = parent.write();
            let internal = guard.as_internal_mut()?;
            internal.delete_key_and_right_child(entry)?;
            internal.entry_count()
        };

        if entry_count == 0 {
            let grandparent = parent.read().parent_identity()?;
            if grandparent.category != PageCategory::RootPointer {
                return Err(ArborError::TreeCorrupted(format!(
                    "empty internal page {} is not the root",
                    parent_identity.page_no
                )));
            }
            let root_ptr = self.fetch_root_pointer(ctx, working_set)?;
            root_ptr
                .write()
                .as_root_pointer_mut()?
                .set_root(left_identity)?;
            let left = self.fetch_page(ctx, working_set, left_identity)?;
            left.write()
                .set_parent(PageIdentity::root_pointer(self.table_id))?;
            return self.release_page(ctx, working_set, parent_identity);
        }

        let occupancy = parent.read().as_internal()?.occupancy();
        if occupancy < low_threshold(self.internal_slots) {
            self.handle_min_occupancy(ctx, working_set, parent_identity)?;
        }
        Ok(())
    }

    fn handle_min_occupancy_internal(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
        parent_identity: PageIdentity,
        left_entry: Option<Entry>,
        right_entry: Option<Entry>,
    ) -> Result<()> {
        if let Some(entry) = left_entry {
            let sibling_identity = entry.left_child;
            let sibling = self.fetch_page(ctx, working_set, sibling_identity)?;
            let sibling_occupancy = sibling.read().as_internal()?.occupancy();
            if sibling_occupancy <= low_threshold(self.internal_slots) {
                self.merge_internal_pages(ctx, working_set, sibling_identity, pid, &entry)?;
            } else {
                self.steal_from_left_internal_page(
                    ctx,
                    working_set,
                    pid,
                    sibling_identity,
                    parent_identity,
                    &entry,
                )?;
            }
            return Ok(());
        }
        if let Some(entry) = right_entry {
            let sibling_identity = entry.right_child;
            let sibling = self.fetch_page(ctx, working_set, sibling_identity)?;
            let sibling_occupancy = sibling.read().as_internal()?.occupancy();
            if sibling_occupancy <= low_threshold(self.internal_slots) {
                self.merge_internal_pages(ctx, working_set, pid, sibling_identity, &entry)?;
            } else {
                self.steal_from_right_internal_page(
                    ctx,
                    working_set,
                    pid,
                    sibling_identity,
                    parent_identity,
                    &entry,
                )?;
            }
            return Ok(());
        }
        Err(ArborError::TreeCorrupted(format!(
            "page {} has no siblings under its parent",
            pid
        )))
    }

    /// Rotates entries in from the left sibling. Each stolen entry brings
    /// its right child down in front of the page's child chain, and the
    /// separator key rotates through the parent.
    fn steal_from_left_internal_page(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
        sibling_identity: PageIdentity,
        parent_identity: PageIdentity,
        entry: &Entry,
    ) -> Result<()> {
        let page = self.fetch_page(ctx, working_set, pid)?;
        let sibling = self.fetch_page(ctx, working_set, sibling_identity)?;

        let page_occupancy = page.read().as_internal()?.occupancy();
        let stolen: Vec<Entry> = {
            let guard = sibling.read();
            let internal = guard.as_internal()?;
            let count = internal.occupancy().saturating_sub(page_occupancy) / 2;
            let entries = internal.entries();
            let keep = entries.len().saturating_sub(count);
            entries[keep..].to_vec()
        };

        let mut separator = entry.key.clone();
        for steal in stolen.iter().rev() {
            sibling
                .write()
                .as_internal_mut()?
                .delete_key_and_right_child(steal)?;
            self.update_parent_pointer(ctx, working_set, steal.right_child, pid)?;
            let first_child = {
                let guard = page.read();
                match guard.as_internal()?.entries().first() {
                    Some(first) => first.left_child,
                    None => {
                        return Err(ArborError::TreeCorrupted(format!(
                            "internal page {} has no entries",
                            pid
                        )))
                    }
                }
            };
            let mut down = Entry::new(separator.clone(), steal.right_child, first_child);
            page.write().as_internal_mut()?.insert_entry(&mut down)?;
            separator = steal.key.clone();
        }

        let mut updated = entry.clone();
        updated.key = separator;
        let parent = self.fetch_page(ctx, working_set, parent_identity)?;
        parent.write().as_internal_mut()?.update_entry(&updated)?;
        Ok(())
    }

    /// Rotates entries in from the right sibling, mirroring
    /// [`Self::steal_from_left_internal_page`].
    fn steal_from_right_internal_page(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        pid: PageIdentity,
        sibling_identity: PageIdentity,
        parent_identity: PageIdentity,
        entry: &Entry,
    ) -> Result<()> {
        let page = self.fetch_page(ctx, working_set, pid)?;
        let sibling = self.fetch_page(ctx, working_set, sibling_identity)?;

        let page_occupancy = page.read().as_internal()?.occupancy();
        let stolen: Vec<Entry> = {
            let guard = sibling.read();
            let internal = guard.as_internal()?;
            let count = internal.occupancy().saturating_sub(page_occupancy) / 2;
            let mut entries = internal.entries();
            entries.truncate(count);
            entries
        };

        let mut separator = entry.key.clone();
        for steal in &stolen {
            sibling
                .write()
                .as_internal_mut()?
                .delete_key_and_left_child(steal)?;
            self.update_parent_pointer(ctx, working_set, steal.left_child, pid)?;
            let last_child = {
                let guard = page.read();
                match guard.as_internal()?.entries().last() {
                    Some(last) => last.right_child,
                    None => {
                        return Err(ArborError::TreeCorrupted(format!(
                            "internal page {} has no entries",
                            pid
                        )))
                    }
                }
            };
            let mut down = Entry::new(separator.clone(), last_child, steal.left_child);
            page.write().as_internal_mut()?.insert_entry(&mut down)?;
            separator = steal.key.clone();
        }

        let mut updated = entry.clone();
        updated.key = separator;
        let parent = self.fetch_page(ctx, working_set, parent_identity)?;
        parent.write().as_internal_mut()?.update_entry(&updated)?;
        Ok(())
    }

    /// Folds the right internal page into the left one. The separator
    /// comes down between the two child chains, then the right page's
    /// entries follow it.
    fn merge_internal_pages(
        &self,
        ctx: &StorageContext,
        working_set: &mut WorkingSet,
        left_identity: PageIdentity,
        right_identity: PageIdentity,
        entry: &Entry,
    ) -> Result<()> {
        let left = self.fetch_page(ctx, working_set, left_identity)?;
        let right = self.fetch_page(ctx, working_set, right_identity)?;

        self.delete_parent_entry(ctx, working_set, left_identity, entry)?;

        let last_left_child = {
            let guard = left.read();
            match guard.as_internal()?.entries().last() {
                Some(last) => last.right_child,
                None => {
                    return Err(ArborError::TreeCorrupted(format!(
                        "internal page {} has no entries",
                        left_identity
                    )))
                }
            }
        };
        let first_right_child = {
            let guard = right.read();
            match guard.as_internal()?.entries().first() {
                Some(first) => first.left_child,
                None => {
                    return Err(ArborError::TreeCorrupted(format!(
                        "internal page {} has no entries",
                        right_identity
                    )))
                }
            }
        };
        {
            let mut down = Entry::new(entry.key.clone(), last_left_child, first_right_child);
            left.write().as_internal_mut()?.insert_entry(&mut down)?;
        }
        self.update_parent_pointer(ctx, working_set, first_right_child, left_identity)?;

        let moved: Vec<Entry> = right.read().as_internal()?.entries();
        for steal in &moved {
            right
                .write()
                .as_internal_mut()?
                .delete_key_and_left_child(steal)?;
            self.update_parent_pointer(ctx, working_set, steal.right_child, left_identity)?;
            let last_child = {
                let guard = left.read();
                match guard.as_internal()?.entries().last() {
                    Some(last) => last.right_child,
                    None => {
                        return Err(ArborError::TreeCorrupted(format!(
                            "internal page {} has no entries",
                            left_identity
                        )))
                    }
                }
            };
            let mut appended = Entry::new(steal.key.clone(), last_child, steal.right_child);
            left.write().as_internal_mut()?.insert_entry(&mut appended)?;
        }

        self.release_page(ctx, working_set, right_identity)
    }

    /// Opens a forward scan over every record in key order.
    pub fn scan<'a>(&'a self, ctx: &'a StorageContext) -> BTreeScan<'a> {
        BTreeScan {
            file: self,
            ctx,
            cursor: None,
        }
    }
}

/// Forward iterator over the records of one tree file.
///
/// The scan walks the leaf sibling chain left to right and rereads pages
/// through the cache, so records inserted behind the cursor are not
/// revisited.
pub struct BTreeScan<'a> {
    file: &'a BTreeFile,
    ctx: &'a StorageContext,
    cursor: Option<ScanCursor>,
}

struct ScanCursor {
    current: Option<PageIdentity>,
    next_slot: usize,
}

impl BTreeScan<'_> {
    /// Positions the scan before the first record.
    pub fn open(&mut self) -> Result<()> {
        let mut working_set = WorkingSet::new();
        let root_ptr = self
            .file
            .fetch_root_pointer(self.ctx, &mut working_set)?;
        let root_identity = root_ptr.read().as_root_pointer()?.root_identity();
        let current = match root_identity {
            Some(root) => {
                Some(self.file.find_leaf_page(self.ctx, &mut working_set, root, None)?)
            }
            None => None,
        };
        self.cursor = Some(ScanCursor {
            current,
            next_slot: 0,
        });
        Ok(())
    }

    /// Returns the next record, or `None` past the last one.
    pub fn next(&mut self) -> Result<Option<Record>> {
        let cursor = self.cursor.as_mut().ok_or(ArborError::ScanNotOpen)?;
        let mut working_set = WorkingSet::new();
        loop {
            let Some(current) = cursor.current else {
                return Ok(None);
            };
            let page = self.file.fetch_page(self.ctx, &mut working_set, current)?;
            let guard = page.read();
            let leaf = guard.as_leaf()?;
            while cursor.next_slot < leaf.max_slots() {
                let slot = cursor.next_slot;
                cursor.next_slot += 1;
                if let Some(record) = leaf.record(slot) {
                    return Ok(Some(record.clone()));
                }
            }
            cursor.current = leaf.right_sibling_identity();
            cursor.next_slot = 0;
        }
    }

    /// Rewinds an open scan to the first record.
    pub fn reset(&mut self) -> Result<()> {
        if self.cursor.is_none() {
            return Err(ArborError::ScanNotOpen);
        }
        self.open()
    }

    /// Ends the scan; `next` and `reset` fail until it is reopened.
    pub fn close(&mut self) {
        self.cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::CachePolicy;
    use tempfile::TempDir;

    fn test_config(page_size: usize) -> StorageConfig {
        StorageConfig {
            page_size,
            cache_capacity: 256,
            cache_policy: CachePolicy::Evict,
            sync_writes: false,
        }
    }

    fn test_schema() -> Schema {
        Schema::new(vec![ColumnType::Int, ColumnType::Int, ColumnType::Str])
    }

    fn create_test_file(dir: &TempDir, page_size: usize) -> BTreeFile {
        let path = dir.path().join("table.arbor");
        BTreeFile::open(path, 1, test_schema(), 0, &test_config(page_size)).unwrap()
    }

    #[test]
    fn test_open_rejects_bad_key_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.arbor");
        let err =
            BTreeFile::open(path, 1, test_schema(), 3, &test_config(4096)).unwrap_err();
        assert!(matches!(
            err,
            ArborError::KeyFieldOutOfRange {
                index: 3,
                columns: 3,
            }
        ));
    }

    #[test]
    fn test_open_rejects_tiny_page_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.arbor");
        let err =
            BTreeFile::open(path, 1, test_schema(), 0, &test_config(64)).unwrap_err();
        assert!(matches!(err, ArborError::TreeCorrupted(_)));
    }

    #[test]
    fn test_num_pages_on_fresh_file() {
        let dir = TempDir::new().unwrap();
        let file = create_test_file(&dir, 4096);
        assert_eq!(file.num_pages().unwrap(), 0);
    }

    #[test]
    fn test_read_page_rejects_foreign_table() {
        let dir = TempDir::new().unwrap();
        let file = create_test_file(&dir, 4096);
        let err = file
            .read_page(PageIdentity::new(2, 1, PageCategory::Leaf))
            .unwrap_err();
        assert!(matches!(
            err,
            ArborError::WrongPage {
                what: "page",
                expected_table: 1,
                actual_table: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_read_page_rejects_page_zero() {
        let dir = TempDir::new().unwrap();
        let file = create_test_file(&dir, 4096);
        let err = file
            .read_page(PageIdentity::new(1, 0, PageCategory::Leaf))
            .unwrap_err();
        assert!(matches!(err, ArborError::TreeCorrupted(_)));
    }

    #[test]
    fn test_read_past_end() {
        let dir = TempDir::new().unwrap();
        let file = create_test_file(&dir, 4096);
        let err = file
            .read_page(PageIdentity::new(1, 1, PageCategory::Leaf))
            .unwrap_err();
        assert!(matches!(err, ArborError::ReadPastEnd { page_no: 1 }));
    }

    #[test]
    fn test_short_page_transfer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.arbor");
        // root pointer, one full page, then half a page
        std::fs::write(&path, vec![0u8; 9 + 4096 + 2048]).unwrap();
        let file = BTreeFile::open(&path, 1, test_schema(), 0, &test_config(4096)).unwrap();

        assert_eq!(file.num_pages().unwrap(), 1);
        let err = file
            .read_page(PageIdentity::new(1, 2, PageCategory::Leaf))
            .unwrap_err();
        assert!(matches!(
            err,
            ArborError::ShortPageTransfer {
                page_no: 2,
                expected: 4096,
                actual: 2048,
            }
        ));
    }

    #[test]
    fn test_write_page_read_page_roundtrip() {
        let dir = TempDir::new().unwrap();
        let file = create_test_file(&dir, 4096);

        let pid = PageIdentity::new(1, 1, PageCategory::Leaf);
        let zeroed = vec![0u8; 4096];
        let mut leaf =
            LeafPage::decode(pid, &test_schema(), 0, 4096, &mut zeroed.as_slice()).unwrap();
        leaf.insert_record(Record::new(vec![
            Field::Int(7),
            Field::Int(70),
            Field::Str("seven".to_string()),
        ]))
        .unwrap();
        file.write_page(&TreePage::Leaf(leaf)).unwrap();

        let read_back = file.read_page(pid).unwrap();
        let leaf = read_back.as_leaf().unwrap();
        assert_eq!(leaf.occupancy(), 1);
        assert_eq!(leaf.record(0).unwrap().fields()[0], Field::Int(7));
    }

    #[test]
    fn test_root_pointer_roundtrip() {
        let dir = TempDir::new().unwrap();
        let file = create_test_file(&dir, 4096);

        let pid = PageIdentity::root_pointer(1);
        let zeroed = vec![0u8; ROOT_PTR_PAGE_SIZE];
        let mut root_ptr = RootPointerPage::decode(pid, &mut zeroed.as_slice()).unwrap();
        root_ptr
            .set_root(PageIdentity::new(1, 1, PageCategory::Leaf))
            .unwrap();
        file.write_page(&TreePage::RootPointer(root_ptr)).unwrap();

        let read_back = file.read_page(pid).unwrap();
        let root_ptr = read_back.as_root_pointer().unwrap();
        assert_eq!(
            root_ptr.root_identity(),
            Some(PageIdentity::new(1, 1, PageCategory::Leaf))
        );
        assert!(root_ptr.first_header_identity().is_none());
    }

    #[test]
    fn test_working_set_tracks_pages() {
        let dir = TempDir::new().unwrap();
        let file = create_test_file(&dir, 4096);
        let ctx = StorageContext::new(test_config(4096));

        let mut record = Record::new(vec![
            Field::Int(1),
            Field::Int(10),
            Field::Str("one".to_string()),
        ]);
        let working_set = file.insert(&ctx, &mut record).unwrap();
        // root pointer plus the root leaf
        assert_eq!(working_set.len(), 2);
        assert!(working_set
            .get(PageIdentity::root_pointer(1))
            .is_some());
        assert!(working_set
            .get(PageIdentity::new(1, 1, PageCategory::Leaf))
            .is_some());
    }
}
