//! Leaf and internal page codecs and slot algorithms.

use std::cmp::Ordering;

use arbor_common::{ArborError, ColumnType, Field, PageCategory, PageIdentity, Result, Schema};
use bytes::{Buf, BufMut};

use super::meta::{HeaderPage, RootPointerPage};
use super::types::{internal_max_slots, leaf_max_slots, Entry};
use crate::record::{Record, RecordId};

/// A leaf page holding records sorted by their key field.
///
/// Layout: parent, left sibling and right sibling page numbers, then one
/// bitmap byte per slot, then the record slots, then padding. Records stay
/// sorted among occupied slots; gaps are allowed and closed lazily on
/// insert.
#[derive(Debug, Clone)]
pub struct LeafPage {
    pid: PageIdentity,
    parent_no: u32,
    left_sibling_no: u32,
    right_sibling_no: u32,
    records: Vec<Option<Record>>,
    schema: Schema,
    key_field: usize,
    page_size: usize,
}

impl LeafPage {
    /// Decodes a leaf page from its on-disk bytes.
    pub fn decode<B: Buf>(
        pid: PageIdentity,
        schema: &Schema,
        key_field: usize,
        page_size: usize,
        buf: &mut B,
    ) -> Result<Self> {
        if buf.remaining() < page_size {
            return Err(ArborError::PageDecode {
                page_no: pid.page_no,
                reason: format!("leaf page shorter than {} bytes", page_size),
            });
        }
        let parent_no = buf.get_u32_le();
        let left_sibling_no = buf.get_u32_le();
        let right_sibling_no = buf.get_u32_le();

        let max_slots = leaf_max_slots(page_size, schema.record_width());
        let occupied: Vec<bool> = (0..max_slots).map(|_| buf.get_u8() != 0).collect();

        let mut records = Vec::with_capacity(max_slots);
        for (slot, used) in occupied.iter().enumerate() {
            if *used {
                let mut record =
                    Record::decode(schema, buf).map_err(|e| ArborError::PageDecode {
                        page_no: pid.page_no,
                        reason: e.to_string(),
                    })?;
                record.set_rid(RecordId::new(pid, slot as u16));
                records.push(Some(record));
            } else {
                buf.advance(schema.record_width());
                records.push(None);
            }
        }

        Ok(Self {
            pid,
            parent_no,
            left_sibling_no,
            right_sibling_no,
            records,
            schema: schema.clone(),
            key_field,
            page_size,
        })
    }

    /// Encodes this page into `buf`, padding to the full page size.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.parent_no);
        buf.put_u32_le(self.left_sibling_no);
        buf.put_u32_le(self.right_sibling_no);
        for record in &self.records {
            buf.put_u8(u8::from(record.is_some()));
        }
        let width = self.schema.record_width();
        for record in &self.records {
            match record {
                Some(record) => record.encode(buf),
                None => buf.put_bytes(0, width),
            }
        }
        let used = 12 + self.records.len() * (1 + width);
        buf.put_bytes(0, self.page_size - used);
    }

    /// Returns this page's identity.
    pub fn pid(&self) -> PageIdentity {
        self.pid
    }

    /// Returns the parent page. A zero parent number means the root
    /// pointer page.
    pub fn parent_identity(&self) -> PageIdentity {
        if self.parent_no == 0 {
            PageIdentity::root_pointer(self.pid.table_id)
        } else {
            PageIdentity::new(self.pid.table_id, self.parent_no, PageCategory::Internal)
        }
    }

    /// Reparents this page under an internal page or the root pointer.
    pub fn set_parent(&mut self, parent: PageIdentity) -> Result<()> {
        if parent.table_id != self.pid.table_id {
            return Err(ArborError::TreeCorrupted(format!(
                "cannot parent page {} under table {}",
                self.pid, parent.table_id
            )));
        }
        match parent.category {
            PageCategory::RootPointer => {
                self.parent_no = 0;
                Ok(())
            }
            PageCategory::Internal => {
                self.parent_no = parent.page_no;
                Ok(())
            }
            other => Err(ArborError::TreeCorrupted(format!(
                "parent of a data page must be internal or the root pointer, got {}",
                other
            ))),
        }
    }

    /// Returns the left sibling leaf, if any.
    pub fn left_sibling_identity(&self) -> Option<PageIdentity> {
        (self.left_sibling_no != 0).then(|| {
            PageIdentity::new(self.pid.table_id, self.left_sibling_no, PageCategory::Leaf)
        })
    }

    /// Returns the right sibling leaf, if any.
    pub fn right_sibling_identity(&self) -> Option<PageIdentity> {
        (self.right_sibling_no != 0).then(|| {
            PageIdentity::new(self.pid.table_id, self.right_sibling_no, PageCategory::Leaf)
        })
    }

    /// Sets or clears the left sibling link.
    pub fn set_left_sibling(&mut self, sibling: Option<PageIdentity>) -> Result<()> {
        self.left_sibling_no = self.checked_sibling_no(sibling)?;
        Ok(())
    }

    /// Sets or clears the right sibling link.
    pub fn set_right_sibling(&mut self, sibling: Option<PageIdentity>) -> Result<()> {
        self.right_sibling_no = self.checked_sibling_no(sibling)?;
        Ok(())
    }

    fn checked_sibling_no(&self, sibling: Option<PageIdentity>) -> Result<u32> {
        let Some(sibling) = sibling else {
            return Ok(0);
        };
        if sibling.table_id != self.pid.table_id {
            return Err(ArborError::InvalidSibling(format!(
                "sibling of page {} cannot belong to table {}",
                self.pid, sibling.table_id
            )));
        }
        if sibling.category != PageCategory::Leaf {
            return Err(ArborError::InvalidSibling(format!(
                "leaf sibling must be a leaf page, got {}",
                sibling.category
            )));
        }
        Ok(sibling.page_no)
    }

    /// Total number of record slots.
    pub fn max_slots(&self) -> usize {
        self.records.len()
    }

    /// Number of occupied slots.
    pub fn occupancy(&self) -> usize {
        self.records.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true when no slot is free.
    pub fn is_full(&self) -> bool {
        self.occupancy() == self.records.len()
    }

    /// Returns the record in `slot`, if any.
    pub fn record(&self, slot: usize) -> Option<&Record> {
        self.records.get(slot).and_then(|slot| slot.as_ref())
    }

    /// Occupied records in ascending key order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().flatten()
    }

    /// Occupied records in descending key order.
    pub fn records_rev(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().rev().flatten()
    }

    /// Inserts `record` into key position, shifting neighbors over the
    /// nearest gap, and returns the slot it landed in.
    pub fn insert_record(&mut self, mut record: Record) -> Result<u16> {
        record.check_schema(&self.schema)?;

        let first_empty = self
            .records
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(ArborError::PageFull {
                page_no: self.pid.page_no,
            })?;

        // last occupied slot sorting at or below the new key
        let key = record.fields()[self.key_field].clone();
        let mut less_or_eq: Option<usize> = None;
        for slot in 0..self.records.len() {
            if let Some(existing) = &self.records[slot] {
                if existing.fields()[self.key_field].compare(&key)? != Ordering::Greater {
                    less_or_eq = Some(slot);
                } else {
                    break;
                }
            }
        }

        // shift records over the free slot to open a gap in key position
        let good_slot = match less_or_eq {
            Some(less_or_eq) if first_empty < less_or_eq => {
                for slot in first_empty..less_or_eq {
                    self.move_record(slot + 1, slot);
                }
                less_or_eq
            }
            Some(less_or_eq) => {
                let mut slot = first_empty;
                while slot > less_or_eq + 1 {
                    self.move_record(slot - 1, slot);
                    slot -= 1;
                }
                less_or_eq + 1
            }
            None => {
                let mut slot = first_empty;
                while slot > 0 {
                    self.move_record(slot - 1, slot);
                    slot -= 1;
                }
                0
            }
        };

        record.set_rid(RecordId::new(self.pid, good_slot as u16));
        self.records[good_slot] = Some(record);
        Ok(good_slot as u16)
    }

    fn move_record(&mut self, from: usize, to: usize) {
        if self.records[to].is_none() {
            if let Some(mut record) = self.records[from].take() {
                record.set_rid(RecordId::new(self.pid, to as u16));
                self.records[to] = Some(record);
            }
        }
    }

    /// Deletes the record in the slot named by `record`'s identifier.
    pub fn delete_record(&mut self, record: &Record) -> Result<()> {
        let rid = record.rid().ok_or(ArborError::NoSlotAssigned("record"))?;
        if rid.page != self.pid {
            return Err(ArborError::WrongPage {
                what: "record",
                expected_table: rid.page.table_id,
                expected_page: rid.page.page_no,
                actual_table: self.pid.table_id,
                actual_page: self.pid.page_no,
            });
        }
        let slot = rid.slot as usize;
        match self.records.get(slot) {
            Some(Some(_)) => {
                self.records[slot] = None;
                Ok(())
            }
            _ => Err(ArborError::SlotEmpty {
                page_no: self.pid.page_no,
                slot: rid.slot,
            }),
        }
    }
}

/// An internal page holding separator keys and child pointers.
///
/// Layout: parent page number, child category byte, one bitmap byte per
/// slot, the keys for slots `1..max_slots`, the child pointers for slots
/// `0..max_slots`, then padding. Slot 0 carries a child but no key, so
/// occupancy counts one more slot than there are entries.
#[derive(Debug, Clone)]
pub struct InternalPage {
    pid: PageIdentity,
    parent_no: u32,
    child_category: PageCategory,
    occupied: Vec<bool>,
    keys: Vec<Option<Field>>,
    children: Vec<u32>,
    key_type: ColumnType,
    page_size: usize,
}

impl InternalPage {
    /// Decodes an internal page from its on-disk bytes.
    pub fn decode<B: Buf>(
        pid: PageIdentity,
        key_type: ColumnType,
        page_size: usize,
        buf: &mut B,
    ) -> Result<Self> {
        if buf.remaining() < page_size {
            return Err(ArborError::PageDecode {
                page_no: pid.page_no,
                reason: format!("internal page shorter than {} bytes", page_size),
            });
        }
        let parent_no = buf.get_u32_le();
        // a zeroed page reads back the root pointer tag; the first insert
        // overwrites it with the real child category
        let child_category = PageCategory::from_u8(buf.get_u8())?;

        let max_slots = internal_max_slots(page_size, key_type.width());
        let occupied: Vec<bool> = (0..max_slots).map(|_| buf.get_u8() != 0).collect();

        let mut keys: Vec<Option<Field>> = vec![None; max_slots];
        for (slot, key) in keys.iter_mut().enumerate().skip(1) {
            if occupied[slot] {
                *key = Some(Field::decode(key_type, buf).map_err(|e| {
                    ArborError::PageDecode {
                        page_no: pid.page_no,
                        reason: e.to_string(),
                    }
                })?);
            } else {
                buf.advance(key_type.width());
            }
        }

        let mut children = vec![0u32; max_slots];
        for child in children.iter_mut() {
            *child = buf.get_u32_le();
        }

        Ok(Self {
            pid,
            parent_no,
            child_category,
            occupied,
            keys,
            children,
            key_type,
            page_size,
        })
    }

    /// Encodes this page into `buf`, padding to the full page size.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.parent_no);
        buf.put_u8(self.child_category.as_u8());
        for used in &self.occupied {
            buf.put_u8(u8::from(*used));
        }
        let key_width = self.key_type.width();
        for key in self.keys.iter().skip(1) {
            match key {
                Some(key) => key.encode(buf),
                None => buf.put_bytes(0, key_width),
            }
        }
        for child in &self.children {
            buf.put_u32_le(*child);
        }
        let slots = self.occupied.len();
        let used = 5 + slots + (slots - 1) * key_width + 4 * slots;
        buf.put_bytes(0, self.page_size - used);
    }

    /// Returns this page's identity.
    pub fn pid(&self) -> PageIdentity {
        self.pid
    }

    /// Returns the parent page. A zero parent number means the root
    /// pointer page.
    pub fn parent_identity(&self) -> PageIdentity {
        if self.parent_no == 0 {
            PageIdentity::root_pointer(self.pid.table_id)
        } else {
            PageIdentity::new(self.pid.table_id, self.parent_no, PageCategory::Internal)
        }
    }

    /// Reparents this page under an internal page or the root pointer.
    pub fn set_parent(&mut self, parent: PageIdentity) -> Result<()> {
        if parent.table_id != self.pid.table_id {
            return Err(ArborError::TreeCorrupted(format!(
                "cannot parent page {} under table {}",
                self.pid, parent.table_id
            )));
        }
        match parent.category {
            PageCategory::RootPointer => {
                self.parent_no = 0;
                Ok(())
            }
            PageCategory::Internal => {
                self.parent_no = parent.page_no;
                Ok(())
            }
            other => Err(ArborError::TreeCorrupted(format!(
                "parent of a data page must be internal or the root pointer, got {}",
                other
            ))),
        }
    }

    /// Category of every child this page points at.
    pub fn child_category(&self) -> PageCategory {
        self.child_category
    }

    /// Total number of slots, counting slot 0.
    pub fn max_slots(&self) -> usize {
        self.occupied.len()
    }

    /// Number of occupied slots, counting slot 0.
    pub fn occupancy(&self) -> usize {
        self.occupied.iter().filter(|used| **used).count()
    }

    /// Number of keyed entries.
    pub fn entry_count(&self) -> usize {
        self.occupied.iter().skip(1).filter(|used| **used).count()
    }

    /// Returns true when no slot is free.
    pub fn is_full(&self) -> bool {
        self.occupancy() == self.occupied.len()
    }

    fn child_identity(&self, page_no: u32) -> PageIdentity {
        PageIdentity::new(self.pid.table_id, page_no, self.child_category)
    }

    /// Entries in ascending key order. Each entry pairs a key slot with the
    /// child pointer before it and its own child pointer.
    pub fn entries(&self) -> Vec<Entry> {
        let mut entries = Vec::new();
        let mut prev_child: Option<u32> = None;
        for slot in 0..self.occupied.len() {
            if !self.occupied[slot] {
                continue;
            }
            if let (Some(prev), Some(key)) = (prev_child, &self.keys[slot]) {
                let mut entry = Entry::new(
                    key.clone(),
                    self.child_identity(prev),
                    self.child_identity(self.children[slot]),
                );
                entry.rid = Some(RecordId::new(self.pid, slot as u16));
                entries.push(entry);
            }
            prev_child = Some(self.children[slot]);
        }
        entries
    }

    /// Inserts `entry` into key position and assigns its slot.
    ///
    /// One of the entry's children must already be on the page; the entry
    /// extends the child chain on that side. The first entry instead brings
    /// both children and fixes the page's child category.
    pub fn insert_entry(&mut self, entry: &mut Entry) -> Result<()> {
        if entry.key.column_type() != self.key_type {
            return Err(ArborError::TypeMismatch {
                expected: self.key_type.to_string(),
                actual: entry.key.column_type().to_string(),
            });
        }
        if entry.left_child.table_id != self.pid.table_id
            || entry.right_child.table_id != self.pid.table_id
        {
            return Err(ArborError::InvalidEntry(format!(
                "children of entry must belong to table {}",
                self.pid.table_id
            )));
        }

        if self.occupancy() == 0 {
            if entry.left_child.category != entry.right_child.category {
                return Err(ArborError::InvalidEntry(
                    "children of the first entry differ in category".to_string(),
                ));
            }
            if !matches!(
                entry.left_child.category,
                PageCategory::Leaf | PageCategory::Internal
            ) {
                return Err(ArborError::InvalidEntry(format!(
                    "children must be leaf or internal pages, got {}",
                    entry.left_child.category
                )));
            }
            self.child_category = entry.left_child.category;
            self.occupied[0] = true;
            self.occupied[1] = true;
            self.keys[1] = Some(entry.key.clone());
            self.children[0] = entry.left_child.page_no;
            self.children[1] = entry.right_child.page_no;
            entry.rid = Some(RecordId::new(self.pid, 1));
            return Ok(());
        }

        if entry.left_child.category != self.child_category
            || entry.right_child.category != self.child_category
        {
            return Err(ArborError::InvalidEntry(format!(
                "children of entry must be {} pages",
                self.child_category
            )));
        }

        let first_empty = self
            .occupied
            .iter()
            .position(|used| !used)
            .ok_or(ArborError::PageFull {
                page_no: self.pid.page_no,
            })?;

        // find the slot whose child pointer this entry extends
        let mut less_or_eq: Option<usize> = None;
        for slot in 0..self.occupied.len() {
            if !self.occupied[slot] {
                continue;
            }
            let child = self.children[slot];
            if child == entry.left_child.page_no || child == entry.right_child.page_no {
                if slot > 0 {
                    if let Some(key) = &self.keys[slot] {
                        if key.compare(&entry.key)? == Ordering::Greater {
                            return Err(ArborError::InvalidEntry(format!(
                                "key {} sorts below the keys to its left",
                                entry.key
                            )));
                        }
                    }
                }
                less_or_eq = Some(slot);
                if child == entry.right_child.page_no {
                    // the new entry slides in ahead of this child
                    self.children[slot] = entry.left_child.page_no;
                }
            } else if less_or_eq.is_some() {
                if let Some(key) = &self.keys[slot] {
                    if key.compare(&entry.key)? == Ordering::Less {
                        return Err(ArborError::InvalidEntry(format!(
                            "key {} sorts above the keys to its right",
                            entry.key
                        )));
                    }
                }
                break;
            }
        }
        let less_or_eq = less_or_eq.ok_or_else(|| {
            ArborError::InvalidEntry("neither child of the entry is on the page".to_string())
        })?;

        // shift entries over the free slot to open a gap in key position
        let good_slot = if first_empty < less_or_eq {
            for slot in first_empty..less_or_eq {
                self.move_entry(slot + 1, slot);
            }
            less_or_eq
        } else {
            let mut slot = first_empty;
            while slot > less_or_eq + 1 {
                self.move_entry(slot - 1, slot);
                slot -= 1;
            }
            less_or_eq + 1
        };

        self.occupied[good_slot] = true;
        self.keys[good_slot] = Some(entry.key.clone());
        self.children[good_slot] = entry.right_child.page_no;
        entry.rid = Some(RecordId::new(self.pid, good_slot as u16));
        Ok(())
    }

    fn move_entry(&mut self, from: usize, to: usize) {
        if !self.occupied[to] && self.occupied[from] {
            self.occupied[to] = true;
            self.keys[to] = self.keys[from].take();
            self.children[to] = self.children[from];
            self.occupied[from] = false;
            self.children[from] = 0;
        }
    }

    fn placed_slot(&self, entry: &Entry) -> Result<usize> {
        let rid = entry.rid.ok_or(ArborError::NoSlotAssigned("entry"))?;
        if rid.page != self.pid {
            return Err(ArborError::WrongPage {
                what: "entry",
                expected_table: rid.page.table_id,
                expected_page: rid.page.page_no,
                actual_table: self.pid.table_id,
                actual_page: self.pid.page_no,
            });
        }
        let slot = rid.slot as usize;
        if slot == 0 {
            return Err(ArborError::InvalidEntry(
                "slot 0 of an internal page holds no key".to_string(),
            ));
        }
        if slot >= self.occupied.len() || !self.occupied[slot] {
            return Err(ArborError::SlotEmpty {
                page_no: self.pid.page_no,
                slot: rid.slot,
            });
        }
        Ok(slot)
    }

    fn clear_slot(&mut self, slot: usize) {
        self.occupied[slot] = false;
        self.keys[slot] = None;
        self.children[slot] = 0;
    }

    /// Deletes the entry's key and its own (right) child pointer.
    pub fn delete_key_and_right_child(&mut self, entry: &Entry) -> Result<()> {
        let slot = self.placed_slot(entry)?;
        self.clear_slot(slot);
        Ok(())
    }

    /// Deletes the entry's key and the child pointer before it. The
    /// entry's own child takes over the vacated position.
    pub fn delete_key_and_left_child(&mut self, entry: &Entry) -> Result<()> {
        let slot = self.placed_slot(entry)?;
        let mut prev = None;
        for candidate in (0..slot).rev() {
            if self.occupied[candidate] {
                prev = Some(candidate);
                break;
            }
        }
        let prev = prev.ok_or_else(|| {
            ArborError::TreeCorrupted(format!(
                "no occupied slot precedes slot {} of page {}",
                slot, self.pid.page_no
            ))
        })?;
        self.children[prev] = self.children[slot];
        self.clear_slot(slot);
        Ok(())
    }

    /// Replaces the key and right child of the slot named by `entry`'s
    /// identifier. The new key must still sort between its neighbors.
    pub fn update_entry(&mut self, entry: &Entry) -> Result<()> {
        let slot = self.placed_slot(entry)?;
        for next in slot + 1..self.occupied.len() {
            if self.occupied[next] {
                if let Some(key) = &self.keys[next] {
                    if key.compare(&entry.key)? == Ordering::Less {
                        return Err(ArborError::InvalidEntry(format!(
                            "key {} sorts above the entry that follows it",
                            entry.key
                        )));
                    }
                }
                break;
            }
        }
        for prev in (1..slot).rev() {
            if self.occupied[prev] {
                if let Some(key) = &self.keys[prev] {
                    if key.compare(&entry.key)? == Ordering::Greater {
                        return Err(ArborError::InvalidEntry(format!(
                            "key {} sorts below the entry before it",
                            entry.key
                        )));
                    }
                }
                break;
            }
        }
        self.keys[slot] = Some(entry.key.clone());
        self.children[slot] = entry.right_child.page_no;
        Ok(())
    }
}

/// A decoded page of any category.
#[derive(Debug, Clone)]
pub enum TreePage {
    RootPointer(RootPointerPage),
    Internal(InternalPage),
    Leaf(LeafPage),
    Header(HeaderPage),
}

impl TreePage {
    /// Returns the page's identity.
    pub fn pid(&self) -> PageIdentity {
        match self {
            TreePage::RootPointer(page) => page.pid(),
            TreePage::Internal(page) => page.pid(),
            TreePage::Leaf(page) => page.pid(),
            TreePage::Header(page) => page.pid(),
        }
    }

    /// Returns the page's category.
    pub fn category(&self) -> PageCategory {
        self.pid().category
    }

    /// Encodes the page into `buf` in its on-disk layout.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            TreePage::RootPointer(page) => page.encode(buf),
            TreePage::Internal(page) => page.encode(buf),
            TreePage::Leaf(page) => page.encode(buf),
            TreePage::Header(page) => page.encode(buf),
        }
    }

    /// Parent pointer of a leaf or internal page.
    pub fn parent_identity(&self) -> Result<PageIdentity> {
        match self {
            TreePage::Leaf(page) => Ok(page.parent_identity()),
            TreePage::Internal(page) => Ok(page.parent_identity()),
            other => Err(ArborError::TreeCorrupted(format!(
                "{} page {} has no parent pointer",
                other.category(),
                other.pid().page_no
            ))),
        }
    }

    /// Reparents a leaf or internal page.
    pub fn set_parent(&mut self, parent: PageIdentity) -> Result<()> {
        match self {
            TreePage::Leaf(page) => page.set_parent(parent),
            TreePage::Internal(page) => page.set_parent(parent),
            other => Err(ArborError::TreeCorrupted(format!(
                "{} page {} has no parent pointer",
                other.category(),
                other.pid().page_no
            ))),
        }
    }

    /// Borrows this page as a leaf.
    pub fn as_leaf(&self) -> Result<&LeafPage> {
        match self {
            TreePage::Leaf(page) => Ok(page),
            other => Err(other.category_mismatch(PageCategory::Leaf)),
        }
    }

    /// Mutably borrows this page as a leaf.
    pub fn as_leaf_mut(&mut self) -> Result<&mut LeafPage> {
        match self {
            TreePage::Leaf(page) => Ok(page),
            other => Err(other.category_mismatch(PageCategory::Leaf)),
        }
    }

    /// Borrows this page as an internal page.
    pub fn as_internal(&self) -> Result<&InternalPage> {
        match self {
            TreePage::Internal(page) => Ok(page),
            other => Err(other.category_mismatch(PageCategory::Internal)),
        }
    }

    /// Mutably borrows this page as an internal page.
    pub fn as_internal_mut(&mut self) -> Result<&mut InternalPage> {
        match self {
            TreePage::Internal(page) => Ok(page),
            other => Err(other.category_mismatch(PageCategory::Internal)),
        }
    }

    /// Borrows this page as the root pointer.
    pub fn as_root_pointer(&self) -> Result<&RootPointerPage> {
        match self {
            TreePage::RootPointer(page) => Ok(page),
            other => Err(other.category_mismatch(PageCategory::RootPointer)),
        }
    }

    /// Mutably borrows this page as the root pointer.
    pub fn as_root_pointer_mut(&mut self) -> Result<&mut RootPointerPage> {
        match self {
            TreePage::RootPointer(page) => Ok(page),
            other => Err(other.category_mismatch(PageCategory::RootPointer)),
        }
    }

    /// Borrows this page as a header page.
    pub fn as_header(&self) -> Result<&HeaderPage> {
        match self {
            TreePage::Header(page) => Ok(page),
            other => Err(other.category_mismatch(PageCategory::Header)),
        }
    }

    /// Mutably borrows this page as a header page.
    pub fn as_header_mut(&mut self) -> Result<&mut HeaderPage> {
        match self {
            TreePage::Header(page) => Ok(page),
            other => Err(other.category_mismatch(PageCategory::Header)),
        }
    }

    fn category_mismatch(&self, expected: PageCategory) -> ArborError {
        ArborError::CategoryMismatch {
            expected,
            actual: self.category(),
        }
    }
}
