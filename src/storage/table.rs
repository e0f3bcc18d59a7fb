use crate::core::{NewRequest, Record, RequestStatus, Result, StoreError};
use chrono::Utc;

/// Ordered collection of records plus the id allocator.
///
/// Lookups are linear scans; insertion order is the listing order.
/// `revision` counts applied mutations and is never persisted.
#[derive(Debug, Clone)]
pub struct RequestTable {
    records: Vec<Record>,
    next_id: u64,
    revision: u64,
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_id: 1,
            revision: 0,
        }
    }

    /// Rebuilds a table from loaded records. The id counter is derived from
    /// the data, never from a stored value.
    ///
    /// Fails when the largest stored id leaves no room for another one.
    pub fn from_records(records: Vec<Record>) -> Result<Self> {
        let next_id = match records.iter().map(|r| r.id).max() {
            Some(max) => max.checked_add(1).ok_or(StoreError::IdsExhausted(max))?,
            None => 1,
        };
        Ok(Self {
            records,
            next_id,
            revision: 0,
        })
    }

    /// Appends a pending record under the next id. Ids are never handed out
    /// twice; once the counter would wrap, creation fails instead.
    pub fn create(&mut self, candidate: NewRequest) -> Result<Record> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or(StoreError::IdsExhausted(id))?;

        let record = candidate.into_record(id, Utc::now());
        self.records.push(record.clone());
        self.revision += 1;
        Ok(record)
    }

    pub fn update_status(&mut self, id: u64, status: RequestStatus) -> Option<Record> {
        let record = self.records.iter_mut().find(|r| r.id == id)?;
        record.status = status;
        let updated = record.clone();
        self.revision += 1;
        Some(updated)
    }

    pub fn delete(&mut self, id: u64) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.records.remove(idx);
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: u64) -> Option<Record> {
        self.records.iter().find(|r| r.id == id).cloned()
    }

    pub fn all(&self) -> Vec<Record> {
        self.records.clone()
    }

    pub fn by_status(&self, status: RequestStatus) -> Vec<Record> {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}
