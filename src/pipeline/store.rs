//! Storage boundary between stages.
//!
//! The pipeline never knows how outputs are persisted. It writes named sheets
//! of records per bucket, reads rows back by handle and sheet, and annotates
//! existing rows with later-level matches. [`MemoryStore`] is the in-process
//! implementation used by the CLI and the tests; a spreadsheet-backed store
//! implements the same trait.

use crate::error::StoreError;
use crate::model::{ClassifiedKeyword, UnmatchedKeyword};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Opaque reference to one bucket's persisted output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputHandle(String);

impl OutputHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRecord {
    Classified(ClassifiedKeyword),
    Unmatched(UnmatchedKeyword),
}

impl OutputRecord {
    pub fn keyword(&self) -> &str {
        match self {
            Self::Classified(kw) => &kw.keyword,
            Self::Unmatched(kw) => &kw.keyword,
        }
    }

    /// Row as written: matched records carry their level's rule, tag and
    /// parent columns.
    pub fn to_row(&self) -> StageRow {
        let mut row = StageRow::new(self.keyword());
        if let Self::Classified(kw) = self {
            row.record(kw);
        }
        row
    }
}

/// One stored row: the keyword plus per-level annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageRow {
    pub keyword: String,
    /// Level -> matched rule (the `阶段{L}` column).
    pub matched: BTreeMap<u32, String>,
    /// Level -> rule tag.
    pub tags: BTreeMap<u32, String>,
    /// Level -> parent rule.
    pub parents: BTreeMap<u32, String>,
}

impl StageRow {
    pub fn new(keyword: &str) -> Self {
        Self { keyword: keyword.to_string(), ..Self::default() }
    }

    pub fn matched_at(&self, level: u32) -> Option<&str> {
        self.matched.get(&level).map(String::as_str)
    }

    fn record(&mut self, kw: &ClassifiedKeyword) {
        self.matched.insert(kw.level, kw.matched_rule.clone());
        if let Some(tag) = &kw.tag {
            self.tags.insert(kw.level, tag.clone());
        }
        if let Some(parent) = &kw.parent {
            self.parents.insert(kw.level, parent.clone());
        }
    }
}

pub trait StageStore {
    /// Create or replace `sheet` in `bucket`'s output and return the output's
    /// handle. Writing to the same bucket again returns the same handle.
    fn write_sheet(&mut self, bucket: &str, sheet: &str, records: &[OutputRecord]) -> Result<OutputHandle, StoreError>;

    /// Sheets present in an output, in creation order.
    fn sheet_names(&self, handle: &OutputHandle) -> Result<Vec<String>, StoreError>;

    fn read_sheet(&self, handle: &OutputHandle, sheet: &str) -> Result<Vec<StageRow>, StoreError>;

    /// Add `level` annotations to the rows of `sheet` whose keyword appears in
    /// `matches`; other rows are left untouched.
    fn annotate(
        &mut self,
        handle: &OutputHandle,
        sheet: &str,
        level: u32,
        matches: &[ClassifiedKeyword],
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Workbook {
    sheets: Vec<(String, Vec<StageRow>)>,
}

impl Workbook {
    fn sheet(&self, name: &str) -> Option<&Vec<StageRow>> {
        self.sheets.iter().find(|(n, _)| n == name).map(|(_, rows)| rows)
    }

    fn sheet_mut(&mut self, name: &str) -> Option<&mut Vec<StageRow>> {
        self.sheets.iter_mut().find(|(n, _)| n == name).map(|(_, rows)| rows)
    }
}

/// In-memory store: one workbook of ordered sheets per bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    workbooks: BTreeMap<OutputHandle, Workbook>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_for(bucket: &str) -> OutputHandle {
        OutputHandle::new(bucket)
    }

    pub fn handles(&self) -> impl Iterator<Item = &OutputHandle> {
        self.workbooks.keys()
    }

    /// Rows of `bucket`/`sheet`, if written.
    pub fn sheet(&self, bucket: &str, sheet: &str) -> Option<&[StageRow]> {
        self.workbooks.get(&Self::handle_for(bucket))?.sheet(sheet).map(Vec::as_slice)
    }

    /// Keywords of `bucket`/`sheet` in row order; empty when absent.
    pub fn keywords(&self, bucket: &str, sheet: &str) -> Vec<&str> {
        self.sheet(bucket, sheet).unwrap_or_default().iter().map(|r| r.keyword.as_str()).collect()
    }

    fn workbook(&self, handle: &OutputHandle) -> Result<&Workbook, StoreError> {
        self.workbooks.get(handle).ok_or_else(|| StoreError::UnknownHandle(handle.to_string()))
    }
}

impl StageStore for MemoryStore {
    fn write_sheet(&mut self, bucket: &str, sheet: &str, records: &[OutputRecord]) -> Result<OutputHandle, StoreError> {
        let handle = Self::handle_for(bucket);
        let rows: Vec<StageRow> = records.iter().map(OutputRecord::to_row).collect();
        let book = self.workbooks.entry(handle.clone()).or_default();
        match book.sheet_mut(sheet) {
            Some(existing) => *existing = rows,
            None => book.sheets.push((sheet.to_string(), rows)),
        }
        Ok(handle)
    }

    fn sheet_names(&self, handle: &OutputHandle) -> Result<Vec<String>, StoreError> {
        Ok(self.workbook(handle)?.sheets.iter().map(|(name, _)| name.clone()).collect())
    }

    fn read_sheet(&self, handle: &OutputHandle, sheet: &str) -> Result<Vec<StageRow>, StoreError> {
        self.workbook(handle)?
            .sheet(sheet)
            .cloned()
            .ok_or_else(|| StoreError::MissingSheet { handle: handle.to_string(), sheet: sheet.to_string() })
    }

    fn annotate(
        &mut self,
        handle: &OutputHandle,
        sheet: &str,
        level: u32,
        matches: &[ClassifiedKeyword],
    ) -> Result<(), StoreError> {
        let book = self.workbooks.get_mut(handle).ok_or_else(|| StoreError::UnknownHandle(handle.to_string()))?;
        let rows = book
            .sheet_mut(sheet)
            .ok_or_else(|| StoreError::MissingSheet { handle: handle.to_string(), sheet: sheet.to_string() })?;

        let by_keyword: HashMap<&str, &ClassifiedKeyword> =
            matches.iter().filter(|kw| kw.level == level).map(|kw| (kw.keyword.as_str(), kw)).collect();
        for row in rows.iter_mut() {
            if let Some(kw) = by_keyword.get(row.keyword.as_str()) {
                row.record(kw);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(keyword: &str, level: u32, rule: &str, tag: Option<&str>) -> ClassifiedKeyword {
        ClassifiedKeyword {
            keyword: keyword.into(),
            matched_rule: rule.into(),
            level,
            bucket: "fruit".into(),
            sheet: "red".into(),
            tag: tag.map(String::from),
            parent: None,
        }
    }

    #[test]
    fn write_read_and_list_sheets() {
        let mut store = MemoryStore::new();
        let h1 = store.write_sheet("fruit", "Sheet1", &[OutputRecord::Classified(classified("a", 1, "r", None))]).unwrap();
        let h2 = store.write_sheet("fruit", "red", &[]).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.sheet_names(&h1).unwrap(), vec!["Sheet1", "red"]);

        let rows = store.read_sheet(&h1, "Sheet1").unwrap();
        assert_eq!(rows[0].matched_at(1), Some("r"));
        assert!(matches!(store.read_sheet(&h1, "blue"), Err(StoreError::MissingSheet { .. })));
        assert!(matches!(store.sheet_names(&OutputHandle::new("veg")), Err(StoreError::UnknownHandle(_))));
    }

    #[test]
    fn annotate_only_touches_matched_rows() {
        let mut store = MemoryStore::new();
        let records = [
            OutputRecord::Classified(classified("a", 2, "red", None)),
            OutputRecord::Classified(classified("b", 2, "red", None)),
        ];
        let handle = store.write_sheet("fruit", "red", &records).unwrap();
        store.annotate(&handle, "red", 3, &[classified("b", 3, "round", Some("shape"))]).unwrap();

        let rows = store.sheet("fruit", "red").unwrap();
        assert_eq!(rows[0].matched_at(3), None);
        assert_eq!(rows[1].matched_at(3), Some("round"));
        assert_eq!(rows[1].tags.get(&3).map(String::as_str), Some("shape"));
        assert_eq!(rows[1].matched_at(2), Some("red"));
    }
}
