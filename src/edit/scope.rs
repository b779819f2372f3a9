//! Edit scope state machine
//!
//! A single tagged union replaces per-column flags and per-row ids. Column
//! scopes can stack ("edit all" turns on every column at once) but never
//! coexist with a row scope, and only one row can be open at a time.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Editable column of the ledger.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    Member,
    Payout,
    Auction,
    Collection,
}

impl FieldGroup {
    /// Column order on screen, which is also the hop order of a row-all edit.
    pub const ALL: [FieldGroup; 4] = [
        FieldGroup::Member,
        FieldGroup::Payout,
        FieldGroup::Auction,
        FieldGroup::Collection,
    ];

    fn bit(self) -> u8 {
        match self {
            FieldGroup::Member => 1,
            FieldGroup::Payout => 1 << 1,
            FieldGroup::Auction => 1 << 2,
            FieldGroup::Collection => 1 << 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldGroup::Member => "member",
            FieldGroup::Payout => "payout",
            FieldGroup::Auction => "auction",
            FieldGroup::Collection => "collection",
        }
    }
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Small ordered set of columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FieldSet(u8);

impl FieldSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn single(field: FieldGroup) -> Self {
        Self(field.bit())
    }

    /// Every column that applies to the scheme (auction only for auction schemes).
    pub fn applicable(is_auction: bool) -> Self {
        FieldGroup::ALL
            .into_iter()
            .filter(|f| is_auction || *f != FieldGroup::Auction)
            .collect()
    }

    pub fn insert(&mut self, field: FieldGroup) -> bool {
        let added = !self.contains(field);
        self.0 |= field.bit();
        added
    }

    pub fn contains(&self, field: FieldGroup) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = FieldGroup> + '_ {
        FieldGroup::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl FromIterator<FieldGroup> for FieldSet {
    fn from_iter<I: IntoIterator<Item = FieldGroup>>(iter: I) -> Self {
        let mut set = FieldSet::empty();
        for f in iter {
            set.insert(f);
        }
        set
    }
}

impl Serialize for FieldSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditScope {
    #[default]
    Idle,
    /// One or more whole columns across every row.
    Columns { fields: FieldSet },
    /// Some or all fields of a single month.
    Row { month_index: u32, fields: FieldSet },
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("month {month_index} is open for row editing")]
    RowEditActive { month_index: u32 },
    #[error("column editing is active")]
    ColumnEditActive,
    #[error("{0} editing is not available for this scheme")]
    NotApplicable(FieldGroup),
    #[error("month {0} is not part of this scheme")]
    UnknownMonth(u32),
    #[error("no fields selected")]
    NoFields,
    #[error("nothing is being edited")]
    NotEditing,
    #[error("ledger is not loaded")]
    NotLoaded,
    #[error("{field} of month {month_index} is not open for editing")]
    NotEditable { field: FieldGroup, month_index: u32 },
    #[error("{field} of month {month_index} is being saved")]
    CellBusy { field: FieldGroup, month_index: u32 },
}

/// Tracks the active scope for one scheme.
#[derive(Debug, Clone)]
pub struct EditScopeMachine {
    scope: EditScope,
    is_auction: bool,
    duration_months: u32,
}

impl EditScopeMachine {
    pub fn new(is_auction: bool, duration_months: u32) -> Self {
        Self {
            scope: EditScope::Idle,
            is_auction,
            duration_months,
        }
    }

    pub fn scope(&self) -> &EditScope {
        &self.scope
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.scope, EditScope::Idle)
    }

    /// Follow a scheme change (type or length) without touching the scope.
    pub fn reconfigure(&mut self, is_auction: bool, duration_months: u32) {
        self.is_auction = is_auction;
        self.duration_months = duration_months;
    }

    fn check_applicable(&self, field: FieldGroup) -> Result<(), ScopeError> {
        if field == FieldGroup::Auction && !self.is_auction {
            return Err(ScopeError::NotApplicable(field));
        }
        Ok(())
    }

    /// Open whole-column editing for `fields`.
    ///
    /// Returns the columns that were newly activated; columns that were
    /// already open keep their edits and are not returned.
    pub fn enter_columns(&mut self, fields: FieldSet) -> Result<FieldSet, ScopeError> {
        if fields.is_empty() {
            return Err(ScopeError::NoFields);
        }
        for f in fields.iter() {
            self.check_applicable(f)?;
        }

        match &mut self.scope {
            EditScope::Row { month_index, .. } => Err(ScopeError::RowEditActive {
                month_index: *month_index,
            }),
            EditScope::Idle => {
                self.scope = EditScope::Columns { fields };
                Ok(fields)
            }
            EditScope::Columns { fields: active } => {
                let added: FieldSet = fields.iter().filter(|f| active.insert(*f)).collect();
                Ok(added)
            }
        }
    }

    pub fn enter_column(&mut self, field: FieldGroup) -> Result<FieldSet, ScopeError> {
        self.enter_columns(FieldSet::single(field))
    }

    /// "Edit all": every applicable column at once.
    pub fn enter_all_columns(&mut self) -> Result<FieldSet, ScopeError> {
        self.enter_columns(FieldSet::applicable(self.is_auction))
    }

    /// Open row editing. Only allowed from `Idle`: a second row while one is
    /// open is rejected rather than replacing it.
    pub fn enter_row(&mut self, month_index: u32, fields: FieldSet) -> Result<(), ScopeError> {
        if fields.is_empty() {
            return Err(ScopeError::NoFields);
        }
        if month_index == 0 || month_index > self.duration_months {
            return Err(ScopeError::UnknownMonth(month_index));
        }
        for f in fields.iter() {
            self.check_applicable(f)?;
        }

        match self.scope {
            EditScope::Idle => {
                self.scope = EditScope::Row {
                    month_index,
                    fields,
                };
                Ok(())
            }
            EditScope::Columns { .. } => Err(ScopeError::ColumnEditActive),
            EditScope::Row { month_index, .. } => Err(ScopeError::RowEditActive { month_index }),
        }
    }

    /// "Edit entire row": every applicable field of one month.
    pub fn enter_row_all(&mut self, month_index: u32) -> Result<FieldSet, ScopeError> {
        let fields = FieldSet::applicable(self.is_auction);
        self.enter_row(month_index, fields)?;
        Ok(fields)
    }

    /// Whether a cell is currently editable under the active scope.
    pub fn is_editing(&self, field: FieldGroup, month_index: u32) -> bool {
        match self.scope {
            EditScope::Idle => false,
            EditScope::Columns { fields } => fields.contains(field),
            EditScope::Row {
                month_index: open,
                fields,
            } => open == month_index && fields.contains(field),
        }
    }

    /// Guard for `save()`: there must be something open.
    pub fn begin_save(&self) -> Result<EditScope, ScopeError> {
        match self.scope {
            EditScope::Idle => Err(ScopeError::NotEditing),
            scope => Ok(scope),
        }
    }

    /// Back to `Idle` from any state.
    pub fn cancel(&mut self) -> EditScope {
        std::mem::take(&mut self.scope)
    }
}
