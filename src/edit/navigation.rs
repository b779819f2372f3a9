//! Keyboard focus movement between editable cells.
//!
//! Cells are addressed by `(column, row position on the current page)`. The
//! controller owns the order explicitly; nothing is looked up by name.

use serde::Serialize;

use super::scope::{FieldGroup, FieldSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CellHandle {
    pub column: FieldGroup,
    pub row_index: usize,
}

impl CellHandle {
    pub fn new(column: FieldGroup, row_index: usize) -> Self {
        Self { column, row_index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Enter,
    /// Tab without modifiers, a commit key like Enter
    Tab,
    /// Shift+Tab
    BackTab,
}

impl NavKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "enter" | "return" => Some(NavKey::Enter),
            "tab" => Some(NavKey::Tab),
            "shift+tab" | "backtab" => Some(NavKey::BackTab),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NavAction {
    Focus { cell: CellHandle },
    /// Show `page`; focus lands in `column` once `set_page_layout` reports
    /// the new page.
    ChangePage { page: usize, column: FieldGroup },
    Submit,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Layout {
    Inactive,
    Columns(FieldSet),
    /// Hop order across one row; the last hop submits. `page` is where the
    /// row is shown, `None` while it is filtered out.
    Row {
        page: Option<usize>,
        row_index: usize,
        chain: Vec<FieldGroup>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingFocus {
    column: FieldGroup,
    last_row: bool,
}

#[derive(Debug, Clone)]
pub struct KeyboardNavigationController {
    layout: Layout,
    page: usize,
    total_pages: usize,
    rows_on_page: usize,
    focused: Option<CellHandle>,
    pending: Option<PendingFocus>,
}

impl Default for KeyboardNavigationController {
    fn default() -> Self {
        Self {
            layout: Layout::Inactive,
            page: 1,
            total_pages: 1,
            rows_on_page: 0,
            focused: None,
            pending: None,
        }
    }
}

impl KeyboardNavigationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focused(&self) -> Option<CellHandle> {
        self.focused
    }

    pub fn is_active(&self) -> bool {
        self.layout != Layout::Inactive
    }

    /// Report what the current page looks like. Resolves a focus left
    /// pending by a page change and returns it.
    pub fn set_page_layout(
        &mut self,
        page: usize,
        total_pages: usize,
        rows_on_page: usize,
    ) -> Option<CellHandle> {
        self.page = page.max(1);
        self.total_pages = total_pages.max(1);
        self.rows_on_page = rows_on_page;

        if let Some(focused) = self.focused {
            if !self.is_editable(focused) {
                self.focused = None;
            }
        }

        let pending = self.pending.take()?;
        if rows_on_page == 0 {
            return None;
        }
        let row_index = if pending.last_row { rows_on_page - 1 } else { 0 };
        let cell = CellHandle::new(pending.column, row_index);
        self.focused = Some(cell);
        Some(cell)
    }

    /// Column editing: focus the first row of the first column.
    pub fn begin_columns(&mut self, columns: FieldSet) -> Option<CellHandle> {
        self.layout = Layout::Columns(columns);
        self.pending = None;
        self.focused = match columns.iter().next() {
            Some(column) if self.rows_on_page > 0 => Some(CellHandle::new(column, 0)),
            _ => None,
        };
        self.focused
    }

    /// Row editing: hop through `fields` in column order on one row.
    pub fn begin_row(&mut self, row_index: usize, fields: FieldSet) -> Option<CellHandle> {
        let chain: Vec<FieldGroup> = fields.iter().collect();
        self.focused = chain.first().map(|c| CellHandle::new(*c, row_index));
        self.layout = Layout::Row {
            page: Some(self.page),
            row_index,
            chain,
        };
        self.pending = None;
        self.focused
    }

    /// The edited row now sits at `row_index` of `page`, or is not shown at
    /// all. Focus follows the row; a hidden row loses it.
    pub fn relocate_row(&mut self, page: usize, row_index: Option<usize>) {
        let Layout::Row {
            page: row_page,
            row_index: current,
            ..
        } = &mut self.layout
        else {
            return;
        };
        match row_index {
            Some(index) => {
                *row_page = Some(page);
                *current = index;
                self.focused = self.focused.map(|f| CellHandle::new(f.column, index));
            }
            None => {
                *row_page = None;
                self.focused = None;
            }
        }
    }

    pub fn clear(&mut self) {
        self.layout = Layout::Inactive;
        self.focused = None;
        self.pending = None;
    }

    pub fn is_editable(&self, cell: CellHandle) -> bool {
        match &self.layout {
            Layout::Inactive => false,
            Layout::Columns(columns) => {
                columns.contains(cell.column) && cell.row_index < self.rows_on_page
            }
            Layout::Row {
                page,
                row_index,
                chain,
            } => {
                *page == Some(self.page)
                    && cell.row_index == *row_index
                    && cell.row_index < self.rows_on_page
                    && chain.contains(&cell.column)
            }
        }
    }

    /// Explicit focus, e.g. from a click.
    pub fn focus(&mut self, cell: CellHandle) -> bool {
        if !self.is_editable(cell) {
            return false;
        }
        self.focused = Some(cell);
        true
    }

    /// Whether Enter on `cell` saves instead of moving on: the single field
    /// of a row edit, the last hop of a row chain, or the last row of the
    /// last page in column mode.
    pub fn submits_at(&self, cell: CellHandle) -> bool {
        match &self.layout {
            Layout::Inactive => false,
            Layout::Columns(_) => {
                self.page >= self.total_pages && cell.row_index + 1 == self.rows_on_page
            }
            Layout::Row { chain, .. } => chain.last() == Some(&cell.column),
        }
    }

    pub fn handle_key(&mut self, key: NavKey) -> NavAction {
        let Some(cell) = self.focused else {
            return NavAction::None;
        };
        match key {
            NavKey::Enter | NavKey::Tab if self.submits_at(cell) => NavAction::Submit,
            NavKey::Enter | NavKey::Tab => self.focus_next(),
            NavKey::BackTab => self.focus_prev(),
        }
    }

    pub fn focus_next(&mut self) -> NavAction {
        let Some(cell) = self.focused else {
            return NavAction::None;
        };

        let action = match &self.layout {
            Layout::Inactive => NavAction::None,
            Layout::Columns(_) => {
                if cell.row_index + 1 < self.rows_on_page {
                    NavAction::Focus {
                        cell: CellHandle::new(cell.column, cell.row_index + 1),
                    }
                } else if self.page < self.total_pages {
                    self.pending = Some(PendingFocus {
                        column: cell.column,
                        last_row: false,
                    });
                    NavAction::ChangePage {
                        page: self.page + 1,
                        column: cell.column,
                    }
                } else {
                    NavAction::None
                }
            }
            Layout::Row { row_index, chain, .. } => chain
                .iter()
                .position(|c| *c == cell.column)
                .and_then(|pos| chain.get(pos + 1))
                .map_or(NavAction::None, |next| NavAction::Focus {
                    cell: CellHandle::new(*next, *row_index),
                }),
        };
        self.apply(action)
    }

    pub fn focus_prev(&mut self) -> NavAction {
        let Some(cell) = self.focused else {
            return NavAction::None;
        };

        let action = match &self.layout {
            Layout::Inactive => NavAction::None,
            Layout::Columns(_) => {
                if cell.row_index > 0 {
                    NavAction::Focus {
                        cell: CellHandle::new(cell.column, cell.row_index - 1),
                    }
                } else if self.page > 1 {
                    self.pending = Some(PendingFocus {
                        column: cell.column,
                        last_row: true,
                    });
                    NavAction::ChangePage {
                        page: self.page - 1,
                        column: cell.column,
                    }
                } else {
                    NavAction::None
                }
            }
            Layout::Row { row_index, chain, .. } => chain
                .iter()
                .position(|c| *c == cell.column)
                .filter(|pos| *pos > 0)
                .map_or(NavAction::None, |pos| NavAction::Focus {
                    cell: CellHandle::new(chain[pos - 1], *row_index),
                }),
        };
        self.apply(action)
    }

    fn apply(&mut self, action: NavAction) -> NavAction {
        match action {
            NavAction::Focus { cell } => self.focused = Some(cell),
            NavAction::ChangePage { .. } => self.focused = None,
            NavAction::Submit | NavAction::None => {}
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(page: usize, pages: usize, rows: usize, field: FieldGroup) -> KeyboardNavigationController {
        let mut nav = KeyboardNavigationController::new();
        nav.set_page_layout(page, pages, rows);
        nav.begin_columns(FieldSet::single(field));
        nav
    }

    #[test]
    fn test_column_walks_down_the_page() {
        let mut nav = columns(1, 1, 3, FieldGroup::Payout);
        assert_eq!(nav.focused(), Some(CellHandle::new(FieldGroup::Payout, 0)));

        assert_eq!(
            nav.handle_key(NavKey::Enter),
            NavAction::Focus {
                cell: CellHandle::new(FieldGroup::Payout, 1)
            }
        );
        assert_eq!(
            nav.handle_key(NavKey::Tab),
            NavAction::Focus {
                cell: CellHandle::new(FieldGroup::Payout, 2)
            }
        );
        assert_eq!(
            nav.handle_key(NavKey::BackTab),
            NavAction::Focus {
                cell: CellHandle::new(FieldGroup::Payout, 1)
            }
        );
    }

    #[test]
    fn test_last_row_advances_page_then_focuses_first_cell() {
        let mut nav = columns(1, 2, 2, FieldGroup::Member);
        nav.focus(CellHandle::new(FieldGroup::Member, 1));

        assert_eq!(
            nav.handle_key(NavKey::Enter),
            NavAction::ChangePage {
                page: 2,
                column: FieldGroup::Member
            }
        );
        assert_eq!(nav.focused(), None);
        assert_eq!(nav.handle_key(NavKey::Enter), NavAction::None);

        let focused = nav.set_page_layout(2, 2, 1);
        assert_eq!(focused, Some(CellHandle::new(FieldGroup::Member, 0)));
    }

    #[test]
    fn test_enter_on_last_cell_of_last_page_submits_once() {
        let mut nav = columns(2, 2, 3, FieldGroup::Collection);
        nav.focus(CellHandle::new(FieldGroup::Collection, 2));

        assert_eq!(nav.handle_key(NavKey::Enter), NavAction::Submit);
        assert_eq!(nav.handle_key(NavKey::Tab), NavAction::Submit);
        // Shift+Tab is never a commit key
        assert_eq!(
            nav.handle_key(NavKey::BackTab),
            NavAction::Focus {
                cell: CellHandle::new(FieldGroup::Collection, 1)
            }
        );
    }

    #[test]
    fn test_back_tab_on_first_row_goes_to_previous_page_last_row() {
        let mut nav = columns(2, 3, 4, FieldGroup::Payout);
        assert_eq!(
            nav.handle_key(NavKey::BackTab),
            NavAction::ChangePage {
                page: 1,
                column: FieldGroup::Payout
            }
        );
        assert_eq!(
            nav.set_page_layout(1, 3, 10),
            Some(CellHandle::new(FieldGroup::Payout, 9))
        );
    }

    #[test]
    fn test_single_field_row_edit_submits() {
        let mut nav = KeyboardNavigationController::new();
        nav.set_page_layout(1, 3, 10);
        nav.begin_row(4, FieldSet::single(FieldGroup::Payout));
        assert_eq!(nav.handle_key(NavKey::Enter), NavAction::Submit);
    }

    #[test]
    fn test_row_all_chain_hops_across_fields() {
        let mut nav = KeyboardNavigationController::new();
        nav.set_page_layout(1, 1, 5);
        nav.begin_row(2, FieldSet::applicable(true));

        let mut visited = vec![nav.focused().map(|c| c.column)];
        loop {
            match nav.handle_key(NavKey::Enter) {
                NavAction::Focus { cell } => {
                    assert_eq!(cell.row_index, 2);
                    visited.push(Some(cell.column));
                }
                NavAction::Submit => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(
            visited,
            vec![
                Some(FieldGroup::Member),
                Some(FieldGroup::Payout),
                Some(FieldGroup::Auction),
                Some(FieldGroup::Collection),
            ]
        );
    }

    #[test]
    fn test_row_chain_skips_auction_for_plain_schemes() {
        let mut nav = KeyboardNavigationController::new();
        nav.set_page_layout(1, 1, 5);
        nav.begin_row(0, FieldSet::applicable(false));
        nav.handle_key(NavKey::Tab);
        assert_eq!(
            nav.handle_key(NavKey::Tab),
            NavAction::Focus {
                cell: CellHandle::new(FieldGroup::Collection, 0)
            }
        );
    }

    #[test]
    fn test_row_focus_does_not_survive_a_page_change() {
        let mut nav = KeyboardNavigationController::new();
        nav.set_page_layout(1, 3, 10);
        nav.begin_row(2, FieldSet::single(FieldGroup::Payout));

        // row 2 of page two is another month
        assert_eq!(nav.set_page_layout(2, 3, 10), None);
        assert_eq!(nav.focused(), None);
        assert_eq!(nav.handle_key(NavKey::Enter), NavAction::None);
        assert!(!nav.focus(CellHandle::new(FieldGroup::Payout, 2)));

        nav.set_page_layout(1, 3, 10);
        assert!(nav.focus(CellHandle::new(FieldGroup::Payout, 2)));
        assert_eq!(nav.handle_key(NavKey::Enter), NavAction::Submit);
    }

    #[test]
    fn test_relocated_row_carries_focus() {
        let mut nav = KeyboardNavigationController::new();
        nav.set_page_layout(1, 1, 5);
        nav.begin_row(3, FieldSet::applicable(false));
        nav.handle_key(NavKey::Tab);

        nav.relocate_row(1, Some(0));
        assert_eq!(
            nav.focused(),
            Some(CellHandle::new(FieldGroup::Payout, 0))
        );
        assert!(!nav.focus(CellHandle::new(FieldGroup::Payout, 3)));

        nav.relocate_row(1, None);
        assert_eq!(nav.focused(), None);
        assert!(!nav.focus(CellHandle::new(FieldGroup::Payout, 0)));
    }

    #[test]
    fn test_focus_rejects_cells_outside_the_scope() {
        let mut nav = columns(1, 1, 3, FieldGroup::Payout);
        assert!(!nav.focus(CellHandle::new(FieldGroup::Member, 0)));
        assert!(!nav.focus(CellHandle::new(FieldGroup::Payout, 3)));
        nav.clear();
        assert_eq!(nav.handle_key(NavKey::Enter), NavAction::None);
    }
}
