//! Inline edit engine: scope state machine, staging store with batched
//! commit, and keyboard navigation.

pub mod navigation;
pub mod scope;
pub mod staging;

pub use navigation::{CellHandle, KeyboardNavigationController, NavAction, NavKey};
pub use scope::{EditScope, EditScopeMachine, FieldGroup, FieldSet, ScopeError};
pub use staging::{
    current_value, execute_plan, parse_amount, parse_member, BusyCells, CellKey, CommitFailure,
    CommitPlan, CommitReport, Mutation, PlannedMutation, RowKey, SkippedEdit, StagingStore,
};
