//! The mutable, observable script model.
//!
//! Everything in here lives on the UI thread: records use `Cell`/`RefCell`
//! for interior mutability and announce changes through [`Event`]s.

pub mod character;
pub mod event;
pub mod features;
pub mod handle;
pub mod jinx;
pub mod meta;
pub mod reminder;
pub mod team;
pub mod tracked;

pub use character::{Character, CharacterField, NightInfo};
pub use event::{Event, SubscriptionId};
pub use features::{
    AbilityFeature, AppFeatures, GlobalScope, RowState, ScopeGrid, Selection, Signal, SignalKind,
    TimeOfDay,
};
pub use handle::Handle;
pub use jinx::{Jinx, JinxField};
pub use meta::{Meta, MetaField};
pub use reminder::ReminderToken;
pub use team::{Night, SortInfo, Team};
pub use tracked::{PendingSort, Placement, TrackedList};
