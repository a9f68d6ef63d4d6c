//! Model layer
//!
//! Structure:
//! - `resource_ref.rs` - hashable object identity
//! - `object.rs` - accessors over dynamic objects (status, finalizers, owners)
//! - `condition.rs` - status conditions and condition sets

pub mod condition;
pub mod object;
pub mod resource_ref;

pub use condition::{
    Condition, ConditionSet, ConditionStatus, find_condition, normalize_conditions, set_condition,
};
pub use object::{Object, ObjectExt, controller_owner_ref, metadata_time};
pub use resource_ref::{ResourceRef, group_of};
