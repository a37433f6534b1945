//! Authorization engine (§4.3): group closure, the hierarchical privilege walk, and
//! effective row-filter/column-mask resolution.

pub mod closure;
pub mod policy;
pub mod privilege;

pub use closure::group_closure;
pub use policy::{effective_column_masks, effective_row_filters};
pub use privilege::{check_privilege, has_grant};
