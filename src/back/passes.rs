//! The machine-IR pass pipeline.

pub mod bb_normalize;
pub mod coalesce;
pub mod dce;
pub mod liveness;
pub mod reg_alloc;
pub mod reg_restore;

pub use bb_normalize::bb_normalize;
pub use coalesce::move_coalesce;
pub use dce::dce;
pub use reg_alloc::reg_alloc;
pub use reg_restore::reg_restore;
