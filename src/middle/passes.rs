//! The IR pass pipeline.

pub mod br_induce;
pub mod cg;
pub mod dbe;
pub mod dce;
pub mod dge;
pub mod dle;
pub mod gvn_gcm;
pub mod mem2reg;

pub use br_induce::br_induce;
pub use cg::cg;
pub use dbe::dbe;
pub use dce::{cd, dce};
pub use dge::dge;
pub use dle::dle;
pub use gvn_gcm::gg;
pub use mem2reg::mem2reg;
