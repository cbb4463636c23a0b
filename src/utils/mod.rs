pub mod bh_tree;
pub mod macros;
pub mod math;
