pub mod bitvector;
pub mod index_set;
pub mod phase_scope;
pub mod visit;
