//! Shared vocabulary for the argus monitoring engine: fact and alert types,
//! probe/rule descriptors, stable alert-id derivation, and fact-key hygiene.

pub mod factkey;
pub mod ident;
pub mod time;
pub mod types;
