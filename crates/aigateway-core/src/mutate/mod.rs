//! Header and Body Mutators (spec §4.5).

pub mod body;
pub mod header;

pub use body::BodyMutator;
pub use header::HeaderMutator;
