//! Building blocks shared by the structures.

pub mod version;
