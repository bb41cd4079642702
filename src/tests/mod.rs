mod directory;
pub mod support;
