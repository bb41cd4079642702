pub mod config;
pub mod content;
pub mod files;
pub mod semantic;
pub mod storage;

#[cfg(test)]
mod tests;
