pub mod access;
pub mod refresh;
