pub mod archive;
pub mod retention;
