pub mod anchor;
pub mod archive;
mod context;
pub mod randomize;
pub mod results;
pub mod score;
pub mod session;
