pub mod fs;
pub mod parser;
pub mod store;
