mod reader;

pub use reader::FileSourceReader;
