mod archive;
mod clipboard;
mod delete;
mod export;
mod scan;
mod session_index;

pub use archive::*;
pub use clipboard::*;
pub use delete::*;
pub use export::*;
pub use scan::*;
pub use session_index::*;
