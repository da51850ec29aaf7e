mod classify;
mod path_encoding;
mod preview;
mod project_stats;
mod record;
mod types;

pub use classify::*;
pub use path_encoding::*;
pub use preview::*;
pub use project_stats::*;
pub use record::*;
pub use types::*;
