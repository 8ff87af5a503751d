mod layout;
mod paths;

pub use layout::ScratchLayout;
pub use paths::{AppPaths, AppPathsError};
