pub mod help;
pub mod system;

pub use help::HelpCommand;
pub use system::{ClearCommand, ExitCommand};
