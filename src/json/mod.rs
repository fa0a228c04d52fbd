//! The demo language family: JSON with comments.
//!
//! Small enough to keep the focus on the transfer machinery, rich enough to
//! exercise every padding, container and list case the machinery supports.

pub mod parser;
pub mod printer;

pub use parser::parse;
pub use printer::{check_print_idempotence, print, print_decorated, DecorationSide};
