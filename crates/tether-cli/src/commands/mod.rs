mod check;
pub(crate) mod generate;

pub use check::handle_check;
pub use generate::{handle_generate, GenerateArgs};
