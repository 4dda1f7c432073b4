mod args;
mod driver;

pub use args::*;
pub use driver::{MsnTreer, MsnTreerError};
