// Vesper AST Module
// Defines the tree the external parser produces and the compiler consumes

mod expr;
mod stmt;

pub use expr::*;
pub use stmt::*;

#[cfg(test)]
pub(crate) mod build;
