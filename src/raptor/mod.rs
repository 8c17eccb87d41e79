pub mod builder;
pub mod chunker;
pub mod clustering;
pub mod error;
pub mod persistence;
pub mod selector;
pub mod summarizer;
pub mod tree;
pub mod validate;

pub use builder::*;
pub use chunker::*;
pub use clustering::*;
pub use error::*;
pub use persistence::*;
pub use selector::*;
pub use summarizer::*;
pub use tree::*;
pub use validate::*;
