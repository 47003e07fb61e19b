//! Pure, deterministic logic: request types, declaration parsing, scope
//! classification, command tokenization. No I/O.

pub mod declaration;
pub mod request;
pub mod scope;
pub mod tokenizer;
