// Document format support for the reader
//
// Most parsing and decoding lives in the `smol-epub` crate; this module
// re-exports it so the rest of pulp-os can keep using `crate::formats::*`
// paths. `book_index` needs SD access so it lives here instead.

pub mod book_index;

pub use smol_epub::cache;
pub use smol_epub::css;
pub use smol_epub::epub;
pub use smol_epub::html_strip;
pub use smol_epub::jpeg;
pub use smol_epub::png;
pub use smol_epub::xml;
pub use smol_epub::zip;
