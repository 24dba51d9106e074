pub mod isbn;

pub use isbn::{Isbn, digits_only, looks_like_isbn, strip_isbn};
