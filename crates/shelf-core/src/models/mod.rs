pub mod book;

pub use book::{AsinStatus, Book, Dimensions, InfoQuality};
