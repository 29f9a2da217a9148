//! A library for reading PDF files and writing them back out in a controlled layout.
//!
//! The [`reader`] module loads a document and its cross-reference data into memory, the
//! [`write`] module serializes it back with configurable compression, object streams,
//! encryption and linearization, and [`lin::check_linearization`] validates the linearization
//! metadata of an existing file.

pub mod base;
pub mod codecs;
pub mod lin;
pub mod parser;
pub mod reader;
pub mod write;

pub(crate) mod utils;
