mod bp;
pub(crate) mod cc;
mod tk;
mod op;
mod fp;

pub use fp::{FileParser, Parsed};
pub(crate) use bp::ByteProvider;
pub(crate) use tk::Tokenizer;
pub use op::ObjParser;
