mod flate;

pub use flate::{compress, png_encode};

use crate::base::*;
use std::io::BufRead;

/// Supported PDF filters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Filter {
    /// `/FlateDecode`
    Flate,
}

impl TryFrom<&Name> for Filter {
    type Error = Error;

    fn try_from(name: &Name) -> Result<Filter, Error> {
        if name == b"FlateDecode" {
            Ok(Filter::Flate)
        } else {
            Err(Error::Data(format!("unimplemented filter {name}")))
        }
    }
}

/// Wraps a `BufRead` in an adapter decoding the data according to the provided `/Filter` and
/// `/DecodeParms` configuration.
///
/// Both of these need to be provided as fully resolved objects. Moreover, the `filter` argument
/// needs to be provided in the form of an array of [`Filter`]s. To convert a generic `Object`
/// to this unified format, see [`to_filters()`].
pub fn decode<'a, R: BufRead + 'a>(input: R, filter: &[Filter], params: Option<&Dict>) -> Box<dyn BufRead + 'a> {
    match filter {
        [] => Box::new(input),
        [rest @ .., Filter::Flate] => {
            let inner = decode(input, rest, None);
            flate::decode(inner, params.unwrap_or(&Dict::default()))
        }
    }
}

/// Resolve a PDF `Object` value of the `/Filter` key into the format expected by [`decode()`].
pub fn to_filters(obj: &Object) -> Result<Vec<Filter>, Error> {
    match obj {
        Object::Name(name) => Ok(vec![name.try_into()?]),
        Object::Array(vec) => vec.iter()
            .map(|obj| match obj {
                Object::Name(name) => name.try_into(),
                _ => Err(Error::Parse("malformed /Filter"))
            })
            .collect::<Result<Vec<_>, _>>(),
        Object::Null => Ok(vec![]),
        _ => Err(Error::Parse("malformed /Filter"))
    }
}
