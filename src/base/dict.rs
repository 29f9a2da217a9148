use std::fmt::{Display, Formatter};

use super::name::Name;
use super::object::Object;

/// Dictionary objects (like `<< /Length 42 >>`).
///
/// Key order is preserved; a rewriter should not shuffle dictionaries it copies.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Dict(Vec<(Name, Object)>);

impl Dict {
    pub fn new() -> Dict {
        Dict(Vec::new())
    }

    /// Looks up a value for a given [`Name`] key. If not present, returns a static reference
    /// to [`Object::Null`].
    pub fn lookup(&self, key: &[u8]) -> &Object {
        self.0.iter()
            .find(|(name, _obj)| name == &key)
            .map(|(_name, obj)| obj)
            .unwrap_or(&Object::Null)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.0.iter().any(|(name, _obj)| name == &key)
    }

    /// Replaces the value under `key`, or appends the pair if the key was not present.
    pub fn insert(&mut self, key: Name, value: Object) {
        match self.0.iter_mut().find(|(name, _obj)| name == &key.as_slice()) {
            Some((_name, obj)) => *obj = value,
            None => self.0.push((key, value))
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        let ix = self.0.iter().position(|(name, _obj)| name == &key)?;
        Some(self.0.remove(ix).1)
    }

    /// A copy of this dictionary without the listed keys.
    pub fn without_keys(&self, keys: &[&[u8]]) -> Dict {
        Dict(self.0.iter()
            .filter(|(name, _obj)| !keys.iter().any(|key| name == key))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (Name, Object)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<(Name, Object)> {
        self.0
    }
}

impl From<Vec<(Name, Object)>> for Dict {
    fn from(vec: Vec<(Name, Object)>) -> Dict {
        Dict(vec)
    }
}

impl IntoIterator for Dict {
    type Item = (Name, Object);
    type IntoIter = <Vec<(Name, Object)> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Dict {
    type Item = &'a (Name, Object);
    type IntoIter = std::slice::Iter<'a, (Name, Object)>;

    fn into_iter(self: &'a Dict) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for Dict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("<< ")?;
        for (key, val) in &self.0 {
            write!(f, "{key} {val} ")?;
        }
        f.write_str(">>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::*;

    #[test]
    fn test_dict() {
        let mut dict = Dict::from(vec![
            (Name::from(b"NKey"), Object::new_name(b"Nvalue")),
            (Name::from(b"IKey"), Object::Number(Number::Int(10))),
        ]);
        assert_eq!(dict.lookup(b"NKey"), &Object::new_name(b"Nvalue"));
        assert_eq!(dict.lookup(b"IKey"), &Object::Number(Number::Int(10)));
        assert_eq!(dict.lookup(b"Missing"), &Object::Null);

        dict.insert(Name::from(b"IKey"), Object::Number(Number::Int(11)));
        assert_eq!(dict.lookup(b"IKey"), &Object::Number(Number::Int(11)));
        assert_eq!(dict.len(), 2);
        dict.insert(Name::from(b"New"), Object::Bool(true));
        assert_eq!(dict.len(), 3);

        assert_eq!(dict.remove(b"NKey"), Some(Object::new_name(b"Nvalue")));
        assert!(!dict.contains_key(b"NKey"));

        let trimmed = dict.without_keys(&[b"IKey"]);
        assert!(!trimmed.contains_key(b"IKey"));
        assert!(trimmed.contains_key(b"New"));
    }
}
