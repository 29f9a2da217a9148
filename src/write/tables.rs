use crate::base::types::*;
use crate::base::Record;

/// Per-input-object bookkeeping, indexed by the original object number.
#[derive(Debug, Clone, Copy)]
pub struct ObjEntry {
    /// The assigned output object number. 0 = not assigned yet; -1 = assignment in progress
    /// (used as a loop sentinel while a containing object stream is being enqueued).
    pub renumber: i64,
    /// The output object stream this object will live in, or 0 for none.
    pub object_stream: ObjNum,
    /// The original generation number.
    pub gen: ObjGen,
}

impl Default for ObjEntry {
    fn default() -> Self {
        ObjEntry { renumber: 0, object_stream: 0, gen: 0 }
    }
}

/// A dense arena of [`ObjEntry`], growable, reading past the end as default.
#[derive(Debug, Default)]
pub struct ObjTable {
    entries: Vec<ObjEntry>,
}

impl ObjTable {
    pub fn new() -> ObjTable {
        ObjTable::default()
    }

    pub fn get(&self, num: ObjNum) -> ObjEntry {
        self.entries.get(num as usize).copied().unwrap_or_default()
    }

    pub fn at_mut(&mut self, num: ObjNum) -> &mut ObjEntry {
        let ix = num as usize;
        if ix >= self.entries.len() {
            self.entries.resize_with(ix + 1, Default::default);
        }
        &mut self.entries[ix]
    }

    pub fn renumber(&self, num: ObjNum) -> i64 {
        self.get(num).renumber
    }

    /// All original object numbers with an assigned entry.
    pub fn assigned(&self) -> impl Iterator<Item = (ObjNum, ObjEntry)> + '_ {
        self.entries.iter()
            .enumerate()
            .filter(|(_, e)| e.renumber != 0)
            .map(|(num, e)| (num as ObjNum, *e))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NewObjEntry {
    /// Where the object ended up in the output.
    pub xref: Record,
    /// Reserved stream length, filled in while writing.
    pub length: Offset,
}

impl Default for NewObjEntry {
    fn default() -> Self {
        NewObjEntry { xref: Record::default(), length: 0 }
    }
}

/// Per-output-object bookkeeping, indexed by the new object number (1-based).
#[derive(Debug, Default)]
pub struct NewObjTable {
    entries: Vec<NewObjEntry>,
}

impl NewObjTable {
    pub fn new() -> NewObjTable {
        NewObjTable::default()
    }

    pub fn get(&self, id: ObjNum) -> NewObjEntry {
        self.entries.get(id as usize).copied().unwrap_or_default()
    }

    pub fn at_mut(&mut self, id: ObjNum) -> &mut NewObjEntry {
        let ix = id as usize;
        if ix >= self.entries.len() {
            self.entries.resize_with(ix + 1, Default::default);
        }
        &mut self.entries[ix]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_and_defaults() {
        let mut table = ObjTable::new();
        assert_eq!(table.renumber(42), 0);
        table.at_mut(42).renumber = 7;
        table.at_mut(42).gen = 1;
        assert_eq!(table.renumber(42), 7);
        assert_eq!(table.get(41).renumber, 0);
        assert_eq!(table.assigned().count(), 1);

        let mut new_obj = NewObjTable::new();
        new_obj.at_mut(7).xref = Record::Used { gen: 0, offset: 123 };
        new_obj.at_mut(7).length = 10;
        assert_eq!(new_obj.get(7).length, 10);
        assert!(matches!(new_obj.get(3).xref, Record::Free { .. }));
    }
}
