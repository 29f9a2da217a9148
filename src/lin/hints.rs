use crate::base::*;
use crate::lin::plan::LinData;
use crate::write::bits::{nbits, BitReader, BitWriter};
use crate::write::tables::{NewObjTable, ObjTable};

/// Page offset hint table: header plus one entry per page. Entries store deltas against the
/// header minima, exactly as they appear in the bit stream.
#[derive(Debug, Default, PartialEq)]
pub struct HPageOffset {
    pub min_nobjects: u64,
    pub first_page_offset: u64,
    pub nbits_delta_nobjects: usize,
    pub min_page_length: u64,
    pub nbits_delta_page_length: usize,
    pub min_content_offset: u64,
    pub nbits_delta_content_offset: usize,
    pub min_content_length: u64,
    pub nbits_delta_content_length: usize,
    pub nbits_nshared_objects: usize,
    pub nbits_shared_identifier: usize,
    pub nbits_shared_numerator: usize,
    pub shared_denominator: u64,
    pub entries: Vec<HPageOffsetEntry>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct HPageOffsetEntry {
    pub delta_nobjects: u64,
    pub delta_page_length: u64,
    pub nshared_objects: u64,
    pub shared_identifiers: Vec<u64>,
    pub shared_numerators: Vec<u64>,
    pub delta_content_offset: u64,
    pub delta_content_length: u64,
}

/// Shared object hint table.
#[derive(Debug, Default, PartialEq)]
pub struct HSharedObject {
    pub first_shared_obj: u64,
    pub first_shared_offset: u64,
    pub nshared_first_page: u64,
    pub nshared_total: u64,
    pub nbits_nobjects: usize,
    pub min_group_length: u64,
    pub nbits_delta_group_length: usize,
    pub entries: Vec<HSharedObjectEntry>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct HSharedObjectEntry {
    pub delta_group_length: u64,
    pub signature_present: u64,
    pub nobjects_minus_one: u64,
}

/// Generic hint table, used for the outline group.
#[derive(Debug, Default, PartialEq)]
pub struct HGeneric {
    pub first_object: u64,
    pub first_object_offset: u64,
    pub nobjects: u64,
    pub group_length: u64,
}

#[derive(Debug, Default, PartialEq)]
pub struct HintTables {
    pub page_offset: HPageOffset,
    pub shared_object: HSharedObject,
    pub outline: Option<HGeneric>,
}

/// Total output length of `n` objects numbered consecutively after whatever `first` was
/// renumbered to. The plan guarantees such groups are written contiguously.
fn group_length(first: types::ObjNum, n: usize, obj: &ObjTable, new_obj: &NewObjTable)
        -> Result<u64, Error> {
    let start = obj.renumber(first);
    if start <= 0 {
        return Err(Error::Data("unrenumbered object in linearization plan".into()));
    }
    let mut total = 0;
    for id in start as types::ObjNum..start as types::ObjNum + n as types::ObjNum {
        match new_obj.get(id).length {
            0 => return Err(Error::Data("object with unknown length in linearization plan".into())),
            len => total += len,
        }
    }
    Ok(total)
}

fn offset_of(num: types::ObjNum, obj: &ObjTable, new_obj: &NewObjTable) -> Result<u64, Error> {
    new_obj.get(obj.renumber(num) as types::ObjNum).xref.offset()
        .ok_or_else(|| Error::Data("missing offset in linearization plan".into()))
}

impl HintTables {
    pub fn calculate(plan: &LinData, obj: &ObjTable, new_obj: &NewObjTable)
            -> Result<HintTables, Error> {
        Ok(HintTables {
            page_offset: calculate_page_offset(plan, obj, new_obj)?,
            shared_object: calculate_shared_object(plan, obj, new_obj)?,
            outline: calculate_outline(plan, obj, new_obj)?,
        })
    }

    /// Serializes the tables; returns the data along with the byte offsets of the shared-object
    /// table (`/S`) and, when present, the outline table (`/O`).
    pub fn write(&self) -> (Vec<u8>, usize, Option<usize>) {
        let mut w = BitWriter::new();
        self.page_offset.write(&mut w);
        let shared_offset = w.byte_len();
        self.shared_object.write(&mut w);
        let outline_offset = self.outline.as_ref().map(|outline| {
            let offset = w.byte_len();
            outline.write(&mut w);
            offset
        });
        (w.into_bytes(), shared_offset, outline_offset)
    }

    pub fn read(data: &[u8], npages: usize, shared_offset: usize, outline_offset: Option<usize>)
            -> Result<HintTables, Error> {
        if shared_offset > data.len() {
            return Err(Error::Parse("shared object table offset out of bounds"));
        }
        let page_offset = HPageOffset::read(&mut BitReader::new(data), npages)?;
        let shared_object = HSharedObject::read(&mut BitReader::new(&data[shared_offset..]))?;
        let outline = match outline_offset {
            Some(offset) if offset <= data.len() =>
                Some(HGeneric::read(&mut BitReader::new(&data[offset..]))?),
            Some(_) => return Err(Error::Parse("outline table offset out of bounds")),
            None => None,
        };
        Ok(HintTables { page_offset, shared_object, outline })
    }
}

fn calculate_page_offset(plan: &LinData, obj: &ObjTable, new_obj: &NewObjTable)
        -> Result<HPageOffset, Error> {
    let mut nobjects = Vec::with_capacity(plan.pages.len());
    let mut lengths = Vec::with_capacity(plan.pages.len());
    for page in &plan.pages {
        nobjects.push(page.nobjects as u64);
        lengths.push(group_length(page.oref.num, page.nobjects, obj, new_obj)?);
    }
    let min_nobjects = nobjects.iter().copied().min().unwrap_or(0);
    let max_nobjects = nobjects.iter().copied().max().unwrap_or(0);
    let min_length = lengths.iter().copied().min().unwrap_or(0);
    let max_length = lengths.iter().copied().max().unwrap_or(0);
    let max_shared = plan.pages.iter().map(|page| page.shared.len() as u64).max().unwrap_or(0);

    let entries = plan.pages.iter().enumerate().map(|(i, page)| HPageOffsetEntry {
        delta_nobjects: nobjects[i] - min_nobjects,
        delta_page_length: lengths[i] - min_length,
        nshared_objects: page.shared.len() as u64,
        shared_identifiers: page.shared.iter().map(|&id| id as u64).collect(),
        shared_numerators: vec![0; page.shared.len()],
        delta_content_offset: 0,
        delta_content_length: lengths[i] - min_length,
    }).collect();

    Ok(HPageOffset {
        min_nobjects,
        first_page_offset: offset_of(plan.first_page_object.num, obj, new_obj)?,
        nbits_delta_nobjects: nbits(max_nobjects - min_nobjects),
        min_page_length: min_length,
        nbits_delta_page_length: nbits(max_length - min_length),
        // content offset 0 and content length equal to page length, the common choice among
        // producers which do not interleave page objects with content streams
        min_content_offset: 0,
        nbits_delta_content_offset: 0,
        min_content_length: min_length,
        nbits_delta_content_length: nbits(max_length - min_length),
        nbits_nshared_objects: nbits(max_shared),
        nbits_shared_identifier: nbits(plan.shared_order.len() as u64),
        nbits_shared_numerator: 0,
        shared_denominator: 4,
        entries,
    })
}

fn calculate_shared_object(plan: &LinData, obj: &ObjTable, new_obj: &NewObjTable)
        -> Result<HSharedObject, Error> {
    let mut lengths = Vec::with_capacity(plan.shared_order.len());
    for oref in &plan.shared_order {
        lengths.push(group_length(oref.num, 1, obj, new_obj)?);
    }
    let min_length = lengths.iter().copied().min().unwrap_or(0);
    let max_length = lengths.iter().copied().max().unwrap_or(0);

    let nshared_total = plan.shared_order.len();
    let (first_shared_obj, first_shared_offset) = if nshared_total > plan.n_shared_first_page {
        let first = plan.shared_order[plan.n_shared_first_page];
        (obj.renumber(first.num) as u64, offset_of(first.num, obj, new_obj)?)
    } else {
        (0, 0)
    };

    Ok(HSharedObject {
        first_shared_obj,
        first_shared_offset,
        nshared_first_page: plan.n_shared_first_page as u64,
        nshared_total: nshared_total as u64,
        nbits_nobjects: 0,
        min_group_length: min_length,
        nbits_delta_group_length: nbits(max_length - min_length),
        entries: lengths.iter().map(|&len| HSharedObjectEntry {
            delta_group_length: len - min_length,
            signature_present: 0,
            nobjects_minus_one: 0,
        }).collect(),
    })
}

fn calculate_outline(plan: &LinData, obj: &ObjTable, new_obj: &NewObjTable)
        -> Result<Option<HGeneric>, Error> {
    let first = match plan.first_outline {
        Some(first) if plan.outline_count > 0 => first,
        _ => return Ok(None),
    };
    Ok(Some(HGeneric {
        first_object: obj.renumber(first.num) as u64,
        first_object_offset: offset_of(first.num, obj, new_obj)?,
        nobjects: plan.outline_count as u64,
        group_length: group_length(first.num, plan.outline_count, obj, new_obj)?,
    }))
}

// The hint tables are bit streams, but each vector of values starts on a byte boundary.

fn write_vector(w: &mut BitWriter, values: impl Iterator<Item = u64>, bits: usize) {
    for value in values {
        w.write_bits(value, bits);
    }
    w.flush();
}

fn read_vector(r: &mut BitReader, count: usize, bits: usize) -> Result<Vec<u64>, Error> {
    let values = (0..count).map(|_| r.read_bits(bits)).collect::<Result<_, _>>()?;
    r.skip_to_next_byte();
    Ok(values)
}

impl HPageOffset {
    fn write(&self, w: &mut BitWriter) {
        w.write_bits(self.min_nobjects, 32);
        w.write_bits(self.first_page_offset, 32);
        w.write_bits(self.nbits_delta_nobjects as u64, 16);
        w.write_bits(self.min_page_length, 32);
        w.write_bits(self.nbits_delta_page_length as u64, 16);
        w.write_bits(self.min_content_offset, 32);
        w.write_bits(self.nbits_delta_content_offset as u64, 16);
        w.write_bits(self.min_content_length, 32);
        w.write_bits(self.nbits_delta_content_length as u64, 16);
        w.write_bits(self.nbits_nshared_objects as u64, 16);
        w.write_bits(self.nbits_shared_identifier as u64, 16);
        w.write_bits(self.nbits_shared_numerator as u64, 16);
        w.write_bits(self.shared_denominator, 16);
        let entries = &self.entries;
        write_vector(w, entries.iter().map(|e| e.delta_nobjects), self.nbits_delta_nobjects);
        write_vector(w, entries.iter().map(|e| e.delta_page_length), self.nbits_delta_page_length);
        write_vector(w, entries.iter().map(|e| e.nshared_objects), self.nbits_nshared_objects);
        write_vector(w, entries.iter().flat_map(|e| e.shared_identifiers.iter().copied()),
            self.nbits_shared_identifier);
        write_vector(w, entries.iter().flat_map(|e| e.shared_numerators.iter().copied()),
            self.nbits_shared_numerator);
        write_vector(w, entries.iter().map(|e| e.delta_content_offset),
            self.nbits_delta_content_offset);
        write_vector(w, entries.iter().map(|e| e.delta_content_length),
            self.nbits_delta_content_length);
    }

    fn read(r: &mut BitReader, npages: usize) -> Result<HPageOffset, Error> {
        let mut t = HPageOffset {
            min_nobjects: r.read_bits(32)?,
            first_page_offset: r.read_bits(32)?,
            nbits_delta_nobjects: r.read_bits(16)? as usize,
            min_page_length: r.read_bits(32)?,
            nbits_delta_page_length: r.read_bits(16)? as usize,
            min_content_offset: r.read_bits(32)?,
            nbits_delta_content_offset: r.read_bits(16)? as usize,
            min_content_length: r.read_bits(32)?,
            nbits_delta_content_length: r.read_bits(16)? as usize,
            nbits_nshared_objects: r.read_bits(16)? as usize,
            nbits_shared_identifier: r.read_bits(16)? as usize,
            nbits_shared_numerator: r.read_bits(16)? as usize,
            shared_denominator: r.read_bits(16)?,
            entries: vec![HPageOffsetEntry::default(); npages],
        };
        let delta_nobjects = read_vector(r, npages, t.nbits_delta_nobjects)?;
        let delta_page_length = read_vector(r, npages, t.nbits_delta_page_length)?;
        let nshared_objects = read_vector(r, npages, t.nbits_nshared_objects)?;
        for (i, entry) in t.entries.iter_mut().enumerate() {
            entry.delta_nobjects = delta_nobjects[i];
            entry.delta_page_length = delta_page_length[i];
            entry.nshared_objects = nshared_objects[i];
        }
        for entry in t.entries.iter_mut() {
            entry.shared_identifiers =
                read_vector_inner(r, entry.nshared_objects as usize, t.nbits_shared_identifier)?;
        }
        r.skip_to_next_byte();
        for entry in t.entries.iter_mut() {
            entry.shared_numerators =
                read_vector_inner(r, entry.nshared_objects as usize, t.nbits_shared_numerator)?;
        }
        r.skip_to_next_byte();
        let delta_content_offset = read_vector(r, npages, t.nbits_delta_content_offset)?;
        let delta_content_length = read_vector(r, npages, t.nbits_delta_content_length)?;
        for (i, entry) in t.entries.iter_mut().enumerate() {
            entry.delta_content_offset = delta_content_offset[i];
            entry.delta_content_length = delta_content_length[i];
        }
        Ok(t)
    }
}

fn read_vector_inner(r: &mut BitReader, count: usize, bits: usize) -> Result<Vec<u64>, Error> {
    (0..count).map(|_| r.read_bits(bits)).collect()
}

impl HSharedObject {
    fn write(&self, w: &mut BitWriter) {
        w.write_bits(self.first_shared_obj, 32);
        w.write_bits(self.first_shared_offset, 32);
        w.write_bits(self.nshared_first_page, 32);
        w.write_bits(self.nshared_total, 32);
        w.write_bits(self.nbits_nobjects as u64, 16);
        w.write_bits(self.min_group_length, 32);
        w.write_bits(self.nbits_delta_group_length as u64, 16);
        let entries = &self.entries;
        write_vector(w, entries.iter().map(|e| e.delta_group_length),
            self.nbits_delta_group_length);
        write_vector(w, entries.iter().map(|e| e.signature_present), 1);
        write_vector(w, entries.iter().map(|e| e.nobjects_minus_one), self.nbits_nobjects);
    }

    fn read(r: &mut BitReader) -> Result<HSharedObject, Error> {
        let mut t = HSharedObject {
            first_shared_obj: r.read_bits(32)?,
            first_shared_offset: r.read_bits(32)?,
            nshared_first_page: r.read_bits(32)?,
            nshared_total: r.read_bits(32)?,
            nbits_nobjects: r.read_bits(16)? as usize,
            min_group_length: r.read_bits(32)?,
            nbits_delta_group_length: r.read_bits(16)? as usize,
            entries: Vec::new(),
        };
        let count = t.nshared_total as usize;
        t.entries = vec![HSharedObjectEntry::default(); count];
        let delta_group_length = read_vector(r, count, t.nbits_delta_group_length)?;
        let signature_present = read_vector(r, count, 1)?;
        let nobjects_minus_one = read_vector(r, count, t.nbits_nobjects)?;
        for (i, entry) in t.entries.iter_mut().enumerate() {
            entry.delta_group_length = delta_group_length[i];
            entry.signature_present = signature_present[i];
            entry.nobjects_minus_one = nobjects_minus_one[i];
            if entry.signature_present != 0 {
                return Err(Error::Parse("unexpected signature in shared object hint table"));
            }
        }
        Ok(t)
    }
}

impl HGeneric {
    fn write(&self, w: &mut BitWriter) {
        w.write_bits(self.first_object, 32);
        w.write_bits(self.first_object_offset, 32);
        w.write_bits(self.nobjects, 32);
        w.write_bits(self.group_length, 32);
    }

    fn read(r: &mut BitReader) -> Result<HGeneric, Error> {
        Ok(HGeneric {
            first_object: r.read_bits(32)?,
            first_object_offset: r.read_bits(32)?,
            nobjects: r.read_bits(32)?,
            group_length: r.read_bits(32)?,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tables() -> HintTables {
        HintTables {
            page_offset: HPageOffset {
                min_nobjects: 2,
                first_page_offset: 1053,
                nbits_delta_nobjects: 2,
                min_page_length: 120,
                nbits_delta_page_length: 7,
                min_content_offset: 0,
                nbits_delta_content_offset: 0,
                min_content_length: 120,
                nbits_delta_content_length: 7,
                nbits_nshared_objects: 1,
                nbits_shared_identifier: 3,
                nbits_shared_numerator: 0,
                shared_denominator: 4,
                entries: vec![
                    HPageOffsetEntry {
                        delta_nobjects: 3,
                        delta_page_length: 100,
                        nshared_objects: 0,
                        shared_identifiers: vec![],
                        shared_numerators: vec![],
                        delta_content_offset: 0,
                        delta_content_length: 100,
                    },
                    HPageOffsetEntry {
                        delta_nobjects: 0,
                        delta_page_length: 0,
                        nshared_objects: 1,
                        shared_identifiers: vec![5],
                        shared_numerators: vec![0],
                        delta_content_offset: 0,
                        delta_content_length: 0,
                    },
                ],
            },
            shared_object: HSharedObject {
                first_shared_obj: 12,
                first_shared_offset: 2090,
                nshared_first_page: 5,
                nshared_total: 6,
                nbits_nobjects: 0,
                min_group_length: 33,
                nbits_delta_group_length: 5,
                entries: vec![
                    HSharedObjectEntry { delta_group_length: 7, ..Default::default() },
                    HSharedObjectEntry { delta_group_length: 0, ..Default::default() },
                    HSharedObjectEntry { delta_group_length: 31, ..Default::default() },
                    HSharedObjectEntry { delta_group_length: 2, ..Default::default() },
                    HSharedObjectEntry { delta_group_length: 19, ..Default::default() },
                    HSharedObjectEntry { delta_group_length: 4, ..Default::default() },
                ],
            },
            outline: Some(HGeneric {
                first_object: 8,
                first_object_offset: 4242,
                nobjects: 3,
                group_length: 207,
            }),
        }
    }

    #[test]
    fn test_round_trip() {
        let tables = sample_tables();
        let (data, s, o) = tables.write();
        assert!(s >= 34); // past the 13 header fields
        let back = HintTables::read(&data, 2, s, o).unwrap();
        assert_eq!(back, tables);
    }

    #[test]
    fn test_outline_optional() {
        let mut tables = sample_tables();
        tables.outline = None;
        let (data, s, o) = tables.write();
        assert_eq!(o, None);
        let back = HintTables::read(&data, 2, s, None).unwrap();
        assert_eq!(back, tables);
    }

    #[test]
    fn test_vector_alignment() {
        let mut w = BitWriter::new();
        write_vector(&mut w, [1u64, 0, 1].into_iter(), 1);
        write_vector(&mut w, [3u64].into_iter(), 2);
        let data = w.into_bytes();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0], 0b1010_0000);
        assert_eq!(data[1], 0b1100_0000);
    }
}
