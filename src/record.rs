// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The fixed-layout application record shared by the heap file and hash
//! index engines.

use crate::coding::{fit_to_len, read_fixed_bytes, read_i32, write_i32, Decode, Encode};
use std::io::{self, Read, Write};

const NAME_LEN: usize = 15;
const SURNAME_LEN: usize = 20;
const CITY_LEN: usize = 20;

/// On-disk size of one [`Record`] in bytes.
pub const RECORD_SIZE: usize = 4 + NAME_LEN + SURNAME_LEN + CITY_LEN;

/// A fixed-width application record: an integer id plus three
/// zero-padded, fixed-length string fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Row identifier, also the heap file's ordinal addressing key.
    pub id: i32,
    /// Zero-padded, at most 15 bytes.
    pub name: [u8; NAME_LEN],
    /// Zero-padded, at most 20 bytes.
    pub surname: [u8; SURNAME_LEN],
    /// Zero-padded, at most 20 bytes.
    pub city: [u8; CITY_LEN],
}

impl Record {
    /// Builds a record from loosely-sized field contents, padding or
    /// truncating each string field to its fixed width.
    #[must_use]
    pub fn new(id: i32, name: &[u8], surname: &[u8], city: &[u8]) -> Self {
        Self {
            id,
            name: fit_to_len(name, NAME_LEN).try_into().unwrap(),
            surname: fit_to_len(surname, SURNAME_LEN).try_into().unwrap(),
            city: fit_to_len(city, CITY_LEN).try_into().unwrap(),
        }
    }

    /// The attribute byte-offset/length pairs `print_all_entries` needs,
    /// indexed by attribute name, mirroring the reference's
    /// `offsetof`-based dispatch.
    #[must_use]
    pub fn attribute_range(attr_name: &str) -> Option<(usize, usize)> {
        match attr_name {
            "id" => Some((0, 4)),
            "name" => Some((4, NAME_LEN)),
            "surname" => Some((4 + NAME_LEN, SURNAME_LEN)),
            "city" => Some((4 + NAME_LEN + SURNAME_LEN, CITY_LEN)),
            _ => None,
        }
    }

    /// Trims trailing NUL bytes for display.
    #[must_use]
    pub fn trimmed(field: &[u8]) -> &str {
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        std::str::from_utf8(&field[..end]).unwrap_or("")
    }
}

impl Encode for Record {
    fn encode_into<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_i32(writer, self.id)?;
        writer.write_all(&self.name)?;
        writer.write_all(&self.surname)?;
        writer.write_all(&self.city)?;
        Ok(())
    }
}

impl Decode for Record {
    fn decode_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let id = read_i32(reader)?;
        let name = read_fixed_bytes::<_, NAME_LEN>(reader)?;
        let surname = read_fixed_bytes::<_, SURNAME_LEN>(reader)?;
        let city = read_fixed_bytes::<_, CITY_LEN>(reader)?;
        Ok(Self {
            id,
            name,
            surname,
            city,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let record = Record::new(7, b"Ada", b"Lovelace", b"London");
        let mut buf = Vec::new();
        record.encode_into(&mut buf).unwrap();
        assert_eq!(buf.len(), RECORD_SIZE);
        let back = Record::decode_from(&mut &buf[..]).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn truncates_overlong_fields() {
        let long = vec![b'x'; 100];
        let record = Record::new(1, &long, &long, &long);
        assert_eq!(record.name.len(), NAME_LEN);
        assert_eq!(record.surname.len(), SURNAME_LEN);
        assert_eq!(record.city.len(), CITY_LEN);
    }

    #[test]
    fn attribute_range_matches_layout() {
        assert_eq!(Record::attribute_range("id"), Some((0, 4)));
        assert_eq!(Record::attribute_range("name"), Some((4, NAME_LEN)));
        assert_eq!(
            Record::attribute_range("surname"),
            Some((4 + NAME_LEN, SURNAME_LEN))
        );
        assert_eq!(
            Record::attribute_range("city"),
            Some((4 + NAME_LEN + SURNAME_LEN, CITY_LEN))
        );
        assert_eq!(Record::attribute_range("bogus"), None);
    }
}
