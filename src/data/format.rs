//! Binary digi file format.
//!
//! Each partition file is a sequence of output units:
//!
//! ```text
//! Header (16 bytes):
//!   run_id: i32
//!   unit_sequence_no: i32
//!   partition_index: i32
//!   record_count: i32
//! Record (8 bytes) x record_count:
//!   detector_id: i16
//!   secondary_id: i16
//!   coord_a: i16
//!   coord_b: i16
//! ```
//!
//! All values are in host byte order. Files are not portable between machines of
//! different endianness.

use crate::error::{AppResult, DigiError};
use serde::Serialize;
use std::io::{self, Read, Write};

/// Encoded size of a [`UnitHeader`].
pub const HEADER_SIZE: usize = 16;

/// Encoded size of a [`DigiRecord`].
pub const RECORD_SIZE: usize = 8;

/// Upper bound on records reserved up front from an untrusted header.
const MAX_PREALLOCATED_RECORDS: usize = 4096;

/// Per-unit, per-partition header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitHeader {
    /// Run the unit belongs to
    pub run_id: i32,
    /// Processing unit number within the run
    pub unit_sequence_no: i32,
    /// Partition this header was written to
    pub partition_index: i32,
    /// Number of records following the header
    pub record_count: i32,
}

/// Fixed-width digi record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DigiRecord {
    /// Truncated detector id
    pub detector_id: i16,
    /// Front-end id
    pub secondary_id: i16,
    /// Column
    pub coord_a: i16,
    /// Row
    pub coord_b: i16,
}

impl UnitHeader {
    /// Encodes in host byte order.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.run_id.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.unit_sequence_no.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.partition_index.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.record_count.to_ne_bytes());
        buf
    }

    /// Decodes a header written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        let field = |at: usize| i32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        Self {
            run_id: field(0),
            unit_sequence_no: field(4),
            partition_index: field(8),
            record_count: field(12),
        }
    }

    /// Appends the encoded bytes to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.to_bytes())
    }
}

impl DigiRecord {
    /// Encodes in host byte order.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..2].copy_from_slice(&self.detector_id.to_ne_bytes());
        buf[2..4].copy_from_slice(&self.secondary_id.to_ne_bytes());
        buf[4..6].copy_from_slice(&self.coord_a.to_ne_bytes());
        buf[6..8].copy_from_slice(&self.coord_b.to_ne_bytes());
        buf
    }

    /// Decodes a record written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Self {
        let field = |at: usize| i16::from_ne_bytes([buf[at], buf[at + 1]]);
        Self {
            detector_id: field(0),
            secondary_id: field(2),
            coord_a: field(4),
            coord_b: field(6),
        }
    }

    /// Appends the encoded bytes to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.to_bytes())
    }
}

/// One decoded output unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedUnit {
    /// Header as read
    pub header: UnitHeader,
    /// The `record_count` records after it
    pub records: Vec<DigiRecord>,
}

/// Decodes every unit in a partition stream.
///
/// Used for inspection and verification only; the pipeline never reads its
/// own output. A truncated header or record block is reported as
/// [`DigiError::Malformed`].
pub fn read_units<R: Read>(mut input: R) -> AppResult<Vec<DecodedUnit>> {
    let mut units = Vec::new();
    loop {
        let mut header_buf = [0u8; HEADER_SIZE];
        match read_exact_or_eof(&mut input, &mut header_buf)? {
            0 => break,
            HEADER_SIZE => {}
            n => {
                return Err(DigiError::Malformed(format!(
                    "truncated header after unit {}: {} of {} bytes",
                    units.len(),
                    n,
                    HEADER_SIZE
                )))
            }
        }
        let header = UnitHeader::from_bytes(&header_buf);
        if header.record_count < 0 {
            return Err(DigiError::Malformed(format!(
                "negative record count {} in unit {}",
                header.record_count, header.unit_sequence_no
            )));
        }

        let mut records =
            Vec::with_capacity((header.record_count as usize).min(MAX_PREALLOCATED_RECORDS));
        for i in 0..header.record_count {
            let mut record_buf = [0u8; RECORD_SIZE];
            if read_exact_or_eof(&mut input, &mut record_buf)? != RECORD_SIZE {
                return Err(DigiError::Malformed(format!(
                    "unit {} declares {} records but only {} are present",
                    header.unit_sequence_no, header.record_count, i
                )));
            }
            records.push(DigiRecord::from_bytes(&record_buf));
        }
        units.push(DecodedUnit { header, records });
    }
    Ok(units)
}

/// Fills `buf` unless the stream ends first; returns the bytes read.
fn read_exact_or_eof<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(detector_id: i16) -> DigiRecord {
        DigiRecord {
            detector_id,
            secondary_id: 1,
            coord_a: 10,
            coord_b: -20,
        }
    }

    #[test]
    fn test_header_layout_is_field_ordered() {
        let header = UnitHeader {
            run_id: 7,
            unit_sequence_no: 2,
            partition_index: 1,
            record_count: 3,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &7i32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &1i32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &3i32.to_ne_bytes());
    }

    #[test]
    fn test_reads_back_units() {
        let mut buf = Vec::new();
        UnitHeader {
            run_id: 1,
            unit_sequence_no: 0,
            partition_index: 0,
            record_count: 2,
        }
        .write_to(&mut buf)
        .unwrap();
        record(257).write_to(&mut buf).unwrap();
        record(513).write_to(&mut buf).unwrap();
        UnitHeader {
            run_id: 1,
            unit_sequence_no: 1,
            partition_index: 0,
            record_count: 0,
        }
        .write_to(&mut buf)
        .unwrap();
        assert_eq!(buf.len(), 2 * HEADER_SIZE + 2 * RECORD_SIZE);

        let units = read_units(buf.as_slice()).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].records, vec![record(257), record(513)]);
        assert!(units[1].records.is_empty());
        assert_eq!(units[1].header.unit_sequence_no, 1);
    }

    #[test]
    fn test_truncated_records_are_malformed() {
        let mut buf = Vec::new();
        UnitHeader {
            run_id: 1,
            unit_sequence_no: 0,
            partition_index: 0,
            record_count: 2,
        }
        .write_to(&mut buf)
        .unwrap();
        record(257).write_to(&mut buf).unwrap();
        assert!(matches!(
            read_units(buf.as_slice()),
            Err(DigiError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let buf = vec![0u8; HEADER_SIZE - 3];
        assert!(matches!(
            read_units(buf.as_slice()),
            Err(DigiError::Malformed(_))
        ));
    }

    #[test]
    fn test_huge_declared_count_is_malformed_not_allocated() {
        let mut buf = Vec::new();
        UnitHeader {
            run_id: 1,
            unit_sequence_no: 0,
            partition_index: 0,
            record_count: i32::MAX,
        }
        .write_to(&mut buf)
        .unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        assert!(matches!(
            read_units(buf.as_slice()),
            Err(DigiError::Malformed(msg)) if msg.contains("only 0 are present")
        ));
    }

    #[test]
    fn test_empty_stream_has_no_units() {
        assert!(read_units(std::io::empty()).unwrap().is_empty());
    }
}
