//! Firmware record codec and firmware file formats
use std::io::{self, Write};
use std::path::Path;
use std::str;

use crate::constants::{MAX_RECORD_LEN, records};
use crate::error::{Error, FormatError, Result};

/// One line of an Intel HEX style firmware file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FirmwareRecord {
    pub record_type: u8,
    pub address: u16,
    pub data: Vec<u8>,
    /// Checksum as found on the line. Never validated when reading.
    pub checksum: Option<u8>,
}

impl FirmwareRecord {
    /// A data record with its checksum filled in.
    pub fn data(address: u16, data: Vec<u8>) -> Self {
        let checksum = record_checksum(&record_bytes(data.len() as u8, address, records::DATA, &data));
        FirmwareRecord {
            record_type: records::DATA,
            address,
            data,
            checksum: Some(checksum),
        }
    }

    pub fn end_of_file() -> Self {
        FirmwareRecord {
            record_type: records::END_OF_FILE,
            address: 0,
            data: Vec::new(),
            checksum: Some(0xFF),
        }
    }

    /// Only data records are programmed; every other type is skipped.
    pub fn is_data(&self) -> bool {
        self.record_type == records::DATA
    }

    pub fn address_bytes(&self) -> (u8, u8) {
        let [hi, lo] = self.address.to_be_bytes();
        (hi, lo)
    }

    /// Canonical text form, with a freshly computed checksum.
    pub fn to_line(&self) -> std::result::Result<String, FormatError> {
        if self.data.len() > MAX_RECORD_LEN {
            return Err(FormatError::RecordTooLarge(self.data.len()));
        }
        encode_line(self.data.len() as u8, self.address, self.record_type, &self.data)
    }
}

/// Two's complement of the modulo-256 sum.
pub fn record_checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

fn record_bytes(len: u8, address: u16, record_type: u8, payload: &[u8]) -> Vec<u8> {
    let [hi, lo] = address.to_be_bytes();
    let mut bytes = Vec::with_capacity(5 + payload.len());
    bytes.extend_from_slice(&[len, hi, lo, record_type]);
    bytes.extend_from_slice(payload);
    bytes
}

/// Render a record as `:LLAAAATT[DD...]CC`.
///
/// `len` is written as given, so a dump chunk keeps the requested chunk size
/// in its length field.
pub fn encode_line(
    len: u8,
    address: u16,
    record_type: u8,
    payload: &[u8],
) -> std::result::Result<String, FormatError> {
    if payload.len() > MAX_RECORD_LEN {
        return Err(FormatError::RecordTooLarge(payload.len()));
    }
    let mut bytes = record_bytes(len, address, record_type, payload);
    bytes.push(record_checksum(&bytes));
    Ok(format!("{}{}", records::MARKER, hex::encode_upper(bytes)))
}

/// Parse one record line. The trailing checksum is kept but not checked.
pub fn decode_line(line: &str) -> std::result::Result<FirmwareRecord, FormatError> {
    let body = line
        .trim_end()
        .strip_prefix(records::MARKER)
        .ok_or(FormatError::MissingMarker)?
        .as_bytes();

    // LL AAAA TT
    let header = body.get(..8).ok_or(FormatError::Truncated)?;
    let header = hex::decode(header)?;
    let len = header[0] as usize;
    let address = u16::from_be_bytes([header[1], header[2]]);
    let record_type = header[3];

    if record_type == records::DATA && len > MAX_RECORD_LEN {
        return Err(FormatError::RecordTooLarge(len));
    }

    // whole bytes only, so a line cut mid-digit is still a length mismatch
    let available = (body.len() - 8) / 2;
    let data_end = 8 + 2 * len.min(available);
    let data = hex::decode(&body[8..data_end])?;
    if data.len() != len {
        return Err(FormatError::LengthMismatch {
            declared: len,
            actual: data.len(),
        });
    }

    let checksum = match body.get(data_end..data_end + 2) {
        Some(cc) => Some(hex::decode(cc)?[0]),
        None => None,
    };

    Ok(FirmwareRecord {
        record_type,
        address,
        data,
        checksum,
    })
}

/// Parse a whole firmware file. Blank lines are ignored; errors carry the
/// 1-based line number and the offending line.
pub fn parse_records(text: &str) -> Result<Vec<FirmwareRecord>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            decode_line(line).map_err(|source| Error::Record {
                line: i + 1,
                content: line.to_string(),
                source,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    IntelHex,
    Binary,
}

pub fn read_firmware_from_file<P: AsRef<Path>>(path: P, chunk_size: u8) -> Result<Vec<FirmwareRecord>> {
    let p = path.as_ref();
    let raw = std::fs::read(p)?;

    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    match format {
        FirmwareFormat::IntelHex => {
            let text = str::from_utf8(&raw)
                .map_err(|e| Error::Config(format!("{} is not valid text: {}", p.display(), e)))?;
            parse_records(text)
        }
        FirmwareFormat::Binary => Ok(records_from_binary(&raw, chunk_size)?),
    }
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase();
    if ["ihex", "ihx", "hex"].contains(&&*ext) {
        return FirmwareFormat::IntelHex;
    }
    if ext == "bin" {
        return FirmwareFormat::Binary;
    }

    if raw.first() == Some(&b':')
        && raw
            .iter()
            .all(|&c| c.is_ascii_hexdigit() || c == b':' || c == b'\n' || c == b'\r')
    {
        FirmwareFormat::IntelHex
    } else {
        FirmwareFormat::Binary
    }
}

/// Split a flat image loaded at address 0 into data records.
pub fn records_from_binary(
    raw: &[u8],
    chunk_size: u8,
) -> std::result::Result<Vec<FirmwareRecord>, FormatError> {
    if raw.len() > u16::MAX as usize + 1 {
        return Err(FormatError::AddressTooLarge(raw.len() as u32));
    }
    if chunk_size == 0 || chunk_size as usize > MAX_RECORD_LEN {
        return Err(FormatError::RecordTooLarge(chunk_size as usize));
    }
    let mut records: Vec<FirmwareRecord> = raw
        .chunks(chunk_size as usize)
        .enumerate()
        .map(|(i, chunk)| FirmwareRecord::data((i * chunk_size as usize) as u16, chunk.to_vec()))
        .collect();
    records.push(FirmwareRecord::end_of_file());
    Ok(records)
}

/// Write dump lines followed by the end-of-file record.
pub fn write_ihex<W: Write>(mut w: W, lines: &[String]) -> io::Result<()> {
    for line in lines {
        writeln!(w, "{}", line)?;
    }
    writeln!(w, "{}", END_OF_FILE_LINE)?;
    w.flush()
}

pub const END_OF_FILE_LINE: &str = ":00000001FF";

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn test_checksum_invariant(
            payload in prop::collection::vec(any::<u8>(), 0..=MAX_RECORD_LEN),
            address in any::<u16>(),
        ) {
            let line = encode_line(payload.len() as u8, address, records::DATA, &payload).unwrap();
            let bytes = hex::decode(&line[1..]).unwrap();
            let total = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
            prop_assert_eq!(total, 0, "{}", line);
        }

        #[test]
        fn test_round_trip(
            payload in prop::collection::vec(any::<u8>(), 0..=MAX_RECORD_LEN),
            address in any::<u16>(),
        ) {
            let line = encode_line(payload.len() as u8, address, records::DATA, &payload).unwrap();
            let record = decode_line(&line).unwrap();
            prop_assert_eq!(&record.data, &payload);
            prop_assert_eq!(record.address, address);
            prop_assert!(record.is_data());
            prop_assert_eq!(record.to_line().unwrap(), line);
        }
    }

    #[test]
    fn test_encode_line() {
        let line = encode_line(2, 0x1234, records::DATA, &[0xAA, 0xBB]).unwrap();
        // 02 + 12 + 34 + 00 + AA + BB = 0x1AD -> 0xAD, negated 0x53
        assert_eq!(line, ":02123400AABB53");
    }

    #[test]
    fn test_encode_end_of_file() {
        assert_eq!(encode_line(0, 0, records::END_OF_FILE, &[]).unwrap(), END_OF_FILE_LINE);
        assert_eq!(FirmwareRecord::end_of_file().to_line().unwrap(), END_OF_FILE_LINE);
    }

    #[test]
    fn test_decode_without_checksum() {
        let record = decode_line(":0B00100000FEEDFACEADDE123456789A").unwrap();
        assert_eq!(record.record_type, records::DATA);
        assert_eq!(record.address, 0x0010);
        assert_eq!(
            record.data,
            [0xFE, 0xED, 0xFA, 0xCE, 0xAD, 0xDE, 0x12, 0x34, 0x56, 0x78, 0x9A]
        );
        assert_eq!(record.checksum, None);
    }

    #[test]
    fn test_decode_does_not_check_checksum() {
        let record = decode_line(":02123400AABB00\r\n").unwrap();
        assert_eq!(record.checksum, Some(0x00));
        assert_eq!(record.to_line().unwrap(), ":02123400AABB53");
    }

    #[test]
    fn test_decode_end_of_file() {
        let record = decode_line(":00000001FF").unwrap();
        assert!(!record.is_data());
        assert_eq!(record, FirmwareRecord::end_of_file());
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_line("02123400AABB5B"), Err(FormatError::MissingMarker));
        assert_eq!(decode_line(":0212"), Err(FormatError::Truncated));
        assert_eq!(
            decode_line(":04123400AABB5B"),
            Err(FormatError::LengthMismatch {
                declared: 4,
                actual: 3
            })
        );
        assert!(matches!(
            decode_line(":0212340GAABB5B"),
            Err(FormatError::InvalidHex(_))
        ));
        assert_eq!(decode_line(":FB000000"), Err(FormatError::RecordTooLarge(0xFB)));
        // cut in the middle of a data byte
        assert_eq!(
            decode_line(":02001000AAB"),
            Err(FormatError::LengthMismatch {
                declared: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_encode_too_large() {
        assert_eq!(
            encode_line(0, 0, records::DATA, &[0; 251]),
            Err(FormatError::RecordTooLarge(251))
        );
    }

    #[test]
    fn test_parse_records_reports_line() {
        let text = ":02123400AABB53\n\n:0B00100000FE\n:00000001FF\n";
        match parse_records(text) {
            Err(Error::Record { line, content, source }) => {
                assert_eq!(line, 3);
                assert_eq!(content, ":0B00100000FE");
                assert!(matches!(source, FormatError::LengthMismatch { declared: 11, actual: 2 }));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let records = parse_records(":02123400AABB53\n:00000001FF\n").unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_records_from_binary() {
        let image: Vec<u8> = (0..40).collect();
        let records = records_from_binary(&image, 16).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].address, 0x0000);
        assert_eq!(records[1].address, 0x0010);
        assert_eq!(records[2].address, 0x0020);
        assert_eq!(records[2].data.len(), 8);
        assert!(!records[3].is_data());

        for record in &records[..3] {
            let line = record.to_line().unwrap();
            assert_eq!(decode_line(&line).unwrap(), *record);
        }
    }

    #[test]
    fn test_guess_format() {
        assert_eq!(guess_format(Path::new("fw.hex"), b""), FirmwareFormat::IntelHex);
        assert_eq!(guess_format(Path::new("fw.bin"), b":00"), FirmwareFormat::Binary);
        assert_eq!(
            guess_format(Path::new("fw"), b":00000001FF\r\n"),
            FirmwareFormat::IntelHex
        );
        assert_eq!(guess_format(Path::new("fw"), &[0x02, 0x00]), FirmwareFormat::Binary);
    }

    #[test]
    fn test_read_firmware_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.hex");
        std::fs::write(&path, ":02123400AABB53\n:00000001FF\n").unwrap();
        let records = read_firmware_from_file(&path, 16).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data, [0xAA, 0xBB]);

        let path = dir.path().join("fw.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let records = read_firmware_from_file(&path, 16).unwrap();
        assert_eq!(records[0].data, [1, 2, 3]);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_write_ihex() {
        let mut out = Vec::new();
        write_ihex(&mut out, &[":02123400AABB53".to_string()]).unwrap();
        assert_eq!(out, b":02123400AABB53\n:00000001FF\n");
    }
}
