//! mDNS packet encoding and decoding.
//!
//! Record data is a tagged enum so encoding is one exhaustive match. Record
//! names, PTR targets and SRV targets are compressed on encode; questions and
//! NSEC next-domain names are written uncompressed.

use crate::name::{
    names_equal, read_name, write_name, write_name_compressed, write_name_compressed_before,
};
use hap_core::error::MdnsError;
use std::fmt;
use std::net::Ipv4Addr;

/// Fixed DNS header size.
pub const HEADER_LEN: usize = 12;

/// Internet class.
pub const CLASS_IN: u16 = 1;

/// Top bit of the class field: cache-flush on records, unicast-response on
/// questions.
const CLASS_TOP_BIT: u16 = 0x8000;

/// DNS resource record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordType(pub u16);

impl RecordType {
    pub const A: Self = Self(1);
    pub const PTR: Self = Self(12);
    pub const TXT: Self = Self(16);
    pub const AAAA: Self = Self(28);
    pub const SRV: Self = Self(33);
    pub const NSEC: Self = Self(47);
    pub const ANY: Self = Self(255);

    /// Get raw value.
    pub fn raw(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::A => write!(f, "A"),
            Self::PTR => write!(f, "PTR"),
            Self::TXT => write!(f, "TXT"),
            Self::AAAA => write!(f, "AAAA"),
            Self::SRV => write!(f, "SRV"),
            Self::NSEC => write!(f, "NSEC"),
            Self::ANY => write!(f, "ANY"),
            Self(other) => write!(f, "TYPE{}", other),
        }
    }
}

/// Header fields other than the section counts.
///
/// Counts are derived from the section lengths when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
}

impl Header {
    /// QR bit: message is a response.
    pub const FLAG_RESPONSE: u16 = 0x8000;
    /// AA bit: authoritative answer.
    pub const FLAG_AUTHORITATIVE: u16 = 0x0400;

    pub fn is_response(&self) -> bool {
        self.flags & Self::FLAG_RESPONSE != 0
    }
}

/// A question entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
    pub class: u16,
    /// QU bit: the querier asked for a unicast response.
    pub unicast_response: bool,
}

impl Question {
    pub fn new(name: impl Into<String>, qtype: RecordType) -> Self {
        Self {
            name: name.into(),
            qtype,
            class: CLASS_IN,
            unicast_response: false,
        }
    }
}

/// Typed record data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Ptr(String),
    Txt(Vec<String>),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Nsec {
        next_domain: String,
        types: Vec<RecordType>,
    },
    Unknown {
        rtype: RecordType,
        data: Vec<u8>,
    },
}

impl RecordData {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::A(_) => RecordType::A,
            Self::Ptr(_) => RecordType::PTR,
            Self::Txt(_) => RecordType::TXT,
            Self::Srv { .. } => RecordType::SRV,
            Self::Nsec { .. } => RecordType::NSEC,
            Self::Unknown { rtype, .. } => *rtype,
        }
    }
}

/// A resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub class: u16,
    /// Set on records this host owns exclusively.
    pub cache_flush: bool,
    pub ttl: u32,
    pub data: RecordData,
}

impl Record {
    /// Shared record (no cache-flush bit).
    pub fn shared(name: impl Into<String>, ttl: u32, data: RecordData) -> Self {
        Self {
            name: name.into(),
            class: CLASS_IN,
            cache_flush: false,
            ttl,
            data,
        }
    }

    /// Unique record (cache-flush bit set).
    pub fn unique(name: impl Into<String>, ttl: u32, data: RecordData) -> Self {
        Self {
            cache_flush: true,
            ..Self::shared(name, ttl, data)
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.data.record_type()
    }

    /// Whether this record answers `question`.
    pub fn answers(&self, question: &Question) -> bool {
        (question.qtype == RecordType::ANY || question.qtype == self.record_type())
            && names_equal(&self.name, &question.name)
    }
}

/// A complete mDNS message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Packet {
    /// Empty query.
    pub fn query() -> Self {
        Self::default()
    }

    /// Empty authoritative response.
    pub fn response() -> Self {
        Self {
            header: Header {
                id: 0,
                flags: Header::FLAG_RESPONSE | Header::FLAG_AUTHORITATIVE,
            },
            ..Self::default()
        }
    }

    pub fn is_query(&self) -> bool {
        !self.header.is_response()
    }

    /// Every record in answer, authority and additional order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.additionals.iter())
    }

    /// Whether any answer record answers any of `questions`.
    pub fn answers_any(&self, questions: &[Question]) -> bool {
        questions
            .iter()
            .any(|q| self.answers.iter().any(|record| record.answers(q)))
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Result<Vec<u8>, MdnsError> {
        let mut buf = Vec::with_capacity(512);
        buf.extend_from_slice(&self.header.id.to_be_bytes());
        buf.extend_from_slice(&self.header.flags.to_be_bytes());
        for count in [
            self.questions.len(),
            self.answers.len(),
            self.authorities.len(),
            self.additionals.len(),
        ] {
            let count = u16::try_from(count).map_err(|_| MdnsError::RecordTooLarge(count))?;
            buf.extend_from_slice(&count.to_be_bytes());
        }

        for question in &self.questions {
            write_name(&mut buf, &question.name)?;
            buf.extend_from_slice(&question.qtype.0.to_be_bytes());
            let class = if question.unicast_response {
                question.class | CLASS_TOP_BIT
            } else {
                question.class
            };
            buf.extend_from_slice(&class.to_be_bytes());
        }

        for record in self.records() {
            encode_record(&mut buf, record)?;
        }
        Ok(buf)
    }

    /// Decode from wire format.
    pub fn decode(data: &[u8]) -> Result<Self, MdnsError> {
        if data.len() < HEADER_LEN {
            return Err(MdnsError::Truncated(data.len()));
        }
        let header = Header {
            id: read_u16(data, 0)?,
            flags: read_u16(data, 2)?,
        };
        let counts = [
            read_u16(data, 4)?,
            read_u16(data, 6)?,
            read_u16(data, 8)?,
            read_u16(data, 10)?,
        ];

        let mut offset = HEADER_LEN;
        let mut questions = Vec::with_capacity(counts[0] as usize);
        for _ in 0..counts[0] {
            let name = read_name(data, &mut offset)?;
            let qtype = read_u16(data, offset)?;
            let class = read_u16(data, offset + 2)?;
            offset += 4;
            questions.push(Question {
                name,
                qtype: RecordType(qtype),
                class: class & !CLASS_TOP_BIT,
                unicast_response: class & CLASS_TOP_BIT != 0,
            });
        }

        let mut sections: [Vec<Record>; 3] = Default::default();
        for (section, &count) in sections.iter_mut().zip(&counts[1..]) {
            for _ in 0..count {
                section.push(decode_record(data, &mut offset)?);
            }
        }
        let [answers, authorities, additionals] = sections;

        Ok(Self {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, MdnsError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(MdnsError::Truncated(offset))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, MdnsError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(MdnsError::Truncated(offset))
}

fn encode_record(buf: &mut Vec<u8>, record: &Record) -> Result<(), MdnsError> {
    write_name_compressed(buf, &record.name)?;
    buf.extend_from_slice(&record.record_type().0.to_be_bytes());
    let class = if record.cache_flush {
        record.class | CLASS_TOP_BIT
    } else {
        record.class
    };
    buf.extend_from_slice(&class.to_be_bytes());
    buf.extend_from_slice(&record.ttl.to_be_bytes());

    // Length is patched once the data is written, so names inside the data
    // must not point at or past it.
    let length_at = buf.len();
    buf.extend_from_slice(&[0, 0]);

    match &record.data {
        RecordData::A(address) => buf.extend_from_slice(&address.octets()),
        RecordData::Ptr(target) => write_name_compressed_before(buf, target, length_at)?,
        RecordData::Txt(entries) => encode_txt(buf, entries)?,
        RecordData::Srv {
            priority,
            weight,
            port,
            target,
        } => {
            buf.extend_from_slice(&priority.to_be_bytes());
            buf.extend_from_slice(&weight.to_be_bytes());
            buf.extend_from_slice(&port.to_be_bytes());
            write_name_compressed_before(buf, target, length_at)?;
        }
        RecordData::Nsec { next_domain, types } => {
            write_name(buf, next_domain)?;
            buf.extend_from_slice(&encode_type_bitmap(types));
        }
        RecordData::Unknown { data, .. } => buf.extend_from_slice(data),
    }

    let data_len = buf.len() - length_at - 2;
    let data_len = u16::try_from(data_len).map_err(|_| MdnsError::RecordTooLarge(data_len))?;
    buf[length_at..length_at + 2].copy_from_slice(&data_len.to_be_bytes());
    Ok(())
}

fn encode_txt(buf: &mut Vec<u8>, entries: &[String]) -> Result<(), MdnsError> {
    // An empty TXT record still carries one zero-length string.
    if entries.is_empty() {
        buf.push(0);
        return Ok(());
    }
    for entry in entries {
        let len = u8::try_from(entry.len()).map_err(|_| MdnsError::TxtEntryTooLong(entry.len()))?;
        buf.push(len);
        buf.extend_from_slice(entry.as_bytes());
    }
    Ok(())
}

/// NSEC type bitmap: one `[window][length][bitmap]` block per 256-type
/// window that has at least one bit set.
pub fn encode_type_bitmap(types: &[RecordType]) -> Vec<u8> {
    let mut windows = [[0u8; 32]; 256];
    let mut used = [false; 256];
    for rtype in types {
        let window = (rtype.0 >> 8) as usize;
        let low = (rtype.0 & 0xFF) as usize;
        windows[window][low / 8] |= 0x80 >> (low % 8);
        used[window] = true;
    }

    let mut out = Vec::new();
    for (window, bitmap) in windows.iter().enumerate() {
        if !used[window] {
            continue;
        }
        let len = bitmap.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        out.push(window as u8);
        out.push(len as u8);
        out.extend_from_slice(&bitmap[..len]);
    }
    out
}

/// Inverse of [`encode_type_bitmap`].
pub fn decode_type_bitmap(mut data: &[u8]) -> Result<Vec<RecordType>, MdnsError> {
    let mut types = Vec::new();
    while !data.is_empty() {
        let (window, len) = match data {
            [window, len, ..] => (*window as u16, *len as usize),
            _ => return Err(MdnsError::Truncated(data.len())),
        };
        let bitmap = data.get(2..2 + len).ok_or(MdnsError::Truncated(len))?;
        for (i, byte) in bitmap.iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    types.push(RecordType((window << 8) | (i * 8 + bit) as u16));
                }
            }
        }
        data = &data[2 + len..];
    }
    Ok(types)
}

fn decode_record(data: &[u8], offset: &mut usize) -> Result<Record, MdnsError> {
    let name = read_name(data, offset)?;
    let rtype = RecordType(read_u16(data, *offset)?);
    let class = read_u16(data, *offset + 2)?;
    let ttl = read_u32(data, *offset + 4)?;
    let data_len = read_u16(data, *offset + 8)? as usize;
    let start = *offset + 10;
    let end = start + data_len;
    let rdata = data.get(start..end).ok_or(MdnsError::Truncated(start))?;
    *offset = end;

    let parsed = match rtype {
        RecordType::A => {
            let octets: [u8; 4] = rdata
                .try_into()
                .map_err(|_| MdnsError::Truncated(start))?;
            RecordData::A(Ipv4Addr::from(octets))
        }
        RecordType::PTR => {
            let mut pos = start;
            RecordData::Ptr(read_name(data, &mut pos)?)
        }
        RecordType::TXT => RecordData::Txt(decode_txt(rdata, start)?),
        RecordType::SRV => {
            let mut pos = start + 6;
            if end < pos {
                return Err(MdnsError::Truncated(start));
            }
            RecordData::Srv {
                priority: read_u16(data, start)?,
                weight: read_u16(data, start + 2)?,
                port: read_u16(data, start + 4)?,
                target: read_name(data, &mut pos)?,
            }
        }
        RecordType::NSEC => {
            let mut pos = start;
            let next_domain = read_name(data, &mut pos)?;
            let bitmap = data.get(pos..end).ok_or(MdnsError::Truncated(pos))?;
            RecordData::Nsec {
                next_domain,
                types: decode_type_bitmap(bitmap)?,
            }
        }
        other => RecordData::Unknown {
            rtype: other,
            data: rdata.to_vec(),
        },
    };

    Ok(Record {
        name,
        class: class & !CLASS_TOP_BIT,
        cache_flush: class & CLASS_TOP_BIT != 0,
        ttl,
        data: parsed,
    })
}

fn decode_txt(mut rdata: &[u8], start: usize) -> Result<Vec<String>, MdnsError> {
    let mut entries = Vec::new();
    while let Some((&len, rest)) = rdata.split_first() {
        let len = len as usize;
        let entry = rest.get(..len).ok_or(MdnsError::Truncated(start))?;
        if !entry.is_empty() {
            entries.push(String::from_utf8_lossy(entry).into_owned());
        }
        rdata = &rest[len..];
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_records() -> Vec<Record> {
        vec![
            Record::shared(
                "_hap._tcp.local.",
                4500,
                RecordData::Ptr("MyDevice._hap._tcp.local.".to_string()),
            ),
            Record::unique(
                "MyDevice._hap._tcp.local.",
                120,
                RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: 51826,
                    target: "MyDevice.local.".to_string(),
                },
            ),
            Record::unique(
                "MyDevice._hap._tcp.local.",
                4500,
                RecordData::Txt(vec!["c#=1".to_string(), "sf=1".to_string()]),
            ),
            Record::unique(
                "MyDevice.local.",
                120,
                RecordData::A(Ipv4Addr::new(192, 168, 1, 20)),
            ),
        ]
    }

    /// Encoded size of `packet` with every name written literally.
    fn uncompressed_len(packet: &Packet) -> usize {
        let name_len = |name: &str| crate::name::labels(name).iter().map(|l| l.len() + 1).sum::<usize>() + 1;
        let mut total = HEADER_LEN;
        for q in &packet.questions {
            total += name_len(&q.name) + 4;
        }
        for r in packet.records() {
            total += name_len(&r.name) + 10;
            total += match &r.data {
                RecordData::A(_) => 4,
                RecordData::Ptr(target) => name_len(target),
                RecordData::Txt(entries) => entries.iter().map(|e| e.len() + 1).sum(),
                RecordData::Srv { target, .. } => 6 + name_len(target),
                RecordData::Nsec { next_domain, types } => {
                    name_len(next_domain) + encode_type_bitmap(types).len()
                }
                RecordData::Unknown { data, .. } => data.len(),
            };
        }
        total
    }

    mod header {
        use super::*;

        #[test]
        fn counts_follow_sections() {
            let mut packet = Packet::response();
            packet.answers = service_records();
            packet.additionals.push(Record::unique(
                "MyDevice.local.",
                120,
                RecordData::Nsec {
                    next_domain: "MyDevice.local.".to_string(),
                    types: vec![RecordType::A],
                },
            ));

            let bytes = packet.encode().unwrap();
            assert_eq!(&bytes[..4], &[0x00, 0x00, 0x84, 0x00]);
            assert_eq!(&bytes[4..12], &[0, 0, 0, 4, 0, 0, 0, 1]);
        }

        #[test]
        fn short_packet_is_truncated() {
            assert_eq!(Packet::decode(&[0u8; 5]), Err(MdnsError::Truncated(5)));
        }
    }

    mod questions {
        use super::*;

        #[test]
        fn query_round_trip_keeps_qu_bit() {
            let mut packet = Packet::query();
            let mut question = Question::new("_hap._tcp.local.", RecordType::PTR);
            question.unicast_response = true;
            packet.questions.push(question.clone());

            let bytes = packet.encode().unwrap();
            assert_eq!(&bytes[bytes.len() - 4..], &[0x00, 0x0C, 0x80, 0x01]);

            let decoded = Packet::decode(&bytes).unwrap();
            assert!(decoded.is_query());
            assert_eq!(decoded.questions, vec![question]);
        }

        #[test]
        fn decodes_captured_query() {
            let bytes = hex::decode(concat!(
                "000000000001000000000000",
                "045f686170045f746370056c6f63616c00",
                "000c0001"
            ))
            .unwrap();
            let packet = Packet::decode(&bytes).unwrap();
            assert_eq!(packet.questions.len(), 1);
            assert_eq!(packet.questions[0].name, "_hap._tcp.local.");
            assert_eq!(packet.questions[0].qtype, RecordType::PTR);
            assert!(!packet.questions[0].unicast_response);
        }

        #[test]
        fn question_with_forward_pointer_fails() {
            let bytes = hex::decode("000000000001000000000000c00e00000c0001").unwrap();
            assert!(matches!(
                Packet::decode(&bytes),
                Err(MdnsError::InvalidReference { .. })
            ));
        }
    }

    mod records {
        use super::*;

        #[test]
        fn service_set_round_trips() {
            let mut packet = Packet::response();
            packet.answers = service_records();

            let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
            assert_eq!(decoded, packet);
        }

        #[test]
        fn compression_shrinks_shared_suffixes() {
            let mut packet = Packet::response();
            packet.answers = service_records();

            let bytes = packet.encode().unwrap();
            assert!(bytes.len() < uncompressed_len(&packet));

            let decoded = Packet::decode(&bytes).unwrap();
            match &decoded.answers[1].data {
                RecordData::Srv { target, port, .. } => {
                    assert_eq!(target, "MyDevice.local.");
                    assert_eq!(*port, 51826);
                }
                other => panic!("expected SRV, got {:?}", other),
            }
        }

        #[test]
        fn cache_flush_bit_is_carried() {
            let mut packet = Packet::response();
            packet.answers = service_records();
            let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
            assert!(!decoded.answers[0].cache_flush);
            assert!(decoded.answers[1].cache_flush);
            assert_eq!(decoded.answers[1].class, CLASS_IN);
        }

        #[test]
        fn empty_txt_has_single_zero_byte() {
            let mut packet = Packet::response();
            packet
                .answers
                .push(Record::unique("x.local.", 120, RecordData::Txt(Vec::new())));
            let bytes = packet.encode().unwrap();
            assert_eq!(&bytes[bytes.len() - 3..], &[0x00, 0x01, 0x00]);

            let decoded = Packet::decode(&bytes).unwrap();
            assert_eq!(decoded.answers[0].data, RecordData::Txt(Vec::new()));
        }

        #[test]
        fn oversized_txt_entry_fails() {
            let mut packet = Packet::response();
            packet.answers.push(Record::unique(
                "x.local.",
                120,
                RecordData::Txt(vec!["k=".to_string() + &"v".repeat(300)]),
            ));
            assert_eq!(packet.encode(), Err(MdnsError::TxtEntryTooLong(302)));
        }

        #[test]
        fn oversized_record_fails() {
            let mut packet = Packet::response();
            packet.answers.push(Record::unique(
                "x.local.",
                120,
                RecordData::Unknown {
                    rtype: RecordType(99),
                    data: vec![0u8; 70_000],
                },
            ));
            assert_eq!(packet.encode(), Err(MdnsError::RecordTooLarge(70_000)));
        }

        #[test]
        fn unknown_types_are_preserved() {
            let mut packet = Packet::response();
            packet.answers.push(Record::shared(
                "x.local.",
                10,
                RecordData::Unknown {
                    rtype: RecordType::AAAA,
                    data: vec![0xFE, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
                },
            ));
            let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
            assert_eq!(decoded.answers[0].record_type(), RecordType::AAAA);
        }

        #[test]
        fn truncated_record_fails() {
            let mut packet = Packet::response();
            packet.answers = service_records();
            let bytes = packet.encode().unwrap();
            assert!(Packet::decode(&bytes[..bytes.len() - 2]).is_err());
        }

        #[test]
        fn answers_match_case_insensitively() {
            let record = &service_records()[0];
            assert!(record.answers(&Question::new("_HAP._tcp.local.", RecordType::PTR)));
            assert!(record.answers(&Question::new("_hap._tcp.local", RecordType::ANY)));
            assert!(!record.answers(&Question::new("_hap._tcp.local.", RecordType::SRV)));
        }
    }

    mod nsec {
        use super::*;

        #[test]
        fn bitmap_for_service_types() {
            // TXT (16) and SRV (33) share window 0.
            let bitmap = encode_type_bitmap(&[RecordType::TXT, RecordType::SRV]);
            assert_eq!(bitmap, vec![0x00, 0x05, 0x00, 0x00, 0x80, 0x00, 0x40]);
        }

        #[test]
        fn empty_windows_are_omitted() {
            let bitmap = encode_type_bitmap(&[RecordType::A, RecordType(0x0101)]);
            assert_eq!(bitmap, vec![0x00, 0x01, 0x40, 0x01, 0x01, 0x40]);
            assert_eq!(
                decode_type_bitmap(&bitmap).unwrap(),
                vec![RecordType::A, RecordType(0x0101)]
            );
        }

        #[test]
        fn nsec_record_round_trips() {
            let mut packet = Packet::response();
            packet.additionals.push(Record::unique(
                "MyDevice._hap._tcp.local.",
                4500,
                RecordData::Nsec {
                    next_domain: "MyDevice._hap._tcp.local.".to_string(),
                    types: vec![RecordType::TXT, RecordType::SRV],
                },
            ));
            let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
            assert_eq!(decoded, packet);
        }

        #[test]
        fn truncated_bitmap_fails() {
            assert!(decode_type_bitmap(&[0x00, 0x05, 0x00]).is_err());
        }
    }
}
