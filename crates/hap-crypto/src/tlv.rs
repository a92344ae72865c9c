//! TLV8 encoding/decoding for HomeKit pairing messages.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes]
//! Values longer than 255 bytes are fragmented across multiple TLVs.

use hap_core::error::ParseError;

/// Largest value carried by a single TLV entry.
pub const MAX_FRAGMENT_LEN: usize = 255;

/// TLV type constants for HomeKit pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    Flags = 0x13,
    Separator = 0xFF,
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x13 => Some(Self::Flags),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }
}

/// HAP status codes carried in the `Error` TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvErrorCode {
    Unknown = 0x01,
    Authentication = 0x02,
    Backoff = 0x03,
    MaxPeers = 0x04,
    MaxTries = 0x05,
    Unavailable = 0x06,
    Busy = 0x07,
}

impl TlvErrorCode {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Unknown),
            0x02 => Some(Self::Authentication),
            0x03 => Some(Self::Backoff),
            0x04 => Some(Self::MaxPeers),
            0x05 => Some(Self::MaxTries),
            0x06 => Some(Self::Unavailable),
            0x07 => Some(Self::Busy),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Authentication => "Authentication",
            Self::Backoff => "Backoff (rate limited)",
            Self::MaxPeers => "MaxPeers",
            Self::MaxTries => "MaxTries",
            Self::Unavailable => "Unavailable",
            Self::Busy => "Busy",
        }
    }
}

/// Ordered TLV8 message.
///
/// Entries keep the order in which their tag first appeared. A tag occurs
/// at most once; repeated tags on the wire are concatenated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: Vec<(u8, Vec<u8>)>,
}

/// Raw `[tag][len][value]` entries, plus whether the input ended mid-entry.
fn scan(data: &[u8]) -> (Vec<(u8, &[u8])>, bool) {
    let mut entries = Vec::new();
    let mut i = 0;

    while i < data.len() {
        if i + 2 > data.len() {
            return (entries, true);
        }
        let typ = data[i];
        let len = data[i + 1] as usize;
        i += 2;
        if i + len > data.len() {
            return (entries, true);
        }
        entries.push((typ, &data[i..i + len]));
        i += len;
    }

    (entries, false)
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode TLV8 leniently.
    ///
    /// A value whose tag is already present is appended to it. A truncated
    /// trailing entry is dropped; callers check for the fields they need.
    pub fn decode(data: &[u8]) -> Self {
        let (entries, _) = scan(data);
        let mut tlv = Self::new();
        for (typ, value) in entries {
            tlv.append_raw(typ, value);
        }
        tlv
    }

    /// Parse TLV8, failing on a truncated header or value.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let (_, truncated) = scan(data);
        if truncated {
            return Err(ParseError::InvalidFormat(
                "TLV8: truncated entry".to_string(),
            ));
        }
        Ok(Self::decode(data))
    }

    /// Encode every entry in order.
    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::new();
        for (typ, value) in &self.items {
            encode_into(&mut result, *typ, value);
        }
        result
    }

    /// Get value for type.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.get_raw(typ as u8)
    }

    /// Get value for raw type.
    pub fn get_raw(&self, typ: u8) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == typ)
            .map(|(_, v)| v.as_slice())
    }

    /// Get value for type, or fail naming the missing field.
    pub fn require(&self, typ: TlvType, name: &'static str) -> Result<&[u8], ParseError> {
        self.get(typ).ok_or(ParseError::MissingField(name))
    }

    /// Set value for type, replacing any existing value in place.
    pub fn set(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.set_raw(typ as u8, value);
    }

    /// Set value for raw type.
    pub fn set_raw(&mut self, typ: u8, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.items.iter_mut().find(|(t, _)| *t == typ) {
            Some((_, existing)) => *existing = value,
            None => self.items.push((typ, value)),
        }
    }

    /// Set a single-byte value.
    pub fn set_u8(&mut self, typ: TlvType, value: u8) {
        self.set(typ, vec![value]);
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, typ: TlvType, value: impl Into<Vec<u8>>) -> Self {
        self.set(typ, value);
        self
    }

    fn append_raw(&mut self, typ: u8, value: &[u8]) {
        match self.items.iter_mut().find(|(t, _)| *t == typ) {
            Some((_, existing)) => existing.extend_from_slice(value),
            None => self.items.push((typ, value.to_vec())),
        }
    }

    /// Check if type is present.
    pub fn contains(&self, typ: TlvType) -> bool {
        self.get(typ).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Tags in order of first appearance.
    pub fn tags(&self) -> impl Iterator<Item = u8> + '_ {
        self.items.iter().map(|(t, _)| *t)
    }

    /// Get state value (single byte).
    pub fn state(&self) -> Option<u8> {
        self.single_byte(TlvType::State)
    }

    /// Get method value (single byte).
    pub fn method(&self) -> Option<u8> {
        self.single_byte(TlvType::Method)
    }

    /// Get error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.single_byte(TlvType::Error)
    }

    /// Error value as a known status code.
    pub fn error_code(&self) -> Option<TlvErrorCode> {
        self.error().and_then(TlvErrorCode::from_byte)
    }

    fn single_byte(&self, typ: TlvType) -> Option<u8> {
        self.get(typ).and_then(|v| v.first().copied())
    }

    /// Get retry delay value in seconds.
    /// The value is little-endian encoded (1-2 bytes).
    pub fn retry_delay(&self) -> Option<u16> {
        self.get(TlvType::RetryDelay).map(|v| match v.len() {
            0 => 0,
            1 => v[0] as u16,
            _ => u16::from_le_bytes([v[0], v[1]]),
        })
    }

    /// Get error description string.
    pub fn error_description(&self) -> Option<String> {
        let error_code = self.error()?;
        let error_name = TlvErrorCode::from_byte(error_code)
            .map(TlvErrorCode::description)
            .unwrap_or("Unknown error code");

        let mut desc = format!("Error 0x{:02x}: {}", error_code, error_name);
        if let Some(delay) = self.retry_delay().filter(|d| *d > 0) {
            desc.push_str(&format!(" (retry after {} seconds)", delay));
        }
        Some(desc)
    }

    /// Reply carrying only a state and an error code.
    pub fn error_reply(state: u8, code: TlvErrorCode) -> Self {
        let mut tlv = Self::new();
        tlv.set_u8(TlvType::State, state);
        tlv.set_u8(TlvType::Error, code as u8);
        tlv
    }

    /// Create M1 pair-verify request with public key.
    pub fn pair_verify_m1(public_key: &[u8; 32]) -> Self {
        Self::new()
            .with(TlvType::State, [0x01])
            .with(TlvType::PublicKey, public_key.to_vec())
    }
}

fn encode_into(out: &mut Vec<u8>, typ: u8, value: &[u8]) {
    if value.is_empty() {
        out.push(typ);
        out.push(0);
        return;
    }

    for chunk in value.chunks(MAX_FRAGMENT_LEN) {
        out.push(typ);
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }

    // A fragmented value ending on a full chunk gets an empty terminator.
    if value.len() > MAX_FRAGMENT_LEN && value.len() % MAX_FRAGMENT_LEN == 0 {
        out.push(typ);
        out.push(0);
    }
}

/// Encode one value, fragmenting past 255 bytes.
pub fn encode_item(typ: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 2 * (value.len() / MAX_FRAGMENT_LEN + 2));
    encode_into(&mut out, typ, value);
    out
}

/// Encode a single-byte value.
pub fn encode_u8(typ: TlvType, value: u8) -> Vec<u8> {
    vec![typ as u8, 1, value]
}

/// Encode an `Error` entry.
pub fn encode_error(code: TlvErrorCode) -> Vec<u8> {
    encode_u8(TlvType::Error, code as u8)
}

/// Encode messages back to back, divided by empty `Separator` entries.
pub fn encode_list(items: &[Tlv8]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(TlvType::Separator as u8);
            out.push(0);
        }
        out.extend_from_slice(&item.encode());
    }
    out
}

/// Split a `Separator`-delimited payload into its messages.
pub fn decode_list(data: &[u8]) -> Vec<Tlv8> {
    let (entries, _) = scan(data);
    let mut out = vec![Tlv8::new()];
    for (typ, value) in entries {
        if typ == TlvType::Separator as u8 {
            out.push(Tlv8::new());
        } else if let Some(current) = out.last_mut() {
            current.append_raw(typ, value);
        }
    }
    out.retain(|tlv| !tlv.is_empty());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    mod decoding {
        use super::*;

        #[test]
        fn decodes_single_entry() {
            let tlv = Tlv8::decode(&[0x06, 0x01, 0x02]);
            assert_eq!(tlv.state(), Some(2));
            assert_eq!(tlv.len(), 1);
        }

        #[test]
        fn keeps_order_of_first_appearance() {
            let data = [0x06, 0x01, 0x01, 0x00, 0x01, 0x00, 0x03, 0x01, 0xAA];
            let tlv = Tlv8::decode(&data);
            assert_eq!(tlv.tags().collect::<Vec<_>>(), vec![0x06, 0x00, 0x03]);
        }

        #[test]
        fn reassembles_consecutive_fragments() {
            let mut data = vec![0x03, 0xFF];
            data.extend(vec![0xAA; 255]);
            data.extend([0x03, 0x2D]);
            data.extend(vec![0xBB; 45]);

            let value = Tlv8::decode(&data).get(TlvType::PublicKey).unwrap().to_vec();
            assert_eq!(value.len(), 300);
            assert!(value[..255].iter().all(|&b| b == 0xAA));
            assert!(value[255..].iter().all(|&b| b == 0xBB));
        }

        #[test]
        fn appends_to_existing_tag_even_when_not_adjacent() {
            let data = [0x01, 0x02, b'a', b'b', 0x06, 0x01, 0x03, 0x01, 0x01, b'c'];
            let tlv = Tlv8::decode(&data);
            assert_eq!(tlv.get(TlvType::Identifier), Some(&b"abc"[..]));
            assert_eq!(tlv.len(), 2);
        }

        #[test]
        fn drops_truncated_trailing_entry() {
            let tlv = Tlv8::decode(&[0x06, 0x01, 0x01, 0x03, 0x05, 0xAA]);
            assert_eq!(tlv.state(), Some(1));
            assert!(!tlv.contains(TlvType::PublicKey));

            let tlv = Tlv8::decode(&[0x06, 0x01, 0x01, 0x03]);
            assert_eq!(tlv.len(), 1);
        }

        #[test]
        fn empty_input_is_empty_message() {
            assert!(Tlv8::decode(&[]).is_empty());
        }

        #[test]
        fn zero_length_value() {
            let tlv = Tlv8::decode(&[0xFF, 0x00]);
            assert_eq!(tlv.get(TlvType::Separator), Some(&[][..]));
        }

        #[test]
        fn strict_parse_reports_truncation() {
            assert!(Tlv8::parse(&[0x06]).is_err());
            assert!(Tlv8::parse(&[0x06, 0x05, 0x01]).is_err());
            assert_eq!(Tlv8::parse(&[0x06, 0x01, 0x04]).unwrap().state(), Some(4));
        }
    }

    mod encoding {
        use super::*;

        #[test]
        fn short_value_is_one_triple() {
            assert_eq!(encode_item(0x02, &[1, 2, 3]), vec![0x02, 0x03, 1, 2, 3]);
        }

        #[test]
        fn value_of_exactly_255_has_no_terminator() {
            let encoded = encode_item(0x03, &[0x11; 255]);
            assert_eq!(encoded.len(), 257);
            assert_eq!(encoded[1], 0xFF);
        }

        #[test]
        fn long_value_splits_with_remainder() {
            let encoded = encode_item(0x03, &[0x22; 300]);
            assert_eq!(encoded.len(), 2 + 255 + 2 + 45);
            assert_eq!(&encoded[..2], &[0x03, 0xFF]);
            assert_eq!(&encoded[257..259], &[0x03, 45]);
        }

        #[test]
        fn full_chunk_multiple_gets_empty_terminator() {
            let encoded = encode_item(0x03, &[0x33; 510]);
            assert_eq!(encoded.len(), 2 * 257 + 2);
            assert_eq!(&encoded[encoded.len() - 2..], &[0x03, 0x00]);
            assert_eq!(Tlv8::decode(&encoded).get(TlvType::PublicKey).unwrap().len(), 510);
        }

        #[test]
        fn srp_public_key_round_trips() {
            let key: Vec<u8> = (0..384).map(|i| (i * 7 % 256) as u8).collect();
            let tlv = Tlv8::new()
                .with(TlvType::State, [2])
                .with(TlvType::PublicKey, key.clone());
            let decoded = Tlv8::decode(&tlv.encode());
            assert_eq!(decoded.get(TlvType::PublicKey), Some(key.as_slice()));
            assert_eq!(decoded.state(), Some(2));
        }

        #[test]
        fn encode_preserves_insertion_order() {
            let tlv = Tlv8::new()
                .with(TlvType::State, [4])
                .with(TlvType::Proof, [9, 9]);
            assert_eq!(tlv.encode(), vec![0x06, 0x01, 0x04, 0x04, 0x02, 9, 9]);
        }

        #[test]
        fn scalar_encoders() {
            assert_eq!(encode_u8(TlvType::State, 2), vec![0x06, 0x01, 0x02]);
            assert_eq!(
                encode_error(TlvErrorCode::Authentication),
                vec![0x07, 0x01, 0x02]
            );
        }

        #[test]
        fn empty_value_encodes_zero_length() {
            assert_eq!(encode_item(0xFF, &[]), vec![0xFF, 0x00]);
        }
    }

    mod accessors {
        use super::*;

        #[test]
        fn set_replaces_in_place() {
            let mut tlv = Tlv8::new()
                .with(TlvType::State, [1])
                .with(TlvType::Method, [0]);
            tlv.set_u8(TlvType::State, 3);
            assert_eq!(tlv.state(), Some(3));
            assert_eq!(tlv.tags().collect::<Vec<_>>(), vec![0x06, 0x00]);
        }

        #[test]
        fn require_names_missing_field() {
            let tlv = Tlv8::new();
            let err = tlv.require(TlvType::Salt, "salt").unwrap_err();
            assert!(matches!(err, ParseError::MissingField("salt")));
        }

        #[test]
        fn error_reply_and_description() {
            let mut tlv = Tlv8::error_reply(4, TlvErrorCode::Authentication);
            assert_eq!(tlv.state(), Some(4));
            assert_eq!(tlv.error_code(), Some(TlvErrorCode::Authentication));
            assert_eq!(tlv.error_description().unwrap(), "Error 0x02: Authentication");

            tlv.set_u8(TlvType::Error, TlvErrorCode::Backoff as u8);
            tlv.set(TlvType::RetryDelay, 30u16.to_le_bytes().to_vec());
            assert_eq!(
                tlv.error_description().unwrap(),
                "Error 0x03: Backoff (rate limited) (retry after 30 seconds)"
            );
        }

        #[test]
        fn unknown_error_byte() {
            let tlv = Tlv8::new().with(TlvType::Error, [0x42]);
            assert_eq!(tlv.error_code(), None);
            assert!(tlv.error_description().unwrap().contains("Unknown error code"));
        }

        #[test]
        fn pair_verify_m1_builder() {
            let tlv = Tlv8::pair_verify_m1(&[7u8; 32]);
            assert_eq!(tlv.state(), Some(1));
            assert_eq!(tlv.get(TlvType::PublicKey), Some(&[7u8; 32][..]));
        }
    }

    mod lists {
        use super::*;

        #[test]
        fn separated_messages_round_trip() {
            let first = Tlv8::new()
                .with(TlvType::Identifier, b"controller-a".to_vec())
                .with(TlvType::Permissions, [1]);
            let second = Tlv8::new()
                .with(TlvType::Identifier, b"controller-b".to_vec())
                .with(TlvType::Permissions, [0]);

            let encoded = encode_list(&[first.clone(), second.clone()]);
            assert!(encoded.windows(2).any(|w| w == [0xFF, 0x00]));
            assert_eq!(decode_list(&encoded), vec![first, second]);
        }

        #[test]
        fn single_item_has_no_separator() {
            let only = Tlv8::new().with(TlvType::State, [2]);
            assert_eq!(encode_list(&[only.clone()]), only.encode());
        }
    }

    mod tlv_type {
        use super::*;

        #[test]
        fn from_byte_roundtrip() {
            for t in [TlvType::Method, TlvType::Signature, TlvType::Flags, TlvType::Separator] {
                assert_eq!(TlvType::from_byte(t as u8), Some(t));
            }
            assert_eq!(TlvType::from_byte(0x42), None);
        }

        #[test]
        fn error_codes_match_hap_values() {
            assert_eq!(TlvErrorCode::Unknown as u8, 1);
            assert_eq!(TlvErrorCode::Busy as u8, 7);
            assert_eq!(TlvErrorCode::from_byte(6), Some(TlvErrorCode::Unavailable));
        }
    }
}
