use super::{MAX_WIRE_KEY_LENGTH, REQUEST_HEADER_LEN, TTL_MODE_KEEP, Verb};
use crate::core::QuotaError;
use crate::core::ttl::{TtlMode, TtlSpec};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A decoded request frame
///
/// The verb set is closed; consumers dispatch with an exhaustive `match`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Insert {
        key: Bytes,
        counter: u64,
        ttl: TtlSpec,
    },
    Query {
        key: Bytes,
    },
    Update {
        key: Bytes,
        counter: u64,
        /// `None` keeps the record's current TTL
        ttl: Option<TtlSpec>,
    },
    Purge {
        key: Bytes,
    },
    Consume {
        key: Bytes,
        amount: u64,
    },
    Increase {
        key: Bytes,
        amount: u64,
    },
}

impl Request {
    pub fn verb(&self) -> Verb {
        match self {
            Request::Insert { .. } => Verb::Insert,
            Request::Query { .. } => Verb::Query,
            Request::Update { .. } => Verb::Update,
            Request::Purge { .. } => Verb::Purge,
            Request::Consume { .. } => Verb::Consume,
            Request::Increase { .. } => Verb::Increase,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Request::Insert { key, .. }
            | Request::Query { key }
            | Request::Update { key, .. }
            | Request::Purge { key }
            | Request::Consume { key, .. }
            | Request::Increase { key, .. } => key,
        }
    }

    /// Length of the frame at the start of `buf`, once it is complete
    ///
    /// Returns `Ok(None)` while more bytes are needed. An unknown verb is
    /// reported as soon as its byte arrives.
    pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, QuotaError> {
        let Some(&verb) = buf.first() else {
            return Ok(None);
        };
        let verb = Verb::from_u8(verb).ok_or(QuotaError::MalformedFrame("unknown verb"))?;
        let Some(&key_len) = buf.get(1) else {
            return Ok(None);
        };

        let len = REQUEST_HEADER_LEN + key_len as usize + verb.request_payload_len();
        Ok((buf.len() >= len).then_some(len))
    }

    /// Split one complete frame off the front of `buf` and decode it
    ///
    /// Leaves `buf` untouched and returns `Ok(None)` when the frame is not
    /// complete yet.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Request>, QuotaError> {
        match Self::frame_len(buf)? {
            Some(len) => Self::decode_frame(buf.split_to(len).freeze()).map(Some),
            None => Ok(None),
        }
    }

    /// Decode exactly one frame
    ///
    /// # Errors
    ///
    /// [`QuotaError::MalformedFrame`] if the verb is unknown, the declared key
    /// length exceeds the bytes available, the payload size does not match
    /// the verb, or a ttl mode is unknown or carries a stray value.
    pub fn decode(frame: &[u8]) -> Result<Request, QuotaError> {
        Self::decode_frame(Bytes::copy_from_slice(frame))
    }

    fn decode_frame(mut frame: Bytes) -> Result<Request, QuotaError> {
        if frame.len() < REQUEST_HEADER_LEN {
            return Err(QuotaError::MalformedFrame("truncated header"));
        }
        let verb = Verb::from_u8(frame[0]).ok_or(QuotaError::MalformedFrame("unknown verb"))?;
        let key_len = frame[1] as usize;

        let body_len = frame.len() - REQUEST_HEADER_LEN;
        if body_len < key_len {
            return Err(QuotaError::MalformedFrame("key length exceeds frame"));
        }
        if body_len - key_len != verb.request_payload_len() {
            return Err(QuotaError::MalformedFrame("payload length mismatch"));
        }

        frame.advance(REQUEST_HEADER_LEN);
        let key = frame.split_to(key_len);
        let mut payload = frame;

        let request = match verb {
            Verb::Insert => {
                let counter = payload.get_u64();
                let mode = payload.get_u8();
                let value = payload.get_u64();
                Request::Insert {
                    key,
                    counter,
                    ttl: decode_ttl(mode, value)?,
                }
            }
            Verb::Update => {
                let counter = payload.get_u64();
                let mode = payload.get_u8();
                let value = payload.get_u64();
                let ttl = if mode == TTL_MODE_KEEP {
                    if value != 0 {
                        return Err(QuotaError::MalformedFrame("ttl value without ttl mode"));
                    }
                    None
                } else {
                    Some(decode_ttl(mode, value)?)
                };
                Request::Update { key, counter, ttl }
            }
            Verb::Query => Request::Query { key },
            Verb::Purge => Request::Purge { key },
            Verb::Consume => Request::Consume {
                key,
                amount: payload.get_u64(),
            },
            Verb::Increase => Request::Increase {
                key,
                amount: payload.get_u64(),
            },
        };

        Ok(request)
    }

    /// Size of the encoded frame
    pub fn encoded_len(&self) -> usize {
        REQUEST_HEADER_LEN + self.key().len() + self.verb().request_payload_len()
    }

    /// Append the encoded frame to `dst`
    ///
    /// # Errors
    ///
    /// [`QuotaError::KeyTooLong`] if the key does not fit the length prefix.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), QuotaError> {
        let key = self.key();
        if key.len() > MAX_WIRE_KEY_LENGTH {
            return Err(QuotaError::KeyTooLong {
                len: key.len(),
                max: MAX_WIRE_KEY_LENGTH,
            });
        }

        dst.reserve(self.encoded_len());
        dst.put_u8(self.verb().as_u8());
        dst.put_u8(key.len() as u8);
        dst.put_slice(key);

        match self {
            Request::Insert { counter, ttl, .. } => {
                dst.put_u64(*counter);
                put_ttl(dst, ttl);
            }
            Request::Update { counter, ttl, .. } => {
                dst.put_u64(*counter);
                match ttl {
                    Some(ttl) => put_ttl(dst, ttl),
                    None => {
                        dst.put_u8(TTL_MODE_KEEP);
                        dst.put_u64(0);
                    }
                }
            }
            Request::Consume { amount, .. } | Request::Increase { amount, .. } => {
                dst.put_u64(*amount);
            }
            Request::Query { .. } | Request::Purge { .. } => {}
        }

        Ok(())
    }
}

pub(super) fn decode_ttl(mode: u8, value: u64) -> Result<TtlSpec, QuotaError> {
    let mode = TtlMode::from_u8(mode).ok_or(QuotaError::MalformedFrame("unknown ttl mode"))?;
    if mode == TtlMode::None && value != 0 {
        return Err(QuotaError::MalformedFrame("ttl value without ttl mode"));
    }
    Ok(TtlSpec { mode, value })
}

pub(super) fn put_ttl(dst: &mut BytesMut, ttl: &TtlSpec) {
    dst.put_u8(ttl.mode.as_u8());
    dst.put_u64(ttl.value);
}
