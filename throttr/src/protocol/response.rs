use super::request::{decode_ttl, put_ttl};
use super::{Status, Verb};
use crate::core::QuotaError;
use crate::core::ttl::TtlSpec;
use bytes::{Buf, BufMut, BytesMut};

/// Counter and TTL of a record as reported by `QUERY`
///
/// `ttl.value` is the time left before expiry in the engine's TTL unit,
/// rounded up; it is zero for records without a TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaInfo {
    pub counter: u64,
    pub ttl: TtlSpec,
}

/// Payload of a successful response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// `INSERT`, `UPDATE`, `PURGE`
    Empty,
    /// `CONSUME`, `INCREASE`
    Counter(u64),
    /// `QUERY`
    Quota(QuotaInfo),
}

/// A response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Success(Reply),
    /// Failure status; never [`Status::Ok`]
    Failure(Status),
}

impl Response {
    pub fn status(&self) -> Status {
        match self {
            Response::Success(_) => Status::Ok,
            Response::Failure(status) => *status,
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Response::Success(Reply::Empty) | Response::Failure(_) => 0,
            Response::Success(Reply::Counter(_)) => Verb::Consume.reply_payload_len(),
            Response::Success(Reply::Quota(_)) => Verb::Query.reply_payload_len(),
        }
    }

    /// Append the encoded frame to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.status().as_u8());
        match self {
            Response::Success(Reply::Counter(counter)) => dst.put_u64(*counter),
            Response::Success(Reply::Quota(info)) => {
                dst.put_u64(info.counter);
                put_ttl(dst, &info.ttl);
            }
            Response::Success(Reply::Empty) | Response::Failure(_) => {}
        }
    }

    /// Length of the response to `verb` at the start of `buf`, once complete
    pub fn frame_len(verb: Verb, buf: &[u8]) -> Result<Option<usize>, QuotaError> {
        let Some(&status) = buf.first() else {
            return Ok(None);
        };
        let status = Status::from_u8(status).ok_or(QuotaError::MalformedFrame("unknown status"))?;
        let len = 1 + if status.is_ok() {
            verb.reply_payload_len()
        } else {
            0
        };
        Ok((buf.len() >= len).then_some(len))
    }

    /// Decode exactly one response to a request of kind `verb`
    pub fn decode(verb: Verb, frame: &[u8]) -> Result<Response, QuotaError> {
        let Some((&status, mut payload)) = frame.split_first() else {
            return Err(QuotaError::MalformedFrame("empty response"));
        };
        let status = Status::from_u8(status).ok_or(QuotaError::MalformedFrame("unknown status"))?;

        if !status.is_ok() {
            if !payload.is_empty() {
                return Err(QuotaError::MalformedFrame("payload on failure"));
            }
            return Ok(Response::Failure(status));
        }

        if payload.len() != verb.reply_payload_len() {
            return Err(QuotaError::MalformedFrame("payload length mismatch"));
        }

        let reply = match verb {
            Verb::Insert | Verb::Update | Verb::Purge => Reply::Empty,
            Verb::Consume | Verb::Increase => Reply::Counter(payload.get_u64()),
            Verb::Query => {
                let counter = payload.get_u64();
                let mode = payload.get_u8();
                let value = payload.get_u64();
                Reply::Quota(QuotaInfo {
                    counter,
                    ttl: decode_ttl(mode, value)?,
                })
            }
        };

        Ok(Response::Success(reply))
    }
}

impl From<Result<Reply, QuotaError>> for Response {
    fn from(result: Result<Reply, QuotaError>) -> Self {
        match result {
            Ok(reply) => Response::Success(reply),
            Err(err) => Response::Failure(err.status()),
        }
    }
}

impl From<&QuotaError> for Response {
    fn from(err: &QuotaError) -> Self {
        Response::Failure(err.status())
    }
}
