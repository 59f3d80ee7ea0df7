use super::{MAX_REQUEST_LEN, QuotaInfo, Reply, Request, Response, Status, TTL_MODE_KEEP, Verb};
use crate::core::QuotaError;
use crate::core::ttl::{TtlMode, TtlSpec};
use bytes::{BufMut, Bytes, BytesMut};

fn encode(request: &Request) -> Vec<u8> {
    let mut buf = BytesMut::new();
    request.encode(&mut buf).unwrap();
    buf.to_vec()
}

fn encode_response(response: &Response) -> Vec<u8> {
    let mut buf = BytesMut::new();
    response.encode(&mut buf);
    buf.to_vec()
}

fn frame(verb: u8, key: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![verb, key.len() as u8];
    buf.extend_from_slice(key);
    buf.extend_from_slice(payload);
    buf
}

fn quota_payload(counter: u64, mode: u8, ttl: u64) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u64(counter);
    buf.put_u8(mode);
    buf.put_u64(ttl);
    buf.to_vec()
}

#[test]
fn test_insert_layout() {
    let request = Request::Insert {
        key: Bytes::from_static(b"user:42"),
        counter: 100,
        ttl: TtlSpec::expires_after(60_000),
    };

    let bytes = encode(&request);
    assert_eq!(bytes[0], 0x01);
    assert_eq!(bytes[1], 7);
    assert_eq!(&bytes[2..9], b"user:42");
    assert_eq!(&bytes[9..17], &100u64.to_be_bytes());
    assert_eq!(bytes[17], TtlMode::ExpiresAfter.as_u8());
    assert_eq!(&bytes[18..26], &60_000u64.to_be_bytes());
    assert_eq!(bytes.len(), request.encoded_len());
}

#[test]
fn test_decode_every_verb() {
    let cases = vec![
        (
            frame(0x01, b"k", &quota_payload(5, 0, 0)),
            Request::Insert {
                key: Bytes::from_static(b"k"),
                counter: 5,
                ttl: TtlSpec::none(),
            },
        ),
        (
            frame(0x02, b"k", &[]),
            Request::Query {
                key: Bytes::from_static(b"k"),
            },
        ),
        (
            frame(0x03, b"k", &quota_payload(9, 1, 1_700_000_000)),
            Request::Update {
                key: Bytes::from_static(b"k"),
                counter: 9,
                ttl: Some(TtlSpec::expires_at(1_700_000_000)),
            },
        ),
        (
            frame(0x03, b"k", &quota_payload(9, TTL_MODE_KEEP, 0)),
            Request::Update {
                key: Bytes::from_static(b"k"),
                counter: 9,
                ttl: None,
            },
        ),
        (
            frame(0x04, b"k", &[]),
            Request::Purge {
                key: Bytes::from_static(b"k"),
            },
        ),
        (
            frame(0x05, b"k", &30u64.to_be_bytes()),
            Request::Consume {
                key: Bytes::from_static(b"k"),
                amount: 30,
            },
        ),
        (
            frame(0x06, b"k", &7u64.to_be_bytes()),
            Request::Increase {
                key: Bytes::from_static(b"k"),
                amount: 7,
            },
        ),
    ];

    for (bytes, expected) in cases {
        let decoded = Request::decode(&bytes).unwrap();
        assert_eq!(decoded, expected);
        // encode(decode(frame)) == frame
        assert_eq!(encode(&decoded), bytes, "round trip for {:?}", expected.verb());
    }
}

#[test]
fn test_round_trip_binary_and_boundary_keys() {
    let keys: Vec<Vec<u8>> = vec![
        vec![],
        vec![0x00],
        vec![0xff; 255],
        "ключ:ü".as_bytes().to_vec(),
    ];

    for key in keys {
        let request = Request::Consume {
            key: Bytes::from(key.clone()),
            amount: u64::MAX,
        };
        let bytes = encode(&request);
        assert_eq!(Request::decode(&bytes).unwrap(), request);
        assert_eq!(encode(&Request::decode(&bytes).unwrap()), bytes);
    }
}

#[test]
fn test_max_request_len() {
    let request = Request::Insert {
        key: Bytes::from(vec![b'x'; 255]),
        counter: 1,
        ttl: TtlSpec::none(),
    };
    assert_eq!(request.encoded_len(), MAX_REQUEST_LEN);
}

#[test]
fn test_encode_rejects_oversized_key() {
    let request = Request::Query {
        key: Bytes::from(vec![b'x'; 256]),
    };
    let mut buf = BytesMut::new();
    assert_eq!(
        request.encode(&mut buf),
        Err(QuotaError::KeyTooLong { len: 256, max: 255 })
    );
    assert!(buf.is_empty());
}

#[test]
fn test_unknown_verb() {
    assert_eq!(
        Request::decode(&frame(0x09, b"k", &[])),
        Err(QuotaError::MalformedFrame("unknown verb"))
    );
    assert_eq!(
        Request::decode(&frame(0x00, b"k", &[])),
        Err(QuotaError::MalformedFrame("unknown verb"))
    );
}

#[test]
fn test_truncated_header() {
    assert!(matches!(
        Request::decode(&[]),
        Err(QuotaError::MalformedFrame(_))
    ));
    assert!(matches!(
        Request::decode(&[0x02]),
        Err(QuotaError::MalformedFrame(_))
    ));
}

#[test]
fn test_key_length_exceeds_frame() {
    // Declares a 10 byte key but carries 3
    let bytes = vec![0x02, 10, b'a', b'b', b'c'];
    assert_eq!(
        Request::decode(&bytes),
        Err(QuotaError::MalformedFrame("key length exceeds frame"))
    );
}

#[test]
fn test_payload_length_mismatch() {
    // CONSUME with a 4 byte amount
    assert_eq!(
        Request::decode(&frame(0x05, b"k", &[0, 0, 0, 1])),
        Err(QuotaError::MalformedFrame("payload length mismatch"))
    );
    // QUERY with trailing bytes
    assert_eq!(
        Request::decode(&frame(0x02, b"k", &[0])),
        Err(QuotaError::MalformedFrame("payload length mismatch"))
    );
}

#[test]
fn test_invalid_ttl_modes() {
    assert_eq!(
        Request::decode(&frame(0x01, b"k", &quota_payload(1, 7, 0))),
        Err(QuotaError::MalformedFrame("unknown ttl mode"))
    );
    // KEEP is only meaningful for UPDATE
    assert_eq!(
        Request::decode(&frame(0x01, b"k", &quota_payload(1, TTL_MODE_KEEP, 0))),
        Err(QuotaError::MalformedFrame("unknown ttl mode"))
    );
    assert_eq!(
        Request::decode(&frame(0x01, b"k", &quota_payload(1, 0, 5))),
        Err(QuotaError::MalformedFrame("ttl value without ttl mode"))
    );
    assert_eq!(
        Request::decode(&frame(0x03, b"k", &quota_payload(1, TTL_MODE_KEEP, 5))),
        Err(QuotaError::MalformedFrame("ttl value without ttl mode"))
    );
}

#[test]
fn test_frame_len_streaming() {
    let bytes = frame(0x05, b"abc", &1u64.to_be_bytes());

    for cut in 0..bytes.len() {
        assert_eq!(Request::frame_len(&bytes[..cut]).unwrap(), None, "cut at {cut}");
    }
    assert_eq!(Request::frame_len(&bytes).unwrap(), Some(bytes.len()));

    // Unknown verbs are rejected before the frame completes
    assert!(Request::frame_len(&[0x7f]).is_err());
}

#[test]
fn test_parse_pipelined_frames() {
    let mut buf = BytesMut::new();
    let first = Request::Query {
        key: Bytes::from_static(b"a"),
    };
    let second = Request::Consume {
        key: Bytes::from_static(b"b"),
        amount: 2,
    };
    first.encode(&mut buf).unwrap();
    second.encode(&mut buf).unwrap();
    // Start of a third, incomplete frame
    buf.put_slice(&[0x04, 5, b'p']);

    assert_eq!(Request::parse(&mut buf).unwrap(), Some(first));
    assert_eq!(Request::parse(&mut buf).unwrap(), Some(second));
    assert_eq!(Request::parse(&mut buf).unwrap(), None);
    assert_eq!(&buf[..], &[0x04, 5, b'p']);

    buf.put_slice(b"urge");
    assert_eq!(
        Request::parse(&mut buf).unwrap(),
        Some(Request::Purge {
            key: Bytes::from_static(b"purge")
        })
    );
    assert!(buf.is_empty());
}

#[test]
fn test_parse_rejects_garbage() {
    let mut buf = BytesMut::from(&[0xaa, 0x01, 0x02][..]);
    assert!(matches!(
        Request::parse(&mut buf),
        Err(QuotaError::MalformedFrame(_))
    ));
}

#[test]
fn test_response_layouts() {
    assert_eq!(encode_response(&Response::Success(Reply::Empty)), vec![0]);
    assert_eq!(
        encode_response(&Response::Failure(Status::InsufficientQuota)),
        vec![6]
    );

    let mut counter = vec![0];
    counter.extend_from_slice(&70u64.to_be_bytes());
    assert_eq!(
        encode_response(&Response::Success(Reply::Counter(70))),
        counter
    );

    let info = QuotaInfo {
        counter: 70,
        ttl: TtlSpec::expires_after(1500),
    };
    let mut quota = vec![0];
    quota.extend_from_slice(&quota_payload(70, 2, 1500));
    assert_eq!(encode_response(&Response::Success(Reply::Quota(info))), quota);
}

#[test]
fn test_response_round_trip() {
    let cases = vec![
        (Verb::Insert, Response::Success(Reply::Empty)),
        (Verb::Update, Response::Failure(Status::NotFound)),
        (Verb::Purge, Response::Success(Reply::Empty)),
        (Verb::Consume, Response::Success(Reply::Counter(0))),
        (Verb::Increase, Response::Success(Reply::Counter(u64::MAX))),
        (Verb::Consume, Response::Failure(Status::InsufficientQuota)),
        (
            Verb::Query,
            Response::Success(Reply::Quota(QuotaInfo {
                counter: 3,
                ttl: TtlSpec::none(),
            })),
        ),
        (Verb::Insert, Response::Failure(Status::MalformedFrame)),
    ];

    for (verb, response) in cases {
        let bytes = encode_response(&response);
        assert_eq!(bytes.len(), response.encoded_len());
        assert_eq!(Response::frame_len(verb, &bytes).unwrap(), Some(bytes.len()));
        let decoded = Response::decode(verb, &bytes).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(encode_response(&decoded), bytes);
    }
}

#[test]
fn test_response_decode_errors() {
    assert!(Response::decode(Verb::Query, &[]).is_err());
    assert!(Response::decode(Verb::Query, &[42]).is_err());
    // Success to CONSUME must carry a counter
    assert!(Response::decode(Verb::Consume, &[0]).is_err());
    // Failures carry nothing
    assert!(Response::decode(Verb::Consume, &[5, 0]).is_err());
    assert_eq!(Response::frame_len(Verb::Consume, &[0, 1, 2]).unwrap(), None);
}

#[test]
fn test_status_codes() {
    for (code, status) in Status::ALL.iter().enumerate() {
        assert_eq!(status.as_u8() as usize, code);
        assert_eq!(Status::from_u8(code as u8), Some(*status));
    }
    assert_eq!(Status::from_u8(7), None);

    assert_eq!(
        QuotaError::MalformedFrame("x").status(),
        Status::MalformedFrame
    );
    assert_eq!(
        QuotaError::KeyTooLong { len: 1, max: 0 }.status(),
        Status::KeyTooLong
    );
    assert_eq!(
        QuotaError::StoreFull { max_keys: 1 }.status(),
        Status::StoreFull
    );
    assert_eq!(QuotaError::AlreadyExists.status(), Status::AlreadyExists);
    assert_eq!(QuotaError::NotFound.status(), Status::NotFound);
    assert_eq!(
        QuotaError::InsufficientQuota {
            requested: 2,
            available: 1
        }
        .status(),
        Status::InsufficientQuota
    );
    assert!(QuotaError::MalformedFrame("x").is_fatal());
    assert!(!QuotaError::NotFound.is_fatal());
}

#[test]
fn test_verb_ids() {
    for verb in Verb::ALL {
        assert_eq!(Verb::from_u8(verb.as_u8()), Some(verb));
    }
    assert_eq!(Verb::Insert.request_payload_len(), 17);
    assert_eq!(Verb::Consume.request_payload_len(), 8);
    assert_eq!(Verb::Query.request_payload_len(), 0);
}
