use crate::*;
use rand::Rng;
use rand::RngCore;

// ============================================================================
//  HELPERS
// ============================================================================

/// Splits an encoded 5-byte-header frame and decodes it as a request.
fn decode_request(bytes: &[u8]) -> Result<Request> {
    let header = Header::decode(&bytes[..HEADER_LEN])?;
    let payload = &bytes[HEADER_LEN..];
    assert_eq!(header.payload_len(), payload.len(), "header length must cover the payload");
    Request::decode(header.kind, payload)
}

fn decode_response(bytes: &[u8]) -> Result<Response> {
    let header = ResponseHeader::decode(&bytes[..RESPONSE_HEADER_LEN])?;
    Response::decode(&header, &bytes[RESPONSE_HEADER_LEN..])
}

fn decode_message(bytes: &[u8]) -> Result<FunctionMessage> {
    let header = Header::decode(&bytes[..HEADER_LEN])?;
    let payload = &bytes[HEADER_LEN..];
    assert_eq!(header.payload_len(), payload.len());
    FunctionMessage::decode(header.kind, payload)
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

// ============================================================================
//  REQUESTS AND RESPONSES
// ============================================================================

#[test]
fn store_request_layout() {
    let req = Request::Store(StoreRequest { name: "hello".into(), code: "def hello(): pass".into() });
    let bytes = req.encode().unwrap();

    assert_eq!(bytes[0], 0x0);
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    assert_eq!(len, bytes.len() - HEADER_LEN);

    let body: serde_json::Value = serde_json::from_slice(&bytes[HEADER_LEN..]).unwrap();
    assert_eq!(body["name"], "hello");
    assert_eq!(body["code"], "def hello(): pass");
    assert_eq!(decode_request(&bytes).unwrap(), req);
}

#[test]
fn requests_roundtrip() {
    let id = FunctionId::generate().to_string();
    let requests = [
        Request::Store(StoreRequest { name: String::new(), code: String::new() }),
        Request::Execute(ExecuteRequest { call: "hello()".into(), token: "t".into() }),
        Request::Open { function_id: id.clone() },
        Request::Close { function_id: id },
        Request::Open { function_id: String::new() },
    ];
    for req in requests {
        assert_eq!(decode_request(&req.encode().unwrap()).unwrap(), req);
    }
}

#[test]
fn execute_request_accepts_foreign_json_spacing() {
    let payload = br#"{"call": "hello()", "token": "abc"}"#;
    let req = Request::decode(0x1, payload).unwrap();
    assert_eq!(req, Request::Execute(ExecuteRequest { call: "hello()".into(), token: "abc".into() }));
}

#[test]
fn request_with_unknown_kind_is_rejected() {
    assert_eq!(Request::decode(0x9, b"whatever"), Err(Error::UnknownKind(0x9)));
    // function-message kinds are not requests
    assert_eq!(Request::decode(0x7, b""), Err(Error::UnknownKind(0x7)));
}

#[test]
fn request_with_bad_body_is_malformed() {
    let err = Request::decode(0x0, b"{not json").unwrap_err();
    assert!(matches!(err, Error::MalformedFrame(_)));
    assert!(err.is_fatal());

    let err = Request::decode(0x2, &[0xff, 0xfe]).unwrap_err();
    assert!(matches!(err, Error::MalformedFrame(_)));
}

#[test]
fn header_len_mismatch_is_malformed() {
    assert!(matches!(Header::decode(&[0, 0, 0, 1]), Err(Error::MalformedFrame(_))));
    assert!(matches!(Header::decode(&[0, 0, 0, 0, 1, 2]), Err(Error::MalformedFrame(_))));
    assert!(matches!(ResponseHeader::decode(&[0, 0, 0, 0, 0]), Err(Error::MalformedFrame(_))));
    assert!(matches!(RecordHeader::decode(&[0; 4]), Err(Error::MalformedFrame(_))));
    assert!(matches!(InputRecord::decode_len(&[0; 5]), Err(Error::MalformedFrame(_))));
}

#[test]
fn oversized_header_is_rejected() {
    let mut bytes = [0u8; HEADER_LEN];
    bytes[1..].copy_from_slice(&(MAX_PAYLOAD_LEN as u32 + 1).to_be_bytes());
    assert_eq!(Header::decode(&bytes), Err(Error::PayloadTooLarge(MAX_PAYLOAD_LEN + 1)));
}

#[test]
fn oversized_payload_cannot_be_encoded() {
    let req = Request::Open { function_id: "x".repeat(MAX_PAYLOAD_LEN + 1) };
    assert_eq!(req.encode(), Err(Error::PayloadTooLarge(MAX_PAYLOAD_LEN + 1)));
}

#[test]
fn responses_roundtrip() {
    let responses = [
        Response::Store { token: "c0ffee".into() },
        Response::Execute { function_id: FunctionId::generate().to_string() },
        Response::error(RequestKind::Execute, "invalid token"),
        Response::error(0x9u8, "invalid request"),
        Response::error(RequestKind::Open, ""),
    ];
    for resp in responses {
        assert_eq!(decode_response(&resp.encode().unwrap()).unwrap(), resp);
    }
}

#[test]
fn error_response_layout() {
    let bytes = Response::error(RequestKind::Execute, "invalid token").encode().unwrap();
    assert_eq!(&bytes[..RESPONSE_HEADER_LEN], &[0x1, 0x1, 0, 0, 0, 13]);
    assert_eq!(&bytes[RESPONSE_HEADER_LEN..], b"invalid token");
}

#[test]
fn response_with_bad_flag_is_malformed() {
    let err = ResponseHeader::decode(&[0x0, 0x2, 0, 0, 0, 0]).unwrap_err();
    assert!(matches!(err, Error::MalformedFrame(_)));
}

#[test]
fn success_response_for_open_is_rejected() {
    let header = ResponseHeader { kind: 0x2, status: Status::Success, len: 0 };
    assert_eq!(Response::decode(&header, b""), Err(Error::UnknownKind(0x2)));
}

// ============================================================================
//  FUNCTION MESSAGES
// ============================================================================

#[test]
fn function_message_layout() {
    let id = FunctionId::generate();
    let msg = FunctionMessage::output(id.clone(), "hi");
    let bytes = msg.encode().unwrap();

    assert_eq!(bytes.len(), msg.framed_len());
    assert_eq!(bytes[0], 0x6);
    assert_eq!(&bytes[1..5], &(FUNCTION_ID_LEN as u32 + 2).to_be_bytes());
    assert_eq!(&bytes[5..5 + FUNCTION_ID_LEN], id.as_str().as_bytes());
    assert_eq!(&bytes[5 + FUNCTION_ID_LEN..], b"hi");
}

#[test]
fn function_messages_roundtrip() {
    let id = FunctionId::generate();
    let mut rng = rand::thread_rng();
    let messages = [
        FunctionMessage::output(id.clone(), Vec::new()),
        FunctionMessage::error(id.clone(), "Traceback"),
        FunctionMessage::input(id.clone(), random_bytes(rng.gen_range(1..4096))),
        FunctionMessage::function_err(id.clone(), "function dead"),
        FunctionMessage::output(id, random_bytes(256 * 1024)),
    ];
    for msg in messages {
        assert_eq!(decode_message(&msg.encode().unwrap()).unwrap(), msg);
    }
}

#[test]
fn function_message_shorter_than_id_is_malformed() {
    let err = FunctionMessage::decode(0x7, b"too-short").unwrap_err();
    assert!(matches!(err, Error::MalformedFrame(_)));
}

#[test]
fn function_message_with_unknown_kind_is_rejected() {
    let payload = FunctionId::generate().to_string().into_bytes();
    assert_eq!(FunctionMessage::decode(0x8, &payload), Err(Error::UnknownKind(0x8)));
    assert!(!Error::UnknownKind(0x8).is_fatal());
}

#[test]
fn session_frame_distinguishes_close() {
    let id = FunctionId::generate();
    let close = Request::Close { function_id: id.to_string() }.encode().unwrap();
    let frame = SessionFrame::decode(close[0], &close[HEADER_LEN..]).unwrap();
    assert_eq!(frame, SessionFrame::Close { function_id: id.to_string() });

    let input = FunctionMessage::input(id, "data");
    let bytes = input.encode().unwrap();
    let frame = SessionFrame::decode(bytes[0], &bytes[HEADER_LEN..]).unwrap();
    assert_eq!(frame, SessionFrame::Message(input));

    assert_eq!(SessionFrame::decode(0x0, b"{}"), Err(Error::UnknownKind(0x0)));
}

#[test]
fn function_id_parsing() {
    let id = FunctionId::generate();
    assert_eq!(id.as_str().len(), FUNCTION_ID_LEN);
    assert_eq!(FunctionId::parse(id.as_str()).unwrap(), id);
    assert!(FunctionId::parse("not-a-uuid").is_err());
    assert!(FunctionId::parse(&"z".repeat(FUNCTION_ID_LEN)).is_err());
    assert!(FunctionId::parse("../../../../../../../../../etc/passwd").is_err());
}

// ============================================================================
//  PRODUCER RECORDS
// ============================================================================

#[test]
fn output_record_layout() {
    let bytes = OutputRecord::stderr("boom").encode().unwrap();
    assert_eq!(bytes, [&[0x1, 0, 0, 0, 4][..], b"boom"].concat());

    let header = RecordHeader::decode(&bytes[..RECORD_HEADER_LEN]).unwrap();
    assert_eq!(header.channel, Channel::Stderr);
    assert_eq!(header.framed_len(), bytes.len() as u64);
}

#[test]
fn output_record_with_bad_flag_is_malformed() {
    assert!(matches!(RecordHeader::decode(&[0x2, 0, 0, 0, 0]), Err(Error::MalformedFrame(_))));
}

#[test]
fn output_records_become_messages_by_channel() {
    let id = FunctionId::generate();
    let out = OutputRecord::stdout("hi").into_message(id.clone());
    let err = OutputRecord::stderr("oops").into_message(id.clone());
    assert_eq!(out, FunctionMessage::output(id.clone(), "hi"));
    assert_eq!(err, FunctionMessage::error(id, "oops"));
}

#[test]
fn input_record_layout() {
    let bytes = InputRecord::new("stop").encode().unwrap();
    assert_eq!(bytes, [&[0, 0, 0, 4][..], b"stop"].concat());
    assert_eq!(InputRecord::decode_len(&bytes[..INPUT_HEADER_LEN]).unwrap(), 4);

    let empty = InputRecord::new(Vec::new()).encode().unwrap();
    assert_eq!(empty, [0, 0, 0, 0]);
}

// ============================================================================
//  EXECUTION PAYLOAD
// ============================================================================

#[test]
fn exec_payload_roundtrip() {
    let payload = ExecPayload::new("hello()", "def hello():\n    api.send('hi ✓')\n");
    let encoded = payload.encode().unwrap();
    assert!(!encoded.contains('+') && !encoded.contains('/'));
    assert_eq!(ExecPayload::decode(&encoded).unwrap(), payload);
}

#[test]
fn exec_payload_decodes_spaced_json() {
    // JSON with ", " and ": " separators, padded URL-safe base64
    let encoded = "eyJjYWxsIjogImhlbGxvKCkiLCAiY29kZSI6ICJkZWYgaGVsbG8oKTogYXBpLnNlbmQoJ2hpJykifQ==";
    let payload = ExecPayload::decode(encoded).unwrap();
    assert_eq!(payload, ExecPayload::new("hello()", "def hello(): api.send('hi')"));
}

#[test]
fn exec_payload_rejects_garbage() {
    assert!(matches!(ExecPayload::decode("!!!"), Err(Error::InvalidPayload(_))));
    let not_json = base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE, b"[1, 2]");
    assert!(matches!(ExecPayload::decode(&not_json), Err(Error::InvalidPayload(_))));
}
