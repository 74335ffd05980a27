use bridge_protocol::{Decoded, FrameDecoder, ProtocolError};
use domain::{CompletionEvent, DeviceProfile, Dialect, FieldValue, PatternField, Record};

fn record(decoded: Decoded) -> Record {
    match decoded {
        Decoded::Record(record) => record,
        other => panic!("expected record, got {:?}", other),
    }
}

fn licor_decoder() -> FrameDecoder {
    FrameDecoder::new(&DeviceProfile::licor().dialect).expect("decoder")
}

#[test]
fn pattern_frame_yields_exactly_matched_keys() {
    let decoder = licor_decoder();
    let frame = b"(Data (Seconds 1700000000)(CO2 16.25)(Date 2024-06-15)(DiagVal 8191))";
    let record = record(decoder.decode(frame).expect("decode"));

    let keys: Vec<&str> = record.keys().collect();
    assert_eq!(keys, vec!["CO2", "Date", "DiagVal", "Seconds"]);
    assert_eq!(record.get("CO2"), Some(&FieldValue::Number(16.25)));
    assert_eq!(record.get("Seconds"), Some(&FieldValue::Number(1_700_000_000.0)));
    assert_eq!(
        record.get("Date"),
        Some(&FieldValue::Text("2024-06-15".to_string()))
    );
}

#[test]
fn missing_key_is_never_introduced() {
    let decoder = licor_decoder();
    let record = record(decoder.decode(b"(U 1.5)(W -0.2)").expect("decode"));
    assert!(record.contains_key("U"));
    assert!(record.contains_key("W"));
    assert!(!record.contains_key("V"));
    assert!(!record.contains_key("TS"));
    assert_eq!(record.len(), 2);
}

#[test]
fn unmatched_pattern_frame_is_empty_record() {
    let decoder = licor_decoder();
    let record = record(decoder.decode(b"(Status ok)").expect("decode"));
    assert!(record.is_empty());
}

#[test]
fn custom_value_pattern_restricts_match() {
    let dialect = Dialect::Pattern {
        fields: vec![
            PatternField::with_value_pattern("U", r"[-\d.]+"),
            PatternField::new("Time"),
        ],
        completion: None,
    };
    let decoder = FrameDecoder::new(&dialect).expect("decoder");
    let record = record(decoder.decode(b"(U n/a)(Time 12:00:00)").expect("decode"));
    assert!(!record.contains_key("U"));
    assert_eq!(
        record.get("Time"),
        Some(&FieldValue::Text("12:00:00".to_string()))
    );
}

#[test]
fn delimited_frame_maps_positionally() {
    let decoder = FrameDecoder::new(&DeviceProfile::metek().dialect).expect("decoder");
    let record = record(decoder.decode(b"x;1;2;3;4\r\n").expect("decode"));

    assert_eq!(record.len(), 4);
    assert_eq!(record.get("x"), Some(&FieldValue::Number(1.0)));
    assert_eq!(record.get("y"), Some(&FieldValue::Number(2.0)));
    assert_eq!(record.get("z"), Some(&FieldValue::Number(3.0)));
    assert_eq!(record.get("T"), Some(&FieldValue::Number(4.0)));
}

#[test]
fn delimited_frame_ignores_trailing_fields() {
    let decoder = FrameDecoder::new(&DeviceProfile::metek().dialect).expect("decoder");
    let record = record(decoder.decode(b"M;0.12;-0.40;0.03;21.7;E0\n").expect("decode"));
    assert_eq!(record.len(), 4);
    assert_eq!(record.get("T"), Some(&FieldValue::Number(21.7)));
}

#[test]
fn short_delimited_frame_is_tolerated() {
    let decoder = FrameDecoder::new(&DeviceProfile::metek().dialect).expect("decoder");
    let record = record(decoder.decode(b"x;1;oops").expect("decode"));
    assert_eq!(record.len(), 2);
    assert_eq!(record.get("x"), Some(&FieldValue::Number(1.0)));
    assert_eq!(record.get("y"), Some(&FieldValue::Text("oops".to_string())));
    assert!(!record.contains_key("z"));
}

#[test]
fn completion_marker_yields_event() {
    let decoder = licor_decoder();
    let frame = b"(SmartFlux: complete)(LastFile 2024-06-15T120000)(CO2 1.0)";
    let decoded = decoder.decode(frame).expect("decode");
    assert_eq!(
        decoded,
        Decoded::Completion(CompletionEvent::new("2024-06-15T120000"))
    );
    match decoded {
        Decoded::Completion(event) => assert_eq!(event.year_month(), Some(("2024", "06"))),
        Decoded::Record(_) => unreachable!(),
    }
}

#[test]
fn completion_marker_without_reference_is_decode_error() {
    let decoder = licor_decoder();
    let err = decoder
        .decode(b"SmartFlux: complete")
        .expect_err("missing reference");
    assert!(matches!(err, ProtocolError::Decode(_)));
    assert!(!err.is_fatal());
}

#[test]
fn last_file_without_marker_is_ordinary_record() {
    let decoder = licor_decoder();
    let record = record(
        decoder
            .decode(b"(LastFile 2024-06-15T120000)(CO2 1.0)")
            .expect("decode"),
    );
    assert!(!record.contains_key("LastFile"));
    assert!(record.contains_key("CO2"));
}

#[test]
fn delimited_dialect_ignores_completion_text() {
    let decoder = FrameDecoder::new(&DeviceProfile::metek().dialect).expect("decoder");
    let decoded = decoder
        .decode(b"SmartFlux: complete;(LastFile 2024-06-15T120000)")
        .expect("decode");
    assert!(matches!(decoded, Decoded::Record(_)));
}

#[test]
fn non_utf8_frame_is_decode_error() {
    let decoder = licor_decoder();
    let err = decoder.decode(&[0xff, 0xfe, b'(']).expect_err("invalid");
    assert!(matches!(err, ProtocolError::Decode(_)));
}
