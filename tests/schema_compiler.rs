#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Template compiler integration tests
//! Realistic templates, id rules and error reporting

use message_template::error::ProtocolError;
use message_template::schema::compiler::{compile, compile_file};
use message_template::schema::{FieldType, Frequency, Repetition};
use std::io::Write;

const TEMPLATE: &str = r#"
// message template excerpt
version 2.0

{
    StartPingCheck High 1 NotTrusted Unencoded
    {
        PingID Single
        {   PingID          U8  }
        {   OldestUnacked   U32 }
    }
}

{
    ObjectUpdateCompressed High 0xFE Trusted Unencoded
    {
        RegionData Single
        {   RegionHandle    U64 }
        {   TimeDilation    U16 }
    }
    {
        ObjectData Variable
        {   UpdateFlags     U32 }
        {   Data            Variable 2 }
    }
}

{
    AgentAnimation High 5 NotTrusted Unencoded
    {
        AgentData Single
        {   AgentID         LLUUID }
        {   SessionID       LLUUID }
    }
    {
        AnimationList Variable
        {   AnimID          LLUUID }
        {   StartAnim       BOOL }
    }
}

{
    CoarseLocationUpdate Medium 6 Trusted Unencoded
    {
        Location Multiple 4
        {   X   U8 }
        {   Y   U8 }
        {   Z   U8 }
    }
}

{
    TeleportRequest Low 62 NotTrusted Unencoded
    {
        Info Single
        {   Position        LLVector3 }
        {   LookAt          LLVector3 }
        {   Rotation        LLQuaternion }
        {   SimIP           IPADDR }
        {   SimPort         IPPORT }
        {   Hash            Fixed 16 }
    }
}

{
    PacketAck Fixed 0xFFFFFFFB NotTrusted Unencoded
    {
        Packets Variable
        {   ID  U32 }
    }
}
"#;

// ============================================================================
// CATALOGUE CONTENTS
// ============================================================================

#[test]
fn test_compile_realistic_template() {
    let catalogue = compile(TEMPLATE).unwrap();
    assert_eq!(catalogue.len(), 6);

    let ping = catalogue.lookup(Frequency::High, 1).unwrap();
    assert_eq!(ping.name, "StartPingCheck");
    assert!(!ping.trusted);
    assert_eq!(ping.blocks[0].fields[1].field_type, FieldType::U32);

    let update = catalogue.by_name("ObjectUpdateCompressed").unwrap();
    assert_eq!(update.id, 0xFE);
    assert_eq!(update.blocks[1].repetition, Repetition::Variable);
    assert_eq!(update.blocks[1].fields[1].count, 2);

    let coarse = catalogue.lookup(Frequency::Medium, 6).unwrap();
    assert_eq!(coarse.blocks[0].repetition, Repetition::Multiple(4));
}

#[test]
fn test_ll_prefixed_and_bare_types() {
    let catalogue = compile(TEMPLATE).unwrap();
    let teleport = catalogue.by_name("TeleportRequest").unwrap();
    let types: Vec<FieldType> = teleport.blocks[0]
        .fields
        .iter()
        .map(|f| f.field_type)
        .collect();
    assert_eq!(
        types,
        vec![
            FieldType::Vector3,
            FieldType::Vector3,
            FieldType::Quaternion,
            FieldType::IpAddr,
            FieldType::IpPort,
            FieldType::Fixed,
        ]
    );
    assert_eq!(teleport.blocks[0].fields[5].count, 16);
}

#[test]
fn test_fixed_packet_resolves_through_low_table() {
    let catalogue = compile(TEMPLATE).unwrap();
    let ack = catalogue.by_name("PacketAck").unwrap();
    assert_eq!(ack.frequency, Frequency::Fixed);
    assert_eq!(ack.id, 0xFFFB);
    assert_eq!(ack.wire_key(), (Frequency::Low, 0xFFFB));
    assert_eq!(catalogue.lookup(Frequency::Low, 0xFFFB).unwrap().name, "PacketAck");
}

#[test]
fn test_frequencies_are_separate_namespaces() {
    let catalogue = compile(TEMPLATE).unwrap();
    assert!(catalogue.lookup(Frequency::Medium, 1).is_none());
    assert!(catalogue.lookup(Frequency::Low, 1).is_none());
    assert!(matches!(
        catalogue.require(Frequency::Low, 1),
        Err(ProtocolError::UnknownPacket {
            frequency: Frequency::Low,
            id: 1
        })
    ));
}

#[test]
fn test_catalogue_preserves_declaration_order() {
    let catalogue = compile(TEMPLATE).unwrap();
    let names: Vec<&str> = catalogue.packets().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "StartPingCheck",
            "ObjectUpdateCompressed",
            "AgentAnimation",
            "CoarseLocationUpdate",
            "TeleportRequest",
            "PacketAck",
        ]
    );
}

// ============================================================================
// ID RULES
// ============================================================================

fn single_packet(header: &str) -> String {
    format!("{{\n    {header}\n    {{\n        Data Single\n        {{ Value U8 }}\n    }}\n}}\n")
}

#[test]
fn test_high_id_ff_rejected() {
    let err = compile(&single_packet("Bad High 255 NotTrusted Unencoded")).unwrap_err();
    assert!(matches!(err, ProtocolError::SchemaCompile { line: 2, .. }));
}

#[test]
fn test_medium_id_ff_rejected() {
    assert!(compile(&single_packet("Bad Medium 0xFF NotTrusted Unencoded")).is_err());
}

#[test]
fn test_low_id_over_u16_rejected() {
    assert!(compile(&single_packet("Bad Low 70000 NotTrusted Unencoded")).is_err());
    assert!(compile(&single_packet("Good Low 65535 NotTrusted Unencoded")).is_ok());
}

#[test]
fn test_same_id_in_different_frequencies_allowed() {
    let text = format!(
        "{}{}",
        single_packet("One High 7 NotTrusted Unencoded"),
        single_packet("Two Low 7 NotTrusted Unencoded")
    );
    let catalogue = compile(&text).unwrap();
    assert_eq!(catalogue.lookup(Frequency::High, 7).unwrap().name, "One");
    assert_eq!(catalogue.lookup(Frequency::Low, 7).unwrap().name, "Two");
}

#[test]
fn test_fixed_collides_with_low() {
    let text = format!(
        "{}{}",
        single_packet("Ack Fixed 0xFFFFFFFB NotTrusted Unencoded"),
        single_packet("Clash Low 0xFFFB NotTrusted Unencoded")
    );
    match compile(&text) {
        Err(ProtocolError::SchemaCompile { line, reason }) => {
            assert_eq!(line, 9);
            assert!(reason.contains("Ack"));
        }
        other => panic!("expected SchemaCompile, got {other:?}"),
    }
}

#[test]
fn test_duplicate_name_rejected() {
    let text = format!(
        "{}{}",
        single_packet("Twice High 1 NotTrusted Unencoded"),
        single_packet("Twice High 2 NotTrusted Unencoded")
    );
    match compile(&text) {
        Err(ProtocolError::SchemaCompile { line, reason }) => {
            assert_eq!(line, 9);
            assert!(reason.contains("Twice"));
        }
        other => panic!("expected SchemaCompile, got {other:?}"),
    }
}

#[test]
fn test_catalogue_errors_carry_packet_line() {
    let text = format!(
        "{}{}{}",
        single_packet("First Low 1 NotTrusted Unencoded"),
        single_packet("Second Low 2 NotTrusted Unencoded"),
        single_packet("Zero Low 0 NotTrusted Unencoded")
    );
    match compile(&text) {
        Err(ProtocolError::SchemaCompile { line, reason }) => {
            assert_eq!(line, 16);
            assert!(reason.contains("Zero"));
        }
        other => panic!("expected SchemaCompile, got {other:?}"),
    }
}

#[test]
fn test_fixed_wrapping_to_low_zero_rejected() {
    let err = compile(&single_packet("Wrapped Fixed 0xFFFF0000 NotTrusted Unencoded")).unwrap_err();
    assert!(matches!(err, ProtocolError::SchemaCompile { line: 2, .. }));
}

#[test]
fn test_trust_and_encoding_tokens() {
    let catalogue = compile(&single_packet("A High 1 Trusted Zerocoded")).unwrap();
    let a = catalogue.by_name("A").unwrap();
    assert!(a.trusted);
    assert!(a.zerocoded);

    assert!(compile(&single_packet("B High 1 Maybe Unencoded")).is_err());
    assert!(compile(&single_packet("C High 1 Trusted Compressed")).is_err());
}

// ============================================================================
// FILES
// ============================================================================

#[test]
fn test_compile_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(TEMPLATE.as_bytes()).unwrap();
    let catalogue = compile_file(file.path()).unwrap();
    assert_eq!(catalogue.len(), 6);
}

#[test]
fn test_compile_missing_file() {
    assert!(matches!(
        compile_file("/nonexistent/message_template.msg"),
        Err(ProtocolError::SchemaCompile { line: 0, .. })
    ));
}

#[test]
fn test_empty_template_compiles_to_empty_catalogue() {
    let catalogue = compile("// nothing here\n\n").unwrap();
    assert!(catalogue.is_empty());
}
