#![no_main]

use libfuzzer_sys::fuzz_target;
use message_template::core::codec::MessageCodec;
use message_template::schema::compiler::compile;
use std::sync::{Arc, OnceLock};

const TEMPLATE: &str = r#"
{
    PacketAck Fixed 0xFFFFFFFB NotTrusted Unencoded
    {
        Packets Variable
        {   ID      U32 }
    }
}
{
    UseCircuitCode Low 3 NotTrusted Zerocoded
    {
        CircuitCode Single
        {   Code    U32 }
        {   ID      LLUUID }
    }
}
{
    ChatFromViewer Medium 80 NotTrusted Zerocoded
    {
        ChatData Single
        {   Message Variable 2 }
        {   Type    U8 }
    }
}
{
    StartPingCheck High 1 NotTrusted Unencoded
    {
        PingID Multiple 2
        {   PingID  U8 }
        {   Where   LLVector3 }
    }
}
"#;

fn codec() -> MessageCodec {
    static CODEC: OnceLock<MessageCodec> = OnceLock::new();
    CODEC
        .get_or_init(|| MessageCodec::new(Arc::new(compile(TEMPLATE).expect("template"))))
        .clone()
}

fuzz_target!(|data: &[u8]| {
    let mut codec = codec();
    // Decoding arbitrary bytes must never panic; anything that decodes must re-encode
    if let Ok(datagram) = codec.decode_datagram(data) {
        let _ = codec.encode_datagram(datagram);
    }
});
