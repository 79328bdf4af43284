use std::fmt::Write as _;

use anyhow::Context;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::serialize::binary::{BinEncodable as _, BinEncoder};

use crate::MAX_STANDARD_DNS_MSG_SIZE;

/// Creates an empty reply to `request`, copying its id, opcode, RD/CD bits and questions
pub fn get_response_message(request: &Message, response_code: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_checking_disabled(request.checking_disabled())
        .set_recursion_available(true)
        .set_response_code(response_code);
    response.add_queries(request.queries().iter().cloned());
    response
}

/// Encodes a message to wire format.
///
/// Name compression is only applied when `compress` is set, otherwise every
/// name is written out in full.
pub fn encode_message(message: &Message, compress: bool) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(MAX_STANDARD_DNS_MSG_SIZE);
    let mut encoder = BinEncoder::new(&mut buf);
    encoder.set_canonical_names(!compress);
    message
        .emit(&mut encoder)
        .context("error while encoding the DNS message")?;

    Ok(buf)
}

/// Human-readable dump of a message, used in notification bodies
pub fn render_message(message: &Message) -> String {
    let mut out = String::new();

    // Writing into a String can't fail
    let _ = writeln!(
        out,
        ";; opcode: {:?}, status: {:?}, id: {}",
        message.op_code(),
        message.response_code(),
        message.id()
    );

    let mut flags = Vec::new();
    if message.message_type() == MessageType::Response {
        flags.push("qr");
    }
    if message.authoritative() {
        flags.push("aa");
    }
    if message.truncated() {
        flags.push("tc");
    }
    if message.recursion_desired() {
        flags.push("rd");
    }
    if message.recursion_available() {
        flags.push("ra");
    }
    if message.checking_disabled() {
        flags.push("cd");
    }
    let _ = writeln!(
        out,
        ";; flags: {}; QUERY: {}, ANSWER: {}, AUTHORITY: {}, ADDITIONAL: {}",
        flags.join(" "),
        message.queries().len(),
        message.answers().len(),
        message.name_servers().len(),
        message.additionals().len()
    );

    if let Some(edns) = message.extensions() {
        let _ = writeln!(out, "\n;; OPT PSEUDOSECTION:");
        let _ = writeln!(
            out,
            "; EDNS: version {}; udp: {}",
            edns.version(),
            edns.max_payload()
        );
    }

    let _ = writeln!(out, "\n;; QUESTION SECTION:");
    for query in message.queries() {
        let _ = writeln!(
            out,
            ";{}\t{}\t{}",
            query.name(),
            query.query_class(),
            query.query_type()
        );
    }

    for (section, records) in [
        ("ANSWER", message.answers()),
        ("AUTHORITY", message.name_servers()),
        ("ADDITIONAL", message.additionals()),
    ] {
        if records.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n;; {} SECTION:", section);
        for record in records {
            let _ = writeln!(out, "{}", record);
        }
    }

    out
}
