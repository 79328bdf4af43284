#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, RecordType};
use madns::synthesizer::synthesize;
use madns::{encode_message, get_response_message};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, UdpSocket};

pub const UPSTREAM_ANSWER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 53);

pub fn query(id: u16, qname: &str) -> Message {
    let mut request = Message::new();
    request
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    request.add_query(Query::query(
        Name::from_str(qname).expect("valid name"),
        RecordType::A,
    ));
    request
}

pub fn a_answers(message: &Message) -> Vec<Ipv4Addr> {
    message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            RData::A(A(address)) => Some(*address),
            _ => None,
        })
        .collect()
}

fn upstream_response(raw: &[u8]) -> Vec<u8> {
    let request = Message::from_vec(raw).expect("valid request");
    let mut response = get_response_message(&request, ResponseCode::NoError);
    for query in request.queries() {
        response.add_answer(synthesize(query.name(), &UPSTREAM_ANSWER.to_string()).expect("A record"));
    }
    encode_message(&response, true).expect("encodable response")
}

/// Answers every UDP query with `UPSTREAM_ANSWER`
pub async fn spawn_udp_upstream() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    let addr = socket.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut buf = vec![0; 4096];
        loop {
            let (len, from) = socket.recv_from(&mut buf).await.expect("recv");
            let response = upstream_response(&buf[..len]);
            socket.send_to(&response, from).await.expect("send");
        }
    });
    addr
}

/// Answers every TCP query with `UPSTREAM_ANSWER`
pub async fn spawn_tcp_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.expect("accept");
            tokio::spawn(async move {
                let length = stream.read_u16().await.expect("length") as usize;
                let mut raw = vec![0; length];
                stream.read_exact(&mut raw).await.expect("query");

                let response = upstream_response(&raw);
                stream
                    .write_all(&(response.len() as u16).to_be_bytes())
                    .await
                    .expect("length");
                stream.write_all(&response).await.expect("response");
            });
        }
    });
    addr
}

/// A UDP socket that never answers
pub async fn spawn_silent_upstream() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    let addr = socket.local_addr().expect("local addr");
    (socket, addr)
}
