// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

// Example to be used with the autobahn test suite, a fully automated test
// suite to verify client and server implementations of the websocket
// protocol.
//
// Once started, the tests can be executed with: wstest -m fuzzingserver
//
// See https://github.com/crossbario/autobahn-testsuite for details.

use assert_matches::assert_matches;
use std::str::FromStr;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use websock::{connection, handshake, BoxedError, Incoming};

const WEBSOCK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), BoxedError> {
    env_logger::init();
    let n = num_of_cases().await?;
    for i in 1 ..= n {
        if let Err(e) = run_case(i).await {
            log::error!("case {}: {:?}", i, e)
        }
    }
    update_report().await?;
    Ok(())
}

async fn num_of_cases() -> Result<usize, BoxedError> {
    let s = TcpStream::connect("127.0.0.1:9001").await?;
    let mut c = new_client(s.compat(), "/getCaseCount");
    assert_matches!(c.handshake().await?, handshake::ServerResponse::Accepted { .. });
    let (_, mut receiver) = c.into_builder().finish();
    let payload = receiver.receive_data().await?;
    assert!(payload.is_text());
    let num = usize::from_str(std::str::from_utf8(payload.as_ref())?)?;
    log::info!("{} cases to run", num);
    Ok(num)
}

async fn run_case(n: usize) -> Result<(), BoxedError> {
    log::info!("running case {}", n);
    let resource = format!("/runCase?case={}&agent=websock-{}", n, WEBSOCK_VERSION);
    let s = TcpStream::connect("127.0.0.1:9001").await?;
    let mut c = new_client(s.compat(), &resource);
    assert_matches!(c.handshake().await?, handshake::ServerResponse::Accepted { .. });
    let (mut sender, mut receiver) = c.into_builder().finish();
    loop {
        match receiver.receive().await {
            Ok(Incoming::Data(d)) => {
                if d.is_text() {
                    sender.send_text(std::str::from_utf8(d.as_ref())?).await?
                } else {
                    sender.send_binary(d.as_ref()).await?
                }
                sender.flush().await?
            }
            Ok(Incoming::Closed(_)) | Err(connection::Error::Closed) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(e.into())
        }
    }
}

async fn update_report() -> Result<(), BoxedError> {
    log::info!("requesting report generation");
    let resource = format!("/updateReports?agent=websock-{}", WEBSOCK_VERSION);
    let s = TcpStream::connect("127.0.0.1:9001").await?;
    let mut c = new_client(s.compat(), &resource);
    assert_matches!(c.handshake().await?, handshake::ServerResponse::Accepted { .. });
    let (mut sender, _) = c.into_builder().finish();
    sender.close().await?;
    Ok(())
}

#[cfg(not(feature = "deflate"))]
fn new_client(socket: Compat<TcpStream>, path: &str) -> handshake::Client<'_, Compat<TcpStream>> {
    handshake::Client::new(socket, "127.0.0.1:9001", path)
}

#[cfg(feature = "deflate")]
fn new_client(socket: Compat<TcpStream>, path: &str) -> handshake::Client<'_, Compat<TcpStream>> {
    let mut client = handshake::Client::new(socket, "127.0.0.1:9001", path);
    let deflate = websock::extension::deflate::Deflate::new(websock::Mode::Client);
    client.add_extension(Box::new(deflate));
    client
}
