// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

// An embedded listener serving a websocket echo endpoint at /echo/ and a
// plain HTTP page everywhere else. Also usable as a target for the
// autobahn fuzzing client (wstest -m fuzzingclient).

use std::sync::Arc;
use websock::data::Data;
use websock::handler::{BehaviorHost, HttpHandler, Session};
use websock::http::{Request, Response};
use websock::listener::{Listener, PrefixOptions};
use websock::BoxedError;

struct Echo;

impl BehaviorHost for Echo {
    fn on_open(&self, session: &Session) {
        log::info!("{}: session open on {}", session.remote_addr(), session.path())
    }

    fn on_message(&self, session: &Session, message: Data) {
        let result = match message {
            Data::Text(t) => session.send_text(String::from_utf8_lossy(&t).into_owned()),
            Data::Binary(b) => session.send_binary(b.to_vec())
        };
        if let Err(e) = result {
            log::warn!("{}: echo failed: {}", session.remote_addr(), e)
        }
    }

    fn on_close(&self, session: &Session, code: u16, reason: Option<&str>) {
        log::info!("{}: closed ({}, {:?})", session.remote_addr(), code, reason)
    }
}

struct Index;

impl HttpHandler for Index {
    fn handle(&self, request: &Request) -> Response {
        log::info!("{} {}", request.method(), request.path());
        Response::text(200, "websocket echo lives at /echo/\n")
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxedError> {
    env_logger::init();

    let listener = Arc::new(Listener::new());
    let echo: Arc<dyn BehaviorHost> = Arc::new(Echo);
    let index: Arc<dyn HttpHandler> = Arc::new(Index);

    listener
        .add_prefix("ws://127.0.0.1:9001/echo/", PrefixOptions::new().with_behavior(&echo))
        .await?;
    listener
        .add_prefix("http://127.0.0.1:9001/", PrefixOptions::new().with_http(&index))
        .await?;

    let addrs = listener.start().await?;
    log::info!("listening on {:?}", addrs);

    futures::future::pending::<()>().await;
    Ok(())
}
