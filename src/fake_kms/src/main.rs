// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::net::TcpListener;
use std::sync::Arc;

use nix::sys::signal::{self, SigHandler, Signal};

use fake_kms::{server, FakeKms};

#[derive(Debug)]
enum Error {
    Bind(std::io::Error),
    Banner(std::io::Error),
    Signal(nix::Error),
}

impl From<Error> for i32 {
    fn from(_other: Error) -> i32 {
        1
    }
}

extern "C" fn handle_sigint(_signo: nix::libc::c_int) {
    // The store is all in memory; there is nothing to flush.
    std::process::exit(0);
}

/// Parameters:
///   fake-kms [port]
///
/// Binds 127.0.0.1 on the given port (an ephemeral one by default), writes
/// exactly one `host:port` line to stdout, then serves until SIGINT.
fn run() -> Result<(), Error> {
    let port = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<u16>().ok())
        .unwrap_or(0);

    unsafe { signal::signal(Signal::SIGINT, SigHandler::Handler(handle_sigint)) }
        .map_err(Error::Signal)?;

    let listener = TcpListener::bind(("127.0.0.1", port)).map_err(Error::Bind)?;
    let addr = listener.local_addr().map_err(Error::Bind)?;

    // The parent reads this single line to learn the listen address; it
    // must hit the pipe before the first client connects.
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", addr).map_err(Error::Banner)?;
    stdout.flush().map_err(Error::Banner)?;

    server::serve(Arc::new(FakeKms::new()), listener);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("fake-kms: {:?}", e);
        std::process::exit(i32::from(e));
    }
}
