// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::io::{BufRead, BufReader, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::api::{KmsRequest, KmsResponse};

#[derive(Debug)]
pub enum Error {
    BadUrl,
    IoError(std::io::Error),
    MsgLen,
    ParseError,
    SerdeError(serde_json::error::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// RPC transport trait. Implementors will have to provide the methods for
/// sending / receiving requests and responses. The implementation will
/// likely wrap an underlying stream (i.e. Read + Write), and handle
/// message / datagram traffic.
pub trait Transport {
    /// Receive an RPC request.
    fn recv_request(&mut self) -> Result<KmsRequest>;
    /// Send an RPC request.
    fn send_request(&mut self, req: &KmsRequest) -> Result<()>;
    /// Receive an RPC response.
    fn recv_response(&mut self) -> Result<KmsResponse>;
    /// Send an RPC response.
    fn send_response(&mut self, resp: &KmsResponse) -> Result<()>;
}

/// RPC transport implementation via a super-simple subset of HTTP.
///
/// Requests and responses are serialized as HTTP messages, with JSON bodies.
/// They always travel the underlying stream sequentially (i.e. once a
/// request is sent, the caller must always read its corresponding response
/// before submitting a new request).
///
/// All API-related information is exchanged via the message (JSON) body.
/// I.e. HTTP handling stops at the transport layer, so methods, URLs and
/// status codes do not change across RPC messages:
/// - the method is always POST;
/// - the URL is always `self.url`;
/// - the response status is always "200 OK".
pub struct HttpTransport<S: Read + Write> {
    /// The (connected) data stream between caller and callee.
    stream: S,
    /// The HTTP URL that the RPC server responds to. This can be used to
    /// versionize the API (e.g. /kms/v1).
    url: &'static str,
}

/// The HTTP headers our RPC transport is interested in.
struct HttpHeaders {
    content_length: usize,
}

impl<S: Read + Write> HttpTransport<S> {
    /// Maximum size (in bytes) of an HTTP message headers section.
    const MAX_HDR_LEN: usize = 1024;
    /// Maximum size (in bytes) of an HTTP message body. Large enough for a
    /// full key-ring listing or a 4096-bit RSA exchange with JSON overhead.
    const MAX_BODY_LEN: usize = 1024 * 1024;

    pub const DEFAULT_URL: &'static str = "/kms/v1";

    pub fn new(stream: S, url: &'static str) -> Self {
        Self { stream, url }
    }

    /// Read / parse the HTTP headers (that we recognize) from the provided
    /// buffered reader.
    fn read_headers<R: BufRead>(reader: &mut R) -> Result<HttpHeaders> {
        let mut content_length = None;

        loop {
            let mut ln = String::new();
            reader.read_line(&mut ln).map_err(Error::IoError)?;
            let ln = ln.as_str().trim();

            if ln.is_empty() {
                break;
            }

            let mut iter = ln.split(": ");
            match (iter.next(), iter.next()) {
                (Some("Content-Length"), Some(len)) => {
                    let len = len.parse::<usize>().map_err(|_| Error::ParseError)?;
                    content_length = Some(len);
                }
                (Some("Content-Type"), Some("application/json")) => (),
                _ => return Err(Error::ParseError),
            }
        }

        match content_length {
            Some(content_length) => {
                if content_length > Self::MAX_BODY_LEN {
                    return Err(Error::MsgLen);
                }
                Ok(HttpHeaders { content_length })
            }
            _ => Err(Error::ParseError),
        }
    }

    /// Read one message (start line + headers + JSON body), handing the
    /// start line to `check_start` for validation.
    fn recv_msg<T, F>(&mut self, check_start: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce(&str) -> Result<()>,
    {
        // Read::take() limits how much a misbehaving peer can feed us, and,
        // since &mut S is itself Read, the BufReader can borrow the stream
        // for exactly one message.
        let mut reader = BufReader::new((&mut self.stream).take(Self::MAX_HDR_LEN as u64));
        let mut ln = String::new();
        reader.read_line(&mut ln).map_err(Error::IoError)?;
        check_start(ln.as_str().trim())?;

        let headers = Self::read_headers(&mut reader)?;
        reader.get_mut().set_limit(headers.content_length as u64);
        let mut buf = vec![0u8; headers.content_length];
        reader
            .read_exact(buf.as_mut_slice())
            .map_err(Error::IoError)?;
        serde_json::from_slice(buf.as_slice()).map_err(Error::SerdeError)
    }

    fn send_msg<T: Serialize>(&mut self, start_line: &str, msg: &T) -> Result<()> {
        let body = serde_json::to_vec(msg).map_err(Error::SerdeError)?;
        self.stream
            .write_all(
                format!(
                    "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                    start_line,
                    body.len()
                )
                .as_bytes(),
            )
            .map_err(Error::IoError)?;
        self.stream
            .write_all(body.as_slice())
            .map_err(Error::IoError)?;
        self.stream.flush().map_err(Error::IoError)
    }
}

impl<S: Read + Write> Transport for HttpTransport<S> {
    fn recv_request(&mut self) -> Result<KmsRequest> {
        let url = self.url;
        self.recv_msg(|start| {
            let mut iter = start.split_whitespace();
            match (iter.next(), iter.next(), iter.next()) {
                (Some("POST"), Some(got_url), Some("HTTP/1.1")) => {
                    if got_url != url {
                        return Err(Error::BadUrl);
                    }
                    Ok(())
                }
                _ => Err(Error::ParseError),
            }
        })
    }

    fn send_request(&mut self, request: &KmsRequest) -> Result<()> {
        let start = format!("POST {} HTTP/1.1", self.url);
        self.send_msg(start.as_str(), request)
    }

    fn recv_response(&mut self) -> Result<KmsResponse> {
        self.recv_msg(|start| {
            let mut iter = start.split_whitespace();
            match (iter.next(), iter.next()) {
                (Some("200"), Some("OK")) => Ok(()),
                _ => Err(Error::ParseError),
            }
        })
    }

    fn send_response(&mut self, response: &KmsResponse) -> Result<()> {
        self.send_msg("200 OK", response)
    }
}
