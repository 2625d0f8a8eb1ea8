use std::net::TcpStream;
use std::sync::Mutex;

use super::api::{
    AsymmetricDecryptRequest, AsymmetricDecryptResponse, AsymmetricSignRequest,
    AsymmetricSignResponse, CryptoKey, CryptoKeyVersion, Error, KmsClient, KmsRequest,
    KmsResponse, PublicKey, Result,
};
use super::transport::{self, HttpTransport, Transport};

/// Blocking KMS client over a single TCP connection.
///
/// The transport is strictly sequential (one request, then its response),
/// so the connection is guarded by a mutex; concurrent callers serialize.
pub struct HttpKmsClient {
    transport: Mutex<HttpTransport<TcpStream>>,
}

impl HttpKmsClient {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| Error::Transport(transport::Error::IoError(e)))?;
        Ok(Self {
            transport: Mutex::new(HttpTransport::new(
                stream,
                HttpTransport::<TcpStream>::DEFAULT_URL,
            )),
        })
    }

    /// Issue one raw request / response exchange. Exposed so test harnesses
    /// can drive the fake-KMS admin endpoints the `KmsClient` facade does
    /// not cover.
    pub fn call(&self, req: &KmsRequest) -> Result<KmsResponse> {
        let mut xport = self.transport.lock().unwrap();
        xport.send_request(req).map_err(Error::Transport)?;
        xport.recv_response().map_err(Error::Transport)
    }
}

macro_rules! unwrap_response {
    ($resp:expr, $variant:ident) => {
        match $resp {
            KmsResponse::$variant(Ok(val)) => Ok(val),
            KmsResponse::$variant(Err(e)) => Err(Error::Rpc(e)),
            _ => Err(Error::ResponseMismatch),
        }
    };
}

impl KmsClient for HttpKmsClient {
    fn list_crypto_keys(&self, parent: &str) -> Result<Vec<CryptoKey>> {
        let resp = self.call(&KmsRequest::ListCryptoKeys {
            parent: parent.to_string(),
        })?;
        unwrap_response!(resp, ListCryptoKeys)
    }

    fn list_crypto_key_versions(&self, parent: &str) -> Result<Vec<CryptoKeyVersion>> {
        let resp = self.call(&KmsRequest::ListCryptoKeyVersions {
            parent: parent.to_string(),
        })?;
        unwrap_response!(resp, ListCryptoKeyVersions)
    }

    fn get_public_key(&self, name: &str) -> Result<PublicKey> {
        let resp = self.call(&KmsRequest::GetPublicKey {
            name: name.to_string(),
        })?;
        unwrap_response!(resp, GetPublicKey)
    }

    fn asymmetric_sign(&self, req: AsymmetricSignRequest) -> Result<AsymmetricSignResponse> {
        let resp = self.call(&KmsRequest::AsymmetricSign(req))?;
        unwrap_response!(resp, AsymmetricSign)
    }

    fn asymmetric_decrypt(
        &self,
        req: AsymmetricDecryptRequest,
    ) -> Result<AsymmetricDecryptResponse> {
        let resp = self.call(&KmsRequest::AsymmetricDecrypt(req))?;
        unwrap_response!(resp, AsymmetricDecrypt)
    }
}
