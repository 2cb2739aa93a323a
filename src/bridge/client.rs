//! Request/response client for the Bio-Formats bridge.
//!
//! The client turns high-level calls into wire requests, sends each one over
//! its own connection and applies the timeout policy of the operation:
//! metadata queries are cheap and get a short idle window, conversions decode
//! whole files and get a long one.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, error};

use crate::config::BridgeConfig;
use crate::error::BridgeError;

use super::codec::{
    self, BridgeCompression, BridgeRequest, BridgeResponse, ConvertRequest, PropertiesRequest,
};
use super::transport::{SocketTransport, Transport};

/// Parameters of a `convert` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertOptions {
    /// Merge all series and resolutions into a flat plane list
    pub flatten: bool,
    pub compression: BridgeCompression,
    pub n_pyramid_resolutions: u32,
    pub pyramid_scale_factor: u32,
    pub tile_size: Option<u32>,
    pub apply_luts: bool,

    /// Return error-flagged responses instead of raising
    /// [`BridgeError::Operation`].
    pub silent_fail: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            flatten: true,
            compression: BridgeCompression::Lzw,
            n_pyramid_resolutions: 1,
            pyramid_scale_factor: 1,
            tile_size: None,
            apply_luts: false,
            silent_fail: false,
        }
    }
}

/// Timeouts applied by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub metadata: Duration,
    pub conversion: Duration,
}

impl From<&BridgeConfig> for Timeouts {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            metadata: config.metadata_timeout(),
            conversion: config.conversion_timeout(),
        }
    }
}

/// Client for the bridge's `properties` and `convert` actions.
///
/// Holds configuration only; every call opens a fresh connection.
pub struct BridgeClient<T: Transport = SocketTransport> {
    transport: T,
    timeouts: Timeouts,
}

impl BridgeClient<SocketTransport> {
    /// Create a socket client from configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            SocketTransport::new(config.host.clone(), config.port),
            Timeouts::from(config),
        )
    }
}

impl<T: Transport> BridgeClient<T> {
    pub fn new(transport: T, timeouts: Timeouts) -> Self {
        Self {
            transport,
            timeouts,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Ask for the metadata of `path`.
    ///
    /// With `include_raw` the bridge also returns the format's original
    /// key/value pairs.
    pub fn query_properties(
        &self,
        path: &Path,
        include_raw: bool,
    ) -> Result<BridgeResponse, BridgeError> {
        let request = BridgeRequest::Properties(PropertiesRequest::new(
            path.to_string_lossy(),
            include_raw,
        ));
        self.call(&request, self.timeouts.metadata, false)
    }

    /// Ask the bridge to convert `path` and write the result to `output`.
    pub fn convert(
        &self,
        path: &Path,
        output: &Path,
        options: &ConvertOptions,
    ) -> Result<BridgeResponse, BridgeError> {
        let request = BridgeRequest::Convert(ConvertRequest {
            path: path.to_string_lossy().into_owned(),
            output: output.to_string_lossy().into_owned(),
            legacy_mode: false,
            only_biggest_serie: true,
            flatten: options.flatten,
            compression: options.compression,
            keep_original_metadata: false,
            group: true,
            n_pyramid_resolutions: options.n_pyramid_resolutions,
            pyramid_scale_factor: options.pyramid_scale_factor,
            tile_size: options.tile_size,
            apply_luts: options.apply_luts,
        });
        self.call(&request, self.timeouts.conversion, options.silent_fail)
    }

    fn call(
        &self,
        request: &BridgeRequest,
        idle_timeout: Duration,
        silent_fail: bool,
    ) -> Result<BridgeResponse, BridgeError> {
        let payload = codec::encode(request)?;
        debug!(
            address = %self.transport.address(),
            action = action_name(request),
            bytes = payload.len(),
            "Sending Bio-Formats request"
        );

        let bytes = match self
            .transport
            .send(&payload, self.timeouts.connect, idle_timeout)
        {
            Ok(bytes) => bytes,
            Err(e) => {
                match &e {
                    BridgeError::Timeout { timeout, .. } => error!(
                        "Timeout error ({}s) while waiting Bio-Formats response (request: {})",
                        timeout.as_secs_f64(),
                        action_name(request)
                    ),
                    _ => error!(
                        "Connection to Bio-Formats ({}) has failed or has been interrupted: {}",
                        self.transport.address(),
                        e
                    ),
                }
                return Err(e);
            }
        };

        let response = codec::decode(&bytes)?;
        debug!(
            action = action_name(request),
            bytes = bytes.len(),
            keys = response.len(),
            "Received Bio-Formats response"
        );

        if !silent_fail {
            if let Some(error) = response.error() {
                return Err(BridgeError::Operation {
                    error: error.clone(),
                });
            }
        }
        Ok(response)
    }
}

fn action_name(request: &BridgeRequest) -> &'static str {
    match request {
        BridgeRequest::Properties(_) => "properties",
        BridgeRequest::Convert(_) => "convert",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Transport that replays a canned reply and records what it was sent.
    struct ScriptedTransport {
        reply: Result<Vec<u8>, BridgeError>,
        calls: AtomicUsize,
        last: Mutex<Option<(Vec<u8>, Duration, Duration)>>,
    }

    impl ScriptedTransport {
        fn replying(body: Value) -> Self {
            Self::with(Ok(serde_json::to_vec(&body).unwrap()))
        }

        fn with(reply: Result<Vec<u8>, BridgeError>) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }

        fn sent_json(&self) -> Value {
            let last = self.last.lock().unwrap();
            serde_json::from_slice(&last.as_ref().unwrap().0).unwrap()
        }

        fn sent_timeouts(&self) -> (Duration, Duration) {
            let last = self.last.lock().unwrap();
            let (_, connect, idle) = last.as_ref().unwrap();
            (*connect, *idle)
        }
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            payload: &[u8],
            connect_timeout: Duration,
            idle_timeout: Duration,
        ) -> Result<Vec<u8>, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some((payload.to_vec(), connect_timeout, idle_timeout));
            self.reply.clone()
        }

        fn address(&self) -> String {
            "scripted:0".to_string()
        }
    }

    fn client(transport: ScriptedTransport) -> BridgeClient<ScriptedTransport> {
        BridgeClient::new(transport, Timeouts::from(&BridgeConfig::default()))
    }

    #[test]
    fn test_query_properties_request() {
        let client = client(ScriptedTransport::replying(json!({
            "Bioformats.Pixels.SizeX": 672
        })));

        let response = client
            .query_properties(Path::new("/data/slide.czi"), true)
            .unwrap();
        assert_eq!(response.get("Bioformats.Pixels.SizeX"), Some(&json!(672)));

        let sent = client.transport().sent_json();
        assert_eq!(sent["action"], "properties");
        assert_eq!(sent["includeRawProperties"], true);
        assert_eq!(sent["path"], "/data/slide.czi");
        assert_eq!(
            client.transport().sent_timeouts(),
            (Duration::from_secs(1), Duration::from_secs(15))
        );
    }

    #[test]
    fn test_convert_uses_conversion_timeout() {
        let client = client(ScriptedTransport::replying(json!({"file": "/out.tif"})));
        let options = ConvertOptions {
            tile_size: Some(256),
            ..ConvertOptions::default()
        };

        let response = client
            .convert(Path::new("/in.lif"), Path::new("/out.tif"), &options)
            .unwrap();
        assert_eq!(response.file(), Some("/out.tif"));

        let sent = client.transport().sent_json();
        assert_eq!(sent["action"], "convert");
        assert_eq!(sent["flatten"], true);
        assert_eq!(sent["compression"], "LZW");
        assert_eq!(sent["tileSize"], 256);
        assert_eq!(sent["onlyBiggestSerie"], true);
        assert_eq!(sent["group"], true);
        assert_eq!(client.transport().sent_timeouts().1, Duration::from_secs(12_000));
    }

    #[test]
    fn test_error_key_raises_without_silent_fail() {
        let client = client(ScriptedTransport::replying(json!({"error": "Unknown format"})));

        let err = client
            .query_properties(Path::new("/data/broken.czi"), false)
            .unwrap_err();
        match err {
            BridgeError::Operation { error } => assert_eq!(error, json!("Unknown format")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_key_returned_with_silent_fail() {
        let client = client(ScriptedTransport::replying(json!({"error": "Out of memory"})));
        let options = ConvertOptions {
            silent_fail: true,
            ..ConvertOptions::default()
        };

        let response = client
            .convert(Path::new("/in.nd2"), Path::new("/out.tif"), &options)
            .unwrap();
        assert!(codec::has_error(&response));
        assert_eq!(response.file(), None);
    }

    #[test]
    fn test_transport_errors_always_raise() {
        let timeout = BridgeError::Timeout {
            address: "scripted:0".to_string(),
            timeout: Duration::from_secs(15),
        };
        let client = client(ScriptedTransport::with(Err(timeout)));
        let options = ConvertOptions {
            silent_fail: true,
            ..ConvertOptions::default()
        };

        let err = client
            .convert(Path::new("/in.nd2"), Path::new("/out.tif"), &options)
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(client.transport().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_response() {
        let client = client(ScriptedTransport::with(Ok(b"not json".to_vec())));
        assert!(matches!(
            client.query_properties(Path::new("/a.czi"), false),
            Err(BridgeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_from_config_with_unvalidated_timeouts() {
        let config = BridgeConfig {
            connect_timeout: -2.0,
            metadata_timeout: f64::NAN,
            ..BridgeConfig::default()
        };
        let client = BridgeClient::from_config(&config);
        let defaults = Timeouts::from(&BridgeConfig::default());
        assert_eq!(client.timeouts().connect, defaults.connect);
        assert_eq!(client.timeouts().metadata, defaults.metadata);
    }
}
