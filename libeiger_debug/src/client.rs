use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::config::Config;
use super::error::ClientError;
use super::state::DetectorState;

const VALID_TRIGGER_MODES: [&str; 6] = ["expo", "extt", "extm", "exte", "exts", "ints"];

/// The REST subsystems of the detector control server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    System,
    Detector,
    FileWriter,
    Stream,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Detector => "detector",
            Self::FileWriter => "filewriter",
            Self::Stream => "stream",
        }
    }
}

/// Operations the debug session needs from a detector.
///
/// Commands return `None` for the empty success acknowledgment and `Some(value)` when
/// the server replied with a JSON body. Status and config reads return the full value
/// object (`{"value": ..., "unit": ..., ...}`).
pub trait DetectorControl {
    fn send_system_command(&self, command: &str) -> Result<Option<Value>, ClientError>;
    fn send_detector_command(&self, command: &str) -> Result<Option<Value>, ClientError>;
    fn send_filewriter_command(&self, command: &str) -> Result<Option<Value>, ClientError>;
    fn detector_status_keys(&self) -> Result<Vec<String>, ClientError>;
    fn detector_status(&self, key: &str) -> Result<Value, ClientError>;
    fn detector_config_keys(&self) -> Result<Vec<String>, ClientError>;
    fn detector_config(&self, key: &str) -> Result<Value, ClientError>;
    fn set_detector_config(&self, key: &str, value: Value) -> Result<Option<Value>, ClientError>;
    fn set_filewriter_config(&self, key: &str, value: Value)
        -> Result<Option<Value>, ClientError>;
    /// Names of the files in the detector's data buffer
    fn filewriter_files(&self) -> Result<Vec<String>, ClientError>;
    /// Save a buffer file into `dir`, returning the number of bytes written
    fn filewriter_save(&self, name: &str, dir: &Path) -> Result<u64, ClientError>;
    /// Save a server log file (e.g. `rest_api.log`) into `dir`
    fn download_log(&self, name: &str, dir: &Path) -> Result<u64, ClientError>;

    /// Current detector state
    fn state(&self) -> Result<DetectorState, ClientError> {
        let reply = self.detector_status("state")?;
        let state: String = value_field("state", reply)?;
        state.parse()
    }
}

/// Extract and convert the `value` field of a status/config reply
pub fn value_field<T: DeserializeOwned>(key: &str, mut reply: Value) -> Result<T, ClientError> {
    let value = reply
        .get_mut("value")
        .map(Value::take)
        .ok_or_else(|| ClientError::MissingField(key.to_string(), "value"))?;
    serde_json::from_value(value).map_err(|e| ClientError::BadResponse(key.to_string(), e))
}

/// Parse a reply body. An empty body is the server's success acknowledgment.
fn parse_reply(url: &str, body: &str) -> Result<Option<Value>, ClientError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| ClientError::BadResponse(url.to_string(), e))
}

fn request_error(url: &str, error: ureq::Error) -> ClientError {
    match error {
        ureq::Error::StatusCode(code) => ClientError::Status(url.to_string(), code),
        other => ClientError::Transport(url.to_string(), other),
    }
}

/// Save buffer files one at a time. Failures are logged and skipped.
///
/// Returns the files that were saved along with their sizes.
pub fn download_files<C: DetectorControl + ?Sized>(
    control: &C,
    names: &[String],
    dir: &Path,
) -> Vec<(String, u64)> {
    let mut saved = Vec::new();
    for name in names {
        match control.filewriter_save(name, dir) {
            Ok(bytes) => {
                spdlog::info!(
                    "Downloaded {} ({})",
                    name,
                    human_bytes::human_bytes(bytes as f64)
                );
                saved.push((name.clone(), bytes));
            }
            Err(e) => spdlog::error!("Could not download {}: {}", name, e),
        }
    }
    saved
}

/// Blocking HTTP client for the EIGER REST interface.
///
/// Every call maps to one request against
/// `http://{host}:{port}/{subsystem}/api/{version}/{section}/{key}`.
#[derive(Debug, Clone)]
pub struct EigerClient {
    agent: ureq::Agent,
    host: String,
    port: u16,
    api_version: String,
}

impl EigerClient {
    pub fn new(host: &str, port: u16, api_version: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            host: host.to_string(),
            port,
            api_version: api_version.to_string(),
        }
    }

    pub fn from_config(host: &str, config: &Config) -> Self {
        Self::new(host, config.port, &config.api_version, config.timeout())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn api_url(&self, subsystem: Subsystem, section: &str, key: &str) -> String {
        format!(
            "http://{}:{}/{}/api/{}/{}/{}",
            self.host,
            self.port,
            subsystem.as_str(),
            self.api_version,
            section,
            key
        )
    }

    pub fn data_url(&self, name: &str) -> String {
        format!("http://{}:{}/data/{}", self.host, self.port, name)
    }

    fn get_json(&self, url: &str) -> Result<Value, ClientError> {
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| request_error(url, e))?;
        let body = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_string()
            .map_err(|e| request_error(url, e))?;
        parse_reply(url, &body)?.ok_or_else(|| ClientError::MissingField(url.to_string(), "body"))
    }

    fn put(&self, url: &str, payload: Option<&Value>) -> Result<Option<Value>, ClientError> {
        let request = self.agent.put(url);
        let result = match payload {
            Some(payload) => request.send_json(payload),
            None => request.send_empty(),
        };
        let mut response = result.map_err(|e| request_error(url, e))?;
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| request_error(url, e))?;
        parse_reply(url, &body)
    }

    fn save_url(&self, url: &str, target: PathBuf) -> Result<u64, ClientError> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| request_error(url, e))?;
        let mut reader = response.into_body().into_reader();
        let mut writer = BufWriter::new(File::create(&target)?);
        let bytes = std::io::copy(&mut reader, &mut writer)?;
        spdlog::debug!("Saved {} to {}", url, target.display());
        Ok(bytes)
    }

    fn command(&self, subsystem: Subsystem, command: &str) -> Result<Option<Value>, ClientError> {
        spdlog::debug!("Sending {} command {}", subsystem.as_str(), command);
        self.put(&self.api_url(subsystem, "command", command), None)
    }

    fn get_value<T: DeserializeOwned>(
        &self,
        subsystem: Subsystem,
        section: &str,
        key: &str,
    ) -> Result<T, ClientError> {
        let reply = self.get_json(&self.api_url(subsystem, section, key))?;
        value_field(key, reply)
    }

    fn set_value(
        &self,
        subsystem: Subsystem,
        section: &str,
        key: &str,
        value: Value,
    ) -> Result<Option<Value>, ClientError> {
        self.put(
            &self.api_url(subsystem, section, key),
            Some(&json!({ "value": value })),
        )
    }

    fn keys(&self, subsystem: Subsystem, section: &str) -> Result<Vec<String>, ClientError> {
        let url = self.api_url(subsystem, section, "keys");
        serde_json::from_value(self.get_json(&url)?).map_err(|e| ClientError::BadResponse(url, e))
    }

    pub fn temperature(&self, board: &str) -> Result<f64, ClientError> {
        self.get_value(Subsystem::Detector, "status", &format!("{board}/th0_temp"))
    }

    pub fn humidity(&self, board: &str) -> Result<f64, ClientError> {
        self.get_value(Subsystem::Detector, "status", &format!("{board}/th0_humidity"))
    }

    pub fn count_time(&self) -> Result<f64, ClientError> {
        self.get_value(Subsystem::Detector, "config", "count_time")
    }

    pub fn set_count_time(&self, seconds: f64) -> Result<(), ClientError> {
        self.set_detector_config("count_time", json!(seconds))?;
        Ok(())
    }

    pub fn frame_time(&self) -> Result<f64, ClientError> {
        self.get_value(Subsystem::Detector, "config", "frame_time")
    }

    pub fn set_frame_time(&self, seconds: f64) -> Result<(), ClientError> {
        self.set_detector_config("frame_time", json!(seconds))?;
        Ok(())
    }

    pub fn nimages(&self) -> Result<u64, ClientError> {
        self.get_value(Subsystem::Detector, "config", "nimages")
    }

    pub fn set_nimages(&self, nimages: u64) -> Result<(), ClientError> {
        self.set_detector_config("nimages", json!(nimages))?;
        Ok(())
    }

    /// Photon energy in eV
    pub fn photon_energy(&self) -> Result<f64, ClientError> {
        self.get_value(Subsystem::Detector, "config", "photon_energy")
    }

    /// Changes the wavelength and threshold too
    pub fn set_photon_energy(&self, energy: f64) -> Result<(), ClientError> {
        self.set_detector_config("photon_energy", json!(energy))?;
        Ok(())
    }

    /// Wavelength in Angstrom
    pub fn wavelength(&self) -> Result<f64, ClientError> {
        self.get_value(Subsystem::Detector, "config", "wavelength")
    }

    pub fn set_wavelength(&self, wavelength: f64) -> Result<(), ClientError> {
        self.set_detector_config("wavelength", json!(wavelength))?;
        Ok(())
    }

    pub fn threshold_energy(&self) -> Result<f64, ClientError> {
        self.get_value(Subsystem::Detector, "config", "threshold_energy")
    }

    pub fn set_threshold_energy(&self, energy: f64) -> Result<(), ClientError> {
        self.set_detector_config("threshold_energy", json!(energy))?;
        Ok(())
    }

    pub fn flatfield_enabled(&self) -> Result<bool, ClientError> {
        self.get_value(Subsystem::Detector, "config", "flatfield_correction_applied")
    }

    pub fn set_flatfield_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.set_detector_config("flatfield_correction_applied", json!(enabled))?;
        Ok(())
    }

    /// Summation of frames to extend the dynamic range
    pub fn auto_summation_enabled(&self) -> Result<bool, ClientError> {
        self.get_value(Subsystem::Detector, "config", "auto_summation")
    }

    pub fn set_auto_summation_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.set_detector_config("auto_summation", json!(enabled))?;
        Ok(())
    }

    pub fn rate_correction_enabled(&self) -> Result<bool, ClientError> {
        self.get_value(Subsystem::Detector, "config", "countrate_correction_applied")
    }

    pub fn set_rate_correction_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.set_detector_config("countrate_correction_applied", json!(enabled))?;
        Ok(())
    }

    pub fn trigger_mode(&self) -> Result<String, ClientError> {
        self.get_value(Subsystem::Detector, "config", "trigger_mode")
    }

    pub fn set_trigger_mode(&self, mode: &str) -> Result<(), ClientError> {
        if !VALID_TRIGGER_MODES.contains(&mode) {
            return Err(ClientError::InvalidTriggerMode(mode.to_string()));
        }
        self.set_detector_config("trigger_mode", json!(mode))?;
        Ok(())
    }

    pub fn description(&self) -> Result<String, ClientError> {
        self.get_value(Subsystem::Detector, "config", "description")
    }

    pub fn serial_number(&self) -> Result<String, ClientError> {
        self.get_value(Subsystem::Detector, "config", "detector_number")
    }

    pub fn firmware_version(&self) -> Result<String, ClientError> {
        self.get_value(Subsystem::Detector, "config", "software_version")
    }

    pub fn sensor_material(&self) -> Result<String, ClientError> {
        self.get_value(Subsystem::Detector, "config", "sensor_material")
    }

    pub fn sensor_thickness(&self) -> Result<f64, ClientError> {
        self.get_value(Subsystem::Detector, "config", "sensor_thickness")
    }

    pub fn bit_depth(&self) -> Result<u32, ClientError> {
        self.get_value(Subsystem::Detector, "config", "bit_depth_readout")
    }

    pub fn readout_time(&self) -> Result<f64, ClientError> {
        self.get_value(Subsystem::Detector, "config", "detector_readout_time")
    }

    /// One of disabled, ready, acquire, error
    pub fn filewriter_state(&self) -> Result<String, ClientError> {
        self.get_value(Subsystem::FileWriter, "status", "state")
    }

    /// Free space in the data buffer
    pub fn available_space(&self) -> Result<f64, ClientError> {
        self.get_value(Subsystem::Detector, "status", "builder/dcu_buffer_free")
    }

    pub fn images_per_file(&self) -> Result<u64, ClientError> {
        self.get_value(Subsystem::FileWriter, "config", "nimages_per_file")
    }

    pub fn set_images_per_file(&self, n: u64) -> Result<(), ClientError> {
        self.set_filewriter_config("nimages_per_file", json!(n))?;
        Ok(())
    }

    /// Only "http" is supported by current firmware
    pub fn transfer_mode(&self) -> Result<String, ClientError> {
        self.get_value(Subsystem::FileWriter, "config", "transfer_mode")
    }

    pub fn set_transfer_mode(&self, mode: &str) -> Result<(), ClientError> {
        self.set_filewriter_config("transfer_mode", json!(mode))?;
        Ok(())
    }

    /// System time of the file writer
    pub fn filewriter_time(&self) -> Result<String, ClientError> {
        self.get_value(Subsystem::FileWriter, "status", "time")
    }

    pub fn name_pattern(&self) -> Result<String, ClientError> {
        self.get_value(Subsystem::FileWriter, "config", "name_pattern")
    }

    pub fn set_name_pattern(&self, pattern: &str) -> Result<(), ClientError> {
        self.set_filewriter_config("name_pattern", json!(pattern))?;
        Ok(())
    }

    pub fn compression_enabled(&self) -> Result<bool, ClientError> {
        self.get_value(Subsystem::FileWriter, "config", "compression_enabled")
    }

    pub fn set_compression_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        self.set_filewriter_config("compression_enabled", json!(enabled))?;
        Ok(())
    }

    pub fn stream_enabled(&self) -> Result<bool, ClientError> {
        let mode: String = self.get_value(Subsystem::Stream, "config", "mode")?;
        Ok(mode == "enabled")
    }

    pub fn set_stream_enabled(&self, enabled: bool) -> Result<(), ClientError> {
        let mode = if enabled { "enabled" } else { "disabled" };
        self.set_value(Subsystem::Stream, "config", "mode", json!(mode))?;
        Ok(())
    }

    pub fn initialize(&self) -> Result<(), ClientError> {
        self.send_detector_command("initialize")?;
        Ok(())
    }

    /// Arm the detector, returning the sequence id of the new series
    pub fn arm(&self) -> Result<u64, ClientError> {
        let reply = self
            .send_detector_command("arm")?
            .ok_or_else(|| ClientError::MissingField("arm".to_string(), "sequence id"))?;
        reply
            .get("sequence id")
            .and_then(Value::as_u64)
            .ok_or_else(|| ClientError::MissingField("arm".to_string(), "sequence id"))
    }

    pub fn disarm(&self) -> Result<(), ClientError> {
        self.send_detector_command("disarm")?;
        Ok(())
    }

    pub fn trigger(&self) -> Result<(), ClientError> {
        self.send_detector_command("trigger")?;
        Ok(())
    }

    pub fn cancel(&self) -> Result<(), ClientError> {
        self.send_detector_command("cancel")?;
        Ok(())
    }

    pub fn abort(&self) -> Result<(), ClientError> {
        self.send_detector_command("abort")?;
        Ok(())
    }

    /// Download every buffer file matching a glob pattern (e.g. `series_1*`)
    pub fn download_matching(&self, pattern: &str, dir: &Path) -> Result<Vec<(String, u64)>, ClientError> {
        let pattern = glob::Pattern::new(pattern)?;
        let names: Vec<String> = self
            .filewriter_files()?
            .into_iter()
            .filter(|name| pattern.matches(name))
            .collect();
        spdlog::info!("{} buffer files match {}", names.len(), pattern);
        Ok(download_files(self, &names, dir))
    }

    pub fn delete_file(&self, name: &str) -> Result<(), ClientError> {
        let url = self.data_url(name);
        self.agent
            .delete(&url)
            .call()
            .map_err(|e| request_error(&url, e))?;
        spdlog::debug!("Deleted {} from the buffer", name);
        Ok(())
    }

    /// Delete all files from the data buffer
    pub fn clear_buffer(&self) -> Result<(), ClientError> {
        for name in self.filewriter_files()? {
            self.delete_file(&name)?;
        }
        Ok(())
    }
}

impl DetectorControl for EigerClient {
    fn send_system_command(&self, command: &str) -> Result<Option<Value>, ClientError> {
        self.command(Subsystem::System, command)
    }

    fn send_detector_command(&self, command: &str) -> Result<Option<Value>, ClientError> {
        self.command(Subsystem::Detector, command)
    }

    fn send_filewriter_command(&self, command: &str) -> Result<Option<Value>, ClientError> {
        self.command(Subsystem::FileWriter, command)
    }

    fn detector_status_keys(&self) -> Result<Vec<String>, ClientError> {
        self.keys(Subsystem::Detector, "status")
    }

    fn detector_status(&self, key: &str) -> Result<Value, ClientError> {
        self.get_json(&self.api_url(Subsystem::Detector, "status", key))
    }

    fn detector_config_keys(&self) -> Result<Vec<String>, ClientError> {
        self.keys(Subsystem::Detector, "config")
    }

    fn detector_config(&self, key: &str) -> Result<Value, ClientError> {
        self.get_json(&self.api_url(Subsystem::Detector, "config", key))
    }

    fn set_detector_config(&self, key: &str, value: Value) -> Result<Option<Value>, ClientError> {
        self.set_value(Subsystem::Detector, "config", key, value)
    }

    fn set_filewriter_config(
        &self,
        key: &str,
        value: Value,
    ) -> Result<Option<Value>, ClientError> {
        self.set_value(Subsystem::FileWriter, "config", key, value)
    }

    fn filewriter_files(&self) -> Result<Vec<String>, ClientError> {
        let url = format!(
            "http://{}:{}/filewriter/api/{}/files",
            self.host, self.port, self.api_version
        );
        serde_json::from_value(self.get_json(&url)?).map_err(|e| ClientError::BadResponse(url, e))
    }

    fn filewriter_save(&self, name: &str, dir: &Path) -> Result<u64, ClientError> {
        self.save_url(&self.data_url(name), dir.join(name))
    }

    fn download_log(&self, name: &str, dir: &Path) -> Result<u64, ClientError> {
        self.save_url(&format!("http://{}/{}", self.host, name), dir.join(name))
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    fn client() -> EigerClient {
        EigerClient::new("10.0.42.20", 80, "1.6.0", Duration::from_millis(10))
    }

    /// Answer one request per canned reply on a loopback port. The handle yields each
    /// request's head and body.
    fn serve(replies: Vec<&'static str>) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for reply in replies {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request = String::new();
                let mut content_length = 0;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if let Some(length) = lower.strip_prefix("content-length:") {
                        content_length = length.trim().parse().unwrap();
                    }
                    request.push_str(&lower);
                }
                let mut body = vec![0; content_length];
                reader.read_exact(&mut body).unwrap();
                request.push_str(&String::from_utf8(body).unwrap());
                requests.push(request);
                write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.len(),
                    reply
                )
                .unwrap();
            }
            requests
        });
        (port, handle)
    }

    #[test]
    fn test_correction_and_filewriter_accessors() {
        let (port, server) = serve(vec![
            r#"{"value": true}"#,
            "",
            r#"{"value": false}"#,
            r#"{"value": "http"}"#,
            r#"{"value": "2024-01-01T12:00:00"}"#,
        ]);
        let client = EigerClient::new("127.0.0.1", port, "1.6.0", Duration::from_secs(5));

        assert!(client.flatfield_enabled().unwrap());
        client.set_rate_correction_enabled(false).unwrap();
        assert!(!client.auto_summation_enabled().unwrap());
        assert_eq!(client.transfer_mode().unwrap(), "http");
        assert_eq!(client.filewriter_time().unwrap(), "2024-01-01T12:00:00");

        let requests = server.join().unwrap();
        assert!(requests[0]
            .starts_with("get /detector/api/1.6.0/config/flatfield_correction_applied "));
        assert!(requests[1]
            .starts_with("put /detector/api/1.6.0/config/countrate_correction_applied "));
        assert!(requests[1].contains("content-type: application/json"));
        let compact: String = requests[1].chars().filter(|c| !c.is_whitespace()).collect();
        assert!(compact.ends_with(r#"{"value":false}"#));
        assert!(requests[2].starts_with("get /detector/api/1.6.0/config/auto_summation "));
        assert!(requests[3].starts_with("get /filewriter/api/1.6.0/config/transfer_mode "));
        assert!(requests[4].starts_with("get /filewriter/api/1.6.0/status/time "));
    }

    #[test]
    fn test_url_templates() {
        let client = client();
        assert_eq!(
            client.api_url(Subsystem::Detector, "status", "state"),
            "http://10.0.42.20:80/detector/api/1.6.0/status/state"
        );
        assert_eq!(
            client.api_url(Subsystem::FileWriter, "config", "name_pattern"),
            "http://10.0.42.20:80/filewriter/api/1.6.0/config/name_pattern"
        );
        assert_eq!(
            client.api_url(Subsystem::System, "command", "restart"),
            "http://10.0.42.20:80/system/api/1.6.0/command/restart"
        );
        assert_eq!(
            client.data_url("EIGERDebug_master.h5"),
            "http://10.0.42.20:80/data/EIGERDebug_master.h5"
        );
    }

    #[test]
    fn test_empty_reply_is_acknowledgment() {
        assert!(parse_reply("url", "").unwrap().is_none());
        assert!(parse_reply("url", "  \n").unwrap().is_none());
        let reply = parse_reply("url", r#"{"sequence id": 4}"#).unwrap().unwrap();
        assert_eq!(reply["sequence id"], 4);
        assert!(matches!(
            parse_reply("url", "not json"),
            Err(ClientError::BadResponse(_, _))
        ));
    }

    #[test]
    fn test_value_field() {
        let reply = json!({"value": 28.5, "value_type": "float", "unit": "degC"});
        assert_eq!(value_field::<f64>("th0_temp", reply).unwrap(), 28.5);
        assert!(matches!(
            value_field::<f64>("th0_temp", json!({"unit": "degC"})),
            Err(ClientError::MissingField(_, "value"))
        ));
        assert!(matches!(
            value_field::<u64>("nimages", json!({"value": "many"})),
            Err(ClientError::BadResponse(_, _))
        ));
    }

    #[test]
    fn test_invalid_trigger_mode_is_rejected_before_sending() {
        assert!(matches!(
            client().set_trigger_mode("manual"),
            Err(ClientError::InvalidTriggerMode(_))
        ));
    }
}
