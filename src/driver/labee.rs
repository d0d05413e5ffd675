//! Labee REST power meter: fetches a flat XML node list over HTTP and
//! reads one node's instantaneous power attribute.

use std::io::BufRead;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::clock::now_ns;
use crate::config::LabeeConfig;
use crate::data::DataProperties;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::si::SiFactor;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
const NODE_ID_ATTR: &str = "id";
const NODELIST_DELIMITER: char = ',';

pub struct LabeeDriver {
    config: LabeeConfig,
    client: Option<reqwest::blocking::Client>,
    node_ref: Option<String>,
    initialized: bool,
    failed_reason: Option<String>,
}

impl LabeeDriver {
    pub fn new(config: LabeeConfig) -> Self {
        LabeeDriver { config, client: None, node_ref: None, initialized: false, failed_reason: None }
    }

    fn fetch_xml(&self) -> Result<String> {
        let client = self.client.as_ref().ok_or(Error::NotInitialized)?;
        let response = client
            .get(&self.config.api_url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .send()
            .map_err(|e| Error::NetworkError(e.to_string()))?;
        response.text().map_err(|e| Error::NetworkError(e.to_string()))
    }
}

/// Resolves this host's own REST node identifier by matching `hostname`
/// against the second, comma-delimited column of `nodelist_file`.
fn resolve_node_ref(nodelist_path: &str, hostname: &str) -> Result<String> {
    let file = std::fs::File::open(nodelist_path).map_err(Error::Io)?;
    let reader = std::io::BufReader::new(file);
    for line in reader.lines() {
        let line = line.map_err(Error::Io)?;
        let mut parts = line.splitn(2, NODELIST_DELIMITER);
        let (Some(node_ref), Some(node_host)) = (parts.next(), parts.next()) else {
            continue;
        };
        if node_host.trim() == hostname {
            return Ok(node_ref.trim().to_string());
        }
    }
    Err(Error::BadConfig(format!("hostname '{hostname}' not found in {nodelist_path}")))
}

/// Scans the flat `<node id="..." ...power_attribute="...">` element list
/// and returns the requested attribute for the node matching `node_ref`.
fn extract_power_attribute(xml: &str, node_ref: &str, power_attribute: &str) -> Result<f64> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let mut id_matches = false;
                let mut power_value = None;
                for attr in e.attributes().flatten() {
                    let key = attr.key.as_ref();
                    let value = attr.unescape_value().unwrap_or_default().into_owned();
                    if key == NODE_ID_ATTR.as_bytes() && value == node_ref {
                        id_matches = true;
                    }
                    if key == power_attribute.as_bytes() {
                        power_value = Some(value);
                    }
                }
                if id_matches {
                    let raw = power_value
                        .ok_or_else(|| Error::SensorMeasurementError("missing power attribute".into()))?;
                    return raw
                        .parse::<f64>()
                        .map_err(|e| Error::ParseError(format!("power attribute '{raw}': {e}")));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::ParseError(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Err(Error::SensorMeasurementError(format!("node '{node_ref}' not present in response")))
}

impl Driver for LabeeDriver {
    fn name(&self) -> &'static str {
        "labee"
    }

    fn init(&mut self) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::NetworkError(e.to_string()))?;

        let node_ref = match resolve_node_ref(&self.config.nodelist_file, &self.config.hostname) {
            Ok(r) => r,
            Err(e) => {
                self.failed_reason = Some(e.to_string());
                return Err(e);
            }
        };

        self.client = Some(client);
        self.node_ref = Some(node_ref);

        // Probe once so a misconfigured endpoint fails at init, not at the
        // first sample.
        if let Err(e) = self.fetch_xml() {
            self.failed_reason = Some(e.to_string());
            return Err(e);
        }

        self.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.client = None;
        self.node_ref = None;
        self.initialized = false;
        Ok(())
    }

    fn device_count(&self) -> usize {
        if self.initialized { 1 } else { 0 }
    }

    fn measure(&self, device_index: usize, out: &mut [u64]) -> Result<()> {
        debug_assert_eq!(device_index, 0);
        let node_ref = self.node_ref.as_deref().ok_or(Error::NotInitialized)?;
        let xml = self.fetch_xml()?;
        let watts = extract_power_attribute(&xml, node_ref, &self.config.power_attribute)?;

        out[0] = now_ns();
        // Scaled by the energy/power factor's MICRO denominator below so a
        // sub-watt reading survives truncation to an integer field.
        out[1] = (watts * 1_000_000.0) as u64;
        Ok(())
    }

    fn default_props(&self) -> DataProperties {
        DataProperties {
            time_factor: SiFactor::NANO,
            energy_factor: SiFactor::MICRO,
            power_factor: SiFactor::MICRO,
            inst_energy_field: 0,
            inst_power_field: 1,
            sampling_nanos: self.config.sampling_interval_nanos,
        }
    }

    fn failed_reason(&self) -> Option<&str> {
        self.failed_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_matching_node_power_attribute() {
        let xml = r#"<nodes><node id="n1" actualPowerUsage="12.5"/><node id="n2" actualPowerUsage="99.0"/></nodes>"#;
        let watts = extract_power_attribute(xml, "n2", "actualPowerUsage").unwrap();
        assert_eq!(watts, 99.0);
    }

    #[test]
    fn missing_node_is_an_error() {
        let xml = r#"<nodes><node id="n1" actualPowerUsage="12.5"/></nodes>"#;
        assert!(extract_power_attribute(xml, "missing", "actualPowerUsage").is_err());
    }

    #[test]
    fn resolves_node_ref_from_nodelist_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodelist");
        std::fs::write(&path, "n1,host-a\nn2,host-b\n").unwrap();
        let resolved = resolve_node_ref(path.to_str().unwrap(), "host-b").unwrap();
        assert_eq!(resolved, "n2");
    }
}
