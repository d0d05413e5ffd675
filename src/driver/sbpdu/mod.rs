//! Schleifenbauer network PDU outlet power via the SAPI protocol.

mod protocol;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};

use crate::clock::now_ns;
use crate::config::SbPduConfig;
use crate::data::DataProperties;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::si::SiFactor;

use protocol::{Command, RC4KEY_LEN};

const DEFAULT_SAMPLING_NANOS: u64 = 1_000_000_000;
const MEASURE_TTL_NANOS: u64 = 2_000_000_000;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

struct MeasureCache {
    block: Vec<u8>,
    last_ts: u64,
}

/// Byte offset of the first data byte in a decoded `Read` reply: 2-byte
/// command word plus the four echoed 16-bit arguments (address, transaction
/// id, register, register length).
const READ_REPLY_DATA_OFFSET: usize = 2 + 4 * 2;

struct Pdu {
    stream: Mutex<(TcpStream, MeasureCache)>,
    key: [u8; RC4KEY_LEN],
    noutlets: usize,
    next_transid: std::sync::atomic::AtomicU32,
}

impl Pdu {
    fn connect(host: &str, port: u16, key: [u8; RC4KEY_LEN]) -> Result<Pdu> {
        let addr = format!("{host}:{port}")
            .parse()
            .map_err(|e| Error::NetworkError(format!("{host}:{port}: {e}")))?;
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(SockProtocol::TCP))
            .map_err(Error::Io)?;
        socket.set_reuse_address(true).map_err(Error::Io)?;
        socket.set_read_timeout(Some(SOCKET_TIMEOUT)).map_err(Error::Io)?;
        socket.set_write_timeout(Some(SOCKET_TIMEOUT)).map_err(Error::Io)?;
        socket.connect(&addr).map_err(Error::Io)?;
        let mut stream: TcpStream = socket.into();

        send(&mut stream, &key, Command::BcastIdentify, &[])?;
        let identify = recv(&mut stream, &key)?;
        if u16::from_be_bytes([identify[0], identify[1]]) != 0x0690 {
            return Err(Error::NetworkError("unexpected reply to identify".into()));
        }

        let transid = std::sync::atomic::AtomicU32::new(1);
        let read_args = [1, transid.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as u16, protocol::SB_REG_CFNRMO, 1];
        send(&mut stream, &key, Command::Read, &read_args)?;
        let reply = recv(&mut stream, &key)?;
        if reply.len() <= READ_REPLY_DATA_OFFSET {
            return Err(Error::NetworkError("short reply to outlet-count query".into()));
        }
        let noutlets = (reply[READ_REPLY_DATA_OFFSET] as usize).min(protocol::NCHANNELS as usize);

        Ok(Pdu {
            stream: Mutex::new((stream, MeasureCache { block: Vec::new(), last_ts: 0 })),
            key,
            noutlets,
            next_transid: transid,
        })
    }

    fn measure_block(&self) -> Result<(u64, Vec<u8>)> {
        let mut guard = self.stream.lock().unwrap();
        let now = now_ns();
        let stale = guard.1.block.is_empty() || now.saturating_sub(guard.1.last_ts) > MEASURE_TTL_NANOS;
        if stale {
            let blklen = protocol::MEASURE_REG_LEN * protocol::NCHANNELS * 3;
            let transid = self.next_transid.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as u16;
            let args = [1, transid, protocol::SB_REG_OMCRAC, blklen];
            send(&mut guard.0, &self.key, Command::Read, &args)?;
            let block = recv(&mut guard.0, &self.key)?;
            guard.1.block = block;
            guard.1.last_ts = now_ns();
        }
        Ok((guard.1.last_ts, guard.1.block.clone()))
    }
}

fn send(stream: &mut TcpStream, key: &[u8; RC4KEY_LEN], cmd: Command, args: &[u16]) -> Result<()> {
    let packet = protocol::encode_request(key, cmd, args);
    stream.write_all(&packet).map_err(Error::Io)
}

fn recv(stream: &mut TcpStream, key: &[u8; RC4KEY_LEN]) -> Result<Vec<u8>> {
    let mut buf = [0u8; 512];
    let n = stream.read(&mut buf).map_err(Error::Io)?;
    if n == 0 {
        return Err(Error::NetworkError("connection closed by PDU".into()));
    }
    protocol::decode_response(key, &buf[..n])
        .ok_or_else(|| Error::NetworkError("malformed SAPI response".into()))
}

struct OutletRef {
    pdu: usize,
    outlet: usize,
}

pub struct SbPduDriver {
    config: SbPduConfig,
    pdus: Vec<Pdu>,
    outlets: Vec<OutletRef>,
    failed_reason: Option<String>,
}

impl SbPduDriver {
    pub fn new(config: SbPduConfig) -> Self {
        SbPduDriver { config, pdus: Vec::new(), outlets: Vec::new(), failed_reason: None }
    }
}

impl Driver for SbPduDriver {
    fn name(&self) -> &'static str {
        "sb_pdu"
    }

    fn init(&mut self) -> Result<()> {
        let mut pdus = Vec::new();
        let mut outlets = Vec::new();
        // Mirrors the original driver's init loop (`pdu_init` per
        // configured `device` section, errors only `dbglog_warn`ed): a PDU
        // that fails to connect contributes no outlets but doesn't stop the
        // rest of the configured PDUs from coming up.
        for endpoint in &self.config.devices {
            let outcome = protocol::parse_rc4_key(&endpoint.rc4key)
                .ok_or_else(|| Error::BadConfig(format!("invalid rc4key for {}", endpoint.host)))
                .and_then(|key| Pdu::connect(&endpoint.host, endpoint.port, key));
            match outcome {
                Ok(pdu) => {
                    let pdu_index = pdus.len();
                    for outlet in 0..pdu.noutlets {
                        outlets.push(OutletRef { pdu: pdu_index, outlet });
                    }
                    pdus.push(pdu);
                }
                Err(e) => {
                    log::warn!("{}: {e}", endpoint.host);
                    self.failed_reason = Some(e.to_string());
                }
            }
        }
        if pdus.is_empty() && self.failed_reason.is_none() {
            self.failed_reason = Some("no devices configured".into());
        }
        self.pdus = pdus;
        self.outlets = outlets;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.pdus.clear();
        self.outlets.clear();
        Ok(())
    }

    fn device_count(&self) -> usize {
        self.outlets.len()
    }

    fn measure(&self, device_index: usize, out: &mut [u64]) -> Result<()> {
        let outlet_ref = &self.outlets[device_index];
        let pdu = &self.pdus[outlet_ref.pdu];
        let (ts, block) = pdu.measure_block()?;
        out[0] = ts;

        let current_pos = READ_REPLY_DATA_OFFSET + 2 * outlet_ref.outlet;
        let voltage_pos = current_pos + 2 * protocol::NCHANNELS as usize * 2;
        if voltage_pos + 1 >= block.len() {
            return Err(Error::SensorMeasurementError("outlet measurement out of range".into()));
        }
        let current = u16::from_le_bytes([block[current_pos], block[current_pos + 1]]) as u64;
        let voltage = u16::from_le_bytes([block[voltage_pos], block[voltage_pos + 1]]) as u64;
        out[1] = voltage * current;
        Ok(())
    }

    fn default_props(&self) -> DataProperties {
        DataProperties {
            time_factor: SiFactor::NANO,
            energy_factor: SiFactor(-10_000),
            power_factor: SiFactor(-10_000),
            inst_energy_field: 0,
            inst_power_field: 1,
            sampling_nanos: self.config.sampling_interval_nanos.unwrap_or(DEFAULT_SAMPLING_NANOS),
        }
    }

    fn failed_reason(&self) -> Option<&str> {
        self.failed_reason.as_deref()
    }

    /// `"<pdu-index>_outlet<outlet-index>"`, matching the original driver's
    /// `"%s%zu_outlet%zu"` (`driver-sb-pdu.c`), e.g. `sb_pdu0_outlet0`.
    fn device_label(&self, index_in_driver: usize) -> String {
        let outlet_ref = &self.outlets[index_in_driver];
        format!("{}_outlet{}", outlet_ref.pdu, outlet_ref.outlet)
    }
}
