// src/actuator/dobot.rs - Dobot Magician over its serial command protocol
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

use super::{Actuator, ActuatorError, Pose};

mod cmd {
    // Communication protocol v1.1.5, command ids
    pub const GET_POSE: u8 = 10;
    pub const SET_HOME_CMD: u8 = 31;
    pub const SET_END_EFFECTOR_GRIPPER: u8 = 63;
    pub const SET_PTP_COORDINATE_PARAMS: u8 = 81;
    pub const SET_PTP_CMD: u8 = 84;
    pub const SET_QUEUED_CMD_START_EXEC: u8 = 240;
    pub const SET_QUEUED_CMD_STOP_EXEC: u8 = 241;
    pub const SET_QUEUED_CMD_FORCE_STOP_EXEC: u8 = 242;
    pub const SET_QUEUED_CMD_CLEAR: u8 = 245;
    pub const GET_QUEUED_CMD_CURRENT_INDEX: u8 = 246;
}

const CTRL_READ: u8 = 0x00;
const CTRL_WRITE: u8 = 0x01;
const CTRL_QUEUED_WRITE: u8 = 0x03;

/// Linear move in Cartesian space.
const PTP_MOVL_XYZ: u8 = 2;

const SERIAL_SPEED: u32 = 115200;
const TIMEOUT: Duration = Duration::from_secs(1);

/// Substrings of serial port names an arm usually shows up under.
const PORT_HINTS: [&str; 4] = ["usbmodem", "usbserial", "ttyACM", "ttyUSB"];

#[inline]
fn checksum(data: impl Iterator<Item = u8>) -> u8 {
    let sum = data.fold(0u8, |acc, b| acc.wrapping_add(b));
    0u8.wrapping_sub(sum)
}

pub(crate) fn encode_packet(id: u8, ctrl: u8, params: &[u8]) -> Vec<u8> {
    let mut packet = vec![0xAA, 0xAA, params.len() as u8 + 2, id, ctrl];
    packet.extend_from_slice(params);
    packet.push(checksum(packet[3..].iter().copied()));
    packet
}

/// Framed request/response exchange over any byte stream.
pub(crate) struct DobotLink<T> {
    io: T,
}

impl<T: Read + Write> DobotLink<T> {
    pub(crate) fn new(io: T) -> Self {
        Self { io }
    }

    pub(crate) fn request(&mut self, id: u8, ctrl: u8, params: &[u8]) -> io::Result<Vec<u8>> {
        self.io.write_all(&encode_packet(id, ctrl, params))?;
        self.io.flush()?;
        let (resp_id, payload) = self.read_packet()?;
        if resp_id != id {
            return Err(io::Error::other(format!(
                "response for command {} while waiting for {}",
                resp_id, id
            )));
        }
        Ok(payload)
    }

    fn read_packet(&mut self) -> io::Result<(u8, Vec<u8>)> {
        // resync on the two-byte header
        let mut prev = 0u8;
        loop {
            let mut b = [0u8; 1];
            self.io.read_exact(&mut b)?;
            if prev == 0xAA && b[0] == 0xAA {
                break;
            }
            prev = b[0];
        }

        let mut len = [0u8; 1];
        self.io.read_exact(&mut len)?;
        let len = len[0] as usize;
        if len < 2 {
            return Err(io::Error::other("Invalid length"));
        }
        let mut body = vec![0u8; len + 1];
        self.io.read_exact(&mut body)?;

        let expected = checksum(body[..len].iter().copied());
        if expected != body[len] {
            return Err(io::Error::other("Invalid checksum"));
        }
        Ok((body[0], body[2..len].to_vec()))
    }

    fn queued_index(payload: &[u8]) -> io::Result<u64> {
        match payload.len() {
            n if n >= 8 => Ok(u64::from_le_bytes(payload[..8].try_into().unwrap_or([0; 8]))),
            n if n >= 4 => Ok(u32::from_le_bytes(payload[..4].try_into().unwrap_or([0; 4])) as u64),
            _ => Err(io::Error::other("missing queued command index")),
        }
    }

    pub(crate) fn queue(&mut self, id: u8, params: &[u8]) -> io::Result<u64> {
        let payload = self.request(id, CTRL_QUEUED_WRITE, params)?;
        Self::queued_index(&payload)
    }

    pub(crate) fn current_index(&mut self) -> io::Result<u64> {
        let payload = self.request(cmd::GET_QUEUED_CMD_CURRENT_INDEX, CTRL_READ, &[])?;
        Self::queued_index(&payload)
    }

    pub(crate) fn pose(&mut self) -> io::Result<Pose> {
        let payload = self.request(cmd::GET_POSE, CTRL_READ, &[])?;
        if payload.len() < 16 {
            return Err(io::Error::other("short pose payload"));
        }
        let f = |i: usize| {
            let b = [payload[i * 4], payload[i * 4 + 1], payload[i * 4 + 2], payload[i * 4 + 3]];
            f32::from_le_bytes(b) as f64
        };
        Ok(Pose::new(f(0), f(1), f(2), f(3)))
    }
}

fn ptp_params(pose: Pose) -> Vec<u8> {
    let mut params = vec![PTP_MOVL_XYZ];
    for v in [pose.x, pose.y, pose.z, pose.r] {
        params.extend_from_slice(&(v as f32).to_le_bytes());
    }
    params
}

/// Candidate device names, most likely first.
pub fn candidate_ports(mut names: Vec<String>) -> Vec<String> {
    names.retain(|n| PORT_HINTS.iter().any(|h| n.contains(h)));
    names.sort();
    names
}

/// Driver for a Dobot Magician on a USB serial port.
pub struct DobotArm {
    link: Option<DobotLink<Box<dyn SerialPort>>>,
    move_timeout: Duration,
    poll_interval: Duration,
    velocity: f32,
}

impl DobotArm {
    pub fn new(move_timeout: Duration) -> Self {
        Self {
            link: None,
            move_timeout,
            poll_interval: Duration::from_millis(20),
            velocity: 200.0,
        }
    }

    fn open(port: &str) -> Result<DobotLink<Box<dyn SerialPort>>, ActuatorError> {
        let serial = serialport::new(port, SERIAL_SPEED)
            .data_bits(DataBits::Eight)
            .flow_control(FlowControl::None)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(TIMEOUT)
            .open()
            .map_err(|e| ActuatorError::NoDevice(format!("{}: {}", port, e)))?;
        Ok(DobotLink::new(serial))
    }

    fn setup(&mut self, link: &mut DobotLink<Box<dyn SerialPort>>) -> Result<(), ActuatorError> {
        link.request(cmd::SET_QUEUED_CMD_CLEAR, CTRL_WRITE, &[])?;
        link.request(cmd::SET_QUEUED_CMD_START_EXEC, CTRL_WRITE, &[])?;
        let mut params = Vec::with_capacity(16);
        for v in [self.velocity, self.velocity, self.velocity, self.velocity] {
            params.extend_from_slice(&v.to_le_bytes());
        }
        link.queue(cmd::SET_PTP_COORDINATE_PARAMS, &params)?;
        // answers only if the device is really a Dobot
        link.pose()?;
        Ok(())
    }

    fn link(&mut self) -> Result<&mut DobotLink<Box<dyn SerialPort>>, ActuatorError> {
        self.link.as_mut().ok_or(ActuatorError::NotConnected)
    }

    fn wait_index(&mut self, cmd_id: u64, timeout: Duration, what: &'static str) -> Result<(), ActuatorError> {
        let poll = self.poll_interval;
        let start = Instant::now();
        loop {
            if self.link()?.current_index()? >= cmd_id {
                return Ok(());
            }
            if start.elapsed() > timeout {
                return Err(ActuatorError::Timeout(timeout, what));
            }
            std::thread::sleep(poll);
        }
    }
}

impl Actuator for DobotArm {
    fn connect(&mut self, port: Option<&str>) -> Result<String, ActuatorError> {
        let candidates = match port {
            Some(p) => vec![p.to_string()],
            None => {
                let names = serialport::available_ports()
                    .map_err(|e| ActuatorError::NoDevice(e.to_string()))?
                    .into_iter()
                    .map(|p| p.port_name)
                    .collect();
                let found = candidate_ports(names);
                info!("Found candidate ports: {:?}", found);
                found
            }
        };

        for name in candidates {
            debug!("Trying port: {}", name);
            let attempt = Self::open(&name).and_then(|mut link| {
                self.setup(&mut link)?;
                Ok(link)
            });
            match attempt {
                Ok(link) => {
                    self.link = Some(link);
                    info!("Dobot connected on {}", name);
                    return Ok(name);
                }
                Err(e) => warn!("Port {} failed: {}", name, e),
            }
        }
        Err(ActuatorError::NoDevice(
            "no serial port answered; check power, USB cable and drivers".to_string(),
        ))
    }

    fn home(&mut self) -> Result<Option<u64>, ActuatorError> {
        let id = self.link()?.queue(cmd::SET_HOME_CMD, &0u32.to_le_bytes())?;
        Ok(Some(id))
    }

    fn wait_for(&mut self, cmd_id: u64, timeout: Duration) -> Result<(), ActuatorError> {
        self.wait_index(cmd_id, timeout, "queued command")
    }

    fn move_to(&mut self, pose: Pose, wait: bool) -> Result<(), ActuatorError> {
        let id = self.link()?.queue(cmd::SET_PTP_CMD, &ptp_params(pose))?;
        if wait {
            self.wait_index(id, self.move_timeout, "move")?;
        }
        Ok(())
    }

    fn grip(&mut self, closed: bool, wait: bool) -> Result<(), ActuatorError> {
        let id = self
            .link()?
            .queue(cmd::SET_END_EFFECTOR_GRIPPER, &[1, closed as u8])?;
        if wait {
            self.wait_index(id, self.move_timeout, "gripper")?;
        }
        Ok(())
    }

    fn get_pose(&mut self) -> Result<Pose, ActuatorError> {
        Ok(self.link()?.pose()?)
    }

    fn halt(&mut self) -> Result<(), ActuatorError> {
        let link = self.link()?;
        link.request(cmd::SET_QUEUED_CMD_FORCE_STOP_EXEC, CTRL_WRITE, &[])?;
        link.request(cmd::SET_QUEUED_CMD_CLEAR, CTRL_WRITE, &[])?;
        link.request(cmd::SET_QUEUED_CMD_START_EXEC, CTRL_WRITE, &[])?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ActuatorError> {
        if let Some(mut link) = self.link.take() {
            link.request(cmd::SET_QUEUED_CMD_STOP_EXEC, CTRL_WRITE, &[])?;
        }
        Ok(())
    }
}
