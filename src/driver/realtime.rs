//! Realtime interface packet decoding
//!
//! The controller streams one packet per control cycle on port 30003. Every packet
//! starts with a big-endian `u32` total length followed by big-endian `f64`
//! fields at fixed byte offsets. Only the fields the IOC uses are decoded.

use bytes::{Buf, BufMut, BytesMut};
use std::io::Read;

use crate::driver::{CartesianPose, JointPosition};
use crate::error::{AppResult, IocError};

/// Byte offset of `q_actual` (six joint angles)
pub const Q_ACTUAL_OFFSET: usize = 252;
/// Byte offset of `tool_vector_actual` (x, y, z, rx, ry, rz)
pub const TOOL_VECTOR_ACTUAL_OFFSET: usize = 444;
/// Byte offset of `robot_mode`
pub const ROBOT_MODE_OFFSET: usize = 756;
/// Shortest packet that contains every decoded field
pub const MIN_PACKET_LEN: usize = ROBOT_MODE_OFFSET + 8;
/// Packet length sent by 5.x controllers
pub const PACKET_LEN: usize = 1116;

const MAX_PACKET_LEN: usize = 4096;

/// Decoded subset of one realtime packet
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RealtimeState {
    pub joints: JointPosition,
    pub pose: CartesianPose,
    pub robot_mode: f64,
}

impl RealtimeState {
    /// Decode a full packet, length header included
    pub fn parse(packet: &[u8]) -> AppResult<Self> {
        if packet.len() < MIN_PACKET_LEN {
            return Err(IocError::Driver(format!(
                "Realtime packet too short: {} bytes",
                packet.len()
            )));
        }

        let joints = JointPosition::new(read_six(&packet[Q_ACTUAL_OFFSET..]));
        let pose = CartesianPose::from(read_six(&packet[TOOL_VECTOR_ACTUAL_OFFSET..]));
        let robot_mode = (&packet[ROBOT_MODE_OFFSET..]).get_f64();

        Ok(Self {
            joints,
            pose,
            robot_mode,
        })
    }

    /// Build a packet the way the controller lays it out; unused fields are zero
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::zeroed(PACKET_LEN);
        (&mut buf[..4]).put_u32(PACKET_LEN as u32);
        write_six(&mut buf[Q_ACTUAL_OFFSET..], self.joints.as_array());
        write_six(&mut buf[TOOL_VECTOR_ACTUAL_OFFSET..], &self.pose.to_array());
        (&mut buf[ROBOT_MODE_OFFSET..]).put_f64(self.robot_mode);
        buf.to_vec()
    }
}

/// Read one length-prefixed packet from the stream
pub fn read_packet(reader: &mut impl Read) -> AppResult<Vec<u8>> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let len = (&header[..]).get_u32() as usize;
    if !(4..=MAX_PACKET_LEN).contains(&len) {
        return Err(IocError::Driver(format!(
            "Realtime packet length {len} out of range"
        )));
    }

    let mut packet = vec![0u8; len];
    packet[..4].copy_from_slice(&header);
    reader.read_exact(&mut packet[4..])?;
    Ok(packet)
}

fn read_six(mut buf: &[u8]) -> [f64; 6] {
    let mut out = [0.0; 6];
    for v in out.iter_mut() {
        *v = buf.get_f64();
    }
    out
}

fn write_six(mut buf: &mut [u8], values: &[f64; 6]) {
    for v in values {
        buf.put_f64(*v);
    }
}
