//! CAN frame types exchanged with the controller

use embedded_can::{ExtendedId, Frame, Id, StandardId};
use serde::Serialize;

/// Maximum payload of a classic CAN frame
pub const MAX_DLC: usize = 8;

/// A classic CAN frame as handed over by, or submitted to, the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: Id,
    remote: bool,
    dlc: u8,
    data: [u8; MAX_DLC],
}

impl CanFrame {
    /// Build an id from its raw value, `None` if it does not fit
    pub fn make_id(raw: u32, extended: bool) -> Option<Id> {
        if extended {
            ExtendedId::new(raw).map(Id::Extended)
        } else {
            u16::try_from(raw)
                .ok()
                .and_then(StandardId::new)
                .map(Id::Standard)
        }
    }

    /// Raw numeric value of the identifier
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => id.as_raw() as u32,
            Id::Extended(id) => id.as_raw(),
        }
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DLC {
            return None;
        }

        let mut buf = [0u8; MAX_DLC];
        buf[..data.len()].copy_from_slice(data);

        Some(Self {
            id: id.into(),
            remote: false,
            dlc: data.len() as u8,
            data: buf,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DLC {
            return None;
        }

        Some(Self {
            id: id.into(),
            remote: true,
            dlc: dlc as u8,
            data: [0; MAX_DLC],
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.dlc as usize]
        }
    }
}

/// A frame captured by the receive pipeline, stamped with its arrival time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// The frame as read from the hardware FIFO
    pub frame: CanFrame,
    /// Monotonic milliseconds since boot at capture
    pub timestamp_ms: u32,
}

impl ReceivedFrame {
    pub fn new(frame: CanFrame, timestamp_ms: u32) -> Self {
        Self {
            frame,
            timestamp_ms,
        }
    }

    /// Flattened view for logging
    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            id: self.frame.raw_id(),
            extended: self.frame.is_extended(),
            dlc: self.frame.dlc,
            data: self.frame.data,
            timestamp_ms: self.timestamp_ms,
        }
    }
}

impl Frame for ReceivedFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        CanFrame::new(id, data).map(|frame| Self::new(frame, 0))
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        CanFrame::new_remote(id, dlc).map(|frame| Self::new(frame, 0))
    }

    fn is_extended(&self) -> bool {
        self.frame.is_extended()
    }

    fn is_remote_frame(&self) -> bool {
        self.frame.is_remote_frame()
    }

    fn id(&self) -> Id {
        self.frame.id()
    }

    fn dlc(&self) -> usize {
        self.frame.dlc()
    }

    fn data(&self) -> &[u8] {
        self.frame.data()
    }
}

/// Serializable flat form of a received frame
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FrameSummary {
    pub id: u32,
    pub extended: bool,
    pub dlc: u8,
    pub data: [u8; MAX_DLC],
    pub timestamp_ms: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_id_ranges() {
        assert!(CanFrame::make_id(0x7FF, false).is_some());
        assert!(CanFrame::make_id(0x800, false).is_none());
        assert!(CanFrame::make_id(0x1FFF_FFFF, true).is_some());
        assert!(CanFrame::make_id(0x2000_0000, true).is_none());
    }

    #[test]
    fn test_data_frame_accessors() {
        let id = CanFrame::make_id(0x123, false).unwrap();
        let frame = CanFrame::new(id, &[1, 2, 3]).unwrap();

        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.raw_id(), 0x123);
        assert!(!frame.is_extended());
        assert!(CanFrame::new(id, &[0; 9]).is_none());
    }

    #[test]
    fn test_remote_frame_has_no_data() {
        let id = CanFrame::make_id(0x18DA_F110, true).unwrap();
        let frame = CanFrame::new_remote(id, 4).unwrap();

        assert!(frame.is_remote_frame());
        assert!(frame.is_extended());
        assert_eq!(frame.dlc(), 4);
        assert!(frame.data().is_empty());
    }

    #[test]
    fn test_received_frame_delegates() {
        let id = CanFrame::make_id(0x7E8, false).unwrap();
        let rx = ReceivedFrame::new(CanFrame::new(id, &[0x41, 0x0C]).unwrap(), 1234);

        assert_eq!(rx.data(), &[0x41, 0x0C]);
        assert_eq!(rx.summary().id, 0x7E8);
        assert_eq!(rx.summary().timestamp_ms, 1234);
    }
}
