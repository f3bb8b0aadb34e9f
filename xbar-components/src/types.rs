// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Shared types.
//!
//! This file defines the objects carried on the five channels of a bus port:
//!
//!  - `aw`: write requests ([`AddrReq`])
//!  - `w`: write data ([`WriteBeat`])
//!  - `b`: write responses ([`WriteResp`])
//!  - `ar`: read requests ([`AddrReq`])
//!  - `r`: read data ([`ReadBeat`])
//!
//! Beats carry at most 8 bytes of data.

use std::fmt;

use serde::{Deserialize, Serialize};
use xbar_engine::traits::SimObject;
use xbar_track::{Id, Tagged};

/// Log2 of the page size used for read/write hazard checks.
pub const PAGE_SHIFT: u32 = 12;

/// Largest supported beat (`1 << MAX_SIZE` bytes).
pub const MAX_SIZE: u8 = 3;

/// Address generation for the beats of a burst.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Burst {
    /// Every beat uses the same address.
    Fixed,

    /// Each beat is one beat size above the previous one.
    #[default]
    Incr,

    /// Each beat is one beat size below the previous one.
    Decr,
}

impl fmt::Display for Burst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Burst::Fixed => write!(f, "FIXED"),
            Burst::Incr => write!(f, "INCR"),
            Burst::Decr => write!(f, "DECR"),
        }
    }
}

/// Status returned with every response.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum RespStatus {
    #[default]
    Okay,

    /// The target was reached but could not complete the access.
    SlaveError,

    /// No target exists for the address.
    DecodeError,
}

impl fmt::Display for RespStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RespStatus::Okay => write!(f, "OKAY"),
            RespStatus::SlaveError => write!(f, "SLVERR"),
            RespStatus::DecodeError => write!(f, "DECERR"),
        }
    }
}

/// Atomic operations carried by a write request.
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AtomicOp {
    /// Add the write data to memory. No data is returned.
    StoreAdd,

    /// Add the write data to memory and return the original value.
    LoadAdd,

    /// Replace memory with the write data and return the original value.
    Swap,
}

impl AtomicOp {
    /// True when the operation returns data on the read channel as well as a
    /// write response.
    #[must_use]
    pub fn expects_read_data(&self) -> bool {
        !matches!(self, AtomicOp::StoreAdd)
    }
}

/// A read or write request.
#[derive(Clone, Debug, PartialEq)]
pub struct AddrReq {
    pub tag: Id,

    /// Transaction identifier used to order responses.
    pub id: u32,

    pub addr: u64,

    /// Number of beats minus one.
    pub len: u8,

    /// Log2 of the bytes per beat.
    pub size: u8,

    pub burst: Burst,

    pub atomic: Option<AtomicOp>,
}

impl AddrReq {
    #[must_use]
    pub fn new(tag: Id, id: u32, addr: u64, len: u8, size: u8, burst: Burst) -> Self {
        Self {
            tag,
            id,
            addr,
            len,
            size,
            burst,
            atomic: None,
        }
    }

    #[must_use]
    pub fn with_atomic(mut self, op: AtomicOp) -> Self {
        self.atomic = Some(op);
        self
    }

    #[must_use]
    pub fn num_beats(&self) -> usize {
        usize::from(self.len) + 1
    }

    #[must_use]
    pub fn beat_bytes(&self) -> u64 {
        1 << self.size
    }

    /// Address of beat `index` of this burst.
    #[must_use]
    pub fn beat_addr(&self, index: usize) -> u64 {
        let offset = self.beat_bytes() * index as u64;
        match self.burst {
            Burst::Fixed => self.addr,
            Burst::Incr => self.addr.wrapping_add(offset),
            Burst::Decr => self.addr.wrapping_sub(offset),
        }
    }

    /// The 4 KiB page of the request address.
    #[must_use]
    pub fn page(&self) -> u64 {
        self.addr >> PAGE_SHIFT
    }

    /// True for an atomic write that also returns read data.
    #[must_use]
    pub fn expects_read_data(&self) -> bool {
        self.atomic.is_some_and(|op| op.expects_read_data())
    }
}

impl fmt::Display for AddrReq {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: id={:#x} addr={:#x} {} x{} size={}",
            self.tag,
            self.id,
            self.addr,
            self.burst,
            self.num_beats(),
            self.size
        )?;
        if let Some(op) = &self.atomic {
            write!(f, " {op:?}")?;
        }
        Ok(())
    }
}

impl Tagged for AddrReq {
    fn id(&self) -> Id {
        self.tag
    }
}

impl SimObject for AddrReq {}

/// One beat of write data.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteBeat {
    pub tag: Id,
    pub data: u64,

    /// Byte enables, bit `i` enables byte `i` of `data`.
    pub strb: u8,

    pub last: bool,
}

impl WriteBeat {
    /// A beat with all bytes enabled.
    #[must_use]
    pub fn new(tag: Id, data: u64, last: bool) -> Self {
        Self {
            tag,
            data,
            strb: 0xff,
            last,
        }
    }
}

impl fmt::Display for WriteBeat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: data={:#x} strb={:#x}", self.tag, self.data, self.strb)?;
        if self.last {
            write!(f, " last")?;
        }
        Ok(())
    }
}

impl Tagged for WriteBeat {
    fn id(&self) -> Id {
        self.tag
    }
}

impl SimObject for WriteBeat {}

/// A write response.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteResp {
    pub tag: Id,
    pub id: u32,
    pub status: RespStatus,
}

impl fmt::Display for WriteResp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: id={:#x} {}", self.tag, self.id, self.status)
    }
}

impl Tagged for WriteResp {
    fn id(&self) -> Id {
        self.tag
    }
}

impl SimObject for WriteResp {}

/// One beat of read data.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadBeat {
    pub tag: Id,
    pub id: u32,
    pub data: u64,
    pub status: RespStatus,
    pub last: bool,
}

impl fmt::Display for ReadBeat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: id={:#x} data={:#x} {}",
            self.tag, self.id, self.data, self.status
        )?;
        if self.last {
            write!(f, " last")?;
        }
        Ok(())
    }
}

impl Tagged for ReadBeat {
    fn id(&self) -> Id {
        self.tag
    }
}

impl SimObject for ReadBeat {}

/// Return `id` with only the low `bits` bits kept.
#[must_use]
pub fn mask_id(id: u32, bits: u32) -> u32 {
    if bits >= u32::BITS {
        id
    } else {
        id & ((1 << bits) - 1)
    }
}
