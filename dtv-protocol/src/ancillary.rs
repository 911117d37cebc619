//! Ancillary descriptor storage at the tail of a PDU buffer.
//!
//! A buffer that carries file descriptors has two logical regions inside one
//! allocation:
//!
//! ```text
//! +--------+-----------+---------+----------+-------------+------------------------+
//! | header |  payload  | padding | count:u32| fds:i32 * n | cmsghdr + fds (padded) |
//! +--------+-----------+---------+----------+-------------+------------------------+
//!                                ^ aligned to ANCILLARY_ALIGNMENT
//! ```
//!
//! Only header and payload go on the wire as regular bytes. The tail holds
//! the descriptor set and the `SOL_SOCKET`/`SCM_RIGHTS` control record the
//! transport hands to `sendmsg`. All tail fields use native byte order.

use std::mem::size_of;
use std::os::fd::RawFd;

use crate::error::ProtocolError;

/// Alignment of the descriptor region relative to the start of the buffer.
pub const ANCILLARY_ALIGNMENT: usize = 8;

const COUNT_SIZE: usize = size_of::<u32>();
const FD_SIZE: usize = size_of::<libc::c_int>();

/// Round `offset` up to the next multiple of `align` (a power of two).
pub const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Equivalent of `CMSG_ALIGN`.
pub const fn cmsg_align(len: usize) -> usize {
    align_up(len, size_of::<usize>())
}

const fn cmsg_header_len() -> usize {
    cmsg_align(size_of::<libc::cmsghdr>())
}

/// Equivalent of `CMSG_LEN`: header plus `data_len` bytes, unpadded.
pub const fn cmsg_len(data_len: usize) -> usize {
    cmsg_header_len() + data_len
}

/// Equivalent of `CMSG_SPACE`: header plus `data_len` bytes, padded.
pub const fn cmsg_space(data_len: usize) -> usize {
    cmsg_header_len() + cmsg_align(data_len)
}

fn control_offset(fd_count: usize) -> usize {
    cmsg_align(COUNT_SIZE + FD_SIZE * fd_count)
}

/// Size of the tail region for `fd_count` descriptors, excluding the
/// alignment padding in front of it.
pub fn region_size(fd_count: usize) -> usize {
    control_offset(fd_count) + cmsg_space(FD_SIZE * fd_count)
}

/// Header of the control message built into the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    pub level: i32,
    pub kind: i32,
    /// Exact `cmsg_len`; also the `msg_controllen` to send with.
    pub len: usize,
}

impl ControlHeader {
    pub fn is_scm_rights(&self) -> bool {
        self.level == libc::SOL_SOCKET && self.kind == libc::SCM_RIGHTS
    }
}

/// Write the descriptor set and its control record into `tail`.
///
/// `tail` must start at an [`ANCILLARY_ALIGNMENT`] boundary of the owning
/// buffer and be exactly [`region_size`] bytes long.
pub fn build(tail: &mut [u8], fds: &[RawFd]) -> Result<ControlHeader, ProtocolError> {
    let needed = region_size(fds.len());
    if tail.len() != needed {
        return Err(ProtocolError::EncodingOverflow {
            needed,
            available: tail.len(),
        });
    }

    let count = u32::try_from(fds.len()).map_err(|_| ProtocolError::EncodingOverflow {
        needed: fds.len(),
        available: u32::MAX as usize,
    })?;
    tail[..COUNT_SIZE].copy_from_slice(&count.to_ne_bytes());
    for (i, fd) in fds.iter().enumerate() {
        let at = COUNT_SIZE + i * FD_SIZE;
        tail[at..at + FD_SIZE].copy_from_slice(&fd.to_ne_bytes());
    }

    let data_len = FD_SIZE * fds.len();
    let header = ControlHeader {
        level: libc::SOL_SOCKET,
        kind: libc::SCM_RIGHTS,
        len: cmsg_len(data_len),
    };

    let control = &mut tail[control_offset(fds.len())..];
    let hdr_len = cmsg_header_len();
    let len_width = size_of::<libc::cmsghdr>() - 2 * size_of::<libc::c_int>();
    if len_width == size_of::<u32>() {
        control[..len_width].copy_from_slice(&(header.len as u32).to_ne_bytes());
    } else {
        control[..len_width].copy_from_slice(&header.len.to_ne_bytes());
    }
    control[len_width..len_width + 4].copy_from_slice(&header.level.to_ne_bytes());
    control[len_width + 4..len_width + 8].copy_from_slice(&header.kind.to_ne_bytes());
    for (i, fd) in fds.iter().enumerate() {
        let at = hdr_len + i * FD_SIZE;
        control[at..at + FD_SIZE].copy_from_slice(&fd.to_ne_bytes());
    }

    Ok(header)
}

/// Read-only view over a built tail region.
#[derive(Debug, Clone, Copy)]
pub struct AncillaryView<'a> {
    region: &'a [u8],
    header: ControlHeader,
}

impl<'a> AncillaryView<'a> {
    pub(crate) fn new(region: &'a [u8], header: ControlHeader) -> Self {
        Self { region, header }
    }

    /// Number of descriptors attached.
    pub fn fd_count(&self) -> usize {
        let mut raw = [0u8; COUNT_SIZE];
        raw.copy_from_slice(&self.region[..COUNT_SIZE]);
        u32::from_ne_bytes(raw) as usize
    }

    /// Descriptor values, in attach order.
    pub fn fds(&self) -> Vec<RawFd> {
        (0..self.fd_count())
            .map(|i| {
                let at = COUNT_SIZE + i * FD_SIZE;
                let mut raw = [0u8; FD_SIZE];
                raw.copy_from_slice(&self.region[at..at + FD_SIZE]);
                RawFd::from_ne_bytes(raw)
            })
            .collect()
    }

    /// Control message header.
    pub fn control(&self) -> ControlHeader {
        self.header
    }

    /// Control message bytes, exactly `controllen` long.
    pub fn control_bytes(&self) -> &'a [u8] {
        let start = control_offset(self.fd_count());
        &self.region[start..start + self.header.len]
    }
}
