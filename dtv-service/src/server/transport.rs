//! Outbound side of a client connection.
//!
//! Plain PDUs are written as bytes. PDUs with an ancillary tail are sent
//! with `sendmsg`, using the control record built into the tail as the
//! message's control data so the descriptors travel as `SCM_RIGHTS`.

use std::io;
use std::os::fd::{AsRawFd, RawFd};

use dtv_protocol::{AncillaryView, SealedPdu};
use nix::errno::Errno;
use nix::sys::socket::MsgFlags;
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;

#[derive(Debug)]
pub struct Transport {
    writer: OwnedWriteHalf,
}

impl Transport {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self { writer }
    }

    /// Send one PDU.
    pub async fn send(&mut self, pdu: &SealedPdu) -> io::Result<()> {
        match pdu.ancillary() {
            None => self.writer.write_all(pdu.frame()).await,
            Some(tail) => self.send_with_fds(pdu.frame(), tail).await,
        }
    }

    async fn send_with_fds(&mut self, frame: &[u8], tail: AncillaryView<'_>) -> io::Result<()> {
        if !tail.control().is_scm_rights() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "ancillary tail is not an SCM_RIGHTS record",
            ));
        }
        let control = tail.control_bytes();

        let stream: &UnixStream = self.writer.as_ref();
        let sent = loop {
            stream.writable().await?;
            let result = stream.try_io(Interest::WRITABLE, || {
                send_control(stream.as_raw_fd(), frame, control)
            });
            match result {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        };

        // Descriptors went with the first chunk; the rest is plain bytes.
        if sent < frame.len() {
            self.writer.write_all(&frame[sent..]).await?;
        }
        Ok(())
    }
}

/// One `sendmsg` call carrying `frame` and the prebuilt `control` record.
fn send_control(fd: RawFd, frame: &[u8], control: &[u8]) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: frame.as_ptr() as *mut libc::c_void,
        iov_len: frame.len(),
    };
    // SAFETY: msghdr is plain data; every pointer set below outlives the call
    // and sendmsg only reads through them.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_ptr() as *mut libc::c_void;
    msg.msg_controllen = control.len() as _;

    let flags = MsgFlags::MSG_NOSIGNAL.bits();
    let sent = Errno::result(unsafe { libc::sendmsg(fd, &msg, flags) })?;
    Ok(sent as usize)
}
