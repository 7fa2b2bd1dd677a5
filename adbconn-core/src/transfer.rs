//! Passing descriptors over a local socket.
//!
//! The coordinator only depends on [`DescriptorTransfer`]; the
//! `SCM_RIGHTS` implementation is the one platform-specific piece of the
//! handoff path.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{
    ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr, recvmsg, sendmsg,
};

use crate::control::HandoffDirective;
use crate::error::AdbConnError;
use crate::sync::retry_eintr;

/// Sends a directive plus descriptors to the agent.
///
/// The receiver gets its own copies; the caller keeps (and later closes)
/// the descriptors it passed in.
pub trait DescriptorTransfer: Send + Sync {
    fn transfer(
        &self,
        channel: BorrowedFd<'_>,
        directive: HandoffDirective,
        fds: &[BorrowedFd<'_>],
    ) -> Result<(), AdbConnError>;
}

/// `sendmsg` with `SCM_RIGHTS` ancillary data, one record per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScmRightsTransfer;

impl DescriptorTransfer for ScmRightsTransfer {
    fn transfer(
        &self,
        channel: BorrowedFd<'_>,
        directive: HandoffDirective,
        fds: &[BorrowedFd<'_>],
    ) -> Result<(), AdbConnError> {
        let wire = directive.to_wire();
        send_with_fds(channel, &wire, fds)
    }
}

/// Send `data` as one record with `fds` attached.
pub fn send_with_fds(
    channel: BorrowedFd<'_>,
    data: &[u8],
    fds: &[BorrowedFd<'_>],
) -> Result<(), AdbConnError> {
    let raw: Vec<RawFd> = fds.iter().map(|fd| fd.as_raw_fd()).collect();
    let iov = [IoSlice::new(data)];
    let rights = [ControlMessage::ScmRights(&raw)];
    let cmsgs: &[ControlMessage<'_>] = if raw.is_empty() { &[] } else { &rights };
    let sent = retry_eintr(|| {
        sendmsg::<UnixAddr>(
            channel.as_raw_fd(),
            &iov,
            cmsgs,
            MsgFlags::MSG_EOR,
            None,
        )
    })?;
    if sent != data.len() {
        return Err(AdbConnError::Other(format!(
            "short descriptor record: sent {sent} of {} bytes",
            data.len()
        )));
    }
    Ok(())
}

/// Receive one record into `buf`, taking ownership of any descriptors
/// that came with it. Returns the number of data bytes received.
pub fn recv_with_fds(
    channel: BorrowedFd<'_>,
    buf: &mut [u8],
    max_fds: usize,
) -> Result<(usize, Vec<OwnedFd>), AdbConnError> {
    // SAFETY: CMSG_SPACE only computes a size.
    let space = unsafe { libc::CMSG_SPACE((size_of::<RawFd>() * max_fds.max(1)) as u32) };
    let mut cmsg_buf = vec![0u8; space as usize];
    let mut iov = [IoSliceMut::new(buf)];
    loop {
        let msg = match recvmsg::<UnixAddr>(
            channel.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::MSG_CMSG_CLOEXEC,
        ) {
            Err(Errno::EINTR) => continue,
            other => other?,
        };

        let mut fds = Vec::new();
        for cmsg in msg.cmsgs()? {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                // SAFETY: the kernel installed these descriptors for us and
                // nothing else refers to them.
                fds.extend(
                    received
                        .into_iter()
                        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
                );
            }
        }
        return Ok((msg.bytes, fds));
    }
}
