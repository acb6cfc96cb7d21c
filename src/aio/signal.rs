use crate::error::{Result, StorageError};
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use nix::sys::eventfd::{eventfd, EfdFlags};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// Eventfd the device bumps once per completion, registered with its own
/// epoll instance so pollers can wait with a timeout.
#[derive(Debug)]
pub struct EventSignal {
    epoll: Epoll,
    eventfd: File,
}

impl EventSignal {
    pub fn new() -> Result<Self> {
        let fd = eventfd(0, EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)
            .map_err(|e| StorageError::device("eventfd", e))?;
        let eventfd = File::from(fd);
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| StorageError::device("epoll_create", e))?;
        epoll
            .add(&eventfd, EpollEvent::new(EpollFlags::EPOLLIN, 0))
            .map_err(|e| StorageError::device("epoll_ctl", e))?;
        Ok(Self { epoll, eventfd })
    }

    /// Descriptor handed to the device in the async context.
    pub fn raw_fd(&self) -> RawFd {
        self.eventfd.as_raw_fd()
    }

    /// Block until the eventfd is readable or `timeout` passes. Returns
    /// whether anything became ready.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        let mut events = [EpollEvent::empty(); 1];
        let timeout_ms = timeout.as_millis().min(isize::MAX as u128) as isize;
        match self.epoll.wait(&mut events, timeout_ms) {
            Ok(ready) => Ok(ready > 0),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(StorageError::device("epoll_wait", e)),
        }
    }

    /// Take the accumulated completion counter, `None` if it is zero.
    pub fn read_counter(&self) -> Result<Option<u64>> {
        let mut raw = [0u8; 8];
        match (&self.eventfd).read_exact(&mut raw) {
            Ok(()) => Ok(Some(u64::from_ne_bytes(raw))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::BorrowedFd;

    fn bump(signal: &EventSignal, n: u64) {
        // SAFETY: the descriptor belongs to `signal`, which outlives this call.
        let fd = unsafe { BorrowedFd::borrow_raw(signal.raw_fd()) };
        let mut writer = File::from(fd.try_clone_to_owned().unwrap());
        writer.write_all(&n.to_ne_bytes()).unwrap();
    }

    #[test]
    fn test_idle_wait_times_out() {
        let signal = EventSignal::new().unwrap();
        assert!(!signal.wait(Duration::from_millis(5)).unwrap());
        assert_eq!(signal.read_counter().unwrap(), None);
    }

    #[test]
    fn test_counter_accumulates_until_read() {
        let signal = EventSignal::new().unwrap();
        bump(&signal, 2);
        bump(&signal, 3);

        assert!(signal.wait(Duration::from_millis(100)).unwrap());
        assert_eq!(signal.read_counter().unwrap(), Some(5));
        assert_eq!(signal.read_counter().unwrap(), None);
    }
}
