//! Linux epoll backend
//!
//! User events are `eventfd`s; interest is tracked per-fd so a fd armed
//! for both directions gets a single epoll registration with both bits
//! set, and is torn down once neither direction is still wanted.

use super::{EventId, LoopReason, PollResult};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

/// Marks an epoll `data.u64` payload as naming a user event's fd rather
/// than a plain I/O fd (fds never use the top bit).
const USER_EVENT_FLAG: u64 = 1 << 63;

#[derive(Default)]
struct FdInterest {
    read_data: Option<u64>,
    write_data: Option<u64>,
    in_epoll: bool,
}

pub struct Poller {
    epoll_fd: RawFd,
    fd_interest: HashMap<RawFd, FdInterest>,
    user_events: HashMap<RawFd, u64>,
    events_buf: Vec<libc::epoll_event>,
}

impl Poller {
    pub fn new(max_events: usize) -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll_fd,
            fd_interest: HashMap::new(),
            user_events: HashMap::new(),
            events_buf: vec![unsafe { std::mem::zeroed() }; max_events.max(1)],
        })
    }

    /// Allocate an eventfd and bind `data` to it for later delivery via
    /// [`Poller::send_event`].
    pub fn register_event(&mut self, data: u64) -> io::Result<EventId> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        self.user_events.insert(fd, data);

        let mut ev = epoll_event_for(USER_EVENT_FLAG | fd as u64, libc::EPOLLIN as u32);
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            self.user_events.remove(&fd);
            unsafe { libc::close(fd) };
            return Err(err);
        }
        Ok(EventId(fd))
    }

    /// Fire a user event from any thread. Safe to call concurrently with
    /// this poller's `run_once` on another thread — an eventfd write is a
    /// plain syscall on a shared fd.
    pub fn send_event(id: EventId) {
        let one: u64 = 1;
        unsafe {
            libc::write(id.0, &one as *const u64 as *const libc::c_void, 8);
        }
    }

    /// Drop a registered user event, closing its eventfd.
    pub fn close_event(&mut self, id: EventId) {
        if self.user_events.remove(&id.0).is_some() {
            unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, id.0, std::ptr::null_mut());
                libc::close(id.0);
            }
        }
    }

    /// Arm one-shot read interest on `fd`.
    pub fn request_read(&mut self, fd: RawFd, data: u64) -> io::Result<()> {
        self.fd_interest.entry(fd).or_default().read_data = Some(data);
        self.rearm(fd)
    }

    /// Arm one-shot write interest on `fd`.
    pub fn request_write(&mut self, fd: RawFd, data: u64) -> io::Result<()> {
        self.fd_interest.entry(fd).or_default().write_data = Some(data);
        self.rearm(fd)
    }

    /// Withdraw a previously-requested read interest, e.g. because
    /// another descriptor of the same wait round fired first.
    pub fn cancel_read(&mut self, fd: RawFd) {
        self.cancel_direction(fd, true);
    }

    /// Withdraw a previously-requested write interest.
    pub fn cancel_write(&mut self, fd: RawFd) {
        self.cancel_direction(fd, false);
    }

    fn cancel_direction(&mut self, fd: RawFd, read: bool) {
        let Some(state) = self.fd_interest.get_mut(&fd) else { return };
        if read {
            state.read_data = None;
        } else {
            state.write_data = None;
        }
        if state.read_data.is_none() && state.write_data.is_none() {
            self.drop_fd(fd);
        }
    }

    fn rearm(&mut self, fd: RawFd) -> io::Result<()> {
        let state = self.fd_interest.get(&fd).expect("rearm called without interest registered");
        let mut events = 0u32;
        if state.read_data.is_some() {
            events |= libc::EPOLLIN as u32;
        }
        if state.write_data.is_some() {
            events |= libc::EPOLLOUT as u32;
        }
        events |= libc::EPOLLONESHOT as u32;

        let mut ev = epoll_event_for(fd as u64, events);
        let op = if state.in_epoll { libc::EPOLL_CTL_MOD } else { libc::EPOLL_CTL_ADD };
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        self.fd_interest.get_mut(&fd).unwrap().in_epoll = true;
        Ok(())
    }

    fn drop_fd(&mut self, fd: RawFd) {
        if let Some(state) = self.fd_interest.remove(&fd) {
            if state.in_epoll {
                unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
            }
        }
    }

    /// Wait up to `timeout_ms` (negative = forever), dispatch at most
    /// `max_iter` events.
    pub fn run_once(&mut self, max_iter: usize, timeout_ms: i64) -> (LoopReason, Vec<PollResult>) {
        let cap = max_iter.min(self.events_buf.len()).max(1);
        let timeout = if timeout_ms < 0 { -1 } else { timeout_ms.min(i32::MAX as i64) as i32 };

        let n = loop {
            let ret = unsafe {
                libc::epoll_wait(self.epoll_fd, self.events_buf.as_mut_ptr(), cap as i32, timeout)
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                groutine_core::kerror!("epoll_wait failed: {err}");
                return (LoopReason::TimedOut, Vec::new());
            }
            break ret as usize;
        };

        if n == 0 {
            return (LoopReason::TimedOut, Vec::new());
        }

        let mut results = Vec::with_capacity(n);

        for i in 0..n {
            let ev = self.events_buf[i];
            let data = unsafe { ev.u64 };
            let events = ev.events;

            if data & USER_EVENT_FLAG != 0 {
                let fd = (data & !USER_EVENT_FLAG) as RawFd;
                let mut buf = [0u8; 8];
                unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
                if let Some(&payload) = self.user_events.get(&fd) {
                    results.push(PollResult::UserEvent { data: payload });
                }
                continue;
            }

            let fd = data as RawFd;
            let hangup = events & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0;
            let readable = events & libc::EPOLLIN as u32 != 0;
            let writable = events & libc::EPOLLOUT as u32 != 0;

            let Some(state) = self.fd_interest.get_mut(&fd) else { continue };

            if hangup {
                let read_data = state.read_data.take();
                let write_data = state.write_data.take();
                self.drop_fd(fd);
                if let Some(d) = read_data {
                    results.push(PollResult::FdPanic { fd, data: d });
                }
                if let Some(d) = write_data {
                    results.push(PollResult::FdPanic { fd, data: d });
                }
                continue;
            }

            let fired_read = if readable { state.read_data.take() } else { None };
            let fired_write = if writable { state.write_data.take() } else { None };
            let still_armed = state.read_data.is_some() || state.write_data.is_some();

            if let Some(d) = fired_read {
                results.push(PollResult::FdReady { fd, data: d, readable: true, writable: false });
            }
            if let Some(d) = fired_write {
                results.push(PollResult::FdReady { fd, data: d, readable: false, writable: true });
            }

            if still_armed {
                let _ = self.rearm(fd);
            } else {
                self.drop_fd(fd);
            }
        }

        let reason = if n == cap { LoopReason::MaxIterReached } else { LoopReason::Dispatched(n) };
        (reason, results)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        for fd in self.user_events.keys().copied().collect::<Vec<_>>() {
            unsafe { libc::close(fd) };
        }
        unsafe { libc::close(self.epoll_fd) };
    }
}

fn epoll_event_for(data: u64, events: u32) -> libc::epoll_event {
    libc::epoll_event { events, u64: data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_timeout_with_nothing_ready() {
        let mut poller = Poller::new(8).unwrap();
        let (reason, results) = poller.run_once(8, 10);
        assert_eq!(reason, LoopReason::TimedOut);
        assert!(results.is_empty());
    }

    #[test]
    fn test_user_event_delivers_payload() {
        let mut poller = Poller::new(8).unwrap();
        let id = poller.register_event(777).unwrap();
        Poller::send_event(id);

        let (reason, results) = poller.run_once(8, 1000);
        assert_eq!(reason, LoopReason::Dispatched(1));
        assert_eq!(results, vec![PollResult::UserEvent { data: 777 }]);
    }

    #[test]
    fn test_pipe_read_ready() {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let mut poller = Poller::new(8).unwrap();
        poller.request_read(read_fd, 42).unwrap();
        unsafe { libc::write(write_fd, b"x".as_ptr() as *const libc::c_void, 1) };

        let (reason, results) = poller.run_once(8, 1000);
        assert_eq!(reason, LoopReason::Dispatched(1));
        assert_eq!(results, vec![PollResult::FdReady { fd: read_fd, data: 42, readable: true, writable: false }]);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn test_hangup_reports_panic() {
        let mut fds = [0i32; 2];
        unsafe { libc::pipe(fds.as_mut_ptr()) };
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let mut poller = Poller::new(8).unwrap();
        poller.request_read(read_fd, 9).unwrap();
        unsafe { libc::close(write_fd) };

        let (_, results) = poller.run_once(8, 1000);
        assert_eq!(results, vec![PollResult::FdPanic { fd: read_fd, data: 9 }]);

        unsafe { libc::close(read_fd) };
    }

    #[test]
    fn test_send_event_from_another_thread() {
        let poller = Arc::new(Mutex::new(Poller::new(8).unwrap()));
        let id = poller.lock().unwrap().register_event(55).unwrap();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            Poller::send_event(id);
        });

        let (reason, results) = poller.lock().unwrap().run_once(8, 1000);
        handle.join().unwrap();
        assert_eq!(reason, LoopReason::Dispatched(1));
        assert_eq!(results, vec![PollResult::UserEvent { data: 55 }]);
    }
}
