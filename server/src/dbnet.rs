/*
 * Created on Sun May 09 2021
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2021, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! # Event loop
//!
//! A single-threaded, level-triggered reactor built directly on
//! `libc::poll` over raw file descriptors from `std::net`. One round
//! does: poll, accept, service ready connections in readiness order,
//! sweep idle connections.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Instant;

use bytes::BytesMut;

use crate::commands;
use crate::engine::idlelist::{IdleList, IdleStore};
use crate::engine::store::Store;
use crate::protocol::{self, ResponseWriter};
use crate::util::error::SkyResult;

const READ_CHUNK: usize = libsky::BUF_CAP;
const IDLE_TIMEOUT_MS: u64 = 5000;

struct Conn {
    stream: TcpStream,
    want_read: bool,
    want_write: bool,
    want_close: bool,
    incoming: BytesMut,
    outgoing: BytesMut,
    last_active: u64,
    idle_prev: Option<RawFd>,
    idle_next: Option<RawFd>,
}

#[derive(Default)]
struct ConnTable(HashMap<RawFd, Conn>);

impl IdleStore for ConnTable {
    fn idle_prev(&self, fd: RawFd) -> Option<RawFd> {
        self.0.get(&fd).and_then(|c| c.idle_prev)
    }
    fn idle_next(&self, fd: RawFd) -> Option<RawFd> {
        self.0.get(&fd).and_then(|c| c.idle_next)
    }
    fn set_idle_prev(&mut self, fd: RawFd, prev: Option<RawFd>) {
        if let Some(c) = self.0.get_mut(&fd) {
            c.idle_prev = prev;
        }
    }
    fn set_idle_next(&mut self, fd: RawFd, next: Option<RawFd>) {
        if let Some(c) = self.0.get_mut(&fd) {
            c.idle_next = next;
        }
    }
}

pub struct Server {
    listener: TcpListener,
    conns: ConnTable,
    idle: IdleList,
    store: Store,
    clock: Instant,
    idle_timeout_ms: u64,
}

impl Server {
    pub fn bind(addr: &str) -> SkyResult<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            conns: ConnTable::default(),
            idle: IdleList::new(),
            store: Store::new(),
            clock: Instant::now(),
            idle_timeout_ms: IDLE_TIMEOUT_MS,
        })
    }

    /// Overrides the idle-connection timeout. Exercised by tests that
    /// need to observe a reaper sweep without a multi-second wait.
    pub fn with_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    /// The address the listener actually bound to. Useful for tests that
    /// bind to port 0 and need to discover the assigned port.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    fn now_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }

    /// Runs the reactor forever. Only returns on a fatal `poll()` error;
    /// per-connection errors are handled in place and never propagate.
    pub fn run(&mut self) -> SkyResult<()> {
        loop {
            let mut pollfds = Vec::with_capacity(1 + self.conns.0.len());
            pollfds.push(libc::pollfd {
                fd: self.listener.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            for (&fd, conn) in self.conns.0.iter() {
                let mut events = libc::POLLERR;
                if conn.want_read {
                    events |= libc::POLLIN;
                }
                if conn.want_write {
                    events |= libc::POLLOUT;
                }
                pollfds.push(libc::pollfd { fd, events, revents: 0 });
            }

            let timeout_ms = self.next_timeout_ms();
            let nready =
                unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
            if nready < 0 {
                let e = std::io::Error::last_os_error();
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            if pollfds[0].revents != 0 {
                self.handle_accept();
            }

            for pfd in &pollfds[1..] {
                if pfd.revents == 0 {
                    continue;
                }
                let fd = pfd.fd;
                if !self.conns.0.contains_key(&fd) {
                    continue;
                }
                self.touch(fd);

                if pfd.revents & libc::POLLIN != 0 {
                    self.handle_read(fd);
                }
                if pfd.revents & libc::POLLOUT != 0 && self.conns.0.contains_key(&fd) {
                    self.handle_write(fd);
                }

                let should_close = self
                    .conns
                    .0
                    .get(&fd)
                    .map(|c| c.want_close)
                    .unwrap_or(false)
                    || pfd.revents & libc::POLLERR != 0;
                if should_close {
                    self.destroy_conn(fd);
                }
            }

            self.process_timers();
        }
    }

    fn next_timeout_ms(&self) -> i32 {
        match self.idle.front() {
            None => -1,
            Some(fd) => {
                let last = self.conns.0[&fd].last_active;
                let deadline = last + self.idle_timeout_ms;
                let now = self.now_ms();
                if deadline <= now {
                    0
                } else {
                    (deadline - now) as i32
                }
            }
        }
    }

    /// Sweeps connections whose idle deadline has passed. The reference
    /// implementation's `process_timers` stops at `next_ms >= now_ms`,
    /// which treats an exactly-expired connection as not-yet-expired;
    /// this stops only once a connection's deadline is strictly in the
    /// future, matching the single `last_active + IDLE_TIMEOUT_MS <= now`
    /// expiry rule used everywhere else.
    fn process_timers(&mut self) {
        let now = self.now_ms();
        while let Some(fd) = self.idle.front() {
            let last = self.conns.0[&fd].last_active;
            if last + self.idle_timeout_ms > now {
                break;
            }
            log::debug!("closing idle connection fd={fd}");
            self.destroy_conn(fd);
        }
    }

    fn touch(&mut self, fd: RawFd) {
        self.idle.touch(&mut self.conns, fd);
        let now = self.now_ms();
        if let Some(c) = self.conns.0.get_mut(&fd) {
            c.last_active = now;
        }
    }

    fn handle_accept(&mut self) {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    log::warn!("failed to set accepted socket non-blocking: {e}");
                    return;
                }
                let fd = stream.as_raw_fd();
                let now = self.now_ms();
                let conn = Conn {
                    stream,
                    want_read: true,
                    want_write: false,
                    want_close: false,
                    incoming: BytesMut::new(),
                    outgoing: BytesMut::new(),
                    last_active: now,
                    idle_prev: None,
                    idle_next: None,
                };
                self.conns.0.insert(fd, conn);
                self.idle.push_back(&mut self.conns, fd);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => log::warn!("accept() failed: {e}"),
        }
    }

    fn handle_read(&mut self, fd: RawFd) {
        let mut scratch = [0u8; READ_CHUNK];
        let read_result = self.conns.0.get_mut(&fd).unwrap().stream.read(&mut scratch);
        match read_result {
            Ok(0) => {
                self.conns.0.get_mut(&fd).unwrap().want_close = true;
                return;
            }
            Ok(n) => self.conns.0.get_mut(&fd).unwrap().incoming.extend_from_slice(&scratch[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(_) => {
                self.conns.0.get_mut(&fd).unwrap().want_close = true;
                return;
            }
        }

        let mut incoming = std::mem::take(&mut self.conns.0.get_mut(&fd).unwrap().incoming);
        loop {
            match protocol::parse_request(&incoming) {
                Ok(Some((args, consumed))) => {
                    let mut resp = ResponseWriter::new();
                    commands::dispatch(&mut self.store, &args, &mut resp);
                    resp.finish(&mut self.conns.0.get_mut(&fd).unwrap().outgoing);
                    let _ = incoming.split_to(consumed);
                }
                Ok(None) => break,
                Err(protocol::ProtocolError) => {
                    self.conns.0.get_mut(&fd).unwrap().want_close = true;
                    break;
                }
            }
        }
        self.conns.0.get_mut(&fd).unwrap().incoming = incoming;

        let should_write = {
            let conn = self.conns.0.get_mut(&fd).unwrap();
            if !conn.outgoing.is_empty() {
                conn.want_read = false;
                conn.want_write = true;
            }
            !conn.want_close && !conn.outgoing.is_empty()
        };
        if should_write {
            self.handle_write(fd);
        }
    }

    fn handle_write(&mut self, fd: RawFd) {
        let conn = self.conns.0.get_mut(&fd).unwrap();
        debug_assert!(!conn.outgoing.is_empty());
        match conn.stream.write(&conn.outgoing) {
            Ok(0) => {
                conn.want_close = true;
                return;
            }
            Ok(n) => {
                let _ = conn.outgoing.split_to(n);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(_) => {
                conn.want_close = true;
                return;
            }
        }
        if conn.outgoing.is_empty() {
            conn.want_read = true;
            conn.want_write = false;
        }
    }

    fn destroy_conn(&mut self, fd: RawFd) {
        self.idle.unlink(&mut self.conns, fd);
        self.conns.0.remove(&fd);
    }
}
